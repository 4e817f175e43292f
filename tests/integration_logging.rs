use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use xdynamic_guard::config::{Config, LoggingConfig};
use xdynamic_guard::detection::{
    DetectionContext, DetectionResult, ImageDetector, Predictions, VerdictAction,
};
use xdynamic_guard::dom::{ImageElement, MemoryDom, NodeSpec};
use xdynamic_guard::engine::{Orchestrator, PageSurfaces};
use xdynamic_guard::logger::{DetectionLogAction, DetectionLogEntry, DetectionLogger};
use xdynamic_guard::runtime::ChannelRuntime;
use xdynamic_guard::stats::StatsCollector;
use xdynamic_guard::storage::{MemoryStorage, StorageArea, AUTH_TOKEN_KEY};

/// Blocks `*/bad.jpg`, fails `*/broken.jpg`, allows the rest.
struct MockDetector {
    call_count: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl ImageDetector for MockDetector {
    async fn analyze_image(
        &self,
        image_url: &str,
        _context: &DetectionContext,
    ) -> anyhow::Result<DetectionResult> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if image_url.ends_with("broken.jpg") {
            anyhow::bail!("connection reset");
        }
        let mut predictions = Predictions::new();
        if image_url.ends_with("bad.jpg") {
            predictions.insert("nsfw".to_string(), 0.97);
            return Ok(DetectionResult::completed(predictions, VerdictAction::Block));
        }
        predictions.insert("safe".to_string(), 0.99);
        Ok(DetectionResult::completed(predictions, VerdictAction::Allow))
    }
}

fn memory_logging() -> LoggingConfig {
    LoggingConfig {
        detection_log_sinks: vec!["console".to_string(), "memory".to_string()],
        memory_capacity: 10,
        ..LoggingConfig::default()
    }
}

#[tokio::test]
async fn test_scan_results_reach_memory_sink() {
    let mut config = Config::default();
    config.scan.scan_delay = 0;
    config.logging = memory_logging();

    let dom = Arc::new(MemoryDom::new("https://example.com/feed").unwrap());
    for url in [
        "https://cdn.example/bad.jpg",
        "https://cdn.example/broken.jpg",
        "https://cdn.example/fine.jpg",
    ] {
        dom.append_to_body(NodeSpec::Image(ImageElement::new(url, 320, 240)));
    }
    let storage = Arc::new(MemoryStorage::new());
    storage.set(StorageArea::Local, AUTH_TOKEN_KEY, json!("token"));
    let (runtime, _outbound) = ChannelRuntime::new("ext-id", 16);
    let call_count = Arc::new(AtomicUsize::new(0));

    let logger = DetectionLogger::new(config.logging.clone());
    let buffer = logger.memory_buffer().unwrap();
    let orchestrator = Orchestrator::new(
        &config,
        PageSurfaces {
            dom,
            storage,
            runtime: Arc::new(runtime),
        },
        Arc::new(MockDetector {
            call_count: call_count.clone(),
        }),
        StatsCollector::new(),
        logger,
    );

    orchestrator.scan_page().await.unwrap();
    assert_eq!(call_count.load(Ordering::SeqCst), 3);

    // Allow time for async sink tasks to process
    for _ in 0..50 {
        if buffer.read().unwrap_or_else(PoisonError::into_inner).len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let entries: Vec<DetectionLogEntry> = buffer
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect();
    let actions: Vec<DetectionLogAction> = entries.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            DetectionLogAction::Blocked,
            DetectionLogAction::Failed,
            DetectionLogAction::Allowed,
        ]
    );
    assert_eq!(entries[0].page_domain, "example.com");
    assert_eq!(entries[0].top_category.as_deref(), Some("nsfw"));
    assert_eq!(entries[0].top_score, Some(0.97));
}

#[tokio::test]
async fn test_logger_without_sinks_accepts_entries() {
    let config = LoggingConfig {
        detection_log_sinks: Vec::new(),
        ..LoggingConfig::default()
    };
    let logger = DetectionLogger::new(config);
    assert!(logger.memory_buffer().is_none());

    logger
        .log(DetectionLogEntry {
            image_url: "https://cdn.example/a.jpg".to_string(),
            page_domain: "example.com".to_string(),
            action: DetectionLogAction::Allowed,
            top_category: Some("safe".to_string()),
            top_score: Some(0.99),
            latency_ms: 42,
        })
        .await;
}
