use anyhow::anyhow;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use xdynamic_guard::config::{Config, ImageBudget};
use xdynamic_guard::detection::{
    DetectionContext, DetectionResult, DetectionStatus, ImageDetector, Predictions, VerdictAction,
};
use xdynamic_guard::dom::{
    ImageElement, MemoryDom, NodeId, NodeSpec, PageDom, BLACKLIST_OVERLAY_ID, BLOCKED_ATTR,
    LOADED_ATTR, RELOAD_BANNER_ID,
};
use xdynamic_guard::engine::{
    MutationBatch, Orchestrator, PageSurfaces, RevealState, ScanOutcome, ScanPhase,
};
use xdynamic_guard::logger::DetectionLogger;
use xdynamic_guard::runtime::{ChannelRuntime, OutboundMessage, RuntimeMessage};
use xdynamic_guard::stats::StatsCollector;
use xdynamic_guard::storage::{
    MemoryStorage, StorageArea, AUTH_TOKEN_KEY, BLACKLIST_KEY, EXTENSION_ENABLED_KEY,
};

// --- Mocks ---

#[derive(Debug, Clone, Copy)]
enum Reply {
    Verdict(VerdictAction),
    Pending,
    Fail,
}

/// Scripted detector. Unscripted URLs are allowed.
#[derive(Default)]
struct MockDetector {
    calls: AtomicUsize,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    // (entered, release): holds every call until released.
    hold: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl MockDetector {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn holding(entered: Arc<Notify>, release: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            hold: Some((entered, release)),
            ..Self::default()
        })
    }

    fn reply(&self, url: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ImageDetector for MockDetector {
    async fn analyze_image(
        &self,
        image_url: &str,
        _context: &DetectionContext,
    ) -> anyhow::Result<DetectionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.hold {
            entered.notify_one();
            release.notified().await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(image_url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Verdict(VerdictAction::Allow));

        match reply {
            Reply::Verdict(action) => {
                let mut predictions = Predictions::new();
                predictions.insert("nsfw".to_string(), 0.95);
                Ok(DetectionResult::completed(predictions, action))
            }
            Reply::Pending => Ok(DetectionResult {
                status: DetectionStatus::Pending,
                predictions: None,
                action: VerdictAction::Allow,
            }),
            Reply::Fail => Err(anyhow!("detector unavailable")),
        }
    }
}

// --- Fixture ---

struct Page {
    dom: Arc<MemoryDom>,
    storage: Arc<MemoryStorage>,
    runtime: Arc<ChannelRuntime>,
    outbound: mpsc::Receiver<OutboundMessage>,
    detector: Arc<MockDetector>,
    stats: Arc<StatsCollector>,
    orchestrator: Arc<Orchestrator>,
}

fn quick_config() -> Config {
    let mut config = Config::default();
    config.scan.scan_delay = 0;
    config
}

fn page_with(href: &str, config: Config, detector: Arc<MockDetector>) -> Page {
    let dom = Arc::new(MemoryDom::new(href).unwrap());
    let storage = Arc::new(MemoryStorage::new());
    storage.set(StorageArea::Local, AUTH_TOKEN_KEY, json!("token-123"));
    let (runtime, outbound) = ChannelRuntime::new("ext-id", 32);
    let runtime = Arc::new(runtime);
    let stats = StatsCollector::new();

    let orchestrator = Orchestrator::new(
        &config,
        PageSurfaces {
            dom: dom.clone(),
            storage: storage.clone(),
            runtime: runtime.clone(),
        },
        detector.clone(),
        stats.clone(),
        DetectionLogger::disabled(),
    );

    Page {
        dom,
        storage,
        runtime,
        outbound,
        detector,
        stats,
        orchestrator,
    }
}

fn page(href: &str) -> Page {
    page_with(href, quick_config(), MockDetector::new())
}

fn img(url: &str) -> NodeSpec {
    NodeSpec::Image(ImageElement::new(url, 200, 200))
}

fn image(dom: &MemoryDom, node: NodeId) -> ImageElement {
    dom.image(node).unwrap()
}

// --- Tests ---

#[tokio::test]
async fn test_initialize_marks_document_and_scans() {
    let mut p = page("https://example.com/gallery");
    let node = p.dom.append_to_body(img("https://cdn.example/a.jpg"));
    p.detector
        .reply("https://cdn.example/a.jpg", Reply::Verdict(VerdictAction::Block));

    let handle = p.orchestrator.initialize();
    let outcome = handle.initial_scan.await.unwrap().unwrap();

    assert_eq!(p.dom.root_attribute(LOADED_ATTR).as_deref(), Some("true"));
    assert_eq!(outcome, ScanOutcome::Completed { submitted: 1 });
    assert!(image(&p.dom, node).is_blocked());
    assert_eq!(p.orchestrator.session().phase(), ScanPhase::Waiting);

    match p.outbound.try_recv().unwrap() {
        OutboundMessage::DetectionResult { data } => {
            assert_eq!(data.action, VerdictAction::Block)
        }
    }

    let snapshot = p.stats.get_snapshot();
    assert_eq!(snapshot.submitted, 1);
    assert_eq!(snapshot.blocked, 1);

    handle.observer.disconnect().await;
}

#[tokio::test]
async fn test_blacklisted_page_short_circuits_scanning() {
    let p = page("https://www.example.com/");
    p.dom.append_to_body(img("https://cdn.example/a.jpg"));
    p.storage.set(
        StorageArea::Sync,
        BLACKLIST_KEY,
        json!(["other.net", "*.example.com"]),
    );

    let first = p.orchestrator.scan_page().await.unwrap();
    let second = p.orchestrator.scan_page().await.unwrap();

    let expected = ScanOutcome::Blocked {
        pattern: "*.example.com".to_string(),
    };
    assert_eq!(first, expected);
    assert_eq!(second, expected);
    assert_eq!(p.dom.count_elements(BLACKLIST_OVERLAY_ID), 1);
    assert_eq!(p.detector.calls(), 0);
    assert_eq!(p.orchestrator.session().phase(), ScanPhase::Blocked);
}

#[tokio::test]
async fn test_blocked_page_stays_blocked_after_blacklist_cleared() {
    let p = page("https://example.com/");
    p.dom.append_to_body(img("https://cdn.example/a.jpg"));
    p.storage
        .set(StorageArea::Sync, BLACKLIST_KEY, json!(["example.com"]));

    assert_eq!(
        p.orchestrator.scan_page().await.unwrap(),
        ScanOutcome::Blocked {
            pattern: "example.com".to_string()
        }
    );

    p.storage.set(StorageArea::Sync, BLACKLIST_KEY, json!([]));
    let response = p.orchestrator.handle_message(RuntimeMessage::ScanPage).await;

    assert!(response.success);
    assert_eq!(p.detector.calls(), 0);
    assert!(p.orchestrator.session().is_page_blocked());
    assert_eq!(p.orchestrator.session().phase(), ScanPhase::Blocked);
    assert_eq!(p.dom.count_elements(BLACKLIST_OVERLAY_ID), 1);
}

#[tokio::test]
async fn test_concurrent_sweeps_submit_once() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let detector = MockDetector::holding(entered.clone(), release.clone());
    let p = page_with("https://example.com/", quick_config(), detector);
    let node = p.dom.append_to_body(img("https://cdn.example/shared.jpg"));

    let first = tokio::spawn({
        let orchestrator = p.orchestrator.clone();
        async move { orchestrator.scan_page().await }
    });
    entered.notified().await;

    // Both the full sweep and the observer see the in-flight image.
    let second = p.orchestrator.scan_page().await.unwrap();
    assert_eq!(second, ScanOutcome::Completed { submitted: 0 });

    let observer = p.orchestrator.spawn_mutation_observer();
    observer.observe(MutationBatch::new(vec![node])).await.unwrap();

    release.notify_one();
    let first = first.await.unwrap().unwrap();
    observer.disconnect().await;

    assert_eq!(first, ScanOutcome::Completed { submitted: 1 });
    assert_eq!(p.detector.calls(), 1);
}

#[tokio::test]
async fn test_invalidation_mid_scan_stops_sweep() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let detector = MockDetector::holding(entered.clone(), release.clone());
    let mut p = page_with("https://example.com/", quick_config(), detector);
    p.dom.append_to_body(img("https://cdn.example/first.jpg"));
    p.dom.append_to_body(img("https://cdn.example/second.jpg"));
    p.detector
        .reply("https://cdn.example/first.jpg", Reply::Verdict(VerdictAction::Block));

    let sweep = tokio::spawn({
        let orchestrator = p.orchestrator.clone();
        async move { orchestrator.scan_page().await }
    });
    entered.notified().await;

    p.runtime.invalidate();
    release.notify_one();
    let outcome = sweep.await.unwrap().unwrap();

    assert_eq!(outcome, ScanOutcome::Completed { submitted: 1 });
    assert_eq!(p.detector.calls(), 1);
    assert!(p.outbound.try_recv().is_err());
    assert!(!p.orchestrator.session().is_processed("https://cdn.example/second.jpg"));
}

#[tokio::test]
async fn test_failed_submission_is_retried() {
    let p = page("https://example.com/");
    let node = p.dom.append_to_body(img("https://cdn.example/flaky.jpg"));
    p.detector.reply("https://cdn.example/flaky.jpg", Reply::Fail);
    p.detector.reply(
        "https://cdn.example/flaky.jpg",
        Reply::Verdict(VerdictAction::Block),
    );

    let outcome = p.orchestrator.scan_page().await.unwrap();
    assert_eq!(outcome, ScanOutcome::Completed { submitted: 1 });
    assert!(!image(&p.dom, node).is_blocked());
    assert!(!p.orchestrator.session().is_processed("https://cdn.example/flaky.jpg"));
    assert_eq!(p.stats.get_snapshot().failed, 1);

    p.orchestrator.scan_page().await.unwrap();
    assert!(image(&p.dom, node).is_blocked());
    assert_eq!(p.detector.calls(), 2);
}

#[tokio::test]
async fn test_ineligible_images_are_never_submitted() {
    let p = page("https://example.com/");
    p.dom.append_to_body(img("data:image/png;base64,iVBORw0KGgo="));
    p.dom.append_to_body(NodeSpec::Image(ImageElement::new(
        "https://cdn.example/icon.png",
        10,
        10,
    )));
    let mut blocked = ImageElement::new("https://cdn.example/old.jpg", 200, 200);
    blocked
        .attributes
        .insert(BLOCKED_ATTR.to_string(), "true".to_string());
    p.dom.append_to_body(NodeSpec::Image(blocked));

    let outcome = p.orchestrator.scan_page().await.unwrap();

    assert_eq!(outcome, ScanOutcome::Completed { submitted: 0 });
    assert_eq!(p.detector.calls(), 0);
}

#[tokio::test]
async fn test_warned_image_is_not_reselected() {
    let p = page("https://example.com/");
    let node = p.dom.append_to_body(img("https://cdn.example/edgy.jpg"));
    p.detector.reply(
        "https://cdn.example/edgy.jpg",
        Reply::Verdict(VerdictAction::Warn),
    );

    p.orchestrator.scan_page().await.unwrap();
    assert!(image(&p.dom, node).is_warned());

    p.orchestrator.scan_page().await.unwrap();
    let observer = p.orchestrator.spawn_mutation_observer();
    observer.observe(MutationBatch::new(vec![node])).await.unwrap();
    observer.disconnect().await;

    assert_eq!(p.detector.calls(), 1);
    assert_eq!(p.stats.get_snapshot().warned, 1);
}

#[tokio::test]
async fn test_update_config_touches_only_given_fields() {
    let p = page("https://example.com/");
    let before = p.orchestrator.session().config();

    let message: RuntimeMessage =
        serde_json::from_value(json!({"type": "UPDATE_CONFIG", "config": {"scanDelay": 1000}}))
            .unwrap();
    let response = p.orchestrator.handle_message(message).await;
    assert!(response.success);

    let after = p.orchestrator.session().config();
    assert_eq!(after.scan_delay, 1000);
    assert_eq!(after.enabled, before.enabled);
    assert_eq!(after.block_threshold, before.block_threshold);
    assert_eq!(after.warn_threshold, before.warn_threshold);
    assert_eq!(after.max_images_per_scan, before.max_images_per_scan);
}

#[tokio::test]
async fn test_invalid_context_rejects_scan_page() {
    let p = page("https://example.com/");
    p.dom.append_to_body(img("https://cdn.example/a.jpg"));
    p.runtime.invalidate();

    let response = p.orchestrator.handle_message(RuntimeMessage::ScanPage).await;

    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Extension context invalidated"));
    assert_eq!(p.detector.calls(), 0);
    assert_eq!(p.dom.count_elements(RELOAD_BANNER_ID), 1);
}

#[tokio::test]
async fn test_scan_page_reports_storage_failure() {
    let p = page("https://example.com/");
    p.storage.set_failing(StorageArea::Local, true);

    let response = p.orchestrator.handle_message(RuntimeMessage::ScanPage).await;

    assert!(!response.success);
    assert!(response
        .error
        .unwrap_or_default()
        .contains("Failed to read extension enabled flag"));
    assert_eq!(p.orchestrator.session().phase(), ScanPhase::Waiting);
}

#[tokio::test]
async fn test_disabled_and_unauthenticated_pages_wait() {
    let p = page("https://example.com/");
    p.dom.append_to_body(img("https://cdn.example/a.jpg"));

    let response = p
        .orchestrator
        .handle_message(RuntimeMessage::ToggleExtension { enabled: false })
        .await;
    assert!(response.success);
    assert_eq!(
        p.orchestrator.scan_page().await.unwrap(),
        ScanOutcome::Disabled
    );

    p.orchestrator
        .handle_message(RuntimeMessage::ToggleExtension { enabled: true })
        .await;
    p.storage
        .set(StorageArea::Local, EXTENSION_ENABLED_KEY, json!(false));
    assert_eq!(
        p.orchestrator.scan_page().await.unwrap(),
        ScanOutcome::Disabled
    );

    p.storage.remove(StorageArea::Local, EXTENSION_ENABLED_KEY);
    p.storage.set(StorageArea::Local, AUTH_TOKEN_KEY, json!(""));
    assert_eq!(
        p.orchestrator.scan_page().await.unwrap(),
        ScanOutcome::Unauthenticated
    );
    assert_eq!(p.detector.calls(), 0);
}

#[tokio::test]
async fn test_reveal_fires_once() {
    let p = page("https://example.com/");
    let node = p.dom.append_to_body(img("https://cdn.example/nsfw.jpg"));
    p.detector.reply(
        "https://cdn.example/nsfw.jpg",
        Reply::Verdict(VerdictAction::Block),
    );
    p.orchestrator.scan_page().await.unwrap();

    p.dom.queue_confirm(true);
    p.dom.queue_confirm(true);
    assert_eq!(p.orchestrator.handle_click(node), Some(RevealState::Revealed));
    assert_eq!(p.orchestrator.handle_click(node), None);
    assert_eq!(p.dom.confirm_prompts().len(), 1);
    assert_eq!(
        image(&p.dom, node).style.get("opacity").map(String::as_str),
        Some("1")
    );
}

#[tokio::test(start_paused = true)]
async fn test_pacing_skips_delay_after_last_candidate() {
    let mut config = Config::default();
    config.scan.scan_delay = 500;
    let p = page_with("https://example.com/", config, MockDetector::new());
    for name in ["a", "b", "c"] {
        p.dom
            .append_to_body(img(&format!("https://cdn.example/{}.jpg", name)));
    }

    let start = tokio::time::Instant::now();
    let outcome = p.orchestrator.scan_page().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(outcome, ScanOutcome::Completed { submitted: 3 });
    assert!(elapsed >= Duration::from_millis(1000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_pacing_skips_delay_after_budget_is_spent() {
    let mut config = Config::default();
    config.scan.scan_delay = 500;
    config.scan.max_images_per_scan = ImageBudget::Limited(1);
    let p = page_with("https://example.com/", config, MockDetector::new());
    p.dom.append_to_body(img("https://cdn.example/a.jpg"));
    p.dom.append_to_body(img("https://cdn.example/b.jpg"));

    let start = tokio::time::Instant::now();
    let outcome = p.orchestrator.scan_page().await.unwrap();

    assert_eq!(outcome, ScanOutcome::Completed { submitted: 1 });
    assert!(start.elapsed() < Duration::from_millis(500), "{:?}", start.elapsed());
}

#[tokio::test]
async fn test_budget_caps_submissions() {
    let mut config = quick_config();
    config.scan.max_images_per_scan = ImageBudget::Limited(2);
    let p = page_with("https://example.com/", config, MockDetector::new());
    for name in ["a", "b", "c", "d"] {
        p.dom
            .append_to_body(img(&format!("https://cdn.example/{}.jpg", name)));
    }

    let outcome = p.orchestrator.scan_page().await.unwrap();

    assert_eq!(outcome, ScanOutcome::Completed { submitted: 2 });
    assert_eq!(p.detector.calls(), 2);
    assert!(p.orchestrator.session().is_processed("https://cdn.example/a.jpg"));
    assert!(!p.orchestrator.session().is_processed("https://cdn.example/c.jpg"));
}

#[tokio::test]
async fn test_observer_scans_inserted_subtrees() {
    let p = page("https://example.com/");
    let observer = p.orchestrator.spawn_mutation_observer();

    let card = p.dom.append_to_body(NodeSpec::container(
        "article",
        vec![
            img("https://cdn.example/one.jpg"),
            NodeSpec::container("figure", vec![img("https://cdn.example/two.jpg")]),
        ],
    ));
    let lone = p.dom.append_to_body(img("https://cdn.example/three.jpg"));
    observer
        .observe(MutationBatch::new(vec![card, lone]))
        .await
        .unwrap();
    observer.disconnect().await;

    assert_eq!(p.detector.calls(), 3);
    assert!(p.orchestrator.session().is_processed("https://cdn.example/two.jpg"));
}

#[tokio::test]
async fn test_observer_disconnects_after_invalidation() {
    let p = page("https://example.com/");
    let observer = p.orchestrator.spawn_mutation_observer();
    p.runtime.invalidate();

    let node = p.dom.append_to_body(img("https://cdn.example/late.jpg"));
    observer.observe(MutationBatch::new(vec![node])).await.unwrap();

    for _ in 0..100 {
        if observer.is_disconnected() {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert!(observer.is_disconnected());
    assert!(observer
        .observe(MutationBatch::new(vec![node]))
        .await
        .is_err());
    assert_eq!(p.detector.calls(), 0);
    assert_eq!(p.dom.count_elements(RELOAD_BANNER_ID), 1);
}

#[tokio::test]
async fn test_blacklist_change_regates_page() {
    let p = page("https://shop.example.com/");
    assert_eq!(
        p.orchestrator.scan_page().await.unwrap(),
        ScanOutcome::Completed { submitted: 0 }
    );

    p.storage
        .set(StorageArea::Sync, BLACKLIST_KEY, json!(["*.example.com"]));
    let keys = vec![BLACKLIST_KEY.to_string()];

    assert!(!p.orchestrator.on_storage_changed("session", &keys).await);
    assert!(
        !p.orchestrator
            .on_storage_changed("sync", &["authToken".to_string()])
            .await
    );
    assert!(!p.dom.has_element(BLACKLIST_OVERLAY_ID));

    assert!(p.orchestrator.on_storage_changed("sync", &keys).await);
    assert!(p.orchestrator.on_storage_changed("local", &keys).await);
    assert_eq!(p.dom.count_elements(BLACKLIST_OVERLAY_ID), 1);
    assert!(p.dom.is_scroll_locked());
    assert_eq!(p.stats.get_snapshot().pages_blocked, 1);
}

#[tokio::test]
async fn test_only_completed_results_are_reported() {
    let mut p = page("https://example.com/");
    let pending = p.dom.append_to_body(img("https://cdn.example/pending.jpg"));
    p.dom.append_to_body(img("https://cdn.example/fine.jpg"));
    p.detector
        .reply("https://cdn.example/pending.jpg", Reply::Pending);

    p.orchestrator.scan_page().await.unwrap();

    let mut reported = Vec::new();
    while let Ok(OutboundMessage::DetectionResult { data }) = p.outbound.try_recv() {
        reported.push(data);
    }
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].action, VerdictAction::Allow);
    assert_eq!(image(&p.dom, pending).title, None);
    assert_eq!(p.stats.get_snapshot().allowed, 1);
}
