//! Initialization helpers for content script startup.

use crate::config::Config;
use crate::detection::create_detector;
use crate::engine::{Orchestrator, PageSurfaces};
use crate::logger::DetectionLogger;
use crate::stats::StatsCollector;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Sets up the tracing subscriber with the configured filters.
pub fn setup_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(log_filter(&config.logging.level))
    });

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
    {
        eprintln!("Logging already initialized: {}", e);
    }
}

fn log_filter(level: &str) -> String {
    let mut filter = level.to_string();
    // HTTP client internals stay quiet unless explicitly enabled/overridden
    for target in ["reqwest", "hyper", "hyper_util"] {
        if !filter.contains(target) {
            filter.push_str(&format!(",{}=warn", target));
        }
    }
    filter
}

/// Wires the HTTP detector and the detection audit log into a page
/// orchestrator. Must be called from within a tokio runtime.
pub fn init_orchestrator(
    config: &Config,
    surfaces: PageSurfaces,
    stats: Arc<StatsCollector>,
) -> Result<Arc<Orchestrator>> {
    let detector = create_detector(
        config.detection.clone(),
        surfaces.storage.clone(),
        stats.clone(),
    )?;

    let detection_log = if config.logging.enable {
        DetectionLogger::new(config.logging.clone())
    } else {
        info!("Detection logging disabled.");
        DetectionLogger::disabled()
    };

    Ok(Orchestrator::new(
        config,
        surfaces,
        detector,
        stats,
        detection_log,
    ))
}
