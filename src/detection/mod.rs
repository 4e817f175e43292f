pub mod http;
pub mod types;

use crate::config::DetectionConfig;
use crate::stats::StatsCollector;
use crate::storage::ExtensionStorage;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub use self::http::HttpDetectionClient;
pub use self::types::{
    DetectionContext, DetectionResult, DetectionStatus, ImageDetector, Predictions, Thresholds,
    VerdictAction,
};

pub fn create_detector(
    config: DetectionConfig,
    storage: Arc<dyn ExtensionStorage>,
    stats: Arc<StatsCollector>,
) -> Result<Arc<dyn ImageDetector>> {
    let client = HttpDetectionClient::new(config, storage, stats)?;
    info!("Using detector endpoint {}", client.endpoint());
    Ok(Arc::new(client) as Arc<dyn ImageDetector>)
}
