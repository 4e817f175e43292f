use crate::config::LoggingConfig;
use crate::logger::types::{DetectionLogAction, DetectionLogEntry, DetectionLogSink};
use tracing::{info, warn};

pub struct ConsoleLogSink {
    config: LoggingConfig,
}

impl ConsoleLogSink {
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    fn should_log(&self, action: DetectionLogAction) -> bool {
        if !self.config.enable {
            return false;
        }
        match action {
            DetectionLogAction::Blocked | DetectionLogAction::Warned => self.config.log_blocked,
            _ => self.config.log_all_detections,
        }
    }
}

impl DetectionLogSink for ConsoleLogSink {
    fn log(&self, entry: &DetectionLogEntry) {
        if !self.should_log(entry.action) {
            return;
        }

        if self.config.format == "json" {
            info!(
                target: "detection",
                image = %entry.image_url,
                domain = %entry.page_domain,
                action = ?entry.action,
                category = ?entry.top_category,
                score = ?entry.top_score,
                lat = %entry.latency_ms
            );
            return;
        }

        let verdict = match (&entry.top_category, entry.top_score) {
            (Some(category), Some(score)) => format!("{} {:.2}", category, score),
            _ => "no predictions".to_string(),
        };
        match entry.action {
            DetectionLogAction::Blocked | DetectionLogAction::Warned => warn!(
                "[{}] {:?} {} ({}) [{}ms]",
                entry.page_domain, entry.action, entry.image_url, verdict, entry.latency_ms
            ),
            _ => info!(
                "[{}] {:?} {} ({}) [{}ms]",
                entry.page_domain, entry.action, entry.image_url, verdict, entry.latency_ms
            ),
        }
    }
}
