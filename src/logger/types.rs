use crate::detection::{DetectionResult, DetectionStatus, VerdictAction};

/// One detector verdict as recorded by the detection audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionLogEntry {
    pub image_url: String,
    pub page_domain: String,
    pub action: DetectionLogAction,
    pub top_category: Option<String>,
    pub top_score: Option<f64>,
    pub latency_ms: u64,
}

impl DetectionLogEntry {
    pub fn from_result(
        image_url: &str,
        page_domain: &str,
        result: &DetectionResult,
        latency_ms: u64,
    ) -> Self {
        let top = result.top_prediction();
        Self {
            image_url: image_url.to_string(),
            page_domain: page_domain.to_string(),
            action: DetectionLogAction::from_result(result),
            top_category: top.map(|(category, _)| category.to_string()),
            top_score: top.map(|(_, score)| score),
            latency_ms,
        }
    }

    pub fn failed(image_url: &str, page_domain: &str, latency_ms: u64) -> Self {
        Self {
            image_url: image_url.to_string(),
            page_domain: page_domain.to_string(),
            action: DetectionLogAction::Failed,
            top_category: None,
            top_score: None,
            latency_ms,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DetectionLogAction {
    Blocked,
    Warned,
    Allowed,
    Pending,
    Failed,
}

impl DetectionLogAction {
    pub fn from_result(result: &DetectionResult) -> Self {
        match result.status {
            DetectionStatus::Pending => Self::Pending,
            DetectionStatus::Failed => Self::Failed,
            DetectionStatus::Completed => match result.action {
                VerdictAction::Block => Self::Blocked,
                VerdictAction::Warn => Self::Warned,
                VerdictAction::Allow => Self::Allowed,
            },
        }
    }
}

pub trait DetectionLogSink: Send + Sync {
    fn log(&self, entry: &DetectionLogEntry);
}
