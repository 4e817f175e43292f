use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category name -> risk score in `[0, 1]`.
pub type Predictions = BTreeMap<String, f64>;

/// Categories that never push an image towards block or warn.
const SAFE_CATEGORIES: &[&str] = &["safe", "neutral", "drawings"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatus {
    Completed,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictAction {
    Block,
    Warn,
    Allow,
}

impl VerdictAction {
    /// Picks the action for the highest-scoring risk category.
    pub fn from_scores(predictions: &Predictions, thresholds: Thresholds) -> Self {
        let top = predictions
            .iter()
            .filter(|(category, _)| !SAFE_CATEGORIES.contains(&category.as_str()))
            .map(|(_, score)| *score)
            .fold(0.0_f64, f64::max);

        if top >= thresholds.block {
            Self::Block
        } else if top >= thresholds.warn {
            Self::Warn
        } else {
            Self::Allow
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Warn => "warn",
            Self::Allow => "allow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub status: DetectionStatus,
    #[serde(default)]
    pub predictions: Option<Predictions>,
    pub action: VerdictAction,
}

impl DetectionResult {
    pub fn completed(predictions: Predictions, action: VerdictAction) -> Self {
        Self {
            status: DetectionStatus::Completed,
            predictions: Some(predictions),
            action,
        }
    }

    /// Only completed results that carry predictions are applied to the page.
    pub fn is_actionable(&self) -> bool {
        self.status == DetectionStatus::Completed && self.predictions.is_some()
    }

    pub fn top_prediction(&self) -> Option<(&str, f64)> {
        self.predictions.as_ref().and_then(|predictions| {
            predictions
                .iter()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(category, score)| (category.as_str(), *score))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub block: f64,
    pub warn: f64,
}

/// Page the image was found on, sent alongside the image URL.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionContext {
    pub page_url: String,
    pub domain: String,
    pub thresholds: Thresholds,
}

/// Remote image classifier. Calls may fail and may take arbitrarily long.
#[async_trait::async_trait]
pub trait ImageDetector: Send + Sync {
    async fn analyze_image(
        &self,
        image_url: &str,
        context: &DetectionContext,
    ) -> Result<DetectionResult>;
}
