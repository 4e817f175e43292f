use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub page: PageConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub stats: StatsConfig,
}

/// Per-page scan settings. Mutated in place by `UPDATE_CONFIG` and
/// `TOGGLE_EXTENSION`, never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    #[serde(default = "default_scan_enabled")]
    pub enabled: bool,
    #[serde(default = "default_block_threshold", alias = "block_threshold")]
    pub block_threshold: f64,
    #[serde(default = "default_warn_threshold", alias = "warn_threshold")]
    pub warn_threshold: f64,
    #[serde(default, alias = "max_images_per_scan")]
    pub max_images_per_scan: ImageBudget,
    /// Milliseconds between two detector submissions of one sweep.
    #[serde(default = "default_scan_delay", alias = "scan_delay")]
    pub scan_delay: u64,
}

/// Partial `ScanConfig` carried by `UPDATE_CONFIG`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfigPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub block_threshold: Option<f64>,
    #[serde(default)]
    pub warn_threshold: Option<f64>,
    // `Infinity` does not survive JSON, it arrives as null.
    #[serde(default, deserialize_with = "deserialize_budget_patch")]
    pub max_images_per_scan: Option<ImageBudget>,
    #[serde(default)]
    pub scan_delay: Option<u64>,
}

/// Cap on detector submissions per sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageBudget {
    #[default]
    Unlimited,
    Limited(usize),
}

impl ImageBudget {
    pub fn is_exhausted(&self, submitted: usize) -> bool {
        match self {
            Self::Unlimited => false,
            Self::Limited(max) => submitted >= *max,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImageBudgetRepr {
    Count(u64),
    Float(f64),
    Text(String),
}

impl TryFrom<ImageBudgetRepr> for ImageBudget {
    type Error = String;

    fn try_from(repr: ImageBudgetRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ImageBudgetRepr::Count(n) => Ok(Self::Limited(usize::try_from(n).unwrap_or(usize::MAX))),
            ImageBudgetRepr::Float(f) if f.is_nan() => Err("image budget must be a number".into()),
            ImageBudgetRepr::Float(f) if f.is_infinite() && f > 0.0 => Ok(Self::Unlimited),
            // Negative budgets stop a sweep before the first submission.
            ImageBudgetRepr::Float(f) if f <= 0.0 => Ok(Self::Limited(0)),
            ImageBudgetRepr::Float(f) if f >= usize::MAX as f64 => Ok(Self::Unlimited),
            ImageBudgetRepr::Float(f) => Ok(Self::Limited(f.floor() as usize)),
            ImageBudgetRepr::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "infinity" | "unlimited" => Ok(Self::Unlimited),
                other => Err(format!("invalid image budget `{other}`")),
            },
        }
    }
}

impl<'de> Deserialize<'de> for ImageBudget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let repr = Option::<ImageBudgetRepr>::deserialize(deserializer)?;
        match repr {
            Some(repr) => ImageBudget::try_from(repr).map_err(serde::de::Error::custom),
            None => Ok(ImageBudget::Unlimited),
        }
    }
}

impl Serialize for ImageBudget {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Unlimited => serializer.serialize_none(),
            Self::Limited(max) => serializer.serialize_u64(*max as u64),
        }
    }
}

fn deserialize_budget_patch<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<ImageBudget>, D::Error> {
    ImageBudget::deserialize(deserializer).map(Some)
}

impl ScanConfig {
    /// Merges the fields present in `patch`. Thresholds are clamped to
    /// `[0, 1]`; a threshold pair that would put block below warn is dropped.
    pub fn merge(&mut self, patch: &ScanConfigPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }

        let block = patch
            .block_threshold
            .map(clamp_threshold)
            .unwrap_or(self.block_threshold);
        let warn_at = patch
            .warn_threshold
            .map(clamp_threshold)
            .unwrap_or(self.warn_threshold);
        if block >= warn_at {
            self.block_threshold = block;
            self.warn_threshold = warn_at;
        } else {
            warn!(
                "Ignoring threshold update: block {} is below warn {}",
                block, warn_at
            );
        }

        if let Some(budget) = patch.max_images_per_scan {
            self.max_images_per_scan = budget;
        }
        if let Some(delay) = patch.scan_delay {
            self.scan_delay = delay;
        }
    }

    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.block_threshold)
            && (0.0..=1.0).contains(&self.warn_threshold)
            && self.block_threshold >= self.warn_threshold
    }
}

fn clamp_threshold(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[derive(Debug, Deserialize, Clone)]
pub struct PageConfig {
    #[serde(default = "default_min_image_side")]
    pub min_image_width: u32,
    #[serde(default = "default_min_image_side")]
    pub min_image_height: u32,
    /// URL scheme of the extension's own pages, which are never gated.
    #[serde(default = "default_extension_scheme")]
    pub extension_scheme: String,
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_analyze_endpoint")]
    pub analyze_endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_enable")]
    pub enable: bool,
    #[serde(default = "default_log_blocked")]
    pub log_blocked: bool,
    #[serde(default = "default_log_all_detections")]
    pub log_all_detections: bool,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_detection_log_sinks")]
    pub detection_log_sinks: Vec<String>,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_stats_enable")]
    pub enable: bool,
}

// Defaults
fn default_scan_enabled() -> bool {
    true
}
fn default_block_threshold() -> f64 {
    0.8
}
fn default_warn_threshold() -> f64 {
    0.5
}
fn default_scan_delay() -> u64 {
    500
}
fn default_min_image_side() -> u32 {
    50
}
fn default_extension_scheme() -> String {
    "chrome-extension".to_string()
}
fn default_observer_buffer() -> usize {
    256
}
fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_analyze_endpoint() -> String {
    "/api/detection/image".to_string()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_log_enable() -> bool {
    true
}
fn default_log_blocked() -> bool {
    true
}
fn default_log_all_detections() -> bool {
    true
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_detection_log_sinks() -> Vec<String> {
    vec!["console".to_string()]
}
fn default_memory_capacity() -> usize {
    100
}
fn default_stats_enable() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: default_scan_enabled(),
            block_threshold: default_block_threshold(),
            warn_threshold: default_warn_threshold(),
            max_images_per_scan: ImageBudget::Unlimited,
            scan_delay: default_scan_delay(),
        }
    }
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            min_image_width: default_min_image_side(),
            min_image_height: default_min_image_side(),
            extension_scheme: default_extension_scheme(),
            observer_buffer: default_observer_buffer(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            analyze_endpoint: default_analyze_endpoint(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable: default_log_enable(),
            log_blocked: default_log_blocked(),
            log_all_detections: default_log_all_detections(),
            format: default_log_format(),
            level: default_log_level(),
            detection_log_sinks: default_detection_log_sinks(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enable: default_stats_enable(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config TOML")?;
        if !config.scan.is_valid() {
            anyhow::bail!(
                "scan thresholds must lie in [0, 1] with block >= warn (block {}, warn {})",
                config.scan.block_threshold,
                config.scan.warn_threshold
            );
        }
        Ok(config)
    }
}
