use crate::config::{ScanConfig, ScanConfigPatch};
use crate::detection::Thresholds;
use rustc_hash::FxHashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Where the orchestrator is in the lifecycle of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPhase {
    #[default]
    Idle,
    Gating,
    /// Terminal. The page matched a blacklist pattern.
    Blocked,
    Scanning,
    /// Waiting for mutations or runtime messages.
    Waiting,
}

#[derive(Debug)]
struct SessionState {
    config: ScanConfig,
    processed: FxHashSet<Box<str>>,
    blocked_pattern: Option<String>,
    phase: ScanPhase,
}

/// Mutable state of one page load, shared by every sweep and handler.
///
/// All access goes through one mutex that is never held across an await.
#[derive(Debug)]
pub struct ScanSession {
    state: Mutex<SessionState>,
}

impl ScanSession {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            state: Mutex::new(SessionState {
                config,
                processed: FxHashSet::default(),
                blocked_pattern: None,
                phase: ScanPhase::Idle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> ScanConfig {
        self.lock().config.clone()
    }

    pub fn thresholds(&self) -> Thresholds {
        let state = self.lock();
        Thresholds {
            block: state.config.block_threshold,
            warn: state.config.warn_threshold,
        }
    }

    pub fn merge_config(&self, patch: &ScanConfigPatch) {
        self.lock().config.merge(patch);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().config.enabled = enabled;
    }

    /// Registers `url` as submitted. Returns false when another sweep already
    /// holds it.
    pub fn claim(&self, url: &str) -> bool {
        let mut state = self.lock();
        if state.processed.contains(url) {
            return false;
        }
        state.processed.insert(url.into());
        true
    }

    /// Forgets a failed submission so a later sweep may retry it.
    pub fn release(&self, url: &str) {
        self.lock().processed.remove(url);
    }

    pub fn is_processed(&self, url: &str) -> bool {
        self.lock().processed.contains(url)
    }

    pub fn processed_count(&self) -> usize {
        self.lock().processed.len()
    }

    /// One-way. Returns true only for the call that actually blocked the page.
    pub fn mark_blocked(&self, pattern: &str) -> bool {
        let mut state = self.lock();
        state.phase = ScanPhase::Blocked;
        if state.blocked_pattern.is_some() {
            return false;
        }
        state.blocked_pattern = Some(pattern.to_string());
        true
    }

    pub fn is_page_blocked(&self) -> bool {
        self.lock().blocked_pattern.is_some()
    }

    pub fn matched_pattern(&self) -> Option<String> {
        self.lock().blocked_pattern.clone()
    }

    pub fn phase(&self) -> ScanPhase {
        self.lock().phase
    }

    /// Ignored once the page is blocked.
    pub fn set_phase(&self, phase: ScanPhase) {
        let mut state = self.lock();
        if state.phase != ScanPhase::Blocked {
            state.phase = phase;
        }
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}
