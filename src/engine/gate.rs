use super::guard::ContextGuard;
use super::matcher::PatternMatcher;
use super::state::ScanSession;
use super::traits::BlacklistMatcher;
use crate::dom::{Overlay, OverlayKind, PageDom, BLACKLIST_OVERLAY_ID};
use crate::runtime::ExtensionRuntime;
use crate::stats::StatsCollector;
use crate::storage::{read_blacklist, ExtensionStorage};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The two buttons on the blocking overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAction {
    Leave,
    /// Opens the options page, the page stays blocked.
    OpenSettings,
}

/// Decides whether the whole page is off limits before anything else runs.
pub struct BlacklistGate {
    dom: Arc<dyn PageDom>,
    storage: Arc<dyn ExtensionStorage>,
    runtime: Arc<dyn ExtensionRuntime>,
    guard: Arc<ContextGuard>,
    session: Arc<ScanSession>,
    stats: Arc<StatsCollector>,
    extension_scheme: String,
}

impl BlacklistGate {
    pub fn new(
        dom: Arc<dyn PageDom>,
        storage: Arc<dyn ExtensionStorage>,
        runtime: Arc<dyn ExtensionRuntime>,
        guard: Arc<ContextGuard>,
        session: Arc<ScanSession>,
        stats: Arc<StatsCollector>,
        extension_scheme: impl Into<String>,
    ) -> Self {
        Self {
            dom,
            storage,
            runtime,
            guard,
            session,
            stats,
            extension_scheme: extension_scheme.into(),
        }
    }

    /// Returns true when the current page matches the blacklist. The overlay
    /// is rendered at most once however often this runs.
    pub async fn check_and_block_current_page(&self) -> bool {
        let location = self.dom.location();
        if location.scheme == self.extension_scheme {
            return false;
        }
        if !self.guard.ensure_valid_context() {
            return false;
        }

        let matcher = PatternMatcher::new(read_blacklist(self.storage.as_ref()).await);
        debug!(
            "Checking {} against {} blacklist patterns",
            location.hostname,
            matcher.len()
        );
        let Some(pattern) = matcher.check(&location.hostname) else {
            return false;
        };

        if self.session.mark_blocked(pattern) {
            self.stats.inc_page_blocked();
        }
        self.apply_overlay(pattern);
        warn!(
            "Page blocked by blacklist: host={} pattern={}",
            location.hostname, pattern
        );
        true
    }

    fn apply_overlay(&self, pattern: &str) {
        if self.dom.has_element(BLACKLIST_OVERLAY_ID) {
            return;
        }
        self.dom.append_overlay(Overlay {
            element_id: BLACKLIST_OVERLAY_ID.to_string(),
            kind: OverlayKind::Blacklist {
                pattern: pattern.to_string(),
            },
            text: format!(
                "This page has been blocked. The current domain matches your blacklist. Blocked pattern: {}",
                pattern
            ),
        });
        self.dom.lock_scroll();
    }

    pub fn handle_overlay_action(&self, action: OverlayAction) {
        match action {
            OverlayAction::Leave => {
                if self.dom.history_length() > 1 {
                    self.dom.history_back();
                } else {
                    self.dom.replace_location("about:blank");
                }
            }
            OverlayAction::OpenSettings => {
                if let Err(e) = self.runtime.open_options_page() {
                    error!("Failed to open options page: {:#}", e);
                }
            }
        }
    }
}
