use crate::detection::{DetectionResult, VerdictAction};
use crate::dom::{NodeId, PageDom, BLOCKED_ATTR, REASON_ATTR, WARNED_ATTR};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

pub const BLOCKED_TITLE: &str = "Click to reveal (Sensitive content detected)";
pub const REVEALED_TITLE: &str = "Sensitive content revealed";
pub const WARNED_TITLE: &str = "Potentially sensitive content";
pub const REVEAL_PROMPT: &str =
    "This image may contain sensitive content. Do you want to view it?";

/// Click-to-reveal handler of a blocked image. It runs on the first click
/// only, whatever the user answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealState {
    Armed,
    Revealed,
    Declined,
}

/// Writes verdicts onto image nodes.
pub struct MarkEngine {
    dom: Arc<dyn PageDom>,
    reveal: Mutex<FxHashMap<NodeId, RevealState>>,
}

impl MarkEngine {
    pub fn new(dom: Arc<dyn PageDom>) -> Self {
        Self {
            dom,
            reveal: Mutex::new(FxHashMap::default()),
        }
    }

    fn reveal_states(&self) -> MutexGuard<'_, FxHashMap<NodeId, RevealState>> {
        self.reveal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `result.action` to the image at `node`.
    pub fn apply(&self, node: NodeId, image_url: &str, result: &DetectionResult) {
        let reason = serde_json::to_string(&result.predictions).unwrap_or_default();
        match result.action {
            VerdictAction::Block => {
                self.mark_blocked(node, &reason);
                warn!("Blocked image: {} {}", image_url, reason);
            }
            VerdictAction::Warn => {
                self.mark_warned(node, &reason);
                warn!("Warned about image: {} {}", image_url, reason);
            }
            VerdictAction::Allow => info!("Allowed image: {}", image_url),
        }
    }

    fn mark_blocked(&self, node: NodeId, reason: &str) {
        self.dom.set_image_style(node, "filter", "blur(20px)");
        self.dom.set_image_style(node, "opacity", "0.3");
        self.dom.set_image_attribute(node, BLOCKED_ATTR, "true");
        self.dom.set_image_attribute(node, REASON_ATTR, reason);
        self.dom.set_image_title(node, BLOCKED_TITLE);
        self.dom.set_image_style(node, "cursor", "pointer");
        self.reveal_states().insert(node, RevealState::Armed);
    }

    fn mark_warned(&self, node: NodeId, reason: &str) {
        self.dom.set_image_attribute(node, WARNED_ATTR, "true");
        self.dom.set_image_attribute(node, REASON_ATTR, reason);
        self.dom.set_image_title(node, WARNED_TITLE);
        self.dom.set_image_style(node, "border", "3px solid orange");
    }

    /// Click on `node`. Returns the new state when this click consumed the
    /// reveal handler, `None` for an ordinary click.
    pub fn reveal(&self, node: NodeId) -> Option<RevealState> {
        {
            let mut states = self.reveal_states();
            match states.get_mut(&node) {
                Some(state) if *state == RevealState::Armed => *state = RevealState::Declined,
                _ => return None,
            }
        }

        // The prompt blocks, keep the lock released around it.
        if !self.dom.confirm(REVEAL_PROMPT) {
            return Some(RevealState::Declined);
        }

        self.dom.set_image_style(node, "filter", "none");
        self.dom.set_image_style(node, "opacity", "1");
        self.dom.set_image_title(node, REVEALED_TITLE);
        self.reveal_states().insert(node, RevealState::Revealed);
        Some(RevealState::Revealed)
    }

    pub fn reveal_state(&self, node: NodeId) -> Option<RevealState> {
        self.reveal_states().get(&node).copied()
    }
}
