use crate::dom::{Overlay, OverlayKind, PageDom, RELOAD_BANNER_ID};
use crate::runtime::ExtensionRuntime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

const RELOAD_BANNER_TEXT: &str =
    "XDynamic Extension was updated. Please refresh this page (F5) to continue.";

/// Watches the runtime channel. Once it has been seen dead it stays dead for
/// the rest of the page.
pub struct ContextGuard {
    runtime: Arc<dyn ExtensionRuntime>,
    dom: Arc<dyn PageDom>,
    invalidated: AtomicBool,
}

impl ContextGuard {
    pub fn new(runtime: Arc<dyn ExtensionRuntime>, dom: Arc<dyn PageDom>) -> Self {
        Self {
            runtime,
            dom,
            invalidated: AtomicBool::new(false),
        }
    }

    pub fn is_context_valid(&self) -> bool {
        if self.invalidated.load(Ordering::Acquire) {
            return false;
        }

        let valid = match self.runtime.runtime_id() {
            Ok(Some(id)) => !id.is_empty(),
            Ok(None) => false,
            Err(e) => {
                error!(
                    "Extension context invalidated. Please refresh the page. {:#}",
                    e
                );
                false
            }
        };

        if !valid {
            self.invalidated.store(true, Ordering::Release);
        }
        valid
    }

    /// Like [`is_context_valid`](Self::is_context_valid), surfacing the
    /// reload banner when the context is gone.
    pub fn ensure_valid_context(&self) -> bool {
        if self.is_context_valid() {
            return true;
        }

        warn!("Extension was reloaded. Please refresh this page (F5) for content script to work.");
        self.show_reload_banner();
        false
    }

    fn show_reload_banner(&self) {
        if self.dom.has_element(RELOAD_BANNER_ID) {
            return;
        }
        self.dom.append_overlay(Overlay {
            element_id: RELOAD_BANNER_ID.to_string(),
            kind: OverlayKind::ReloadBanner,
            text: RELOAD_BANNER_TEXT.to_string(),
        });
    }
}
