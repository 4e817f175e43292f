use super::discovery::{Candidate, ImageDiscovery};
use super::gate::{BlacklistGate, OverlayAction};
use super::guard::ContextGuard;
use super::marker::{MarkEngine, RevealState};
use super::state::{ScanPhase, ScanSession};
use crate::config::Config;
use crate::detection::{DetectionContext, ImageDetector, VerdictAction};
use crate::dom::{NodeId, PageDom, LOADED_ATTR};
use crate::error::GuardError;
use crate::logger::{DetectionLogEntry, DetectionLogger};
use crate::runtime::{ExtensionRuntime, MessageResponse, OutboundMessage, RuntimeMessage};
use crate::stats::StatsCollector;
use crate::storage::{
    read_authenticated, read_extension_enabled, ExtensionStorage, StorageArea, BLACKLIST_KEY,
};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Host surfaces one page is driven through.
#[derive(Clone)]
pub struct PageSurfaces {
    pub dom: Arc<dyn PageDom>,
    pub storage: Arc<dyn ExtensionStorage>,
    pub runtime: Arc<dyn ExtensionRuntime>,
}

/// How a `scan_page` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    InvalidContext,
    Blocked { pattern: String },
    Disabled,
    Unauthenticated,
    Completed { submitted: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Submission {
    Submitted,
    Skipped,
}

/// Nodes reported by one mutation observer callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub added: Vec<NodeId>,
}

impl MutationBatch {
    pub fn new(added: Vec<NodeId>) -> Self {
        Self { added }
    }
}

/// Handle to the observer task. The task stops on its own once the extension
/// context is gone, after which `observe` reports the observer as
/// disconnected.
pub struct MutationObserver {
    tx: mpsc::Sender<MutationBatch>,
    handle: JoinHandle<()>,
}

impl MutationObserver {
    pub async fn observe(&self, batch: MutationBatch) -> Result<()> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| anyhow!("Mutation observer is disconnected"))
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stops observing and waits for in-flight batches to finish.
    pub async fn disconnect(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!("Mutation observer task failed: {}", e);
        }
    }
}

/// What `initialize` leaves running.
pub struct PageHandle {
    pub initial_scan: JoinHandle<Result<ScanOutcome>>,
    pub observer: MutationObserver,
}

/// Per-page scan state machine.
pub struct Orchestrator {
    dom: Arc<dyn PageDom>,
    storage: Arc<dyn ExtensionStorage>,
    runtime: Arc<dyn ExtensionRuntime>,
    detector: Arc<dyn ImageDetector>,
    session: Arc<ScanSession>,
    guard: Arc<ContextGuard>,
    gate: BlacklistGate,
    discovery: ImageDiscovery,
    marker: MarkEngine,
    stats: Arc<StatsCollector>,
    detection_log: Arc<DetectionLogger>,
    observer_buffer: usize,
    stats_enabled: bool,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        surfaces: PageSurfaces,
        detector: Arc<dyn ImageDetector>,
        stats: Arc<StatsCollector>,
        detection_log: Arc<DetectionLogger>,
    ) -> Arc<Self> {
        let PageSurfaces {
            dom,
            storage,
            runtime,
        } = surfaces;
        let session = Arc::new(ScanSession::new(config.scan.clone()));
        let guard = Arc::new(ContextGuard::new(runtime.clone(), dom.clone()));
        let gate = BlacklistGate::new(
            dom.clone(),
            storage.clone(),
            runtime.clone(),
            guard.clone(),
            session.clone(),
            stats.clone(),
            config.page.extension_scheme.clone(),
        );
        let discovery = ImageDiscovery::new(dom.clone(), session.clone(), &config.page);
        let marker = MarkEngine::new(dom.clone());

        Arc::new(Self {
            dom,
            storage,
            runtime,
            detector,
            session,
            guard,
            gate,
            discovery,
            marker,
            stats,
            detection_log,
            observer_buffer: config.page.observer_buffer.max(1),
            stats_enabled: config.stats.enable,
        })
    }

    pub fn session(&self) -> &Arc<ScanSession> {
        &self.session
    }

    pub fn guard(&self) -> &Arc<ContextGuard> {
        &self.guard
    }

    /// Marks the document as handled, starts the initial sweep and installs
    /// the mutation observer.
    pub fn initialize(self: &Arc<Self>) -> PageHandle {
        self.dom.set_root_attribute(LOADED_ATTR, "true");

        let this = Arc::clone(self);
        let initial_scan = tokio::spawn(async move { this.scan_page().await });
        let observer = self.spawn_mutation_observer();

        info!("Content script initialized successfully");
        PageHandle {
            initial_scan,
            observer,
        }
    }

    /// Full sweep of the document.
    pub async fn scan_page(&self) -> Result<ScanOutcome> {
        self.session.set_phase(ScanPhase::Gating);

        if !self.guard.ensure_valid_context() {
            self.session.set_phase(ScanPhase::Waiting);
            return Ok(ScanOutcome::InvalidContext);
        }

        // Blocking holds for the rest of the page load.
        if let Some(pattern) = self.session.matched_pattern() {
            return Ok(ScanOutcome::Blocked { pattern });
        }

        if self.gate.check_and_block_current_page().await {
            let pattern = self.session.matched_pattern().unwrap_or_default();
            return Ok(ScanOutcome::Blocked { pattern });
        }

        match self.check_enabled_and_authenticated().await {
            Ok(None) => {}
            Ok(Some(outcome)) => {
                self.session.set_phase(ScanPhase::Waiting);
                return Ok(outcome);
            }
            Err(e) => {
                self.session.set_phase(ScanPhase::Waiting);
                return Err(e);
            }
        }

        info!("Starting page scan...");
        self.session.set_phase(ScanPhase::Scanning);

        let mut submitted = 0usize;
        let mut candidates = self.discovery.document_candidates().peekable();
        while let Some(candidate) = candidates.next() {
            let config = self.session.config();
            if config.max_images_per_scan.is_exhausted(submitted) {
                info!("Reached max images per scan ({})", submitted);
                break;
            }
            if !self.guard.is_context_valid() {
                warn!("Extension context lost mid-scan, stopping");
                break;
            }

            if self.scan_image(candidate).await == Submission::Skipped {
                continue;
            }
            submitted += 1;

            if config.scan_delay > 0
                && !config.max_images_per_scan.is_exhausted(submitted)
                && candidates.peek().is_some()
            {
                sleep(Duration::from_millis(config.scan_delay)).await;
            }
        }

        self.session.set_phase(ScanPhase::Waiting);
        info!("Page scan completed. Scanned {} images.", submitted);
        if self.stats_enabled {
            self.stats.dump_stats();
        }
        Ok(ScanOutcome::Completed { submitted })
    }

    // None when scanning may proceed.
    async fn check_enabled_and_authenticated(&self) -> Result<Option<ScanOutcome>> {
        if !self.is_extension_enabled().await? {
            info!("Extension is disabled");
            return Ok(Some(ScanOutcome::Disabled));
        }
        if !self.is_user_authenticated().await? {
            warn!("User not authenticated - skipping scan");
            return Ok(Some(ScanOutcome::Unauthenticated));
        }
        Ok(None)
    }

    async fn is_extension_enabled(&self) -> Result<bool> {
        if !self.guard.is_context_valid() {
            return Ok(false);
        }
        let stored = read_extension_enabled(self.storage.as_ref()).await?;
        Ok(stored && self.session.config().enabled)
    }

    async fn is_user_authenticated(&self) -> Result<bool> {
        if !self.guard.is_context_valid() {
            return Ok(false);
        }
        read_authenticated(self.storage.as_ref()).await
    }

    /// Claims, submits and applies one image. A failed submission releases
    /// the claim so a later sweep can retry.
    async fn scan_image(&self, candidate: Candidate) -> Submission {
        let Candidate { node, url } = candidate;
        if !self.session.claim(&url) {
            debug!("Skipping {}, already submitted", url);
            self.stats.inc_duplicate();
            return Submission::Skipped;
        }
        self.stats.inc_submitted();

        let location = self.dom.location();
        let context = DetectionContext {
            page_url: location.href,
            domain: location.hostname,
            thresholds: self.session.thresholds(),
        };

        info!("Scanning image: {}", url);
        let start = Instant::now();
        match self.detector.analyze_image(&url, &context).await {
            Ok(result) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                debug!("Scan result for {}: {:?}", url, result);
                self.detection_log
                    .log(DetectionLogEntry::from_result(
                        &url,
                        &context.domain,
                        &result,
                        latency_ms,
                    ))
                    .await;

                if result.is_actionable() {
                    self.marker.apply(node, &url, &result);
                    match result.action {
                        VerdictAction::Block => self.stats.inc_blocked(),
                        VerdictAction::Warn => self.stats.inc_warned(),
                        VerdictAction::Allow => self.stats.inc_allowed(),
                    }
                    self.notify_detection(OutboundMessage::DetectionResult { data: result })
                        .await;
                }
            }
            Err(e) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                error!("Failed to scan image {}: {:#}", url, e);
                self.session.release(&url);
                self.stats.inc_failed();
                self.detection_log
                    .log(DetectionLogEntry::failed(&url, &context.domain, latency_ms))
                    .await;
            }
        }
        Submission::Submitted
    }

    async fn notify_detection(&self, message: OutboundMessage) {
        if !self.guard.is_context_valid() {
            return;
        }
        if let Err(e) = self.runtime.send_message(message).await {
            error!("Failed to send message to background: {:#}", e);
        }
    }

    /// Handles a message from the popup or background process.
    pub async fn handle_message(&self, message: RuntimeMessage) -> MessageResponse {
        if !self.guard.ensure_valid_context() {
            return MessageResponse::failure(GuardError::ContextInvalidated.to_string());
        }

        match message {
            RuntimeMessage::ScanPage => match self.scan_page().await {
                Ok(_) => MessageResponse::ok(),
                Err(e) => MessageResponse::failure(format!("{:#}", e)),
            },
            RuntimeMessage::ToggleExtension { enabled } => {
                info!("Extension toggled: enabled={}", enabled);
                self.session.set_enabled(enabled);
                MessageResponse::ok()
            }
            RuntimeMessage::UpdateConfig { config } => {
                self.session.merge_config(&config);
                debug!("Scan config updated: {:?}", self.session.config());
                MessageResponse::ok()
            }
        }
    }

    /// Storage change notification. Re-runs the blacklist gate when the
    /// blacklist changed and the page is not blocked yet. Returns whether the
    /// page is blocked afterwards.
    pub async fn on_storage_changed(&self, area_name: &str, changed_keys: &[String]) -> bool {
        let watched = StorageArea::from_area_name(area_name).is_some_and(StorageArea::is_watched);
        if !watched || !changed_keys.iter().any(|key| key == BLACKLIST_KEY) {
            return self.session.is_page_blocked();
        }
        if self.session.is_page_blocked() {
            return true;
        }
        self.gate.check_and_block_current_page().await
    }

    pub fn handle_click(&self, node: NodeId) -> Option<RevealState> {
        self.marker.reveal(node)
    }

    pub fn handle_overlay_action(&self, action: OverlayAction) {
        self.gate.handle_overlay_action(action);
    }

    /// Starts the observer actor. Batches are processed one at a time in
    /// arrival order.
    pub fn spawn_mutation_observer(self: &Arc<Self>) -> MutationObserver {
        let (tx, mut rx) = mpsc::channel::<MutationBatch>(self.observer_buffer);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                if !this.guard.ensure_valid_context() {
                    info!("Extension context invalidated, disconnecting DOM observer");
                    break;
                }
                this.process_mutations(batch).await;
            }
        });

        info!("DOM observer initialized");
        MutationObserver { tx, handle }
    }

    async fn process_mutations(&self, batch: MutationBatch) {
        if self.session.is_page_blocked() {
            return;
        }

        match self.check_enabled_and_authenticated().await {
            Ok(None) => {}
            Ok(Some(_)) => return,
            Err(e) => {
                warn!("Skipping mutation batch: {:#}", e);
                return;
            }
        }

        for node in batch.added {
            for candidate in self.discovery.candidates_under(node) {
                if !self.guard.is_context_valid() {
                    return;
                }
                self.scan_image(candidate).await;
            }
        }
    }
}
