mod discovery;
mod gate;
mod guard;
mod marker;
mod matcher;
mod orchestrator;
pub mod state;
mod traits;

pub use discovery::{Candidate, Candidates, ImageDiscovery};
pub use gate::{BlacklistGate, OverlayAction};
pub use guard::ContextGuard;
pub use marker::{
    MarkEngine, RevealState, BLOCKED_TITLE, REVEALED_TITLE, REVEAL_PROMPT, WARNED_TITLE,
};
pub use matcher::{matches_pattern, normalize_pattern, PatternMatcher};
pub use orchestrator::{
    MutationBatch, MutationObserver, Orchestrator, PageHandle, PageSurfaces, ScanOutcome,
};
pub use state::{ScanPhase, ScanSession};
pub use traits::BlacklistMatcher;
