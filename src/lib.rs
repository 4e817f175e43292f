//! Content-script scanning and blocking engine.
//!
//! The engine runs once per page load. It gates the page against the user's
//! domain blacklist, discovers images, submits them to a remote classifier and
//! marks the page according to the returned verdicts.

pub mod config;
pub mod detection;
pub mod dom;
pub mod engine;
pub mod error;
pub mod init;
pub mod logger;
pub mod runtime;
pub mod stats;
pub mod storage;
