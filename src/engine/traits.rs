/// The "Hot Path" check run against the page hostname.
pub trait BlacklistMatcher: Send + Sync {
    /// Returns Some(pattern) if blocked, None if allowed.
    fn check(&self, hostname: &str) -> Option<&str>;
}
