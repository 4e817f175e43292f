use super::traits::BlacklistMatcher;
use url::Url;

const WILDCARD_PREFIX: &str = "*.";

/// Reduces a user-entered pattern to a bare lowercase hostname.
///
/// `*.` wildcards keep their prefix and have the suffix normalized on its own.
/// Anything that normalizes to nothing yields `""`, which never matches.
pub fn normalize_pattern(pattern: &str) -> String {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let without_scheme = trimmed
        .split_once("://")
        .map_or(trimmed, |(_, rest)| rest);
    if let Some(suffix) = without_scheme.strip_prefix(WILDCARD_PREFIX) {
        let suffix = normalize_host(suffix);
        if suffix.is_empty() {
            return String::new();
        }
        return format!("{}{}", WILDCARD_PREFIX, suffix);
    }

    normalize_host(trimmed)
}

fn normalize_host(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    match Url::parse(&with_scheme) {
        Ok(url) => match url.host_str() {
            Some(host) => strip_www(&host.to_lowercase()),
            None => fallback_host(trimmed),
        },
        Err(_) => fallback_host(trimmed),
    }
}

// Best effort for input the URL parser rejects.
fn fallback_host(input: &str) -> String {
    let lowered = input.to_lowercase();
    let rest = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let host = rest.split('/').next().unwrap_or_default();
    strip_www(host)
}

fn strip_www(host: &str) -> String {
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// `hostname` is expected lowercased already.
pub fn matches_pattern(hostname: &str, pattern: &str) -> bool {
    matches_normalized(hostname, &normalize_pattern(pattern))
}

fn matches_normalized(hostname: &str, normalized: &str) -> bool {
    if normalized.is_empty() {
        return false;
    }
    match normalized.strip_prefix(WILDCARD_PREFIX) {
        Some(base) => {
            hostname == base
                || (hostname.len() > base.len()
                    && hostname.ends_with(base)
                    && hostname.as_bytes()[hostname.len() - base.len() - 1] == b'.')
        }
        None => hostname == normalized,
    }
}

/// Blacklist compiled once per gate evaluation. Patterns keep their list
/// order so the first match wins.
#[derive(Debug, Default)]
pub struct PatternMatcher {
    // (as entered, normalized)
    patterns: Vec<(String, String)>,
}

impl PatternMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.into();
                let normalized = normalize_pattern(&pattern);
                (pattern, normalized)
            })
            .filter(|(_, normalized)| !normalized.is_empty())
            .collect();
        Self { patterns }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl BlacklistMatcher for PatternMatcher {
    fn check(&self, hostname: &str) -> Option<&str> {
        let hostname = hostname.to_lowercase();
        self.patterns
            .iter()
            .find(|(_, normalized)| matches_normalized(&hostname, normalized))
            .map(|(original, _)| original.as_str())
    }
}
