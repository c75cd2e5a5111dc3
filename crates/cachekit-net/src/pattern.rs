//! URL patterns for request matching.

use crate::Url;

/// Substring matched against a URL's host or path. Query and fragment are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    pub pattern: String,
}

impl UrlPattern {
    pub fn host_or_path(substring: &str) -> Self {
        Self {
            pattern: substring.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| host.contains(&self.pattern))
            || url.path().contains(&self.pattern)
    }
}

/// An ordered set of patterns; a URL matches the set if any pattern matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet {
    patterns: Vec<UrlPattern>,
}

impl PatternSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set of host-or-path substring patterns. Empty strings are skipped.
    pub fn host_or_path<S: AsRef<str>>(substrings: &[S]) -> Self {
        Self {
            patterns: substrings
                .iter()
                .map(AsRef::as_ref)
                .filter(|s| !s.is_empty())
                .map(UrlPattern::host_or_path)
                .collect(),
        }
    }

    /// First pattern matching the URL, in insertion order.
    pub fn first_match(&self, url: &Url) -> Option<&UrlPattern> {
        self.patterns.iter().find(|p| p.matches(url))
    }

    /// Whether any pattern matches the URL.
    pub fn matches_any(&self, url: &Url) -> bool {
        self.first_match(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
