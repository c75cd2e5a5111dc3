//! Request classification.

use cachekit_net::PatternSet;
use url::Url;

/// Which strategy family a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Dynamic endpoint: network-first.
    ApiLike,
    /// Static asset: cache-first.
    AssetLike,
}

/// Maps a URL to a [`RequestClass`]. Method and headers play no part.
#[derive(Debug, Clone)]
pub struct CacheClassifier {
    api_patterns: PatternSet,
}

impl CacheClassifier {
    pub fn new<S: AsRef<str>>(api_url_patterns: &[S]) -> Self {
        Self {
            api_patterns: PatternSet::host_or_path(api_url_patterns),
        }
    }

    pub fn classify(&self, url: &Url) -> RequestClass {
        if self.api_patterns.matches_any(url) {
            RequestClass::ApiLike
        } else {
            RequestClass::AssetLike
        }
    }
}
