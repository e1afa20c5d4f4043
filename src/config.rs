//! Resolver configuration

use crate::genres::DEFAULT_GENRE_RETRY_BACKOFF;
use crate::upstream::TMDB_BASE_URL;
use std::path::PathBuf;
use std::time::Duration;

/// TMDB allows roughly 40 requests every 10 seconds
pub const DEFAULT_MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(250);

/// Settings for a [`CatalogResolver`](crate::CatalogResolver)
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Database file; `None` uses the platform cache directory
    pub database_path: Option<PathBuf>,
    /// Base URL of the TMDB v3 API
    pub base_url: String,
    /// Cache duration token used when a request does not carry one
    pub default_cache_duration: String,
    /// Minimum time between the starts of two upstream calls
    pub min_request_interval: Duration,
    /// Upper bound on a single upstream call
    pub request_timeout: Duration,
    /// How often stored genre taxonomies are re-fetched
    pub genre_refresh_interval: Duration,
    /// How long a failed genre fetch is not retried on the request path
    pub genre_retry_backoff: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            base_url: TMDB_BASE_URL.to_string(),
            default_cache_duration: "3d".to_string(),
            min_request_interval: DEFAULT_MIN_REQUEST_INTERVAL,
            request_timeout: Duration::from_secs(10),
            genre_refresh_interval: Duration::from_secs(72 * 60 * 60),
            genre_retry_backoff: DEFAULT_GENRE_RETRY_BACKOFF,
        }
    }
}
