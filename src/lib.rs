//! catalog_dice - Random, never-repeating catalog pages from TMDB
//!
//! This library resolves catalog requests ("a random page of movies from
//! 2020-2024 rated 6-8 in the Action genre") against the TMDB discover API.
//! Every filter combination gets its pages in random order without repeats,
//! responses are cached on disk, and all upstream calls are funneled through
//! a single rate-limited queue.

mod cache;
mod catalog;
mod config;
mod dispatch;
mod filters;
mod genres;
mod page_selector;
mod storage;
mod upstream;

pub use cache::{CacheDuration, CacheError, CacheStore, InvalidDurationFormat, LedgerStamp};
pub use catalog::{CatalogItem, CatalogResolver, DEFAULT_LANGUAGE};
pub use config::{DEFAULT_MIN_REQUEST_INTERVAL, ResolverConfig};
pub use dispatch::DispatchQueue;
pub use filters::{
    CatalogFilters, FilterError, FilterSignature, MediaType, RatingRange, ValidatedRanges,
    YearRange,
};
pub use genres::{DEFAULT_GENRE_RETRY_BACKOFF, GenreError, GenreRefreshTask, GenreResolver};
pub use page_selector::{MAX_UPSTREAM_PAGES, PageSelection, PageSelector};
pub use storage::{Database, StorageError, default_database_path};
pub use upstream::{
    ContentProvider, DiscoverPage, DiscoverQuery, GenreEntry, TMDB_BASE_URL, TmdbProvider,
    UpstreamError, UpstreamItem,
};

use thiserror::Error;

/// Top-level error type for catalog operations
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The cache duration token is malformed
    #[error(transparent)]
    InvalidDurationFormat(#[from] InvalidDurationFormat),

    /// A request filter could not be interpreted
    #[error("Invalid filter: {0}")]
    InvalidFilterFormat(#[from] FilterError),

    /// The upstream API call failed
    #[error("Failed to fetch data from upstream: {0}")]
    UpstreamFetchFailed(#[from] UpstreamError),

    /// The genre taxonomy could not be read or stored
    #[error("Genre resolution failed: {0}")]
    GenreResolutionFailed(#[source] GenreError),

    /// The database could not be opened
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<GenreError> for CatalogError {
    fn from(e: GenreError) -> Self {
        match e {
            GenreError::Upstream(upstream) => CatalogError::UpstreamFetchFailed(upstream),
            other => CatalogError::GenreResolutionFailed(other),
        }
    }
}
