/// Upstream content API access.
///
/// This module provides the types exchanged with the paginated content API
/// and the trait content providers implement, so the resolution engine can
/// run against TMDB in production and against a fake in tests.
mod tmdb;
mod tmdb_types;

#[cfg(test)]
pub(crate) mod fake;

pub use tmdb::{TMDB_BASE_URL, TmdbProvider};

use crate::filters::{MediaType, RatingRange, YearRange};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while calling the upstream API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Request to the upstream failed
    #[error("Request failed: {0}")]
    RequestError(String),

    /// Failed to parse the upstream's JSON response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// The call did not finish within the allotted time
    #[error("Upstream call timed out after {0:?}")]
    Timeout(Duration),

    /// The dispatch queue is no longer running
    #[error("Dispatch queue is closed")]
    QueueClosed,

    /// The job ended without reporting a result (it panicked)
    #[error("Upstream job aborted before completing")]
    JobAborted,
}

/// A single discoverable item as reported by the upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamItem {
    pub id: u64,
    /// Title for movies, name for series
    pub title: String,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub overview: String,
    /// Release date for movies, first air date for series
    pub release_date: Option<String>,
    pub vote_average: Option<f64>,
    pub genre_ids: Vec<u32>,
}

/// One page of discover results.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverPage {
    pub items: Vec<UpstreamItem>,
    /// Number of pages the upstream reports for the same query
    pub total_pages: u32,
}

/// A genre as listed by the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenreEntry {
    pub id: u32,
    pub name: String,
}

/// Parameters of a discover call.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverQuery {
    pub media_type: MediaType,
    pub page: u32,
    pub language: Option<String>,
    pub genre_id: Option<u32>,
    pub year: Option<YearRange>,
    pub rating: Option<RatingRange>,
    pub sort_by: Option<String>,
}

impl DiscoverQuery {
    /// Same query, different page
    pub fn with_page(&self, page: u32) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }

    /// Query-string parameters for the discover endpoint (without the key)
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("page", self.page.to_string())];

        if let Some(language) = &self.language {
            params.push(("language", language.clone()));
        }
        if let Some(genre_id) = self.genre_id {
            params.push(("with_genres", genre_id.to_string()));
        }
        if let Some(year) = self.year {
            let (gte, lte) = match self.media_type {
                MediaType::Movie => ("primary_release_date.gte", "primary_release_date.lte"),
                MediaType::Series => ("first_air_date.gte", "first_air_date.lte"),
            };
            params.push((gte, format!("{}-01-01", year.start)));
            params.push((lte, format!("{}-12-31", year.end)));
        }
        if let Some(rating) = self.rating {
            params.push(("vote_average.gte", rating.min.to_string()));
            params.push(("vote_average.lte", rating.max.to_string()));
        }
        if let Some(sort_by) = &self.sort_by {
            params.push(("sort_by", sort_by.clone()));
        }

        params
    }
}

/// Trait for upstream content APIs.
///
/// Implementors are called only through the dispatch queue, which takes care
/// of rate limiting and timeouts.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Fetches one page of items matching the query.
    async fn discover(
        &self,
        query: &DiscoverQuery,
        api_key: &str,
    ) -> Result<DiscoverPage, UpstreamError>;

    /// Lists the genre taxonomy for a media type in a language.
    async fn list_genres(
        &self,
        media_type: MediaType,
        language: &str,
        api_key: &str,
    ) -> Result<Vec<GenreEntry>, UpstreamError>;
}
