/// TMDB content provider implementation.
use super::tmdb_types::{TmdbDiscoverResponse, TmdbGenreList, TmdbItem};
use super::{ContentProvider, DiscoverPage, DiscoverQuery, GenreEntry, UpstreamError, UpstreamItem};
use crate::filters::MediaType;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Base URL of the TMDB v3 API
pub const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

/// Content provider for the TMDB API.
///
/// Uses the discover endpoints for catalog pages and the genre list
/// endpoints for the taxonomy.
pub struct TmdbProvider {
    client: reqwest::Client,
    base_url: String,
}

impl TmdbProvider {
    /// Creates a provider talking to `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::RequestError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Converts a TMDB item to our internal UpstreamItem structure.
    fn convert_item(item: TmdbItem) -> UpstreamItem {
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());

        UpstreamItem {
            id: item.id,
            title: item.title.or(item.name).unwrap_or_default(),
            poster_path: non_empty(item.poster_path),
            backdrop_path: non_empty(item.backdrop_path),
            overview: item.overview.unwrap_or_default(),
            release_date: non_empty(item.release_date).or_else(|| non_empty(item.first_air_date)),
            vote_average: item.vote_average,
            genre_ids: item.genre_ids,
        }
    }

    /// Issues a GET request and decodes the JSON body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        api_key: &str,
        params: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, ?params, "Calling TMDB");

        let response = self
            .client
            .get(&url)
            .query(&[("api_key", api_key)])
            .query(params)
            .send()
            .await
            .map_err(|e| UpstreamError::RequestError(e.to_string()))?;

        // Ensure request was successful
        if !response.status().is_success() {
            return Err(UpstreamError::RequestError(format!(
                "HTTP {} {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .json()
            .await
            .map_err(|e| UpstreamError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl ContentProvider for TmdbProvider {
    async fn discover(
        &self,
        query: &DiscoverQuery,
        api_key: &str,
    ) -> Result<DiscoverPage, UpstreamError> {
        let path = format!("/discover/{}", query.media_type.upstream_name());
        let response: TmdbDiscoverResponse =
            self.get_json(&path, api_key, &query.query_params()).await?;

        debug!(
            results = response.results.len(),
            total_pages = response.total_pages,
            "Received discover page"
        );

        Ok(DiscoverPage {
            items: response.results.into_iter().map(Self::convert_item).collect(),
            total_pages: response.total_pages,
        })
    }

    async fn list_genres(
        &self,
        media_type: MediaType,
        language: &str,
        api_key: &str,
    ) -> Result<Vec<GenreEntry>, UpstreamError> {
        let path = format!("/genre/{}/list", media_type.upstream_name());
        let response: TmdbGenreList = self
            .get_json(&path, api_key, &[("language", language.to_string())])
            .await?;

        Ok(response
            .genres
            .into_iter()
            .map(|g| GenreEntry {
                id: g.id,
                name: g.name,
            })
            .collect())
    }
}
