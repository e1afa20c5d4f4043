/// TMDB API response types for deserialization.
///
/// These structures mirror the JSON response format of the TMDB v3 API.
use serde::Deserialize;

/// Response of the `/discover/{movie,tv}` endpoints.
#[derive(Debug, Deserialize)]
pub(super) struct TmdbDiscoverResponse {
    #[serde(default)]
    pub results: Vec<TmdbItem>,
    /// Total number of result pages for the query
    #[serde(default)]
    pub total_pages: u32,
}

/// A movie or tv show in a discover response.
#[derive(Debug, Deserialize)]
pub(super) struct TmdbItem {
    pub id: u64,
    /// Movie title (absent for tv)
    pub title: Option<String>,
    /// Show name (absent for movies)
    pub name: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub overview: Option<String>,
    /// Movie release date, may be an empty string
    pub release_date: Option<String>,
    /// Show first air date, may be an empty string
    pub first_air_date: Option<String>,
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub genre_ids: Vec<u32>,
}

/// Response of the `/genre/{movie,tv}/list` endpoints.
#[derive(Debug, Deserialize)]
pub(super) struct TmdbGenreList {
    pub genres: Vec<TmdbGenre>,
}

#[derive(Debug, Deserialize)]
pub(super) struct TmdbGenre {
    pub id: u32,
    pub name: String,
}
