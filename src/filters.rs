//! Catalog filters and the keys derived from them
//!
//! A request carries raw, client-supplied filter strings. They are validated
//! into typed ranges here; the surviving filters form the [`FilterSignature`]
//! that partitions the page ledger, while the raw request forms the cache key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while interpreting client filters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// Year filter is not `YYYY-YYYY` with start <= end
    #[error("Invalid year range: {0:?}")]
    InvalidYearRange(String),

    /// Rating filter is not `min-max` within 0..=10 with min <= max
    #[error("Invalid rating range: {0:?}")]
    InvalidRatingRange(String),

    /// Media type is neither a movie nor a series
    #[error("Unsupported media type: {0:?}")]
    UnsupportedMediaType(String),
}

/// Kind of content a catalog serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
}

impl MediaType {
    /// Name used by clients and in catalog items
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
        }
    }

    /// Name used by the upstream API and the genre table
    pub fn upstream_name(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "tv",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "series" | "tv" => Ok(MediaType::Series),
            other => Err(FilterError::UnsupportedMediaType(other.to_string())),
        }
    }
}

/// Inclusive range of release years
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub start: u16,
    pub end: u16,
}

impl FromStr for YearRange {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FilterError::InvalidYearRange(s.to_string());

        let (start, end) = s.split_once('-').ok_or_else(invalid)?;
        let parse_year = |part: &str| {
            if part.len() == 4 && part.bytes().all(|b| b.is_ascii_digit()) {
                part.parse::<u16>().ok()
            } else {
                None
            }
        };

        let start = parse_year(start.trim()).ok_or_else(invalid)?;
        let end = parse_year(end.trim()).ok_or_else(invalid)?;
        if start > end {
            return Err(invalid());
        }

        Ok(Self { start, end })
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Inclusive range of average vote values on the upstream's 0-10 scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingRange {
    pub min: f32,
    pub max: f32,
}

impl FromStr for RatingRange {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FilterError::InvalidRatingRange(s.to_string());

        let (min, max) = s.split_once('-').ok_or_else(invalid)?;
        let min: f32 = min.trim().parse().map_err(|_| invalid())?;
        let max: f32 = max.trim().parse().map_err(|_| invalid())?;

        let in_scale = |v: f32| v.is_finite() && (0.0..=10.0).contains(&v);
        if !in_scale(min) || !in_scale(max) || min > max {
            return Err(invalid());
        }

        Ok(Self { min, max })
    }
}

impl fmt::Display for RatingRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Filters as received from the client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogFilters {
    /// Content language for titles, overviews and genre names
    pub language: Option<String>,
    /// Genre *name* in the request language, e.g. "Action"
    pub genre: Option<String>,
    /// Year range such as "2020-2024"
    pub year: Option<String>,
    /// Rating range such as "6-8"
    pub rating: Option<String>,
    /// Upstream sort order such as "popularity.desc"
    pub sort_by: Option<String>,
    /// Number of items the client has already shown
    pub skip: u32,
}

impl CatalogFilters {
    /// Opaque cache key covering every dimension of the request
    pub fn cache_key(&self, media_type: MediaType, catalog_id: &str) -> String {
        let canonical = [
            media_type.as_str(),
            catalog_id,
            self.language.as_deref().unwrap_or(""),
            self.genre.as_deref().unwrap_or(""),
            self.year.as_deref().unwrap_or(""),
            self.rating.as_deref().unwrap_or(""),
            self.sort_by.as_deref().unwrap_or(""),
            &self.skip.to_string(),
        ];
        format!("catalog:{}", digest(&canonical))
    }

    /// Validates the range filters
    ///
    /// Malformed ranges are returned as errors next to the validated filters
    /// so the caller can log them and carry on without that filter.
    pub fn validate(&self) -> (ValidatedRanges, Vec<FilterError>) {
        let mut problems = Vec::new();

        let year = self
            .year
            .as_deref()
            .filter(|y| !y.trim().is_empty())
            .and_then(|y| y.parse::<YearRange>().map_err(|e| problems.push(e)).ok());

        let rating = self
            .rating
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .and_then(|r| r.parse::<RatingRange>().map_err(|e| problems.push(e)).ok());

        (ValidatedRanges { year, rating }, problems)
    }
}

/// Range filters that passed validation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValidatedRanges {
    pub year: Option<YearRange>,
    pub rating: Option<RatingRange>,
}

/// The effective filter combination identifying one pagination stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterSignature {
    pub media_type: MediaType,
    pub genre: Option<String>,
    pub year: Option<String>,
    pub rating: Option<String>,
    pub sort_by: Option<String>,
}

impl FilterSignature {
    /// Builds the signature from the filters that will actually reach upstream
    pub fn new(
        media_type: MediaType,
        genre: Option<&str>,
        ranges: &ValidatedRanges,
        sort_by: Option<&str>,
    ) -> Self {
        Self {
            media_type,
            genre: genre.map(str::to_string),
            year: ranges.year.map(|y| y.to_string()),
            rating: ranges.rating.map(|r| r.to_string()),
            sort_by: sort_by.map(str::to_string),
        }
    }

    /// Stable key for the served-page ledger
    pub fn ledger_key(&self) -> String {
        let canonical = [
            self.media_type.as_str(),
            self.genre.as_deref().unwrap_or(""),
            self.year.as_deref().unwrap_or(""),
            self.rating.as_deref().unwrap_or(""),
            self.sort_by.as_deref().unwrap_or(""),
        ];
        digest(&canonical)
    }
}

/// Hashes the parts with a unit separator so ("a", "bc") != ("ab", "c")
fn digest(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_parsing() {
        assert_eq!("movie".parse::<MediaType>(), Ok(MediaType::Movie));
        assert_eq!("series".parse::<MediaType>(), Ok(MediaType::Series));
        assert_eq!("tv".parse::<MediaType>(), Ok(MediaType::Series));
        assert!(matches!(
            "anime".parse::<MediaType>(),
            Err(FilterError::UnsupportedMediaType(_))
        ));
        assert_eq!(MediaType::Series.upstream_name(), "tv");
    }

    #[test]
    fn test_year_range() {
        assert_eq!(
            "2020-2024".parse::<YearRange>(),
            Ok(YearRange {
                start: 2020,
                end: 2024
            })
        );
        assert!("2024-2020".parse::<YearRange>().is_err());
        assert!("20-24".parse::<YearRange>().is_err());
        assert!("2020".parse::<YearRange>().is_err());
        assert!("abcd-efgh".parse::<YearRange>().is_err());
    }

    #[test]
    fn test_rating_range() {
        let range: RatingRange = "6-8".parse().unwrap();
        assert_eq!(range.min, 6.0);
        assert_eq!(range.max, 8.0);
        assert_eq!(range.to_string(), "6-8");

        assert!("7.5-9".parse::<RatingRange>().is_ok());
        assert!("8-6".parse::<RatingRange>().is_err());
        assert!("0-11".parse::<RatingRange>().is_err());
        assert!("high".parse::<RatingRange>().is_err());
    }

    #[test]
    fn test_validate_drops_only_bad_ranges() {
        let filters = CatalogFilters {
            year: Some("2024-2020".to_string()),
            rating: Some("6-8".to_string()),
            ..Default::default()
        };

        let (ranges, problems) = filters.validate();

        assert!(ranges.year.is_none());
        assert!(ranges.rating.is_some());
        assert_eq!(
            problems,
            vec![FilterError::InvalidYearRange("2024-2020".to_string())]
        );
    }

    #[test]
    fn test_cache_key_covers_skip_and_language() {
        let base = CatalogFilters {
            genre: Some("Action".to_string()),
            ..Default::default()
        };
        let next_page = CatalogFilters {
            skip: 20,
            ..base.clone()
        };
        let french = CatalogFilters {
            language: Some("fr".to_string()),
            ..base.clone()
        };

        let key = base.cache_key(MediaType::Movie, "random_movies");
        assert_eq!(key, base.cache_key(MediaType::Movie, "random_movies"));
        assert_ne!(key, next_page.cache_key(MediaType::Movie, "random_movies"));
        assert_ne!(key, french.cache_key(MediaType::Movie, "random_movies"));
        assert_ne!(key, base.cache_key(MediaType::Series, "random_movies"));
    }

    #[test]
    fn test_ledger_key_ignores_skip_but_not_filters() {
        let ranges = ValidatedRanges {
            year: Some("2020-2024".parse().unwrap()),
            rating: None,
        };
        let action = FilterSignature::new(MediaType::Movie, Some("28"), &ranges, None);
        let drama = FilterSignature::new(MediaType::Movie, Some("18"), &ranges, None);

        assert_eq!(action.ledger_key(), action.clone().ledger_key());
        assert_ne!(action.ledger_key(), drama.ledger_key());
    }

    #[test]
    fn test_digest_separates_parts() {
        assert_ne!(digest(&["a", "bc"]), digest(&["ab", "c"]));
    }
}
