//! Catalog resolution
//!
//! Ties the cache, genre taxonomy, page selector and dispatch queue together
//! to answer one catalog request with a page of items the client has not
//! seen for its filter combination.

use crate::CatalogError;
use crate::cache::{CacheDuration, CacheStore, LedgerStamp};
use crate::config::ResolverConfig;
use crate::dispatch::DispatchQueue;
use crate::filters::{CatalogFilters, FilterSignature, MediaType};
use crate::genres::GenreResolver;
use crate::page_selector::{PageSelection, PageSelector, fallback_selection};
use crate::storage::Database;
use crate::upstream::{
    ContentProvider, DiscoverPage, DiscoverQuery, TmdbProvider, UpstreamError, UpstreamItem,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Language used when a request does not specify one
pub const DEFAULT_LANGUAGE: &str = "en-US";

const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w600_and_h900_bestv2";
const BANNER_BASE_URL: &str = "https://image.tmdb.org/t/p/original";

/// A catalog entry as handed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub poster: Option<String>,
    pub banner: Option<String>,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub description: String,
    pub release_info: String,
    /// Average vote rounded to one decimal; `None` when unrated
    pub rating_value: Option<f64>,
    pub genres: Vec<String>,
}

/// Answers catalog requests
pub struct CatalogResolver {
    cache: Arc<CacheStore>,
    genres: Arc<GenreResolver>,
    selector: PageSelector,
    queue: DispatchQueue,
    provider: Arc<dyn ContentProvider>,
    default_cache_duration: String,
}

impl CatalogResolver {
    /// Opens the configured database and talks to TMDB
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(config: &ResolverConfig) -> Result<Self, CatalogError> {
        let db = match &config.database_path {
            Some(path) => Database::open(path)?,
            None => Database::open_default()?,
        };
        let provider = TmdbProvider::new(config.base_url.as_str(), config.request_timeout)?;

        Ok(Self::new(Arc::new(db), Arc::new(provider), config))
    }

    /// Builds a resolver over an existing database and provider
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        db: Arc<Database>,
        provider: Arc<dyn ContentProvider>,
        config: &ResolverConfig,
    ) -> Self {
        let queue = DispatchQueue::new(config.min_request_interval, config.request_timeout);
        let cache = Arc::new(CacheStore::new(Arc::clone(&db)));
        let genres = Arc::new(
            GenreResolver::new(db, Arc::clone(&provider), queue.clone())
                .with_retry_backoff(config.genre_retry_backoff),
        );

        Self {
            selector: PageSelector::new(Arc::clone(&cache)),
            cache,
            genres,
            queue,
            provider,
            default_cache_duration: config.default_cache_duration.clone(),
        }
    }

    /// The genre taxonomy, e.g. for scheduling refreshes
    pub fn genres(&self) -> Arc<GenreResolver> {
        Arc::clone(&self.genres)
    }

    /// Makes sure the genre taxonomy for a language is stored
    pub async fn ensure_genres(&self, language: &str, api_key: &str) -> Result<(), CatalogError> {
        Ok(self.genres.ensure_genres(language, api_key).await?)
    }

    /// Resolves one catalog request
    ///
    /// # Arguments
    ///
    /// * `media_type` - Kind of content the catalog serves
    /// * `catalog_id` - Client-side catalog identifier
    /// * `filters` - Client filters including `skip`
    /// * `cache_duration` - Freshness token such as "3d"; the configured
    ///   default applies when `None`
    /// * `api_key` - Upstream API key
    ///
    /// # Returns
    ///
    /// The items of one upstream page not yet served for the filter
    /// combination, or an empty list once every page has been served.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidDurationFormat` before any I/O when the token is
    /// malformed, and with `UpstreamFetchFailed` when an upstream call fails.
    pub async fn resolve_catalog(
        &self,
        media_type: MediaType,
        catalog_id: &str,
        filters: &CatalogFilters,
        cache_duration: Option<&str>,
        api_key: &str,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        let token = cache_duration.unwrap_or(&self.default_cache_duration);
        let ttl = CacheDuration::parse(token)?;

        let cache_key = filters.cache_key(media_type, catalog_id);
        match self.cache.get::<Vec<CatalogItem>>(&cache_key, ttl) {
            Ok(Some(items)) => {
                debug!(catalog_id, skip = filters.skip, "Serving catalog from cache");
                return Ok(items);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Cache read failed, resolving from upstream"),
        }

        let language = filters
            .language
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_LANGUAGE);

        if let Err(e) = self.genres.ensure_genres_with_backoff(language, api_key).await {
            warn!(language, error = %e, "Genre resolution failed, continuing without genre data");
        }

        let (ranges, problems) = filters.validate();
        for problem in &problems {
            warn!(error = %problem, "Ignoring malformed filter");
        }

        let genre_id = match filters.genre.as_deref().map(str::trim) {
            Some(genre) if !genre.is_empty() => self.genre_filter(media_type, genre),
            _ => None,
        };
        let sort_by = filters.sort_by.clone().filter(|s| !s.is_empty());

        let signature = FilterSignature::new(
            media_type,
            genre_id.map(|id| id.to_string()).as_deref(),
            &ranges,
            sort_by.as_deref(),
        );

        let query = DiscoverQuery {
            media_type,
            page: 1,
            language: Some(language.to_string()),
            genre_id,
            year: ranges.year,
            rating: ranges.rating,
            sort_by,
        };

        info!(
            %media_type,
            catalog_id,
            skip = filters.skip,
            genre_id = ?genre_id,
            year = ?filters.year,
            rating = ?filters.rating,
            "Resolving catalog"
        );

        let probe = self.discover(query.clone(), api_key).await?;

        let selected = self
            .selector
            .select(&signature, probe.total_pages, filters.skip);
        let (selection, claimed) = match selected {
            Ok(selection) => (selection, true),
            Err(e) => {
                warn!(error = %e, "Page ledger unavailable, selecting without deduplication");
                (fallback_selection(probe.total_pages), false)
            }
        };

        let page = match selection {
            PageSelection::Page(page) => page,
            PageSelection::Exhausted => {
                info!(total_pages = probe.total_pages, "All pages served for these filters");
                let empty: Vec<CatalogItem> = Vec::new();
                self.store(&cache_key, &empty, ttl, 0, filters.skip, &signature);
                return Ok(empty);
            }
        };

        let fetched = if page == 1 {
            Ok(probe)
        } else {
            self.discover(query.with_page(page), api_key).await
        };

        let results = match fetched {
            Ok(results) => results,
            Err(e) => {
                if claimed {
                    if let Err(release_error) = self.selector.release(&signature, page) {
                        warn!(page, error = %release_error, "Could not release page claim");
                    }
                }
                return Err(e.into());
            }
        };

        let items: Vec<CatalogItem> = results
            .items
            .into_iter()
            .map(|item| self.normalize(item, media_type, language))
            .collect();

        debug!(page, count = items.len(), "Catalog resolved");
        self.store(&cache_key, &items, ttl, page, filters.skip, &signature);

        Ok(items)
    }

    /// Translates the genre filter into an upstream id
    ///
    /// Numeric values are taken as ids. Unknown names drop the filter.
    fn genre_filter(&self, media_type: MediaType, genre: &str) -> Option<u32> {
        if let Ok(id) = genre.parse::<u32>() {
            return Some(id);
        }

        match self.genres.resolve_genre_id(media_type, genre) {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                warn!(genre, %media_type, "Unknown genre, resolving without genre filter");
                None
            }
            Err(e) => {
                warn!(genre, error = %e, "Genre lookup failed, resolving without genre filter");
                None
            }
        }
    }

    /// Runs a discover call through the dispatch queue
    async fn discover(
        &self,
        query: DiscoverQuery,
        api_key: &str,
    ) -> Result<DiscoverPage, UpstreamError> {
        let provider = Arc::clone(&self.provider);
        let api_key = api_key.to_string();
        let page = query.page;

        self.queue
            .submit(move || async move { provider.discover(&query, &api_key).await })
            .await
            .inspect_err(|e| error!(page, error = %e, "Error fetching data from upstream"))
    }

    /// Writes a resolution to the cache; failures are only logged
    fn store(
        &self,
        key: &str,
        items: &[CatalogItem],
        ttl: CacheDuration,
        page: u32,
        skip: u32,
        signature: &FilterSignature,
    ) {
        let stamp = LedgerStamp {
            page,
            skip,
            signature,
        };
        if let Err(e) = self.cache.put(key, &items, ttl, &stamp) {
            error!(key, page, error = %e, "Failed to set cache");
        }
    }

    fn normalize(&self, item: UpstreamItem, media_type: MediaType, language: &str) -> CatalogItem {
        CatalogItem {
            id: item.id.to_string(),
            name: item.title,
            poster: item
                .poster_path
                .map(|path| format!("{}{}", POSTER_BASE_URL, path)),
            banner: item
                .backdrop_path
                .map(|path| format!("{}{}", BANNER_BASE_URL, path)),
            media_type,
            description: item.overview,
            release_info: item.release_date.unwrap_or_default(),
            rating_value: item
                .vote_average
                .filter(|v| *v > 0.0)
                .map(|v| (v * 10.0).round() / 10.0),
            genres: self
                .genres
                .resolve_genre_names(&item.genre_ids, media_type, language),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genres::DEFAULT_GENRE_RETRY_BACKOFF;
    use crate::upstream::fake::{FakeProvider, ITEMS_PER_PAGE};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn resolver(provider: Arc<FakeProvider>) -> CatalogResolver {
        let config = ResolverConfig {
            min_request_interval: Duration::from_millis(50),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let db = Arc::new(Database::open_in_memory().unwrap());
        CatalogResolver::new(db, provider, &config)
    }

    fn action_filters(skip: u32) -> CatalogFilters {
        CatalogFilters {
            language: Some("en".to_string()),
            genre: Some("Action".to_string()),
            year: Some("2020-2024".to_string()),
            rating: Some("6-8".to_string()),
            sort_by: None,
            skip,
        }
    }

    async fn resolve_movies(
        catalog: &CatalogResolver,
        filters: &CatalogFilters,
        cache_duration: Option<&str>,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        catalog
            .resolve_catalog(MediaType::Movie, "random_movies", filters, cache_duration, "key")
            .await
    }

    fn page_of(items: &[CatalogItem]) -> u32 {
        FakeProvider::page_of(&items[0].id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_are_not_repeated_until_exhausted() {
        let provider = Arc::new(FakeProvider::new(2));
        let catalog = resolver(Arc::clone(&provider));

        let mut pages = BTreeSet::new();
        for skip in [0, 20] {
            let items = resolve_movies(&catalog, &action_filters(skip), None).await.unwrap();
            assert_eq!(items.len(), ITEMS_PER_PAGE as usize);
            assert!(pages.insert(page_of(&items)));
        }
        assert_eq!(pages, BTreeSet::from([1, 2]));

        let third = resolve_movies(&catalog, &action_filters(40), None).await.unwrap();
        assert!(third.is_empty());

        let query = &provider.discover_calls()[0];
        assert_eq!(query.genre_id, Some(28));
        assert_eq!(query.year, Some("2020-2024".parse().unwrap()));
        assert_eq!(query.rating, Some("6-8".parse().unwrap()));
        assert_eq!(query.language.as_deref(), Some("en"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_one_reuses_the_probe() {
        let provider = Arc::new(FakeProvider::new(1));
        let catalog = resolver(Arc::clone(&provider));

        let items = resolve_movies(&catalog, &CatalogFilters::default(), None).await.unwrap();

        assert_eq!(page_of(&items), 1);
        let calls = provider.discover_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].page, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_never_share_a_page() {
        let provider = Arc::new(FakeProvider::new(6));
        let config = ResolverConfig {
            min_request_interval: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let db = Arc::new(Database::open_in_memory().unwrap());
        let catalog = Arc::new(CatalogResolver::new(db, provider, &config));

        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let catalog = Arc::clone(&catalog);
                tokio::spawn(async move {
                    let filters = CatalogFilters {
                        skip: i * 20,
                        ..Default::default()
                    };
                    resolve_movies(&catalog, &filters, None).await
                })
            })
            .collect();

        let mut pages = Vec::new();
        let mut exhausted = 0;
        for handle in handles {
            let items = handle.await.unwrap().unwrap();
            if items.is_empty() {
                exhausted += 1;
            } else {
                pages.push(page_of(&items));
            }
        }

        pages.sort_unstable();
        assert_eq!(pages, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(exhausted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_genre_failure_backs_off_between_requests() {
        let provider = Arc::new(FakeProvider::new(5));
        provider.set_fail_genres(true);
        let catalog = resolver(Arc::clone(&provider));

        resolve_movies(&catalog, &action_filters(0), None).await.unwrap();
        resolve_movies(&catalog, &action_filters(20), None).await.unwrap();
        assert_eq!(provider.genre_calls().len(), 2);

        provider.set_fail_genres(false);
        tokio::time::advance(DEFAULT_GENRE_RETRY_BACKOFF + Duration::from_secs(1)).await;
        let items = resolve_movies(&catalog, &action_filters(40), None).await.unwrap();
        assert_eq!(provider.genre_calls().len(), 4);
        assert_eq!(items[0].genres, vec!["Action".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_pages_each_served_once() {
        let provider = Arc::new(FakeProvider::new(3));
        let catalog = resolver(provider);
        let filters = |skip| CatalogFilters {
            skip,
            ..Default::default()
        };

        let mut pages = Vec::new();
        for skip in [0, 20, 40] {
            let items = catalog
                .resolve_catalog(MediaType::Series, "random_series", &filters(skip), None, "key")
                .await.unwrap();
            pages.push(page_of(&items));
        }
        pages.sort_unstable();
        assert_eq!(pages, vec![1, 2, 3]);

        let fourth = catalog
            .resolve_catalog(MediaType::Series, "random_series", &filters(60), None, "key")
            .await.unwrap();
        assert!(fourth.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_upstream() {
        let provider = Arc::new(FakeProvider::new(5));
        let catalog = resolver(Arc::clone(&provider));

        let first = resolve_movies(&catalog, &action_filters(0), Some("12h")).await.unwrap();
        let calls = provider.discover_calls().len();

        let second = resolve_movies(&catalog, &action_filters(0), Some("12h")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.discover_calls().len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_outcome_is_cached() {
        let provider = Arc::new(FakeProvider::new(1));
        let catalog = resolver(Arc::clone(&provider));
        let filters = |skip| CatalogFilters {
            skip,
            ..Default::default()
        };

        resolve_movies(&catalog, &filters(0), None).await.unwrap();
        assert!(resolve_movies(&catalog, &filters(20), None).await.unwrap().is_empty());
        let calls = provider.discover_calls().len();

        assert!(resolve_movies(&catalog, &filters(20), None).await.unwrap().is_empty());
        assert_eq!(provider.discover_calls().len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signatures_partition_pages() {
        let provider = Arc::new(FakeProvider::new(1));
        let catalog = resolver(provider);
        let low = CatalogFilters {
            rating: Some("0-2".to_string()),
            ..Default::default()
        };
        let high = CatalogFilters {
            rating: Some("8-10".to_string()),
            ..Default::default()
        };

        let a = resolve_movies(&catalog, &low, None).await.unwrap();
        let b = resolve_movies(&catalog, &high, None).await.unwrap();

        assert_eq!(page_of(&a), 1);
        assert_eq!(page_of(&b), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_duration_fails_before_io() {
        let provider = Arc::new(FakeProvider::new(1));
        let catalog = resolver(Arc::clone(&provider));

        let result = resolve_movies(&catalog, &action_filters(0), Some("3w")).await;

        assert!(matches!(result, Err(CatalogError::InvalidDurationFormat(_))));
        assert!(provider.discover_calls().is_empty());
        assert!(provider.genre_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_failure_is_not_cached() {
        let provider = Arc::new(FakeProvider::new(1));
        let catalog = resolver(Arc::clone(&provider));

        provider.set_fail_discover(true);
        let result = resolve_movies(&catalog, &action_filters(0), None).await;
        assert!(matches!(result, Err(CatalogError::UpstreamFetchFailed(_))));
        let calls = provider.discover_calls().len();

        provider.set_fail_discover(false);
        let items = resolve_movies(&catalog, &action_filters(0), None).await.unwrap();
        assert_eq!(page_of(&items), 1);
        assert!(provider.discover_calls().len() > calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_page_fetch_releases_the_page() {
        let provider = Arc::new(FakeProvider::new(2));
        let catalog = resolver(Arc::clone(&provider));
        let filters = |skip| CatalogFilters {
            skip,
            ..Default::default()
        };

        // Page 1 is the probe and always works; page 2 fails
        provider.set_fail_from_page(2);
        let mut served = BTreeSet::new();
        for skip in [0, 20, 40] {
            match resolve_movies(&catalog, &filters(skip), None).await
            {
                Ok(items) => {
                    assert!(!items.is_empty(), "page 2 must not be recorded as served");
                    assert!(served.insert(page_of(&items)));
                }
                Err(e) => assert!(matches!(e, CatalogError::UpstreamFetchFailed(_))),
            }
        }

        provider.set_fail_from_page(u32::MAX);
        for skip in [60, 80, 100] {
            let items = resolve_movies(&catalog, &filters(skip), None).await.unwrap();
            if !items.is_empty() {
                assert!(served.insert(page_of(&items)));
            }
        }

        assert_eq!(served, BTreeSet::from([1, 2]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_genre_and_bad_ranges_are_dropped() {
        let provider = Arc::new(FakeProvider::new(1));
        let catalog = resolver(Arc::clone(&provider));
        let filters = CatalogFilters {
            language: Some("en".to_string()),
            genre: Some("Telenovela".to_string()),
            year: Some("soon".to_string()),
            rating: Some("6-8".to_string()),
            ..Default::default()
        };

        let items = resolve_movies(&catalog, &filters, None).await.unwrap();

        assert!(!items.is_empty());
        let query = &provider.discover_calls()[0];
        assert_eq!(query.genre_id, None);
        assert_eq!(query.year, None);
        assert!(query.rating.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_genre_failure_degrades_to_empty_names() {
        let provider = Arc::new(FakeProvider::new(1));
        provider.set_fail_genres(true);
        let catalog = resolver(Arc::clone(&provider));

        let items = resolve_movies(&catalog, &action_filters(0), None).await.unwrap();

        assert!(!items.is_empty());
        assert!(items.iter().all(|item| item.genres.is_empty()));
        assert_eq!(provider.discover_calls()[0].genre_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_normalization() {
        let provider = Arc::new(FakeProvider::new(1));
        let catalog = resolver(provider);

        let items = resolve_movies(&catalog, &action_filters(0), None).await.unwrap();

        let first = &items[0];
        assert_eq!(first.id, "100");
        assert_eq!(first.name, "Title 1-0");
        assert_eq!(
            first.poster.as_deref(),
            Some("https://image.tmdb.org/t/p/w600_and_h900_bestv2/poster0.jpg")
        );
        assert_eq!(
            first.banner.as_deref(),
            Some("https://image.tmdb.org/t/p/original/backdrop0.jpg")
        );
        assert_eq!(first.media_type, MediaType::Movie);
        assert_eq!(first.release_info, "2021-06-01");
        assert_eq!(first.rating_value, None);
        assert_eq!(first.genres, vec!["Action".to_string()]);

        assert_eq!(items[1].banner, None);
        assert_eq!(items[1].rating_value, Some(8.3));
        assert_eq!(items[2].rating_value, Some(9.3));

        let json = serde_json::to_value(first).unwrap();
        assert_eq!(json["type"], "movie");
        assert_eq!(json["releaseInfo"], "2021-06-01");
        assert!(json["ratingValue"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_genres_reports_upstream_failure() {
        let provider = Arc::new(FakeProvider::new(1));
        provider.set_fail_genres(true);
        let catalog = resolver(provider);

        let result = catalog.ensure_genres("en", "key").await;

        assert!(matches!(result, Err(CatalogError::UpstreamFetchFailed(_))));
    }
}
