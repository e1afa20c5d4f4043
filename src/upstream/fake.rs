//! In-memory content provider for tests
//!
//! Item ids encode the page they came from (`page * 100 + index`), so tests
//! can tell which upstream page a resolution picked.

use super::{ContentProvider, DiscoverPage, DiscoverQuery, GenreEntry, UpstreamError, UpstreamItem};
use crate::filters::MediaType;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub(crate) const ITEMS_PER_PAGE: u64 = 3;

pub(crate) struct FakeProvider {
    total_pages: u32,
    fail_discover: AtomicBool,
    fail_genres: AtomicBool,
    fail_from_page: AtomicU32,
    discover_calls: Mutex<Vec<DiscoverQuery>>,
    genre_calls: Mutex<Vec<(MediaType, String)>>,
}

impl FakeProvider {
    pub fn new(total_pages: u32) -> Self {
        Self {
            total_pages,
            fail_discover: AtomicBool::new(false),
            fail_genres: AtomicBool::new(false),
            fail_from_page: AtomicU32::new(u32::MAX),
            discover_calls: Mutex::new(Vec::new()),
            genre_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_discover(&self, fail: bool) {
        self.fail_discover.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_genres(&self, fail: bool) {
        self.fail_genres.store(fail, Ordering::SeqCst);
    }

    /// Makes discover fail for this page and every later one
    pub fn set_fail_from_page(&self, page: u32) {
        self.fail_from_page.store(page, Ordering::SeqCst);
    }

    pub fn discover_calls(&self) -> Vec<DiscoverQuery> {
        self.discover_calls.lock().unwrap().clone()
    }

    pub fn genre_calls(&self) -> Vec<(MediaType, String)> {
        self.genre_calls.lock().unwrap().clone()
    }

    /// Page an item id was generated for
    pub fn page_of(item_id: &str) -> u32 {
        (item_id.parse::<u64>().unwrap() / 100) as u32
    }
}

#[async_trait]
impl ContentProvider for FakeProvider {
    async fn discover(
        &self,
        query: &DiscoverQuery,
        _api_key: &str,
    ) -> Result<DiscoverPage, UpstreamError> {
        self.discover_calls.lock().unwrap().push(query.clone());

        if self.fail_discover.load(Ordering::SeqCst)
            || query.page >= self.fail_from_page.load(Ordering::SeqCst)
        {
            return Err(UpstreamError::RequestError("HTTP 503 Service Unavailable".into()));
        }

        let items = if query.page <= self.total_pages {
            (0..ITEMS_PER_PAGE)
                .map(|i| UpstreamItem {
                    id: query.page as u64 * 100 + i,
                    title: format!("Title {}-{}", query.page, i),
                    poster_path: Some(format!("/poster{}.jpg", i)),
                    backdrop_path: (i % 2 == 0).then(|| format!("/backdrop{}.jpg", i)),
                    overview: "An overview".to_string(),
                    release_date: Some("2021-06-01".to_string()),
                    vote_average: (i > 0).then_some(7.25 + i as f64),
                    genre_ids: vec![28, 99_999],
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(DiscoverPage {
            items,
            total_pages: self.total_pages,
        })
    }

    async fn list_genres(
        &self,
        media_type: MediaType,
        language: &str,
        _api_key: &str,
    ) -> Result<Vec<GenreEntry>, UpstreamError> {
        self.genre_calls
            .lock()
            .unwrap()
            .push((media_type, language.to_string()));

        if self.fail_genres.load(Ordering::SeqCst) {
            return Err(UpstreamError::RequestError("HTTP 401 Unauthorized".into()));
        }

        let names: &[(u32, &str, &str)] = match media_type {
            MediaType::Movie => &[
                (28, "Action", "Action"),
                (27, "Horror", "Horreur"),
                (18, "Drama", "Drame"),
            ],
            MediaType::Series => &[
                (10759, "Action & Adventure", "Action & Aventure"),
                (18, "Drama", "Drame"),
            ],
        };

        Ok(names
            .iter()
            .map(|(id, en, fr)| GenreEntry {
                id: *id,
                name: if language == "fr" { fr } else { en }.to_string(),
            })
            .collect())
    }
}
