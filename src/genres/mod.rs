//! Genre taxonomy module
//!
//! Genres are fetched from the upstream once per language, stored in the
//! database and then used to translate between genre names (as clients send
//! them) and upstream genre ids (as the discover API expects and returns
//! them).

mod refresh;

pub use refresh::GenreRefreshTask;

use crate::dispatch::DispatchQueue;
use crate::filters::MediaType;
use crate::storage::{Database, StorageError};
use crate::upstream::{ContentProvider, GenreEntry, UpstreamError};
use rusqlite::{OptionalExtension, params};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors that can occur while maintaining the genre taxonomy
#[derive(Debug, Error)]
pub enum GenreError {
    /// The upstream genre list could not be fetched
    #[error("Failed to fetch genres: {0}")]
    Upstream(#[from] UpstreamError),

    /// The genre table could not be read or written
    #[error("Genre storage error: {0}")]
    Storage(#[from] StorageError),

    /// A recent fetch for the language failed; not retrying yet
    #[error("Genre fetch for {language:?} failed recently, retrying in {retry_in:?}")]
    BackingOff { language: String, retry_in: Duration },
}

/// How long a failed taxonomy fetch blocks implicit retries by default
pub const DEFAULT_GENRE_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Lazily populated, persistent genre taxonomy
pub struct GenreResolver {
    db: Arc<Database>,
    provider: Arc<dyn ContentProvider>,
    queue: DispatchQueue,
    retry_backoff: Duration,
    failed_fetches: Mutex<HashMap<String, Instant>>,
}

impl GenreResolver {
    pub fn new(
        db: Arc<Database>,
        provider: Arc<dyn ContentProvider>,
        queue: DispatchQueue,
    ) -> Self {
        Self {
            db,
            provider,
            queue,
            retry_backoff: DEFAULT_GENRE_RETRY_BACKOFF,
            failed_fetches: Mutex::new(HashMap::new()),
        }
    }

    /// Sets how long a failed fetch blocks [`Self::ensure_genres_with_backoff`]
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// Whether any genre of any media type is stored for the language
    pub fn genres_exist(&self, language: &str) -> Result<bool, GenreError> {
        let exists = self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM genres WHERE language = ?1)",
                params![language],
                |row| row.get::<_, bool>(0),
            )?)
        })?;
        Ok(exists)
    }

    /// Fetches and stores the taxonomy for a language if none is stored yet
    pub async fn ensure_genres(&self, language: &str, api_key: &str) -> Result<(), GenreError> {
        if self.genres_exist(language)? {
            debug!(language, "Genres already stored");
            return Ok(());
        }
        self.fetch_and_store(language, api_key).await
    }

    /// Like [`Self::ensure_genres`], but skips the upstream after a recent failure
    ///
    /// Used on the request path so an unreachable taxonomy does not put two
    /// failing calls in front of every discover call in the queue.
    pub async fn ensure_genres_with_backoff(
        &self,
        language: &str,
        api_key: &str,
    ) -> Result<(), GenreError> {
        if let Some(failed_at) = self.last_failure(language) {
            let elapsed = failed_at.elapsed();
            if elapsed < self.retry_backoff {
                return Err(GenreError::BackingOff {
                    language: language.to_string(),
                    retry_in: self.retry_backoff - elapsed,
                });
            }
        }

        let result = self.ensure_genres(language, api_key).await;
        let mut failed = self
            .failed_fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &result {
            Ok(()) => {
                failed.remove(language);
            }
            Err(_) => {
                failed.insert(language.to_string(), Instant::now());
            }
        }
        result
    }

    fn last_failure(&self, language: &str) -> Option<Instant> {
        self.failed_fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(language)
            .copied()
    }

    /// Fetches movie and tv genres for a language and stores them
    ///
    /// Each media type is stored in its own transaction; a failure in one
    /// does not prevent the other from being stored. The first error is
    /// returned.
    pub async fn fetch_and_store(&self, language: &str, api_key: &str) -> Result<(), GenreError> {
        let mut first_error = None;

        for media_type in [MediaType::Movie, MediaType::Series] {
            if let Err(e) = self.fetch_and_store_media(media_type, language, api_key).await {
                warn!(
                    language,
                    media_type = media_type.upstream_name(),
                    error = %e,
                    "Genre update failed"
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(language, "Genres update completed");
                Ok(())
            }
        }
    }

    async fn fetch_and_store_media(
        &self,
        media_type: MediaType,
        language: &str,
        api_key: &str,
    ) -> Result<(), GenreError> {
        let provider = Arc::clone(&self.provider);
        let owned_language = language.to_string();
        let owned_key = api_key.to_string();

        let entries = self
            .queue
            .submit(move || async move {
                provider
                    .list_genres(media_type, &owned_language, &owned_key)
                    .await
            })
            .await?;

        let inserted = self.store_batch(media_type, language, &entries)?;
        debug!(
            language,
            media_type = media_type.upstream_name(),
            received = entries.len(),
            inserted,
            "Genres stored"
        );
        Ok(())
    }

    /// Inserts one media type's genres atomically
    ///
    /// Records already present are left untouched.
    fn store_batch(
        &self,
        media_type: MediaType,
        language: &str,
        entries: &[GenreEntry],
    ) -> Result<usize, StorageError> {
        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO genres (genre_id, genre_name, media_type, language)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for entry in entries {
                    inserted += stmt.execute(params![
                        entry.id,
                        entry.name,
                        media_type.upstream_name(),
                        language
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    /// Looks up the upstream id for a genre name
    ///
    /// Names are matched case-insensitively in any stored language. The
    /// lowest matching id wins, so repeated calls agree.
    pub fn resolve_genre_id(
        &self,
        media_type: MediaType,
        genre_name: &str,
    ) -> Result<Option<u32>, GenreError> {
        let id = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT genre_id FROM genres
                     WHERE media_type = ?1 AND genre_name = ?2 COLLATE NOCASE
                     ORDER BY genre_id LIMIT 1",
                    params![media_type.upstream_name(), genre_name],
                    |row| row.get::<_, u32>(0),
                )
                .optional()?)
        })?;
        Ok(id)
    }

    /// Translates genre ids to names in the given language
    ///
    /// Unknown ids are skipped. Lookup failures are logged and yield an
    /// empty list, since names are decoration rather than content.
    pub fn resolve_genre_names(
        &self,
        genre_ids: &[u32],
        media_type: MediaType,
        language: &str,
    ) -> Vec<String> {
        if genre_ids.is_empty() {
            return Vec::new();
        }

        let lookup = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT genre_name FROM genres
                 WHERE genre_id = ?1 AND media_type = ?2 AND language = ?3",
            )?;
            let mut names = Vec::with_capacity(genre_ids.len());
            for id in genre_ids {
                let name: Option<String> = stmt
                    .query_row(params![id, media_type.upstream_name(), language], |row| {
                        row.get(0)
                    })
                    .optional()?;
                names.extend(name);
            }
            Ok(names)
        });

        lookup.unwrap_or_else(|e| {
            warn!(language, error = %e, "Genre name lookup failed");
            Vec::new()
        })
    }

    /// Stored genres of one media type and language, ordered by id
    pub fn stored_genres(
        &self,
        media_type: MediaType,
        language: &str,
    ) -> Result<Vec<GenreEntry>, GenreError> {
        let entries = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT genre_id, genre_name FROM genres
                 WHERE media_type = ?1 AND language = ?2
                 ORDER BY genre_id",
            )?;
            let entries = stmt
                .query_map(params![media_type.upstream_name(), language], |row| {
                    Ok(GenreEntry {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })?;
        Ok(entries)
    }

    /// Languages that have at least one stored genre
    pub fn stored_languages(&self) -> Result<Vec<String>, GenreError> {
        let languages = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT language FROM genres ORDER BY language")?;
            let languages = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(languages)
        })?;
        Ok(languages)
    }
}
