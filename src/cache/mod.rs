//! Cache storage module
//!
//! This module provides the persistent response cache and the served-page
//! ledger. Values are serialized to JSON and stored in SQLite next to the
//! page, skip and filter dimensions they were produced for.

mod duration;

pub use duration::{CacheDuration, InvalidDurationFormat};

use crate::filters::FilterSignature;
use crate::storage::{Database, StorageError};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// The underlying database failed
    #[error("Cache storage error: {0}")]
    Storage(#[from] StorageError),

    /// Failed to serialize data for caching
    #[error("Failed to serialize data: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Bookkeeping written alongside a cached value
///
/// `page` is the upstream page the value was built from; `0` records an
/// exhausted signature and never enters the ledger.
#[derive(Debug, Clone, Copy)]
pub struct LedgerStamp<'a> {
    pub page: u32,
    pub skip: u32,
    pub signature: &'a FilterSignature,
}

/// Persistent TTL cache backed by the shared database
pub struct CacheStore {
    db: Arc<Database>,
}

impl CacheStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Stores a value, replacing whatever was stored under the same key
    ///
    /// The served page is recorded in the ledger in the same transaction.
    pub fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: CacheDuration,
        stamp: &LedgerStamp<'_>,
    ) -> Result<(), CacheError> {
        self.put_at(key, value, ttl, stamp, now())
    }

    pub(crate) fn put_at<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: CacheDuration,
        stamp: &LedgerStamp<'_>,
        inserted_at: i64,
    ) -> Result<(), CacheError> {
        let content = serde_json::to_string(value)?;
        let signature = stamp.signature;
        let ledger_key = signature.ledger_key();

        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO cache
                    (key, value, inserted_at, ttl_seconds, page, skip,
                     genre, year, rating, media_type, sort_order)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    inserted_at = excluded.inserted_at,
                    ttl_seconds = excluded.ttl_seconds,
                    page = excluded.page,
                    skip = excluded.skip,
                    genre = excluded.genre,
                    year = excluded.year,
                    rating = excluded.rating,
                    media_type = excluded.media_type,
                    sort_order = excluded.sort_order",
                params![
                    key,
                    content,
                    inserted_at,
                    ttl.as_secs_i64(),
                    stamp.page,
                    stamp.skip,
                    signature.genre,
                    signature.year,
                    signature.rating,
                    signature.media_type.as_str(),
                    signature.sort_by,
                ],
            )?;

            if stamp.page > 0 {
                tx.execute(
                    "INSERT OR IGNORE INTO served_pages (signature, page, skip, served_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![ledger_key, stamp.page, stamp.skip, inserted_at],
                )?;
            }

            tx.commit()?;
            Ok(())
        })?;

        debug!(key, ttl = %ttl, page = stamp.page, "Cache set");
        Ok(())
    }

    /// Loads a value if it was stored less than `ttl` ago
    ///
    /// The freshness window is the caller's, not the one used at write
    /// time. Expired rows stay in the table until overwritten. A row that
    /// no longer deserializes into `T` is reported as a miss.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        ttl: CacheDuration,
    ) -> Result<Option<T>, CacheError> {
        self.get_at(key, ttl, now())
    }

    pub(crate) fn get_at<T: DeserializeOwned>(
        &self,
        key: &str,
        ttl: CacheDuration,
        now: i64,
    ) -> Result<Option<T>, CacheError> {
        let row: Option<(String, i64)> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value, inserted_at FROM cache WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        let Some((content, inserted_at)) = row else {
            debug!(key, "Cache miss");
            return Ok(None);
        };

        if now.saturating_sub(inserted_at) >= ttl.as_secs_i64() {
            debug!(key, "Cache expired");
            return Ok(None);
        }

        match serde_json::from_str(&content) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    /// Pages already recorded for a signature
    pub fn served_pages(&self, signature: &FilterSignature) -> Result<BTreeSet<u32>, CacheError> {
        let ledger_key = signature.ledger_key();

        let pages = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT page FROM served_pages WHERE signature = ?1 ORDER BY page",
            )?;
            let pages = stmt
                .query_map(params![ledger_key], |row| row.get::<_, u32>(0))?
                .collect::<Result<BTreeSet<_>, _>>()?;
            Ok(pages)
        })?;

        Ok(pages)
    }

    /// Atomically records a page for a signature if nobody has yet
    ///
    /// Returns false when the page was already in the ledger.
    pub fn claim_page(
        &self,
        signature: &FilterSignature,
        page: u32,
        skip: u32,
    ) -> Result<bool, CacheError> {
        let ledger_key = signature.ledger_key();

        let inserted = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "INSERT OR IGNORE INTO served_pages (signature, page, skip, served_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![ledger_key, page, skip, now()],
            )?)
        })?;

        Ok(inserted == 1)
    }

    /// Removes a claim whose page was never actually served
    pub fn release_page(&self, signature: &FilterSignature, page: u32) -> Result<(), CacheError> {
        let ledger_key = signature.ledger_key();

        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM served_pages WHERE signature = ?1 AND page = ?2",
                params![ledger_key, page],
            )?;
            Ok(())
        })?;

        Ok(())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
