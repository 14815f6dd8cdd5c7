//! Cached response CRUD operations.
//!
//! Provides functions for storing, matching, and purging request/response
//! snapshots per generation.

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// A cached response snapshot.
///
/// Headers are kept as an ordered JSON array of `[name, value]` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub generation: String,
    pub key_hash: String,
    pub url: String,
    pub method: String,
    pub status: u16,
    pub headers_json: String,
    pub body: Vec<u8>,
    pub stored_at: String,
}

impl CachedResponse {
    /// Decode the stored header list.
    pub fn headers(&self) -> Result<Vec<(String, String)>, Error> {
        Ok(serde_json::from_str(&self.headers_json)?)
    }
}

impl CacheDb {
    /// Insert or overwrite a cached response.
    ///
    /// Uses UPSERT semantics keyed by (generation, key_hash).
    pub async fn put(&self, entry: &CachedResponse) -> Result<(), Error> {
        let entry = entry.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_entries (
                    generation, key_hash, url, method, status, headers_json, body, stored_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(generation, key_hash) DO UPDATE SET
                    url = excluded.url,
                    method = excluded.method,
                    status = excluded.status,
                    headers_json = excluded.headers_json,
                    body = excluded.body,
                    stored_at = excluded.stored_at",
                    params![
                        &entry.generation,
                        &entry.key_hash,
                        &entry.url,
                        &entry.method,
                        entry.status,
                        &entry.headers_json,
                        &entry.body,
                        &entry.stored_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a cached response in one generation.
    ///
    /// Returns None if the key isn't cached there.
    pub async fn lookup(&self, generation: &str, key_hash: &str) -> Result<Option<CachedResponse>, Error> {
        let generation = generation.to_string();
        let key_hash = key_hash.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CachedResponse>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT generation, key_hash, url, method, status, headers_json, body, stored_at
                FROM cache_entries WHERE generation = ?1 AND key_hash = ?2",
                )?;

                let result = stmt.query_row(params![generation, key_hash], |row| {
                    Ok(CachedResponse {
                        generation: row.get(0)?,
                        key_hash: row.get(1)?,
                        url: row.get(2)?,
                        method: row.get(3)?,
                        status: row.get(4)?,
                        headers_json: row.get(5)?,
                        body: row.get(6)?,
                        stored_at: row.get(7)?,
                    })
                });

                match result {
                    Ok(entry) => Ok(Some(entry)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// List every generation that currently holds entries.
    pub async fn generations(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT DISTINCT generation FROM cache_entries ORDER BY generation")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                let mut generations = Vec::new();
                for row in rows {
                    generations.push(row?);
                }
                Ok(generations)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a whole generation.
    ///
    /// Returns the number of deleted entries.
    pub async fn delete_generation(&self, generation: &str) -> Result<u64, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE generation = ?1", params![generation])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every generation except `current` in one transaction.
    ///
    /// Returns the purged generation names.
    pub async fn purge_except(&self, current: &str) -> Result<Vec<String>, Error> {
        let current = current.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let tx = conn.transaction()?;
                let stale: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT DISTINCT generation FROM cache_entries WHERE generation != ?1 ORDER BY generation",
                    )?;
                    let rows = stmt.query_map(params![current], |row| row.get(0))?;
                    rows.collect::<Result<_, _>>()?
                };
                tx.execute("DELETE FROM cache_entries WHERE generation != ?1", params![current])?;
                tx.commit()?;
                Ok(stale)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every cached response in every generation.
    ///
    /// Returns the number of deleted entries.
    pub async fn clear_all(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries", [])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries held by a generation.
    pub async fn count(&self, generation: &str) -> Result<u64, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE generation = ?1",
                    params![generation],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash::compute_request_key;

    fn make_entry(generation: &str, url: &str, body: &str) -> CachedResponse {
        CachedResponse {
            generation: generation.to_string(),
            key_hash: compute_request_key("GET", url),
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            headers_json: r#"[["content-type","text/css"]]"#.to_string(),
            body: body.as_bytes().to_vec(),
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn test_put_and_lookup() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entry = make_entry("v1", "https://example.com/app.css", "body{}");

        db.put(&entry).await.unwrap();

        let found = db.lookup("v1", &entry.key_hash).await.unwrap().unwrap();
        assert_eq!(found, entry);
        assert_eq!(found.headers().unwrap(), vec![("content-type".to_string(), "text/css".to_string())]);
    }

    #[tokio::test]
    async fn test_lookup_is_generation_scoped() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let entry = make_entry("v1", "https://example.com/app.css", "body{}");
        db.put(&entry).await.unwrap();

        assert!(db.lookup("v2", &entry.key_hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put(&make_entry("v1", "https://example.com/a.js", "old")).await.unwrap();
        let newer = make_entry("v1", "https://example.com/a.js", "new");
        db.put(&newer).await.unwrap();

        let found = db.lookup("v1", &newer.key_hash).await.unwrap().unwrap();
        assert_eq!(found.body, b"new".to_vec());
        assert_eq!(db.count("v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_except_current() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put(&make_entry("v0", "https://example.com/a.js", "a")).await.unwrap();
        db.put(&make_entry("v1", "https://example.com/a.js", "a")).await.unwrap();
        db.put(&make_entry("v2", "https://example.com/b.js", "b")).await.unwrap();

        let purged = db.purge_except("v2").await.unwrap();
        assert_eq!(purged, vec!["v0".to_string(), "v1".to_string()]);
        assert_eq!(db.generations().await.unwrap(), vec!["v2".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_generation_and_clear_all() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put(&make_entry("v1", "https://example.com/a.js", "a")).await.unwrap();
        db.put(&make_entry("v1", "https://example.com/b.js", "b")).await.unwrap();
        db.put(&make_entry("v2", "https://example.com/c.js", "c")).await.unwrap();

        assert_eq!(db.delete_generation("v1").await.unwrap(), 2);
        assert_eq!(db.clear_all().await.unwrap(), 1);
        assert!(db.generations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");
        let entry = make_entry("v1", "https://example.com/index.html", "<html></html>");

        let db = CacheDb::open(&path).await.unwrap();
        db.put(&entry).await.unwrap();
        db.close().await.unwrap();

        let reopened = CacheDb::open(&path).await.unwrap();
        assert!(reopened.lookup("v1", &entry.key_hash).await.unwrap().is_some());
    }
}
