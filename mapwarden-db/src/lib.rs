mod error;
mod models;

pub use error::{DbError, Result};
pub use models::{MatchRecord, PlayerStats, PointerEntry};

use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row, params};
use tracing::{debug, info};

const MATCH_COLUMNS: &str = "id, map_name, guessed, start_ts, end_ts, player_count";

/// Database wrapper for match history and expiring pointers.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self.conn
            .call(|conn| {
                // WAL lets the history scan run while a hook is writing
                conn.pragma_update(None, "journal_mode", "WAL")?;

                conn.execute_batch(
                    r#"
                    -- One row per match, newest has the highest id
                    CREATE TABLE IF NOT EXISTS matches (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        map_name TEXT NOT NULL,
                        guessed INTEGER NOT NULL DEFAULT 0,
                        start_ts INTEGER,
                        end_ts INTEGER,
                        player_stats TEXT NOT NULL DEFAULT '{}',
                        player_count INTEGER NOT NULL DEFAULT 0
                    );

                    -- Small key/value entries with an absolute expiry
                    CREATE TABLE IF NOT EXISTS pointers (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL,
                        expires_at INTEGER NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_matches_open ON matches(end_ts) WHERE end_ts IS NULL;
                    "#,
                )?;
                Ok(())
            })
            .await?;

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Match History
  // ========================================================================

  /// Record a new match.
  /// If the newest match is still open it is closed at `start_ts` first.
  pub async fn record_match_start(
    &self,
    map_name: String,
    guessed: bool,
    start_ts: i64,
  ) -> Result<MatchRecord> {
    let (record, closed) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let newest: Option<(i64, Option<i64>)> = tx
          .prepare_cached("SELECT id, end_ts FROM matches ORDER BY id DESC LIMIT 1")?
          .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
          .optional()?;

        let mut closed = None;
        if let Some((id, None)) = newest {
          tx.prepare_cached("UPDATE matches SET end_ts = ?1 WHERE id = ?2")?
            .execute(params![start_ts, id])?;
          closed = Some(id);
        }

        tx.prepare_cached(
          "INSERT INTO matches (map_name, guessed, start_ts) VALUES (?1, ?2, ?3)",
        )?
        .execute(params![&map_name, guessed, start_ts])?;
        let id = tx.last_insert_rowid();

        tx.commit()?;
        Ok((
          MatchRecord {
            id,
            map_name,
            guessed,
            start_ts: Some(start_ts),
            end_ts: None,
            player_count: 0,
          },
          closed,
        ))
      })
      .await?;

    if let Some(closed_id) = closed {
      debug!(closed_id, "closed previous open match");
    }
    debug!(record.id, %record.map_name, record.guessed, "recorded match start");
    Ok(record)
  }

  /// Mark the newest match as ended.
  /// Returns an error if the newest match is already closed or was played on another map.
  pub async fn record_match_end(&self, map_name: String, end_ts: i64) -> Result<MatchRecord> {
    let record = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let newest: Option<MatchRecord> = tx
          .prepare_cached(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches ORDER BY id DESC LIMIT 1"
          ))?
          .query_row([], match_from_row)
          .optional()?;

        let mut record = match newest {
          Some(r) if r.is_open() && r.map_name == map_name => r,
          _ => return Ok(Err(DbError::MatchNotFound)),
        };

        tx.prepare_cached("UPDATE matches SET end_ts = ?1 WHERE id = ?2")?
          .execute(params![end_ts, record.id])?;
        tx.commit()?;

        record.end_ts = Some(end_ts);
        Ok(Ok(record))
      })
      .await??;

    debug!(record.id, %record.map_name, end_ts, "recorded match end");
    Ok(record)
  }

  /// Store the per-player stats snapshot for a match.
  /// The snapshot size becomes the match's population figure.
  pub async fn save_player_stats(&self, match_id: i64, stats: &PlayerStats) -> Result<()> {
    let json = serde_json::to_string(stats)?;
    let count = stats.len() as i64;

    self
      .conn
      .call(move |conn| {
        let updated = conn
          .prepare_cached("UPDATE matches SET player_stats = ?1, player_count = ?2 WHERE id = ?3")?
          .execute(params![&json, count, match_id])?;

        if updated == 0 {
          return Ok(Err(DbError::MatchNotFound));
        }

        Ok(Ok(()))
      })
      .await??;

    debug!(match_id, count, "saved player stats");
    Ok(())
  }

  /// Get the stored stats snapshot for a match.
  pub async fn get_player_stats(&self, match_id: i64) -> Result<Option<PlayerStats>> {
    let raw: Option<String> = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached("SELECT player_stats FROM matches WHERE id = ?1")?
          .query_row(params![match_id], |row| row.get(0))
          .optional()
      })
      .await?;

    match raw {
      Some(json) => Ok(Some(serde_json::from_str(&json)?)),
      None => Ok(None),
    }
  }

  /// Get a match by id.
  pub async fn get_match(&self, match_id: i64) -> Result<Option<MatchRecord>> {
    let record = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(&format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1"))?
          .query_row(params![match_id], match_from_row)
          .optional()
      })
      .await?;

    Ok(record)
  }

  /// Get up to `limit` matches older than `before_id`, newest first.
  /// Pass `None` to start from the newest match.
  pub async fn recent_matches(
    &self,
    before_id: Option<i64>,
    limit: usize,
  ) -> Result<Vec<MatchRecord>> {
    let cursor = before_id.unwrap_or(i64::MAX);
    let limit = limit as i64;

    let records = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {MATCH_COLUMNS} FROM matches WHERE id < ?1 ORDER BY id DESC LIMIT ?2"
        ))?;

        let records = stmt
          .query_map(params![cursor, limit], match_from_row)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
      })
      .await?;

    Ok(records)
  }

  /// Total number of recorded matches.
  pub async fn match_count(&self) -> Result<u64> {
    let count = self
      .conn
      .call(|conn| {
        let count: i64 = conn
          .prepare_cached("SELECT COUNT(*) FROM matches")?
          .query_row([], |row| row.get(0))?;
        Ok(count as u64)
      })
      .await?;

    Ok(count)
  }

  // ========================================================================
  // Pointers
  // ========================================================================

  /// Get a pointer by key, expired or not.
  /// Expiry is judged by the caller against its own clock.
  pub async fn get_pointer(&self, key: String) -> Result<Option<PointerEntry>> {
    let entry = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached("SELECT key, value, expires_at FROM pointers WHERE key = ?1")?
          .query_row(params![&key], |row| {
            Ok(PointerEntry {
              key: row.get(0)?,
              value: row.get(1)?,
              expires_at: row.get(2)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(entry)
  }

  /// Insert or replace a pointer in a single statement.
  pub async fn set_pointer(
    &self,
    key: String,
    value: String,
    expires_at: i64,
  ) -> Result<PointerEntry> {
    let entry = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            r#"
            INSERT INTO pointers (key, value, expires_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
          )?
          .execute(params![&key, &value, expires_at])?;

        Ok(PointerEntry {
          key,
          value,
          expires_at,
        })
      })
      .await?;

    debug!(%entry.key, %entry.value, entry.expires_at, "set pointer");
    Ok(entry)
  }

  /// Delete a pointer. Returns whether it existed.
  pub async fn delete_pointer(&self, key: String) -> Result<bool> {
    let deleted = self
      .conn
      .call(move |conn| {
        let deleted = conn
          .prepare_cached("DELETE FROM pointers WHERE key = ?1")?
          .execute(params![&key])?;
        Ok(deleted > 0)
      })
      .await?;

    Ok(deleted)
  }

  /// Clean up expired pointers.
  pub async fn cleanup_expired_pointers(&self, now: i64) -> Result<u64> {
    let deleted = self
      .conn
      .call(move |conn| {
        let deleted = conn
          .prepare_cached("DELETE FROM pointers WHERE expires_at <= ?1")?
          .execute(params![now])?;
        Ok(deleted as u64)
      })
      .await?;

    if deleted > 0 {
      debug!(deleted, "cleaned up expired pointers");
    }

    Ok(deleted)
  }
}

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<MatchRecord> {
  let player_count: i64 = row.get(5)?;
  Ok(MatchRecord {
    id: row.get(0)?,
    map_name: row.get(1)?,
    guessed: row.get(2)?,
    start_ts: row.get(3)?,
    end_ts: row.get(4)?,
    player_count: player_count.max(0) as usize,
  })
}
