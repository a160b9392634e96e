use std::collections::BTreeMap;

/// Per-player stats captured for a match, keyed by player id.
/// The values are opaque to this crate; only the number of entries matters here.
pub type PlayerStats = BTreeMap<String, serde_json::Value>;

/// One match in the history log.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
  /// Monotonic row id; higher ids are newer matches
  pub id: i64,
  /// Layer id of the map played (e.g. "stmereeglise_warfare")
  pub map_name: String,
  /// Whether the map was inferred rather than confirmed against the live server
  pub guessed: bool,
  /// Unix timestamp when the match started
  pub start_ts: Option<i64>,
  /// Unix timestamp when the match ended, absent while in progress
  pub end_ts: Option<i64>,
  /// Number of distinct players in the stats snapshot
  pub player_count: usize,
}

impl MatchRecord {
  /// Whether the match is still in progress.
  pub fn is_open(&self) -> bool {
    self.end_ts.is_none()
  }

  /// Match length in seconds, once both ends are known.
  pub fn duration(&self) -> Option<i64> {
    match (self.start_ts, self.end_ts) {
      (Some(start), Some(end)) => Some((end - start).max(0)),
      _ => None,
    }
  }
}

/// A small durable value with an absolute expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerEntry {
  pub key: String,
  pub value: String,
  /// Unix timestamp after which the entry no longer counts
  pub expires_at: i64,
}

impl PointerEntry {
  /// Check if this entry has expired at `now`
  pub fn is_expired(&self, now: i64) -> bool {
    now >= self.expires_at
  }

  /// Seconds remaining until expiry
  pub fn expires_in(&self, now: i64) -> i64 {
    (self.expires_at - now).max(0)
  }
}
