//! Exclusion window: the base maps of the most recent well-populated matches.

use arrayvec::ArrayVec;
use mapwarden_db::MatchRecord;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::catalog::MapCatalog;
use crate::store::{HistoryStore, StoreResult};

/// How many qualifying matches the window spans.
pub const EXCLUSION_WINDOW_LEN: usize = 5;

/// One qualifying match that contributed to the window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEntry {
    pub match_id: i64,
    pub base_id: String,
    pub player_count: usize,
}

/// Base maps barred from being queued next in the normal regime.
///
/// Only matches with at least `threshold` players count; quieter matches are
/// skipped entirely, however far back that pushes the scan.
#[derive(Debug, Clone, Default)]
pub struct ExclusionWindow {
    entries: ArrayVec<WindowEntry, EXCLUSION_WINDOW_LEN>,
}

impl ExclusionWindow {
    /// Builds the window from records that are already newest first.
    pub fn from_records<'a, I>(records: I, threshold: usize, catalog: &MapCatalog) -> Self
    where
        I: IntoIterator<Item = &'a MatchRecord>,
    {
        let mut window = Self::default();
        for record in records {
            if window.offer(record, threshold, catalog) {
                break;
            }
        }
        window
    }

    /// Scans the history store newest to oldest, one page at a time, and stops
    /// as soon as the window is full.
    pub async fn collect(
        history: &dyn HistoryStore,
        catalog: &MapCatalog,
        threshold: usize,
        page_size: usize,
    ) -> StoreResult<Self> {
        let page_size = page_size.max(1);

        if !history.is_newest_first() {
            let mut records = drain(history, page_size).await?;
            records.sort_by(|a, b| b.start_ts.cmp(&a.start_ts).then(b.id.cmp(&a.id)));
            return Ok(Self::from_records(&records, threshold, catalog));
        }

        let mut window = Self::default();
        let mut cursor = None;
        let mut scanned = 0usize;
        loop {
            let page = history.recent_matches(cursor, page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);

            for record in &page {
                scanned += 1;
                if window.offer(record, threshold, catalog) {
                    debug!(scanned, "exclusion window full");
                    return Ok(window);
                }
            }

            if page.len() < page_size {
                break;
            }
        }

        debug!(scanned, entries = window.len(), "history exhausted before window filled");
        Ok(window)
    }

    /// Adds the record if it qualifies. Returns true once the window is full.
    fn offer(&mut self, record: &MatchRecord, threshold: usize, catalog: &MapCatalog) -> bool {
        if self.entries.is_full() {
            return true;
        }

        if record.start_ts.is_none() {
            debug!(match_id = record.id, "skipping match without start time");
            return false;
        }
        if record.player_count < threshold {
            return false;
        }

        let layer = match catalog.parse(&record.map_name) {
            Ok(layer) => layer,
            Err(err) => {
                warn!(match_id = record.id, map = %record.map_name, error = %err, "skipping unresolvable map in history");
                return false;
            }
        };

        self.entries.push(WindowEntry {
            match_id: record.id,
            base_id: layer.base_id,
            player_count: record.player_count,
        });
        self.entries.is_full()
    }

    pub fn contains(&self, base_id: &str) -> bool {
        self.entries.iter().any(|e| e.base_id == base_id)
    }

    /// Distinct base ids in the window.
    pub fn base_ids(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.base_id.as_str()).collect()
    }

    pub fn entries(&self) -> &[WindowEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

async fn drain(history: &dyn HistoryStore, page_size: usize) -> StoreResult<Vec<MatchRecord>> {
    let mut records = Vec::new();
    let mut cursor = None;
    loop {
        let page = history.recent_matches(cursor, page_size).await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(last.id);
        let short = page.len() < page_size;
        records.extend(page);
        if short {
            break;
        }
    }
    Ok(records)
}
