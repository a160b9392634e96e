//! Round-robin selection for the low-population regime.

use std::time::Duration;
use tracing::debug;

use crate::catalog::MapLayer;
use crate::helpers::choose_random;
use crate::store::{PointerStore, StoreResult};

/// Store key of the last low-population map.
pub const LOW_POP_POINTER_KEY: &str = "last_low_pop_map_id";

/// Picks the next low-population map.
///
/// With a pointer the pick is deterministic: the map after the pointer,
/// cyclically (the other one of a pair). A pointer outside the set restarts
/// at the first map. Without a pointer the pick is random.
pub fn select_low_pop(candidates: &[MapLayer], pointer: Option<&str>) -> Option<MapLayer> {
    if candidates.is_empty() {
        return None;
    }

    match pointer {
        Some(base_id) => {
            let next = candidates
                .iter()
                .position(|m| m.base_id == base_id)
                .map_or(0, |i| (i + 1) % candidates.len());
            Some(candidates[next].clone())
        }
        None => choose_random(candidates),
    }
}

/// The last map chosen in the low-population regime, valid until `expires_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct LowPopPointer {
    pub map_base_id: String,
    pub expires_at: i64,
}

impl LowPopPointer {
    pub fn new(map_base_id: impl Into<String>, now: i64, ttl: Duration) -> Self {
        Self {
            map_base_id: map_base_id.into(),
            expires_at: now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Reads the pointer; an expired entry counts as absent.
    pub async fn load(store: &dyn PointerStore, now: i64) -> StoreResult<Option<Self>> {
        let Some(entry) = store.get(LOW_POP_POINTER_KEY).await? else {
            return Ok(None);
        };

        let pointer = Self {
            map_base_id: entry.value,
            expires_at: entry.expires_at,
        };
        if pointer.is_expired(now) {
            debug!(map = %pointer.map_base_id, expired_at = pointer.expires_at, "low-pop pointer expired");
            return Ok(None);
        }
        Ok(Some(pointer))
    }

    pub async fn save(&self, store: &dyn PointerStore) -> StoreResult<()> {
        store
            .set_with_expiry(LOW_POP_POINTER_KEY, &self.map_base_id, self.expires_at)
            .await
    }

    pub async fn clear(store: &dyn PointerStore) -> StoreResult<()> {
        store.delete(LOW_POP_POINTER_KEY).await
    }
}
