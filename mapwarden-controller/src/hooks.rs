//! Trigger receivers called by the game server's event dispatcher.
//!
//! Match start and match end keep the history log current before running the
//! rotation check; player connects only run the check. Nothing here returns
//! an error to the dispatcher.

use mapwarden_db::{Database, MatchRecord, PlayerStats};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::catalog::{MapCatalog, MapLayer};
use crate::config::Config;
use crate::engine::{Outcome, RotationEngine, RotationSettings, Trigger};
use crate::error::StoreError;
use crate::gateway::LiveServer;
use crate::helpers::{Clock, SystemClock};

/// Structured log line delivered with match start and match end events.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchLogEvent {
    /// Log text after the event prefix, e.g. "Foy Warfare"
    pub sub_content: String,
    pub timestamp_ms: i64,
}

impl MatchLogEvent {
    /// Event time in unix seconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp_ms / 1000
    }

    fn is_fresh(&self, now: i64, max_age: Duration) -> bool {
        now.saturating_sub(self.timestamp()) < i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX)
    }
}

/// Freshness limits for match log lines
#[derive(Debug, Clone)]
pub struct HookSettings {
    pub match_start_log_max_age: Duration,
    pub match_end_log_max_age: Duration,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            match_start_log_max_age: Duration::from_secs(5 * 60),
            match_end_log_max_age: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for HookSettings {
    fn from(config: &Config) -> Self {
        Self {
            match_start_log_max_age: config.match_start_log_max_age,
            match_end_log_max_age: config.match_end_log_max_age,
        }
    }
}

/// What a match hook did.
#[derive(Debug, Clone, PartialEq)]
pub struct HookReport {
    /// History record written, if any
    pub recorded: Option<MatchRecord>,
    /// Rotation decision, if the check ran
    pub outcome: Option<Outcome>,
}

pub struct MatchHooks {
    engine: Arc<RotationEngine>,
    db: Database,
    settings: HookSettings,
}

impl MatchHooks {
    pub fn new(engine: Arc<RotationEngine>, db: Database, settings: HookSettings) -> Self {
        Self {
            engine,
            db,
            settings,
        }
    }

    /// Opens the history database and wires an engine for one game server.
    ///
    /// Pointers that expired while the controller was down are purged.
    pub async fn from_config(
        config: &Config,
        gateway: Arc<dyn LiveServer>,
    ) -> Result<Self, StoreError> {
        Self::from_config_with_clock(config, gateway, Arc::new(SystemClock)).await
    }

    /// Like [`from_config`](Self::from_config) with the configuration read from the environment.
    pub async fn from_env(gateway: Arc<dyn LiveServer>) -> Result<Self, StoreError> {
        Self::from_config(&Config::from_env(), gateway).await
    }

    pub async fn from_config_with_clock(
        config: &Config,
        gateway: Arc<dyn LiveServer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        info!(
            db_path = %config.database_path,
            threshold = config.player_threshold,
            low_pop_maps = ?config.low_pop_maps,
            pointer_ttl_secs = config.pointer_ttl.as_secs(),
            "starting rotation controller"
        );

        let db = Database::open(&config.database_path).await?;
        let purged = db.cleanup_expired_pointers(clock.now()).await?;
        if purged > 0 {
            info!(purged, "removed expired pointers");
        }

        let engine = RotationEngine::new(
            gateway,
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            MapCatalog::new(),
            RotationSettings::from(config),
        )
        .with_clock(clock);

        Ok(Self::new(Arc::new(engine), db, HookSettings::from(config)))
    }

    pub fn engine(&self) -> &Arc<RotationEngine> {
        &self.engine
    }

    /// Records the new match, closing the previous one, then checks the rotation.
    pub async fn on_match_start(&self, event: &MatchLogEvent) -> HookReport {
        info!(log = %event.sub_content, "new match started, recording map");
        let now = self.engine.clock().now();
        let current = self.current_map_or_unknown().await;

        // The log names the map without its mode: "<map> <mode>"
        let log_map_name = event
            .sub_content
            .rsplit_once(' ')
            .map_or(event.sub_content.as_str(), |(map, _)| map);

        let (to_save, guessed) = if event.is_fresh(now, self.settings.match_start_log_max_age) {
            if log_names_map(log_map_name, &current, self.engine.catalog()) {
                (current, false)
            } else {
                warn!(log_map = log_map_name, current = %current, "recent match start but map doesn't match");
                (MapLayer::unknown(), true)
            }
        } else {
            (current, true)
        };

        let recorded = match self
            .db
            .record_match_start(to_save.id.clone(), guessed, event.timestamp())
            .await
        {
            Ok(record) => Some(record),
            Err(err) => {
                error!(error = %err, map = %to_save.id, "failed to record match start");
                None
            }
        };

        let outcome = self.engine.evaluate(Trigger::match_start()).await;
        HookReport {
            recorded,
            outcome: Some(outcome),
        }
    }

    /// Closes the current match and checks the rotation, but only for a fresh
    /// log line that names the map being played.
    pub async fn on_match_end(&self, event: &MatchLogEvent) -> HookReport {
        info!(log = %event.sub_content, "match ended");
        let now = self.engine.clock().now();
        let current = self.current_map_or_unknown().await;

        if !event.is_fresh(now, self.settings.match_end_log_max_age) {
            debug!(age = now - event.timestamp(), "ignoring stale match end");
            return HookReport {
                recorded: None,
                outcome: None,
            };
        }
        if !log_mentions_map(&event.sub_content, &current, self.engine.catalog()) {
            debug!(log = %event.sub_content, current = %current, "match end is for another map");
            return HookReport {
                recorded: None,
                outcome: None,
            };
        }

        let recorded = match self
            .db
            .record_match_end(current.id.clone(), event.timestamp())
            .await
        {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(error = %err, map = %current.id, "failed to record match end");
                None
            }
        };

        let outcome = self.engine.evaluate(Trigger::match_end()).await;
        HookReport {
            recorded,
            outcome: Some(outcome),
        }
    }

    /// Checks the rotation after a connect. `player_count` is the post-connect
    /// count when the dispatcher already knows it.
    pub async fn on_player_connected(&self, name: &str, player_count: Option<usize>) -> Outcome {
        info!(player = name, players = ?player_count, "player connected, checking rotation");
        self.engine
            .evaluate(Trigger::player_connected(player_count))
            .await
    }

    /// Stores the stats snapshot that gives a match its population.
    pub async fn record_player_stats(
        &self,
        match_id: i64,
        stats: &PlayerStats,
    ) -> Result<(), StoreError> {
        self.db.save_player_stats(match_id, stats).await?;
        Ok(())
    }

    async fn current_map_or_unknown(&self) -> MapLayer {
        let raw = match self.engine.gateway().current_map().await {
            Ok(raw) => raw,
            Err(err) => {
                error!(error = %err, "unable to get current map, falling back to unknown");
                return MapLayer::unknown();
            }
        };
        self.engine.catalog().parse(&raw).unwrap_or_else(|err| {
            error!(map = %raw, error = %err, "current map is unresolvable, falling back to unknown");
            MapLayer::unknown()
        })
    }
}

/// Lowercase ASCII alphanumerics only, so "St. Mere Eglise" matches "stmereeglise".
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn map_keys(layer: &MapLayer, catalog: &MapCatalog) -> Vec<String> {
    let mut keys = vec![normalize(&layer.base_id)];
    if let Some(name) = catalog.map_name(&layer.base_id) {
        keys.push(normalize(name));
    }
    keys
}

fn log_names_map(log_map_name: &str, layer: &MapLayer, catalog: &MapCatalog) -> bool {
    let lowered = log_map_name.trim().to_lowercase();
    let logged = normalize(lowered.strip_suffix(" night").unwrap_or(&lowered));
    map_keys(layer, catalog).iter().any(|key| *key == logged)
}

fn log_mentions_map(log: &str, layer: &MapLayer, catalog: &MapCatalog) -> bool {
    let logged = normalize(log);
    map_keys(layer, catalog)
        .iter()
        .any(|key| !key.is_empty() && logged.contains(key.as_str()))
}
