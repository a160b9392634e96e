//! Rotation decision engine.
//!
//! Every trigger runs the same read, decide, write sequence against the live
//! server. There is no lock around it: two concurrent evaluations may both
//! override the next map and the last write wins. Re-running the engine on an
//! unchanged server settles on [`Outcome::NoAction`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{MapCatalog, MapLayer, MapParseError};
use crate::config::{Config, DEFAULT_LOW_POP_MAPS};
use crate::error::RotationError;
use crate::gateway::LiveServer;
use crate::helpers::{Clock, SystemClock, choose_random};
use crate::selector::{LowPopPointer, select_low_pop};
use crate::store::{HistoryStore, PointerStore};
use crate::window::{EXCLUSION_WINDOW_LEN, ExclusionWindow};

/// What fired the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    MatchStart,
    MatchEnd,
    PlayerConnected,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerKind::MatchStart => "match_start",
            TriggerKind::MatchEnd => "match_end",
            TriggerKind::PlayerConnected => "player_connected",
        })
    }
}

/// A trigger and, when the caller already knows it, the player count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub player_count: Option<usize>,
}

impl Trigger {
    pub fn match_start() -> Self {
        Self {
            kind: TriggerKind::MatchStart,
            player_count: None,
        }
    }

    pub fn match_end() -> Self {
        Self {
            kind: TriggerKind::MatchEnd,
            player_count: None,
        }
    }

    pub fn player_connected(player_count: Option<usize>) -> Self {
        Self {
            kind: TriggerKind::PlayerConnected,
            player_count,
        }
    }

    pub fn with_player_count(mut self, player_count: usize) -> Self {
        self.player_count = Some(player_count);
        self
    }
}

/// Which rule set applies for a player count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    LowPopulation,
    Normal,
}

impl Regime {
    pub fn for_count(player_count: usize, threshold: usize) -> Self {
        if player_count < threshold {
            Regime::LowPopulation
        } else {
            Regime::Normal
        }
    }
}

/// Why the next map was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideReason {
    /// Too few players: the next map must be a low-population map.
    LowPopulation,
    /// The queued map repeats something recent.
    Repeat {
        recently_played: bool,
        consecutive_low_pop: bool,
    },
}

impl fmt::Display for OverrideReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideReason::LowPopulation => f.write_str("low population"),
            OverrideReason::Repeat {
                recently_played,
                consecutive_low_pop,
            } => {
                let mut parts = Vec::with_capacity(2);
                if *recently_played {
                    parts.push("played in a recent populated match");
                }
                if *consecutive_low_pop {
                    parts.push("avoiding consecutive low-population maps");
                }
                f.write_str(&parts.join(" / "))
            }
        }
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    NoAction,
    Overridden { map: MapLayer, reason: OverrideReason },
}

impl Outcome {
    pub fn is_overridden(&self) -> bool {
        matches!(self, Outcome::Overridden { .. })
    }

    /// The map written as next, if any.
    pub fn map(&self) -> Option<&MapLayer> {
        match self {
            Outcome::Overridden { map, .. } => Some(map),
            Outcome::NoAction => None,
        }
    }
}

/// Live state gathered at the start of an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionContext {
    pub trigger: TriggerKind,
    pub current: MapLayer,
    pub candidate: Option<MapLayer>,
    pub player_count: usize,
}

/// Tunables for the engine
#[derive(Debug, Clone)]
pub struct RotationSettings {
    /// Player count at which the normal rotation takes over
    pub player_threshold: usize,
    /// Layer ids the low-population rotation alternates between
    pub low_pop_maps: Vec<String>,
    /// How long the last low-population pick is remembered
    pub pointer_ttl: Duration,
    /// History records fetched per round trip
    pub history_page_size: usize,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            player_threshold: 40,
            low_pop_maps: DEFAULT_LOW_POP_MAPS.iter().map(|m| m.to_string()).collect(),
            pointer_ttl: Duration::from_secs(24 * 60 * 60),
            history_page_size: 50,
        }
    }
}

impl From<&Config> for RotationSettings {
    fn from(config: &Config) -> Self {
        Self {
            player_threshold: config.player_threshold,
            low_pop_maps: config.low_pop_maps.clone(),
            pointer_ttl: config.pointer_ttl,
            history_page_size: config.history_page_size,
        }
    }
}

/// Decides whether the next map in the rotation should be replaced.
///
/// Built once per game server and shared behind an `Arc`.
pub struct RotationEngine {
    gateway: Arc<dyn LiveServer>,
    history: Arc<dyn HistoryStore>,
    pointers: Arc<dyn PointerStore>,
    clock: Arc<dyn Clock>,
    catalog: MapCatalog,
    settings: RotationSettings,
    low_pop_set: Vec<MapLayer>,
}

impl RotationEngine {
    pub fn new(
        gateway: Arc<dyn LiveServer>,
        history: Arc<dyn HistoryStore>,
        pointers: Arc<dyn PointerStore>,
        catalog: MapCatalog,
        settings: RotationSettings,
    ) -> Self {
        let low_pop_set = catalog.resolve_all(settings.low_pop_maps.as_slice());
        if low_pop_set.is_empty() {
            warn!(maps = ?settings.low_pop_maps, "no usable low-population maps configured");
        }

        Self {
            gateway,
            history,
            pointers,
            clock: Arc::new(SystemClock),
            catalog,
            settings,
            low_pop_set,
        }
    }

    /// Replace the wall clock, e.g. with a [`ManualClock`](crate::helpers::ManualClock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn gateway(&self) -> &dyn LiveServer {
        self.gateway.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn settings(&self) -> &RotationSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &MapCatalog {
        &self.catalog
    }

    pub fn low_pop_maps(&self) -> &[MapLayer] {
        &self.low_pop_set
    }

    pub fn is_low_pop(&self, layer: &MapLayer) -> bool {
        self.low_pop_set.iter().any(|m| m.same_map(layer))
    }

    /// Runs one decision. Never fails: every error is logged and becomes `NoAction`.
    pub async fn evaluate(&self, trigger: Trigger) -> Outcome {
        match self.decide(trigger).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_unavailable() => {
                warn!(trigger = %trigger.kind, error = %err, "rotation check skipped, dependency unavailable");
                Outcome::NoAction
            }
            Err(err) => {
                warn!(trigger = %trigger.kind, error = %err, "rotation check abandoned");
                Outcome::NoAction
            }
        }
    }

    /// Like [`evaluate`](Self::evaluate) but surfaces the error.
    pub async fn decide(&self, trigger: Trigger) -> Result<Outcome, RotationError> {
        let ctx = self.context(trigger).await?;
        match Regime::for_count(ctx.player_count, self.settings.player_threshold) {
            Regime::LowPopulation => self.decide_low_pop(&ctx).await,
            Regime::Normal => self.decide_normal(&ctx).await,
        }
    }

    /// Reads the current map, the candidate next map and the player count.
    pub async fn context(&self, trigger: Trigger) -> Result<DecisionContext, RotationError> {
        let raw_current = self
            .gateway
            .current_map()
            .await
            .map_err(RotationError::NoCurrentMap)?;
        let current = self.catalog.parse(&raw_current)?;
        if current.is_unknown() {
            return Err(MapParseError::UnknownMap(raw_current).into());
        }

        let queue = self.gateway.rotation_queue().await?;
        let raw_candidate = match queue.get(1) {
            Some(next) => Some(next.clone()),
            None => match self.gateway.next_map().await {
                Ok(next) => next,
                Err(err) => {
                    warn!(error = %err, "could not get next map");
                    None
                }
            },
        };

        let candidate = match raw_candidate {
            Some(raw) => match self.catalog.parse(&raw) {
                Ok(layer) => Some(layer),
                Err(err) => {
                    warn!(map = %raw, error = %err, "next map is unresolvable, treating as absent");
                    None
                }
            },
            None => {
                debug!("no next map in rotation");
                None
            }
        };

        let player_count = match trigger.player_count {
            Some(count) => count,
            None => self.gateway.player_count().await?,
        };

        Ok(DecisionContext {
            trigger: trigger.kind,
            current,
            candidate,
            player_count,
        })
    }

    async fn decide_low_pop(&self, ctx: &DecisionContext) -> Result<Outcome, RotationError> {
        if let Some(candidate) = &ctx.candidate {
            if self.is_low_pop(candidate) {
                debug!(next = %candidate, players = ctx.player_count, "next map already a low-population map");
                return Ok(Outcome::NoAction);
            }
        }

        let now = self.clock.now();
        let pointer = LowPopPointer::load(self.pointers.as_ref(), now).await?;
        let selected = select_low_pop(
            &self.low_pop_set,
            pointer.as_ref().map(|p| p.map_base_id.as_str()),
        )
        .ok_or(RotationError::EmptyPool)?;

        self.write_next(&ctx.current, &selected).await?;
        info!(
            trigger = %ctx.trigger,
            players = ctx.player_count,
            threshold = self.settings.player_threshold,
            from = ctx.candidate.as_ref().map(|m| m.pretty_name.as_str()).unwrap_or("none"),
            to = %selected,
            "changing next map to low-population rotation"
        );

        let pointer = LowPopPointer::new(selected.base_id.clone(), now, self.settings.pointer_ttl);
        if let Err(err) = pointer.save(self.pointers.as_ref()).await {
            warn!(error = %err, map = %pointer.map_base_id, "failed to remember low-population map");
        }

        Ok(Outcome::Overridden {
            map: selected,
            reason: OverrideReason::LowPopulation,
        })
    }

    async fn decide_normal(&self, ctx: &DecisionContext) -> Result<Outcome, RotationError> {
        let Some(candidate) = &ctx.candidate else {
            debug!(players = ctx.player_count, "no next map to validate");
            return Ok(Outcome::NoAction);
        };

        let window = ExclusionWindow::collect(
            self.history.as_ref(),
            &self.catalog,
            self.settings.player_threshold,
            self.settings.history_page_size,
        )
        .await?;

        let recently_played = window.contains(&candidate.base_id);
        let consecutive_low_pop = self.is_low_pop(&ctx.current) && self.is_low_pop(candidate);
        if !recently_played && !consecutive_low_pop {
            debug!(next = %candidate, excluded = ?window.base_ids(), "next map is fine");
            return Ok(Outcome::NoAction);
        }

        let listed = self.gateway.list_maps().await?;
        let available = self.catalog.resolve_all(listed.as_slice());
        let mut pool = replacement_pool(&available, &ctx.current, Some(&window), &self.low_pop_set);
        if pool.is_empty() {
            pool = replacement_pool(&available, &ctx.current, None, &self.low_pop_set);
            // The queued map already satisfies the relaxed rules
            if pool.iter().any(|m| m.same_map(candidate)) {
                debug!(next = %candidate, excluded = ?window.base_ids(), "every map was played recently, keeping next map");
                return Ok(Outcome::NoAction);
            }
            debug!(excluded = ?window.base_ids(), "every map was played recently, ignoring history");
        }
        let selected = choose_random(&pool).ok_or(RotationError::EmptyPool)?;

        let reason = OverrideReason::Repeat {
            recently_played,
            consecutive_low_pop,
        };
        self.write_next(&ctx.current, &selected).await?;
        info!(
            trigger = %ctx.trigger,
            players = ctx.player_count,
            threshold = self.settings.player_threshold,
            window = EXCLUSION_WINDOW_LEN,
            from = %candidate,
            to = %selected,
            %reason,
            "changing next map"
        );

        Ok(Outcome::Overridden {
            map: selected,
            reason,
        })
    }

    async fn write_next(&self, current: &MapLayer, next: &MapLayer) -> Result<(), RotationError> {
        self.gateway
            .set_rotation_queue(&[current.id.clone(), next.id.clone()])
            .await?;
        Ok(())
    }
}

/// Maps eligible to replace the next map.
///
/// Drops the current map's geography, everything in `exclusion` and, when
/// the current map is a low-population map, every low-population map.
pub fn replacement_pool(
    available: &[MapLayer],
    current: &MapLayer,
    exclusion: Option<&ExclusionWindow>,
    low_pop_set: &[MapLayer],
) -> Vec<MapLayer> {
    let is_low_pop = |layer: &MapLayer| low_pop_set.iter().any(|m| m.same_map(layer));
    let current_low_pop = is_low_pop(current);

    available
        .iter()
        .filter(|m| !m.same_map(current))
        .filter(|m| exclusion.is_none_or(|w| !w.contains(&m.base_id)))
        .filter(|m| !(current_low_pop && is_low_pop(m)))
        .cloned()
        .collect()
}
