//! Adaptive map rotation for game servers.
//!
//! On every match start, match end and player connect the [`RotationEngine`]
//! checks the map queued next. Below the player threshold it forces one of a
//! small set of low-population maps, alternating between them. At or above
//! the threshold it replaces a next map that repeats a recent well-populated
//! match or that would be a second low-population map in a row.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod helpers;
pub mod hooks;
pub mod selector;
pub mod store;
pub mod window;

pub use catalog::{MapCatalog, MapLayer, MapParseError};
pub use config::Config;
pub use engine::{Outcome, OverrideReason, RotationEngine, RotationSettings, Trigger, TriggerKind};
pub use error::{GatewayError, RotationError, StoreError};
pub use gateway::LiveServer;
pub use hooks::{HookReport, HookSettings, MatchHooks, MatchLogEvent};
pub use store::{HistoryStore, MemoryPointerStore, PointerStore};

/// Install the fmt subscriber for structured logging.
///
/// Fails if a global subscriber is already set, which embedders and tests
/// can ignore.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .try_init()
}
