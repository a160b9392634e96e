//! Live game server access.
//!
//! Maps travel as layer ids (e.g. "foy_warfare"); resolving them is the
//! catalog's job, so a gateway never needs to understand map names.

use async_trait::async_trait;

use crate::error::GatewayError;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// The authoritative view of a running game server.
///
/// Every method is a single round trip; nothing here is transactional.
#[async_trait]
pub trait LiveServer: Send + Sync {
    /// Layer id of the map being played right now.
    async fn current_map(&self) -> GatewayResult<String>;

    /// Upcoming maps. Index 0 is the current map, index 1 plays next.
    async fn rotation_queue(&self) -> GatewayResult<Vec<String>>;

    /// The server's own idea of the next map, used when the queue is too short.
    async fn next_map(&self) -> GatewayResult<Option<String>>;

    /// Connected players.
    async fn player_count(&self) -> GatewayResult<usize>;

    /// Replace the whole rotation queue.
    async fn set_rotation_queue(&self, layer_ids: &[String]) -> GatewayResult<()>;

    /// Every layer the server can run.
    async fn list_maps(&self) -> GatewayResult<Vec<String>>;
}
