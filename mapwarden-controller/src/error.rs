use crate::catalog::MapParseError;
use thiserror::Error;

/// Failure talking to the live game server.
#[derive(Debug, Error)]
pub enum GatewayError {
  #[error("game server unavailable: {0}")]
  Unavailable(String),

  #[error("game server rejected command: {0}")]
  Rejected(String),
}

/// Failure reading or writing the history or pointer stores.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error(transparent)]
  Db(#[from] mapwarden_db::DbError),

  #[error("store unavailable: {0}")]
  Unavailable(String),
}

/// Everything that can stop a rotation decision.
///
/// None of these leave the engine: they are logged and turned into
/// [`Outcome::NoAction`](crate::engine::Outcome::NoAction).
#[derive(Debug, Error)]
pub enum RotationError {
  #[error("could not determine the current map")]
  NoCurrentMap(#[source] GatewayError),

  #[error(transparent)]
  Gateway(#[from] GatewayError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("unresolvable map: {0}")]
  UnresolvableMap(#[from] MapParseError),

  #[error("no candidate maps left after filtering")]
  EmptyPool,
}

impl RotationError {
  /// Whether the failure points at an unhealthy dependency rather than the data.
  pub fn is_unavailable(&self) -> bool {
    matches!(
      self,
      RotationError::NoCurrentMap(_) | RotationError::Gateway(_) | RotationError::Store(_)
    )
  }
}

impl From<mapwarden_db::DbError> for RotationError {
  fn from(err: mapwarden_db::DbError) -> Self {
    RotationError::Store(StoreError::Db(err))
  }
}
