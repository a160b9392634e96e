use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] tokio_rusqlite::rusqlite::Error),

    #[error("database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("match not found or already ended")]
    MatchNotFound,

    #[error("invalid player stats snapshot: {0}")]
    InvalidStats(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;
