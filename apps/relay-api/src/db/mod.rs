pub mod message_log;
pub mod pool;
pub mod schema;
pub mod users;

use diesel_async::pooled_connection::deadpool::PoolError;

/// Failure reported by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
