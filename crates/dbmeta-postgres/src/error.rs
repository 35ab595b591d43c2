use dbmeta_cache::{CacheError, ConnectionError};
use thiserror::Error;

/// An error of a [`PgDataSource`](crate::PgDataSource) operation.
#[derive(Debug, Clone, Error)]
pub enum DataSourceError {
    /// Reading metadata through one of the caches failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// A query outside of the caches failed.
    #[error("failed to query the server")]
    Connection(#[from] ConnectionError),
    /// The data source is connected, but the server has no visible databases.
    #[error("no databases found on the server")]
    NoDatabases,
    /// The data source was not initialized yet, or is reconnecting.
    #[error("the data source is not connected")]
    NotConnected,
}

impl DataSourceError {
    /// Whether the operation was cancelled by the user.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cache(err) if err.is_cancelled())
    }
}
