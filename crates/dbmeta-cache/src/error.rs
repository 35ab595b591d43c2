use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::ObjectKey;

/// An error reported by a [`CacheSource`](crate::CacheSource) while talking to the
/// remote database.
///
/// This is cloneable, as a single failure is handed out to every caller that was
/// waiting on the same fetch.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The connection was closed or broke down in the middle of a query.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// The current user is not allowed to read the requested catalog.
    ///
    /// The attached string contains the server's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The catalog query itself failed.
    #[error("query failed: {0}")]
    QueryFailed(String),
    /// Any other error raised by the underlying driver.
    #[error(transparent)]
    Driver(Arc<dyn StdError + Send + Sync + 'static>),
}

impl ConnectionError {
    /// Wraps an arbitrary driver error.
    pub fn driver<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Driver(Arc::new(err))
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        Self::driver(err)
    }
}

/// An error returned by the cache operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Fetching objects from the remote source failed.
    ///
    /// Nothing from the failed fetch has been retained in the cache.
    #[error("failed to read {cache} from the remote source")]
    RemoteFetch {
        /// The name of the cache that was being filled.
        cache: Arc<str>,
        /// The underlying connection error.
        #[source]
        source: ConnectionError,
    },
    /// The fetch was aborted through its [`Monitor`](crate::Monitor), or the task
    /// driving it went away.
    ///
    /// Callers usually do not want to show this to users.
    #[error("operation cancelled")]
    Cancelled,
    /// An object with the same key already exists in the cache.
    #[error("an object named `{key}` already exists")]
    Conflict {
        /// The key that is taken.
        key: ObjectKey,
    },
}

impl CacheError {
    /// Whether this error stems from a cancellation rather than a remote failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn remote(cache: &Arc<str>, source: ConnectionError) -> Self {
        Self::RemoteFetch {
            cache: Arc::clone(cache),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_chain() {
        let err = CacheError::remote(
            &Arc::from("settings"),
            ConnectionError::ConnectionLost("server closed the connection".into()),
        );
        assert_eq!(err.to_string(), "failed to read settings from the remote source");
        let source = err.source().map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("connection lost: server closed the connection")
        );
        assert!(!err.is_cancelled());
        assert!(CacheError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_driver_error_is_transparent() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = ConnectionError::from(io);
        assert_eq!(err.to_string(), "reset by peer");
    }
}
