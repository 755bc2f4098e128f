//! Pool error types.

use crate::Target;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the pool itself. Errors returned by a caller's callback
/// are passed through untouched and never wrapped in this type.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to connect to {namespace}/{database}: {source}")]
    Connection {
        namespace: String,
        database: String,
        #[source]
        source: BoxError,
    },

    #[error("connection pool is not initialized")]
    NotInitialized,
}

impl PoolError {
    pub(crate) fn connection(target: &Target, source: impl Into<BoxError>) -> Self {
        PoolError::Connection {
            namespace: target.namespace.clone(),
            database: target.database.clone(),
            source: source.into(),
        }
    }
}
