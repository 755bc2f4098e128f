#[macro_use]
mod defer;
pub mod config;
mod entry;
pub mod error;
pub mod failure;
mod lease;
pub mod opener;
pub mod pool;
pub mod stats;
pub mod system;

use async_trait::async_trait;
use std::fmt::{Display, Formatter};

/// Cache key: one (namespace, database) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    pub namespace: String,
    pub database: String,
}

impl Target {
    pub fn new(namespace: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            database: database.into(),
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.database)
    }
}

/// Manager opens and closes Connection for a Target. It knows nothing about pooling.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    type Error: std::error::Error + Send + Sync + 'static;

    ///handshake, authenticate and select target; partial resources are released on failure
    async fn connect(&self, target: &Target) -> Result<Self::Connection, Self::Error>;
    ///close Connection. must be safe to call on a connection that is already broken
    async fn close(&self, target: &Target, conn: &Self::Connection) -> Result<(), Self::Error>;
}

pub use config::{PoolOptions, TargetOptions};
pub use error::PoolError;
pub use pool::Pool;
pub use stats::{ConnState, EntryStats, PoolStats};
pub use system::SystemPool;
