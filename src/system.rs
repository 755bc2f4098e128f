//! Process-wide handle to the pool used by the backend services.
//!
//! Built once at startup and passed by reference to every service that needs
//! the data store. Each test builds its own, so nothing here is global.

use crate::config::{PoolOptions, TargetOptions};
use crate::error::PoolError;
use crate::stats::PoolStats;
use crate::{Manager, Pool, Target};
use futures_core::future::BoxFuture;
use std::fmt::Display;
use std::sync::{PoisonError, RwLock};

/// Owns the pool for one process and fills in the default target.
pub struct SystemPool<M: Manager> {
    slot: RwLock<Option<Pool<M>>>,
    defaults: Target,
}

impl<M: Manager> Default for SystemPool<M> {
    fn default() -> Self {
        Self::new(Target::default())
    }
}

impl<M: Manager> SystemPool<M> {
    pub fn new(defaults: Target) -> Self {
        Self {
            slot: RwLock::new(None),
            defaults,
        }
    }

    pub fn defaults(&self) -> &Target {
        &self.defaults
    }

    /// Builds the pool. A repeat call keeps the existing pool, drops `manager`
    /// and logs a warning.
    pub fn initialize(&self, manager: M, options: PoolOptions) -> Pool<M> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = slot.as_ref() {
            tracing::warn!("connection pool already initialized, ignoring repeat call");
            return pool.clone();
        }
        tracing::debug!(idle_timeout = ?options.idle_timeout, "initializing connection pool");
        let pool = Pool::with_options(manager, options);
        *slot = Some(pool.clone());
        pool
    }

    pub fn is_initialized(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn pool(&self) -> Result<Pool<M>, PoolError> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PoolError::NotInitialized)
    }

    /// Entry point for backend services. Omitted namespace/database fall back
    /// to the defaults this handle was built with.
    pub async fn with_system_connection<T, E, F>(
        &self,
        options: TargetOptions,
        f: F,
    ) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c M::Connection) -> BoxFuture<'c, Result<T, E>>,
        E: From<PoolError> + Display,
    {
        let pool = self.pool().map_err(E::from)?;
        let target = options.resolve(&self.defaults);
        pool.with_connection(&target, f).await
    }

    /// `None` until initialized.
    pub fn stats(&self) -> Option<PoolStats> {
        self.pool().ok().map(|pool| pool.stats())
    }

    /// Closes every connection and releases the pool. Safe to call when
    /// nothing was initialized.
    pub async fn close(&self) {
        let pool = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.close_all().await;
        }
    }
}
