use crate::config::PoolOptions;
use crate::entry::CachedConnection;
use crate::error::PoolError;
use crate::failure::is_connection_failure;
use crate::lease::Lease;
use crate::stats::{ConnState, EntryStats, PoolStats};
use crate::{Manager, Target};
use dark_std::sync::AtomicDuration;
use dashmap::DashMap;
use futures_core::future::BoxFuture;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Pool caches one shared connection per [`Target`].
///
/// Every use goes through [`Pool::with_connection`]. Connections are counted
/// while in use, closed after sitting unused for `idle_timeout`, and thrown
/// away when a caller fails with what looks like a transport error.
///
/// Uses of one connection are not mutually exclusive: concurrent callers for
/// the same target run against the same connection at the same time. Only
/// establishment is serialized per target.
pub struct Pool<M: Manager> {
    pub manager: Arc<M>,
    pub(crate) connections: Arc<DashMap<Target, Arc<CachedConnection<M>>>>,
    /// establishment locks; kept after eviction, bounded by the distinct targets seen
    pub(crate) locks: Arc<DashMap<Target, Arc<Mutex<()>>>>,
    pub(crate) next_id: Arc<AtomicU64>,
    pub(crate) connecting: Arc<AtomicU64>,
    pub(crate) waits: Arc<AtomicU64>,
    //close unused connection after this, default 5min
    pub idle_timeout: Arc<AtomicDuration>,
    pub closing_wait: Duration,
    pub closing_poll: Duration,
}

impl<M: Manager> Debug for Pool<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        Display::fmt(&stats, f)
    }
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            connections: self.connections.clone(),
            locks: self.locks.clone(),
            next_id: self.next_id.clone(),
            connecting: self.connecting.clone(),
            waits: self.waits.clone(),
            idle_timeout: self.idle_timeout.clone(),
            closing_wait: self.closing_wait,
            closing_poll: self.closing_poll,
        }
    }
}

impl<M: Manager> Pool<M> {
    pub fn new(m: M) -> Self {
        Self::with_options(m, PoolOptions::default())
    }

    pub fn with_options(m: M, options: PoolOptions) -> Self {
        Self {
            manager: Arc::new(m),
            connections: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            connecting: Arc::new(AtomicU64::new(0)),
            waits: Arc::new(AtomicU64::new(0)),
            idle_timeout: Arc::new(AtomicDuration::new(options.idle_timeout)),
            closing_wait: options.closing_wait,
            closing_poll: options.closing_poll,
        }
    }

    /// Runs `f` with the connection for `target`, establishing it first if needed.
    ///
    /// The callback's error is returned unchanged. Before that, its text is run
    /// through [`is_connection_failure`]; on a match the connection is discarded
    /// and the next call re-establishes.
    ///
    /// ```no_run
    /// # async fn demo<M: keyed_pool::Manager>(pool: keyed_pool::Pool<M>) -> anyhow::Result<()> {
    /// let target = keyed_pool::Target::new("system", "main");
    /// let n = pool
    ///     .with_connection(&target, |_conn| Box::pin(async move { Ok::<_, anyhow::Error>(1) }))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_connection<T, E, F>(&self, target: &Target, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c M::Connection) -> BoxFuture<'c, Result<T, E>>,
        E: From<PoolError> + Display,
    {
        let lease = self.acquire(target).await.map_err(E::from)?;
        let result = f(lease.connection()).await;
        if let Err(e) = &result {
            let message = e.to_string();
            if is_connection_failure(&message) {
                tracing::debug!(
                    namespace = %target.namespace,
                    database = %target.database,
                    error = %message,
                    "discarding connection after transport failure"
                );
                lease.discard();
            }
        }
        drop(lease);
        result
    }

    pub(crate) async fn acquire(&self, target: &Target) -> Result<Lease<M>, PoolError> {
        if let Some(lease) = self.try_reuse(target) {
            return Ok(lease);
        }

        let lock = self.locks.entry(target.clone()).or_default().clone();
        let _guard = {
            self.waits.fetch_add(1, Ordering::SeqCst);
            defer!(self.waits.fetch_sub(1, Ordering::SeqCst));
            lock.lock().await
        };

        // someone else may have finished establishment while we waited
        if let Some(lease) = self.try_reuse(target) {
            return Ok(lease);
        }

        let existing = self.connections.get(target).map(|e| e.value().clone());
        if let Some(old) = existing {
            if old.state() == ConnState::Closing {
                self.wait_for_teardown(&old).await;
            }
        }

        let result = {
            self.connecting.fetch_add(1, Ordering::SeqCst);
            defer!(self.connecting.fetch_sub(1, Ordering::SeqCst));
            self.manager.connect(target).await
        };
        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(
                    namespace = %target.namespace,
                    database = %target.database,
                    error = %e,
                    "failed to establish pooled connection"
                );
                return Err(PoolError::connection(target, e));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = CachedConnection::new(id, target.clone(), conn);
        let acquired = entry.try_acquire();
        debug_assert!(acquired);
        self.connections.insert(target.clone(), entry.clone());
        tracing::debug!(
            namespace = %target.namespace,
            database = %target.database,
            id = id,
            "established pooled connection"
        );
        Ok(Lease::new(entry, self.clone()))
    }

    fn try_reuse(&self, target: &Target) -> Option<Lease<M>> {
        let entry = self.connections.get(target)?.value().clone();
        if entry.try_acquire() {
            Some(Lease::new(entry, self.clone()))
        } else {
            None
        }
    }

    /// Polls until `old` has left the cache, bounded by `closing_wait`.
    async fn wait_for_teardown(&self, old: &Arc<CachedConnection<M>>) {
        let deadline = Instant::now() + self.closing_wait;
        while self.is_cached(old) {
            if Instant::now() >= deadline {
                tracing::warn!(
                    namespace = %old.target.namespace,
                    database = %old.target.database,
                    id = old.id,
                    wait = ?self.closing_wait,
                    "timed out waiting for closing connection, replacing it"
                );
                self.remove_entry(old);
                return;
            }
            tokio::time::sleep(self.closing_poll).await;
        }
    }

    fn is_cached(&self, entry: &Arc<CachedConnection<M>>) -> bool {
        self.connections
            .get(&entry.target)
            .map(|e| Arc::ptr_eq(e.value(), entry))
            .unwrap_or(false)
    }

    /// Removes `entry` from the cache unless it was already replaced.
    pub(crate) fn remove_entry(&self, entry: &Arc<CachedConnection<M>>) {
        self.connections
            .remove_if(&entry.target, |_, v| Arc::ptr_eq(v, entry));
    }

    pub(crate) fn spawn_idle_timer(
        &self,
        entry: Arc<CachedConnection<M>>,
        epoch: u64,
    ) -> Option<JoinHandle<()>> {
        let timeout = self.idle_timeout.get()?;
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(
                namespace = %entry.target.namespace,
                database = %entry.target.database,
                "no tokio runtime, idle timer not armed"
            );
            return None;
        };
        let pool = self.clone();
        Some(handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            pool.evict_idle(entry, epoch).await;
        }))
    }

    async fn evict_idle(&self, entry: Arc<CachedConnection<M>>, epoch: u64) {
        if !entry.begin_idle_close(epoch) {
            return;
        }
        tracing::debug!(
            namespace = %entry.target.namespace,
            database = %entry.target.database,
            id = entry.id,
            "closing idle connection"
        );
        self.finish_close(&entry).await;
    }

    pub(crate) fn spawn_close(&self, entry: Arc<CachedConnection<M>>) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(
                namespace = %entry.target.namespace,
                database = %entry.target.database,
                id = entry.id,
                "no tokio runtime, connection dropped without close"
            );
            return;
        };
        let pool = self.clone();
        handle.spawn(async move {
            pool.finish_close(&entry).await;
        });
    }

    /// Closes the underlying connection, then marks it `Closed` and drops it
    /// from the cache. Close errors are logged and swallowed.
    async fn finish_close(&self, entry: &Arc<CachedConnection<M>>) {
        if let Err(e) = self.manager.close(&entry.target, &entry.connection).await {
            tracing::warn!(
                namespace = %entry.target.namespace,
                database = %entry.target.database,
                id = entry.id,
                error = %e,
                "error while closing pooled connection"
            );
        }
        entry.mark_closed();
        self.remove_entry(entry);
    }

    async fn teardown(&self, entry: &Arc<CachedConnection<M>>) -> bool {
        if !entry.begin_close() {
            return false;
        }
        let ref_count = entry.ref_count();
        if ref_count > 0 {
            tracing::warn!(
                namespace = %entry.target.namespace,
                database = %entry.target.database,
                ref_count = ref_count,
                "closing connection that is still in use"
            );
        }
        self.finish_close(entry).await;
        true
    }

    /// Tears down the connection cached for `target`.
    /// Returns false if there was nothing to close.
    pub async fn close_connection(&self, target: &Target) -> bool {
        let Some(entry) = self.connections.get(target).map(|e| e.value().clone()) else {
            return false;
        };
        self.teardown(&entry).await
    }

    /// Closes every cached connection and forgets all establishment locks.
    ///
    /// Callers still inside `with_connection` keep running against a closed
    /// connection; that is accepted during shutdown.
    pub async fn close_all(&self) {
        let entries: Vec<Arc<CachedConnection<M>>> =
            self.connections.iter().map(|e| e.value().clone()).collect();
        tracing::info!(count = entries.len(), "closing all pooled connections");
        for entry in entries {
            self.teardown(&entry).await;
        }
        self.connections.clear();
        self.locks.clear();
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            connecting: self.connecting.load(Ordering::SeqCst),
            waits: self.waits.load(Ordering::SeqCst),
            ..PoolStats::default()
        };
        for item in self.connections.iter() {
            let entry = item.value();
            let ref_count = entry.ref_count();
            stats.total_ref_count += ref_count;
            stats.entries.insert(
                item.key().clone(),
                EntryStats {
                    ref_count,
                    state: entry.state(),
                    age: entry.established_at.elapsed(),
                },
            );
        }
        stats.connections = stats.entries.len();
        stats
    }

    /// Set the idle timeout. `None` (or zero) disables idle eviction for
    /// connections released from now on.
    pub fn set_idle_timeout(&self, duration: Option<Duration>) {
        self.idle_timeout.store(duration);
    }

    pub fn get_idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.get()
    }

    /// Number of targets with an establishment lock registered.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
