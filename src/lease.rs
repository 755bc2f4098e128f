use crate::entry::CachedConnection;
use crate::stats::ConnState;
use crate::{Manager, Pool};
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

/// One counted use of a cached connection.
///
/// Created only after the record's `ref_count` was incremented; dropping it
/// decrements the count. Because the decrement lives in `Drop`, the pair stays
/// balanced when the callback errors, panics, or the calling future is dropped.
pub(crate) struct Lease<M: Manager> {
    entry: Arc<CachedConnection<M>>,
    pool: Pool<M>,
}

impl<M: Manager> Lease<M> {
    pub(crate) fn new(entry: Arc<CachedConnection<M>>, pool: Pool<M>) -> Lease<M> {
        Self { entry, pool }
    }

    pub fn connection(&self) -> &M::Connection {
        &self.entry.connection
    }

    /// Marks the connection broken so nobody else picks it up.
    pub fn discard(&self) {
        self.entry.discard();
    }
}

impl<M: Manager> Debug for Lease<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("entry", &self.entry)
            .field("pool", &self.pool)
            .finish()
    }
}

impl<M: Manager> Deref for Lease<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self.entry.connection
    }
}

impl<M: Manager> Drop for Lease<M> {
    fn drop(&mut self) {
        let (remaining, mut lc) = self.entry.release();
        if remaining > 0 {
            return;
        }
        match self.entry.state() {
            ConnState::Connected => {
                lc.epoch += 1;
                let epoch = lc.epoch;
                lc.idle_timer = self.pool.spawn_idle_timer(self.entry.clone(), epoch);
            }
            ConnState::Closed => {
                if self.entry.take_discarded(&mut lc) {
                    drop(lc);
                    tracing::debug!(
                        namespace = %self.entry.target.namespace,
                        database = %self.entry.target.database,
                        id = self.entry.id,
                        "releasing discarded connection"
                    );
                    self.pool.remove_entry(&self.entry);
                    self.pool.spawn_close(self.entry.clone());
                }
            }
            // teardown owns it
            ConnState::Closing | ConnState::Connecting => {}
        }
    }
}
