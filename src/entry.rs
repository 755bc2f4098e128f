use crate::stats::ConnState;
use crate::{Manager, Target};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;

/// Mutable lifecycle bookkeeping, only touched under `CachedConnection::lifecycle`.
#[derive(Default)]
pub(crate) struct Lifecycle {
    pub(crate) idle_timer: Option<JoinHandle<()>>,
    /// bumped on every acquire and every timer arming; a timer only fires for its own epoch
    pub(crate) epoch: u64,
    /// set once someone has taken responsibility for closing the connection
    pub(crate) released: bool,
}

/// The pool's record for one live (or dying) connection.
///
/// `ref_count` and `state` only change while `lifecycle` is held. They are
/// atomics so that statistics can read them without locking.
pub(crate) struct CachedConnection<M: Manager> {
    pub(crate) id: u64,
    pub(crate) target: Target,
    pub(crate) connection: M::Connection,
    pub(crate) established_at: Instant,
    ref_count: AtomicUsize,
    state: AtomicU8,
    lifecycle: Mutex<Lifecycle>,
}

impl<M: Manager> Debug for CachedConnection<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedConnection")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("ref_count", &self.ref_count())
            .field("state", &self.state())
            .finish()
    }
}

impl<M: Manager> CachedConnection<M> {
    pub(crate) fn new(id: u64, target: Target, connection: M::Connection) -> Arc<Self> {
        Arc::new(Self {
            id,
            target,
            connection,
            established_at: Instant::now(),
            ref_count: AtomicUsize::new(0),
            state: AtomicU8::new(ConnState::Connected as u8),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::SeqCst)
    }

    fn set_state(&self, _lc: &MutexGuard<'_, Lifecycle>, state: ConnState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Registers one more user, cancelling any pending idle timer.
    /// Fails if the record has left `Connected`.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut lc = self.lock();
        if self.state() != ConnState::Connected {
            return false;
        }
        if let Some(timer) = lc.idle_timer.take() {
            timer.abort();
        }
        lc.epoch += 1;
        self.ref_count.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Drops one user. Returns the new reference count along with the held lock
    /// so the caller can decide what happens to an unused record atomically.
    pub(crate) fn release(&self) -> (usize, MutexGuard<'_, Lifecycle>) {
        let lc = self.lock();
        let prev = self.ref_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "ref_count underflow");
        (prev - 1, lc)
    }

    /// Flags a broken connection. Release is left to whoever drops the last use.
    pub(crate) fn discard(&self) {
        let lc = self.lock();
        if self.state() == ConnState::Connected {
            self.set_state(&lc, ConnState::Closed);
        }
    }

    /// Takes over closing for explicit or bulk teardown.
    /// Returns false if another path already owns the close.
    pub(crate) fn begin_close(&self) -> bool {
        let mut lc = self.lock();
        if let Some(timer) = lc.idle_timer.take() {
            timer.abort();
        }
        lc.epoch += 1;
        if lc.released {
            return false;
        }
        lc.released = true;
        if self.state() == ConnState::Connected {
            self.set_state(&lc, ConnState::Closing);
        }
        true
    }

    /// Takes over closing for idle eviction, only if nothing changed since
    /// the timer for `epoch` was armed.
    pub(crate) fn begin_idle_close(&self, epoch: u64) -> bool {
        let mut lc = self.lock();
        if lc.epoch != epoch
            || lc.released
            || self.ref_count() != 0
            || self.state() != ConnState::Connected
        {
            return false;
        }
        // our own task; dropping the handle just detaches it
        lc.idle_timer = None;
        lc.released = true;
        self.set_state(&lc, ConnState::Closing);
        true
    }

    /// Claims the close of a discarded record once its last user is gone.
    pub(crate) fn take_discarded(&self, lc: &mut MutexGuard<'_, Lifecycle>) -> bool {
        if lc.released || self.state() != ConnState::Closed {
            return false;
        }
        lc.released = true;
        true
    }

    pub(crate) fn mark_closed(&self) {
        let lc = self.lock();
        self.set_state(&lc, ConnState::Closed);
    }
}
