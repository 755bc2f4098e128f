use crate::Target;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Lifecycle state of a cached connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnState {
    /// handshake in progress; never published in the cache
    Connecting = 0,
    Connected = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnState {
    pub(crate) fn from_u8(v: u8) -> ConnState {
        match v {
            0 => ConnState::Connecting,
            1 => ConnState::Connected,
            2 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }
}

impl Display for ConnState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnState::Connecting => "connecting",
            ConnState::Connected => "connected",
            ConnState::Closing => "closing",
            ConnState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Snapshot of one cached connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStats {
    /// Callbacks currently using the connection
    pub ref_count: usize,
    pub state: ConnState,
    /// Time since the handshake completed
    pub age: Duration,
}

/// Eventually-consistent snapshot of the pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Cached records, whatever their state
    pub connections: usize,
    /// Sum of all reference counts
    pub total_ref_count: usize,
    /// Handshakes currently in flight
    pub connecting: u64,
    /// Callers queued on a per-key establishment lock
    pub waits: u64,
    pub entries: BTreeMap<Target, EntryStats>,
}

impl PoolStats {
    pub fn get(&self, target: &Target) -> Option<&EntryStats> {
        self.entries.get(target)
    }
}

impl Display for PoolStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ connections: {}, total_ref_count: {}, connecting: {}, waits: {} }}",
            self.connections, self.total_ref_count, self.connecting, self.waits
        )
    }
}
