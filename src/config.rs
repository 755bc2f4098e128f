use crate::Target;
use std::time::Duration;

/// Default idle timeout before an unused connection is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Upper bound on waiting for a `Closing` record before replacing it.
pub const DEFAULT_CLOSING_WAIT: Duration = Duration::from_secs(5);
/// Poll step while waiting for a `Closing` record.
pub const DEFAULT_CLOSING_POLL: Duration = Duration::from_millis(50);

pub const DEFAULT_NAMESPACE: &str = "system";
pub const DEFAULT_DATABASE: &str = "main";

/// Options for constructing a [`crate::Pool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// `None` disables idle eviction
    pub idle_timeout: Option<Duration>,
    pub closing_wait: Duration,
    pub closing_poll: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            closing_wait: DEFAULT_CLOSING_WAIT,
            closing_poll: DEFAULT_CLOSING_POLL,
        }
    }
}

impl PoolOptions {
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn idle_timeout_ms(self, ms: u64) -> Self {
        self.idle_timeout(Some(Duration::from_millis(ms)))
    }

    pub fn closing_wait(mut self, wait: Duration) -> Self {
        self.closing_wait = wait;
        self
    }

    pub fn closing_poll(mut self, poll: Duration) -> Self {
        self.closing_poll = poll;
        self
    }
}

/// A target with optional parts; missing parts are filled by [`crate::SystemPool`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetOptions {
    pub namespace: Option<String>,
    pub database: Option<String>,
}

impl TargetOptions {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn resolve(&self, defaults: &Target) -> Target {
        Target {
            namespace: self
                .namespace
                .clone()
                .unwrap_or_else(|| defaults.namespace.clone()),
            database: self
                .database
                .clone()
                .unwrap_or_else(|| defaults.database.clone()),
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::new(DEFAULT_NAMESPACE, DEFAULT_DATABASE)
    }
}
