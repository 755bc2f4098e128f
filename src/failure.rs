//! Classifies a callback error as a transport failure.
//!
//! This is best-effort substring matching on the error text. A false negative
//! keeps a dead connection pooled until the next failed use; a false positive
//! throws away a healthy connection, which then gets re-established.

/// Lowercase tokens that mark an error as a transport-level failure.
pub const CONNECTION_FAILURE_TOKENS: [&str; 6] = [
    "connection",
    "closed",
    "disconnected",
    "websocket",
    "econnrefused",
    "econnreset",
];

/// Returns true if `message` looks like the connection itself is broken.
pub fn is_connection_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    CONNECTION_FAILURE_TOKENS
        .iter()
        .any(|token| message.contains(token))
}
