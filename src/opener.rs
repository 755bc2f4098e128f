//! Connection opener built from the three handshake stages of the backend.
//!
//! A [`Connector`] knows the wire protocol: how to open a session, log in and
//! switch to a namespace/database. [`Opener`] runs those stages as a single
//! attempt and implements [`Manager`] so it plugs straight into the pool.

use crate::error::BoxError;
use crate::{Manager, Target};
use async_trait::async_trait;
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

/// Login for the backend's system user.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Which part of opening or closing a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Handshake,
    Authenticate,
    Select,
    Close,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Handshake => "handshake",
            Stage::Authenticate => "authenticate",
            Stage::Select => "select",
            Stage::Close => "close",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("{stage} failed for {namespace}/{database}: {source}")]
pub struct ConnectionError {
    pub namespace: String,
    pub database: String,
    pub stage: Stage,
    #[source]
    pub source: BoxError,
}

impl ConnectionError {
    fn new(target: &Target, stage: Stage, source: impl Into<BoxError>) -> Self {
        Self {
            namespace: target.namespace.clone(),
            database: target.database.clone(),
            stage,
            source: source.into(),
        }
    }
}

/// Wire-level session operations of the backend store.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Send + Sync + 'static;

    type Error: std::error::Error + Send + Sync + 'static;

    async fn handshake(&self) -> Result<Self::Session, Self::Error>;

    async fn authenticate(
        &self,
        session: &Self::Session,
        credentials: &Credentials,
    ) -> Result<(), Self::Error>;

    async fn select(&self, session: &Self::Session, target: &Target) -> Result<(), Self::Error>;

    ///must tolerate a session that is already broken
    async fn close(&self, session: &Self::Session) -> Result<(), Self::Error>;
}

/// Stateless opener: no caching, no pooling.
#[derive(Debug)]
pub struct Opener<C: Connector> {
    pub connector: C,
    pub credentials: Credentials,
}

impl<C: Connector> Opener<C> {
    pub fn new(connector: C, credentials: Credentials) -> Self {
        Self {
            connector,
            credentials,
        }
    }

    /// Closes a session that never finished opening. Errors are only logged,
    /// the stage failure is what the caller gets.
    async fn abandon(&self, session: &C::Session, target: &Target) {
        if let Err(e) = self.connector.close(session).await {
            tracing::debug!(
                namespace = %target.namespace,
                database = %target.database,
                error = %e,
                "failed to close partially opened session"
            );
        }
    }
}

#[async_trait]
impl<C: Connector> Manager for Opener<C> {
    type Connection = C::Session;
    type Error = ConnectionError;

    async fn connect(&self, target: &Target) -> Result<Self::Connection, Self::Error> {
        let session = self
            .connector
            .handshake()
            .await
            .map_err(|e| ConnectionError::new(target, Stage::Handshake, e))?;

        if let Err(e) = self
            .connector
            .authenticate(&session, &self.credentials)
            .await
        {
            self.abandon(&session, target).await;
            return Err(ConnectionError::new(target, Stage::Authenticate, e));
        }

        if let Err(e) = self.connector.select(&session, target).await {
            self.abandon(&session, target).await;
            return Err(ConnectionError::new(target, Stage::Select, e));
        }

        Ok(session)
    }

    async fn close(&self, target: &Target, conn: &Self::Connection) -> Result<(), Self::Error> {
        self.connector
            .close(conn)
            .await
            .map_err(|e| ConnectionError::new(target, Stage::Close, e))
    }
}
