use async_trait::async_trait;
use keyed_pool::opener::{Connector, Credentials, Opener};
use keyed_pool::{PoolOptions, SystemPool, Target, TargetOptions};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// In-memory stand-in for the backend store.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    sessions: AtomicU64,
}

#[derive(Debug)]
pub struct MemorySession {
    pub id: u64,
    pub open: AtomicBool,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("bad credentials for {0}")]
    Auth(String),
    #[error("websocket closed")]
    Closed,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Session = MemorySession;
    type Error = MemoryError;

    async fn handshake(&self) -> Result<Self::Session, Self::Error> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let id = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemorySession {
            id,
            open: AtomicBool::new(true),
        })
    }

    async fn authenticate(
        &self,
        _session: &Self::Session,
        credentials: &Credentials,
    ) -> Result<(), Self::Error> {
        if credentials.password.is_empty() {
            return Err(MemoryError::Auth(credentials.username.clone()));
        }
        Ok(())
    }

    async fn select(&self, _session: &Self::Session, _target: &Target) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn close(&self, session: &Self::Session) -> Result<(), Self::Error> {
        session.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

async fn query(session: &MemorySession) -> Result<u64, MemoryError> {
    if !session.open.load(Ordering::SeqCst) {
        return Err(MemoryError::Closed);
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
    Ok(session.id)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyed_pool=debug")),
        )
        .init();

    let sys: Arc<SystemPool<Opener<MemoryConnector>>> = Arc::new(SystemPool::default());
    let opener = Opener::new(MemoryConnector::default(), Credentials::new("root", "root"));
    sys.initialize(opener, PoolOptions::default().idle_timeout_ms(200));

    let mut handles = vec![];
    for _ in 0..8 {
        let sys = sys.clone();
        handles.push(tokio::spawn(async move {
            sys.with_system_connection(TargetOptions::default(), |session| {
                Box::pin(async move { Ok::<_, anyhow::Error>(query(session).await?) })
            })
            .await
        }));
    }
    for handle in handles {
        println!("session = {}", handle.await??);
    }
    println!("stats = {}", sys.stats().unwrap_or_default());

    // a transport error drops the cached session
    let res = sys
        .with_system_connection(TargetOptions::default().database("logs"), |session| {
            Box::pin(async move {
                session.open.store(false, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(query(session).await?)
            })
        })
        .await;
    println!("broken query = {:?}", res.err().map(|e| e.to_string()));
    println!("stats = {}", sys.stats().unwrap_or_default());

    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("after idle = {}", sys.stats().unwrap_or_default());

    sys.close().await;
    println!("closed, initialized = {}", sys.is_initialized());
    Ok(())
}
