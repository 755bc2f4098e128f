use async_trait::async_trait;
use keyed_pool::opener::{ConnectionError, Connector, Credentials, Opener, Stage};
use keyed_pool::{Manager, Pool, PoolError, Target};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct FakeConnector {
    pub fail_at: Option<Stage>,
    pub handshakes: AtomicU64,
    pub closes: AtomicU64,
}

#[derive(Debug, Default)]
pub struct FakeSession {
    pub id: u64,
    pub user: Mutex<Option<String>>,
    pub selected: Mutex<Option<Target>>,
}

#[derive(Debug, thiserror::Error)]
#[error("fake {0} error")]
pub struct FakeError(Stage);

#[async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;
    type Error = FakeError;

    async fn handshake(&self) -> Result<Self::Session, Self::Error> {
        if self.fail_at == Some(Stage::Handshake) {
            return Err(FakeError(Stage::Handshake));
        }
        let id = self.handshakes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeSession {
            id,
            ..FakeSession::default()
        })
    }

    async fn authenticate(
        &self,
        session: &Self::Session,
        credentials: &Credentials,
    ) -> Result<(), Self::Error> {
        if self.fail_at == Some(Stage::Authenticate) {
            return Err(FakeError(Stage::Authenticate));
        }
        *session.user.lock().unwrap() = Some(credentials.username.clone());
        Ok(())
    }

    async fn select(&self, session: &Self::Session, target: &Target) -> Result<(), Self::Error> {
        if self.fail_at == Some(Stage::Select) {
            return Err(FakeError(Stage::Select));
        }
        *session.selected.lock().unwrap() = Some(target.clone());
        Ok(())
    }

    async fn close(&self, _session: &Self::Session) -> Result<(), Self::Error> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(Stage::Close) {
            return Err(FakeError(Stage::Close));
        }
        Ok(())
    }
}

fn opener(fail_at: Option<Stage>) -> Opener<FakeConnector> {
    Opener::new(
        FakeConnector {
            fail_at,
            ..FakeConnector::default()
        },
        Credentials::new("root", "hunter2"),
    )
}

#[tokio::test]
async fn test_open_runs_every_stage() {
    let o = opener(None);
    let t = Target::new("system", "main");
    let session = o.connect(&t).await.unwrap();
    assert_eq!(session.id, 1);
    assert_eq!(session.user.lock().unwrap().as_deref(), Some("root"));
    assert_eq!(session.selected.lock().unwrap().as_ref(), Some(&t));
    assert_eq!(o.connector.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_handshake_failure_has_nothing_to_release() {
    let o = opener(Some(Stage::Handshake));
    let err = o.connect(&Target::new("system", "main")).await.unwrap_err();
    assert_eq!(err.stage, Stage::Handshake);
    assert_eq!(o.connector.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_auth_failure_closes_partial_session() {
    let o = opener(Some(Stage::Authenticate));
    let err = o.connect(&Target::new("system", "main")).await.unwrap_err();
    assert_eq!(err.stage, Stage::Authenticate);
    assert_eq!(err.namespace, "system");
    assert_eq!(err.database, "main");
    assert_eq!(
        err.to_string(),
        "authenticate failed for system/main: fake authenticate error"
    );
    assert_eq!(o.connector.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_select_failure_closes_partial_session() {
    let o = opener(Some(Stage::Select));
    let err = o.connect(&Target::new("tenant", "apps")).await.unwrap_err();
    assert_eq!(err.stage, Stage::Select);
    assert_eq!(o.connector.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_error_reports_target() {
    let o = opener(Some(Stage::Close));
    let t = Target::new("system", "main");
    let session = o.connect(&t).await.unwrap();
    let err = o.close(&t, &session).await.unwrap_err();
    assert_eq!(err.stage, Stage::Close);
    assert_eq!(err.namespace, "system");
}

#[tokio::test]
async fn test_pool_wraps_opener_failure() {
    let p = Pool::new(opener(Some(Stage::Authenticate)));
    let t = Target::new("system", "main");
    let err = p
        .with_connection(&t, |_session| Box::pin(async move { Ok::<_, PoolError>(()) }))
        .await
        .unwrap_err();
    let PoolError::Connection { source, .. } = &err else {
        panic!("unexpected error: {:?}", err);
    };
    let cause = source.downcast_ref::<ConnectionError>().unwrap();
    assert_eq!(cause.stage, Stage::Authenticate);
    assert!(p.stats().get(&t).is_none());
    assert_eq!(p.manager.connector.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pool_over_opener() {
    let p = Pool::new(opener(None));
    let t = Target::new("system", "main");
    for _ in 0..3 {
        let selected = p
            .with_connection(&t, |session| {
                Box::pin(async move {
                    Ok::<_, anyhow::Error>(session.selected.lock().unwrap().clone())
                })
            })
            .await
            .unwrap();
        assert_eq!(selected, Some(t.clone()));
    }
    assert_eq!(p.manager.connector.handshakes.load(Ordering::SeqCst), 1);
    p.close_all().await;
    assert_eq!(p.manager.connector.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_credentials_debug_hides_password() {
    let c = Credentials::new("root", "hunter2");
    let s = format!("{:?}", c);
    assert!(s.contains("root"));
    assert!(!s.contains("hunter2"));
}
