use async_trait::async_trait;
use keyed_pool::{ConnState, Manager, Pool, PoolOptions, Target};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct TestManager {
    pub connects: AtomicU64,
    pub closes: AtomicU64,
    pub close_delay: Duration,
}

#[derive(Debug)]
pub struct TestConnection {
    pub id: u64,
}

#[async_trait]
impl Manager for TestManager {
    type Connection = TestConnection;
    type Error = std::io::Error;

    async fn connect(&self, _target: &Target) -> Result<Self::Connection, Self::Error> {
        let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TestConnection { id })
    }

    async fn close(&self, _target: &Target, _conn: &Self::Connection) -> Result<(), Self::Error> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn touch(pool: &Pool<TestManager>, target: &Target) -> anyhow::Result<u64> {
    pool.with_connection(target, |conn| {
        Box::pin(async move { Ok::<_, anyhow::Error>(conn.id) })
    })
    .await
}

fn sleep_ms(ms: u64) -> tokio::time::Sleep {
    tokio::time::sleep(Duration::from_millis(ms))
}

#[tokio::test]
async fn test_idle_eviction() {
    let p = Pool::with_options(TestManager::default(), PoolOptions::default().idle_timeout_ms(50));
    let t = Target::new("system", "main");
    touch(&p, &t).await.unwrap();
    assert_eq!(p.stats().connections, 1);

    sleep_ms(150).await;
    let stats = p.stats();
    assert_eq!(stats.connections, 0);
    assert_eq!(p.manager.closes.load(Ordering::SeqCst), 1);

    touch(&p, &t).await.unwrap();
    assert_eq!(p.manager.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_use_resets_idle_timer() {
    let p = Pool::with_options(TestManager::default(), PoolOptions::default().idle_timeout_ms(200));
    let t = Target::new("system", "main");
    touch(&p, &t).await.unwrap();
    sleep_ms(120).await;
    touch(&p, &t).await.unwrap();
    sleep_ms(120).await;
    // 240ms after the first use, but only 120ms after the last one
    assert_eq!(p.stats().connections, 1);
    assert_eq!(p.manager.connects.load(Ordering::SeqCst), 1);

    sleep_ms(250).await;
    assert_eq!(p.stats().connections, 0);
    assert_eq!(p.manager.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_eviction_while_in_use() {
    let p = Pool::with_options(TestManager::default(), PoolOptions::default().idle_timeout_ms(50));
    let t = Target::new("system", "main");
    let pool = p.clone();
    let target = t.clone();
    let busy = tokio::spawn(async move {
        pool.with_connection(&target, |_conn| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok::<_, anyhow::Error>(())
            })
        })
        .await
    });
    sleep_ms(100).await;
    let entry = p.stats().get(&t).cloned().unwrap();
    assert_eq!(entry.ref_count, 1);
    assert_eq!(entry.state, ConnState::Connected);

    busy.await.unwrap().unwrap();
    assert_eq!(p.stats().connections, 1);
    sleep_ms(150).await;
    assert_eq!(p.stats().connections, 0);
}

#[tokio::test]
async fn test_idle_disabled() {
    let p = Pool::with_options(TestManager::default(), PoolOptions::default().idle_timeout(None));
    let t = Target::new("system", "main");
    touch(&p, &t).await.unwrap();
    sleep_ms(100).await;
    assert_eq!(p.stats().connections, 1);
    assert_eq!(p.manager.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_set_idle_timeout() {
    let p = Pool::new(TestManager::default());
    assert_eq!(p.get_idle_timeout(), Some(Duration::from_secs(300)));
    p.set_idle_timeout(Some(Duration::from_millis(30)));
    assert_eq!(p.get_idle_timeout(), Some(Duration::from_millis(30)));

    let t = Target::new("system", "main");
    touch(&p, &t).await.unwrap();
    sleep_ms(100).await;
    assert_eq!(p.stats().connections, 0);

    p.set_idle_timeout(None);
    assert_eq!(p.get_idle_timeout(), None);
}

#[tokio::test]
async fn test_idle_eviction_keeps_lock_registered() {
    let p = Pool::with_options(TestManager::default(), PoolOptions::default().idle_timeout_ms(30));
    let t = Target::new("system", "main");
    touch(&p, &t).await.unwrap();
    sleep_ms(100).await;
    assert_eq!(p.stats().connections, 0);
    assert_eq!(p.lock_count(), 1);
}

#[tokio::test]
async fn test_waits_for_closing_connection() {
    let p = Pool::with_options(
        TestManager {
            close_delay: Duration::from_millis(150),
            ..TestManager::default()
        },
        PoolOptions::default().idle_timeout_ms(30),
    );
    let t = Target::new("system", "main");
    touch(&p, &t).await.unwrap();

    sleep_ms(80).await;
    assert_eq!(p.stats().get(&t).unwrap().state, ConnState::Closing);

    let start = Instant::now();
    let id = touch(&p, &t).await.unwrap();
    assert_eq!(id, 2);
    // the replacement was only opened after the old close finished
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(p.manager.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_closing_wait_is_bounded() {
    let p = Pool::with_options(
        TestManager {
            close_delay: Duration::from_millis(1000),
            ..TestManager::default()
        },
        PoolOptions::default()
            .idle_timeout_ms(20)
            .closing_wait(Duration::from_millis(100))
            .closing_poll(Duration::from_millis(10)),
    );
    let t = Target::new("system", "main");
    touch(&p, &t).await.unwrap();
    sleep_ms(60).await;
    assert_eq!(p.stats().get(&t).unwrap().state, ConnState::Closing);

    let start = Instant::now();
    let id = touch(&p, &t).await.unwrap();
    assert_eq!(id, 2);
    assert!(start.elapsed() < Duration::from_millis(800));
    assert_eq!(p.manager.closes.load(Ordering::SeqCst), 0);
    assert_eq!(p.stats().get(&t).unwrap().state, ConnState::Connected);
}
