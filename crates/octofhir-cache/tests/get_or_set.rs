//! Integration tests for the read-through path of a two-tier cache.
//!
//! Both tiers use the in-memory driver, so these run without external
//! services.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use octofhir_cache::drivers::MemoryDriver;
use octofhir_cache::{
    BoxError, Cache, CacheConfig, CacheDriver, CacheError, CacheOptions, CacheResult, DynDriver,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn two_tier() -> Cache {
    init_tracing();

    Cache::builder()
        .local(MemoryDriver::new_shared())
        .remote(MemoryDriver::new_shared())
        .build()
        .await
        .expect("build cache")
}

/// Remote driver that is always unreachable.
#[derive(Debug, Default)]
struct UnreachableDriver {
    calls: AtomicUsize,
}

impl UnreachableDriver {
    fn fail<T>(&self) -> CacheResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::driver("connection refused"))
    }
}

#[async_trait]
impl CacheDriver for UnreachableDriver {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.fail()
    }
    async fn set(&self, _: &str, _: Vec<u8>, _: Option<Duration>) -> CacheResult<bool> {
        self.fail()
    }
    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        self.fail()
    }
    async fn delete_many(&self, _keys: &[String]) -> CacheResult<bool> {
        self.fail()
    }
    async fn clear(&self) -> CacheResult<()> {
        self.fail()
    }
    async fn remaining_ttl(&self, _key: &str) -> CacheResult<Option<Duration>> {
        self.fail()
    }
    fn namespace(&self, _name: &str) -> DynDriver {
        Arc::new(UnreachableDriver::default())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_run_factory_once() {
    let cache = two_tier().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let results = join_all((0..10).map(|_| {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        async move {
            cache
                .get_or_set(
                    "stampede",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, BoxError>("computed".to_string())
                    },
                    CacheOptions::new(),
                )
                .await
        }
    }))
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), "computed");
    }
}

#[tokio::test]
async fn test_graced_value_survives_failing_factory() {
    let cache = two_tier().await;
    let options = || {
        CacheOptions::new()
            .ttl(Duration::from_millis(100))
            .grace(Duration::from_secs(6 * 3600))
    };

    cache.set("k", &"v", options()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let value: String = cache
        .get_or_set(
            "k",
            || async { Err::<String, _>("database down") },
            options(),
        )
        .await
        .unwrap();
    assert_eq!(value, "v");
}

#[tokio::test]
async fn test_graced_read_then_miss_after_grace() {
    let cache = two_tier().await;
    let options = || {
        CacheOptions::new()
            .ttl(Duration::from_millis(50))
            .grace(Duration::from_millis(200))
    };

    cache.set("k", &1, options()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let mut events = cache.events();
    assert_eq!(cache.get_with::<i32>("k", options()).await.unwrap(), Some(1));
    match events.recv().await.unwrap() {
        octofhir_cache::CacheEvent::Hit { graced, .. } => assert!(graced),
        other => panic!("expected a hit, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(cache.get_with::<i32>("k", options()).await.unwrap(), None);
}

#[tokio::test]
async fn test_stale_while_revalidate() {
    let cache = two_tier().await;
    let options = || {
        CacheOptions::new()
            .ttl(Duration::from_millis(50))
            .grace(Duration::from_secs(6 * 3600))
            .timeout(Duration::ZERO)
    };
    cache.set("k", &"old", options()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();
    let results = join_all((0..2).map(|_| {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        async move {
            cache
                .get_or_set(
                    "k",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        Ok::<_, BoxError>("new".to_string())
                    },
                    options(),
                )
                .await
        }
    }))
    .await;

    assert!(started.elapsed() < Duration::from_millis(100));
    for result in results {
        assert_eq!(result.unwrap(), "old");
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get::<String>("k").await.unwrap(), Some("new".into()));
}

#[tokio::test]
async fn test_hard_timeout_surfaces() {
    let cache = two_tier().await;
    let err = cache
        .get_or_set(
            "slow",
            || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, BoxError>(1)
            },
            CacheOptions::new().hard_timeout(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();

    assert!(err.is_hard_timeout());
    assert!(err.is_timeout());
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_local_entry_served_while_remote_is_down() {
    let remote = Arc::new(UnreachableDriver::default());
    let cache = Cache::builder()
        .local(MemoryDriver::new_shared())
        .remote(remote.clone())
        .build()
        .await
        .unwrap();

    cache.set("k", &"local", CacheOptions::new()).await.unwrap();
    assert_eq!(cache.get::<String>("k").await.unwrap(), Some("local".into()));
    assert!(remote.calls.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_remote_errors_surface_without_local_tier() {
    let cache = Cache::builder()
        .remote(Arc::new(UnreachableDriver::default()))
        .build()
        .await
        .unwrap();

    let err = cache.get::<String>("k").await.unwrap_err();
    assert!(err.is_remote_store());
}

#[tokio::test]
async fn test_circuit_breaker_short_circuits_remote_calls() {
    let remote = Arc::new(UnreachableDriver::default());
    let mut config = CacheConfig::default();
    config.circuit_breaker.enabled = true;
    config.circuit_breaker.break_duration = Duration::from_secs(60);

    let cache = Cache::builder()
        .config(config)
        .remote(remote.clone())
        .build()
        .await
        .unwrap();

    assert!(cache.get::<String>("k").await.is_err());
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

    // Open breaker: the driver is not called and the read is a miss.
    assert_eq!(cache.get::<String>("k").await.unwrap(), None);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_events_for_miss_write_hit() {
    let cache = two_tier().await;
    let mut events = cache.events();

    for _ in 0..2 {
        let _: i32 = cache
            .get_or_set("k", || async { Ok::<_, BoxError>(1) }, CacheOptions::new())
            .await
            .unwrap();
    }

    let names: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| event.name())
        .collect();
    assert_eq!(names, vec!["cache:miss", "cache:written", "cache:hit"]);
}

#[tokio::test]
async fn test_get_or_set_forever_never_goes_stale() {
    let cache = two_tier().await;
    let _: String = cache
        .get_or_set_forever("k", || async { Ok::<_, BoxError>("v".to_string()) }, CacheOptions::new())
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let value: String = cache
        .get_or_set(
            "k",
            move || async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>("other".to_string())
            },
            CacheOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(value, "v");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
