//! Concurrency stress tests for quota accounting
//!
//! These tests verify that no credential is handed out beyond its rate limit
//! while many tasks select and report at the same time.

#[cfg(test)]
mod concurrency_tests {
    use async_trait::async_trait;
    use credpool_lib::persistence::{MetricsBatch, PoolState};
    use credpool_lib::prelude::*;
    use credpool_lib::test_utils::{test_pool, ManualClock, TestFixtures};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::task::JoinSet;

    /// Store whose deletes park until released, optionally failing.
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryPoolStore,
        entered: Notify,
        proceed: Notify,
        fail_delete: AtomicBool,
    }

    #[async_trait]
    impl PoolStore for GatedStore {
        async fn load(&self) -> Result<PoolState> {
            self.inner.load().await
        }

        async fn save_credential(&self, credential: &Credential) -> Result<()> {
            self.inner.save_credential(credential).await
        }

        async fn delete_credential(&self, id: &CredentialId) -> Result<()> {
            self.entered.notify_one();
            self.proceed.notified().await;
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(CredpoolError::Persistence("disk full".into()));
            }
            self.inner.delete_credential(id).await
        }

        async fn save_metrics(&self, batch: &MetricsBatch) -> Result<()> {
            self.inner.save_metrics(batch).await
        }
    }

    async fn gated_pool(store: Arc<GatedStore>) -> Arc<CredentialPool> {
        CredentialPool::open(
            PoolConfig::default(),
            store,
            Arc::new(StaticProbe::healthy()),
            Arc::new(ManualClock::default()),
        )
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_selection_respects_single_limit() {
        let pool = test_pool(Arc::new(ManualClock::default())).await;
        let id = pool
            .register(TestFixtures::limited(Service::Tavily, 0, 50, ResetPeriod::Hourly))
            .await
            .unwrap();
        let mut tasks = JoinSet::new();

        // 200 tasks race for 50 units of quota.
        for _ in 0..200 {
            let pool = Arc::clone(&pool);
            tasks.spawn(async move {
                match pool.select_credential(Service::Tavily) {
                    Ok(handle) => {
                        tokio::task::yield_now().await;
                        pool.report_outcome(handle, Outcome::success(Duration::from_millis(5)))
                            .unwrap();
                        true
                    }
                    Err(_) => false,
                }
            });
        }

        let mut admitted = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 50, "exactly the rate limit should be admitted");
        let status = pool.get_usage_status(&id).unwrap();
        assert_eq!(status.current_usage, 50);
        assert_eq!(status.provisional_reservations, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_in_flight_reservations_count_against_limit() {
        let pool = test_pool(Arc::new(ManualClock::default())).await;
        let id = pool
            .register(TestFixtures::limited(Service::Exa, 0, 25, ResetPeriod::Daily))
            .await
            .unwrap();
        let mut tasks = JoinSet::new();

        // Nobody reports until everyone has tried, so only reservations gate.
        let barrier = Arc::new(tokio::sync::Barrier::new(100));
        for _ in 0..100 {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            tasks.spawn(async move {
                let result = pool.select_credential(Service::Exa);
                barrier.wait().await;
                match result {
                    Ok(handle) => {
                        pool.release(handle);
                        true
                    }
                    Err(_) => false,
                }
            });
        }

        let mut admitted = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 25);
        let status = pool.get_usage_status(&id).unwrap();
        assert_eq!(status.current_usage, 0);
        assert_eq!(status.provisional_reservations, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_selection_across_many_keys() {
        let pool = test_pool(Arc::new(ManualClock::default())).await;
        let mut limits = HashMap::new();
        for n in 0..10 {
            let limit = 5 + n as u32;
            let id = pool
                .register(TestFixtures::limited(Service::Jina, n, limit, ResetPeriod::Hourly))
                .await
                .unwrap();
            limits.insert(id, limit);
        }
        let total: u32 = limits.values().sum();
        let mut tasks = JoinSet::new();

        for i in 0..500u32 {
            let pool = Arc::clone(&pool);
            tasks.spawn(async move {
                let handle = pool.select_credential(Service::Jina).ok()?;
                let id = handle.id();
                // Mix of outcomes; failures still consume quota.
                let outcome = if i % 7 == 0 {
                    Outcome::failure(Duration::from_millis(30))
                } else {
                    Outcome::success(Duration::from_millis(10))
                };
                pool.report_outcome(handle, outcome).unwrap();
                Some(id)
            });
        }

        let mut per_key: HashMap<CredentialId, u32> = HashMap::new();
        while let Some(result) = tasks.join_next().await {
            if let Some(id) = result.unwrap() {
                *per_key.entry(id).or_default() += 1;
            }
        }

        for (id, used) in &per_key {
            assert!(
                *used <= limits[id],
                "credential {} used {} of {}",
                id.short(),
                used,
                limits[id]
            );
            assert_eq!(pool.get_usage_status(id).unwrap().current_usage, *used);
        }
        let admitted: u32 = per_key.values().sum();
        assert!(admitted <= total);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reports_keep_counters_consistent() {
        let pool = test_pool(Arc::new(ManualClock::default())).await;
        let id = pool
            .register(TestFixtures::limited(Service::Firecrawl, 0, 10_000, ResetPeriod::Daily))
            .await
            .unwrap();
        let mut tasks = JoinSet::new();

        for _ in 0..300 {
            let pool = Arc::clone(&pool);
            tasks.spawn(async move {
                let handle = pool.select_credential(Service::Firecrawl).unwrap();
                pool.report_outcome(handle, Outcome::success(Duration::from_millis(1)))
                    .unwrap();
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        let metrics = pool.metrics(&id).unwrap();
        assert_eq!(metrics.total_requests, 300);
        assert_eq!(metrics.successful_requests, 300);
        assert_eq!(pool.get_usage_status(&id).unwrap().current_usage, 300);
        assert_eq!(pool.snapshot().total_rotations, 300);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_selection_while_removal_is_persisted() {
        let store = Arc::new(GatedStore::default());
        let pool = gated_pool(store.clone()).await;
        let id = pool
            .register(TestFixtures::credential(Service::Jina, 0))
            .await
            .unwrap();

        let removal = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.remove(&id).await })
        };
        store.entered.notified().await;

        assert_eq!(
            pool.select_credential(Service::Jina).unwrap_err(),
            AdmissionError::NoAdmissibleCredential {
                service: Service::Jina
            }
        );
        assert_eq!(pool.get_usage_status(&id).unwrap().provisional_reservations, 0);

        store.proceed.notify_one();
        let removed = removal.await.unwrap().unwrap();
        assert_eq!(removed.id, id);
        assert!(removed.is_enabled());
        assert!(pool.credential(&id).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_removal_returns_key_to_rotation() {
        let store = Arc::new(GatedStore::default());
        store.fail_delete.store(true, Ordering::SeqCst);
        let pool = gated_pool(store.clone()).await;
        let id = pool
            .register(TestFixtures::credential(Service::Jina, 0))
            .await
            .unwrap();

        let removal = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.remove(&id).await })
        };
        store.entered.notified().await;
        assert!(pool.select_credential(Service::Jina).is_err());
        store.proceed.notify_one();

        let err = removal.await.unwrap().unwrap_err();
        assert_eq!(err.code(), CredpoolErrorCode::Persistence);
        assert!(pool.credential(&id).unwrap().is_enabled());

        let handle = pool.select_credential(Service::Jina).unwrap();
        assert_eq!(handle.id(), id);
        pool.report_outcome(handle, Outcome::success(Duration::from_millis(5)))
            .unwrap();
    }
}
