//! Periodic maintenance of a running pool.
//!
//! Three independent loops run on `tokio` intervals:
//! - cooldown reactivation (probes run outside any pool lock)
//! - health check, which also releases unresolved reservations
//! - write-behind flush of metrics to the persistence store
//!
//! The loops hold a weak reference, so dropping the last pool handle ends them.

use super::CredentialPool;
use crate::config::BackgroundConfig;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Handles of the running maintenance loops. Dropping it aborts them.
#[derive(Debug)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub(crate) fn spawn(pool: &Arc<CredentialPool>, config: &BackgroundConfig) -> Self {
        let handles = vec![
            spawn_loop(
                pool,
                Duration::from_secs(config.reactivation_interval_secs),
                |pool| async move {
                    pool.reactivate_cooled_down_keys().await;
                },
            ),
            spawn_loop(
                pool,
                Duration::from_secs(config.health_check_interval_secs),
                |pool| async move {
                    pool.perform_health_check();
                },
            ),
            spawn_loop(
                pool,
                Duration::from_secs(config.flush_interval_secs),
                |pool| async move {
                    // Failed ids stay dirty and are retried on the next tick.
                    let _ = pool.flush().await;
                },
            ),
        ];
        tracing::debug!(tasks = handles.len(), "background tasks started");
        Self { handles }
    }

    /// Whether every loop is still running.
    pub fn is_running(&self) -> bool {
        self.handles.iter().all(|h| !h.is_finished())
    }

    /// Stop the loops and wait for them to finish.
    pub async fn stop(mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
        tracing::debug!("background tasks stopped");
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn spawn_loop<F, Fut>(pool: &Arc<CredentialPool>, period: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn(Arc<CredentialPool>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let weak: Weak<CredentialPool> = Arc::downgrade(pool);
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(pool) = weak.upgrade() else {
                break;
            };
            tick(pool).await;
        }
    })
}
