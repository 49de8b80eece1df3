//! Background sampler: periodically collects a snapshot and publishes it to
//! the cache, so HTTP and WebSocket replies only ever read cached data.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::cache::SnapshotCache;
use crate::config::CollectorConfig;
use crate::metrics::Collector;

pub type SharedCollector = Arc<Mutex<Collector>>;

/// Runs until `shutdown` flips to true. Polls at `interval` while the cache
/// is active and at `idle_interval` otherwise; a new reader cuts an idle sleep short.
pub fn spawn_sampler(
    collector: SharedCollector,
    cache: Arc<SnapshotCache>,
    cfg: CollectorConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "sampler started (interval {:?}, idle {:?})",
            cfg.interval(),
            cfg.idle_interval()
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            sample_once(&collector, &cache).await;

            let period = if cache.is_active() {
                cfg.interval()
            } else {
                cfg.idle_interval()
            };
            tokio::select! {
                _ = sleep(period) => {}
                _ = cache.wake_signal().notified() => debug!("sampler woken by new reader"),
                changed = shutdown.changed() => {
                    // sender gone counts as shutdown
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("sampler stopped");
    })
}

/// Collect on the blocking pool and publish. Returns false if the collection task died.
pub async fn sample_once(collector: &SharedCollector, cache: &SnapshotCache) -> bool {
    let collector = Arc::clone(collector);
    let joined = tokio::task::spawn_blocking(move || {
        collector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .collect()
    })
    .await;
    match joined {
        Ok(snapshot) => {
            let snap = cache.publish(snapshot);
            debug!("published snapshot {}", snap.seq);
            true
        }
        Err(e) => {
            error!("collection task failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectError;
    use crate::identity::MachineIdentity;
    use crate::probe::{HostProbe, RawDisk, RawInterface};
    use crate::types::{CpuUsage, MemoryUsage, ProcessInfo};
    use std::time::Duration;
    use tokio::time::timeout;

    struct DeadProbe;

    impl HostProbe for DeadProbe {
        fn cpu(&mut self) -> Result<CpuUsage, CollectError> {
            Err(CollectError::Empty("cpu"))
        }
        fn memory(&mut self) -> Result<MemoryUsage, CollectError> {
            Err(CollectError::Empty("memory"))
        }
        fn disks(&mut self) -> Result<Vec<RawDisk>, CollectError> {
            Ok(Vec::new())
        }
        fn interfaces(&mut self) -> Result<Vec<RawInterface>, CollectError> {
            Ok(Vec::new())
        }
        fn processes(&mut self) -> Result<Vec<ProcessInfo>, CollectError> {
            Err(CollectError::Empty("processes"))
        }
    }

    fn collector() -> SharedCollector {
        let identity = Arc::new(MachineIdentity {
            id: "id".into(),
            hostname: "host".into(),
            os: "os".into(),
            kernel: "k".into(),
            arch: "a".into(),
        });
        Arc::new(Mutex::new(Collector::new(Box::new(DeadProbe), identity, 5)))
    }

    #[tokio::test]
    async fn sample_once_publishes_even_when_sections_fail() {
        let cache = SnapshotCache::new(4);
        assert!(sample_once(&collector(), &cache).await);
        let snap = cache.current().unwrap();
        assert_eq!(snap.seq, 1);
        assert!(!snap.cpu_usage.is_available());
    }

    #[tokio::test]
    async fn sampler_publishes_until_shutdown() {
        let cache = Arc::new(SnapshotCache::new(4));
        let (tx, rx) = watch::channel(false);
        let cfg = CollectorConfig {
            interval_ms: 10,
            idle_interval_ms: 10,
            ..CollectorConfig::default()
        };
        let handle = spawn_sampler(collector(), Arc::clone(&cache), cfg, rx);

        timeout(Duration::from_secs(5), async {
            while seq(&cache) < 3 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    fn seq(cache: &SnapshotCache) -> u64 {
        cache.current().map_or(0, |s| s.seq)
    }

    async fn wait_past(cache: &SnapshotCache, target: u64) {
        timeout(Duration::from_secs(2), async {
            while seq(cache) <= target {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sampler did not publish in time");
    }

    #[tokio::test]
    async fn idle_sampler_slows_down_and_wakes_on_read() {
        let cache = Arc::new(
            SnapshotCache::new(4).with_idle_after(Duration::from_millis(150)),
        );
        let (tx, rx) = watch::channel(false);
        let cfg = CollectorConfig {
            interval_ms: 10,
            idle_interval_ms: 60_000,
            ..CollectorConfig::default()
        };
        let handle = spawn_sampler(collector(), Arc::clone(&cache), cfg, rx);

        // nobody has read yet: one publish, then the long idle sleep
        wait_past(&cache, 0).await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(seq(&cache), 1);

        // a read wakes it and keeps it on the fast interval
        cache.note_read();
        wait_past(&cache, 3).await;

        // idle again once reads stop
        sleep(Duration::from_millis(300)).await;
        let settled = seq(&cache);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(seq(&cache), settled);

        // a returning reader wakes it again
        cache.note_read();
        wait_past(&cache, settled).await;

        tx.send(true).unwrap();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
