//! Current-snapshot cache and push fan-out.
//!
//! Readers load the current snapshot through an atomic pointer swap, so they
//! never block a publish and never see a half-built record. Publishes are
//! serialised and pushed into every subscriber's bounded queue; a subscriber
//! whose queue is full is disconnected instead of stalling the publisher.

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::error::SubscriptionError;
use crate::types::Snapshot;

const NEVER: u64 = u64::MAX;
const DEFAULT_IDLE_AFTER: Duration = Duration::from_secs(60);

struct Slot {
    tx: mpsc::Sender<Arc<Snapshot>>,
    overflowed: Arc<AtomicBool>,
}

pub struct SnapshotCache {
    current: ArcSwapOption<Snapshot>,
    // one publisher at a time so queues see publish order
    writer: Mutex<()>,
    subscribers: DashMap<u64, Slot>,
    next_id: AtomicU64,
    buffer: usize,

    // adaptive sampling
    started: Instant,
    last_read_ms: AtomicU64,
    idle_after: Duration,
    wake: Notify,
}

impl SnapshotCache {
    pub fn new(buffer: usize) -> Self {
        Self {
            current: ArcSwapOption::from(None),
            writer: Mutex::new(()),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            started: Instant::now(),
            last_read_ms: AtomicU64::new(NEVER),
            idle_after: DEFAULT_IDLE_AFTER,
            wake: Notify::new(),
        }
    }

    /// How long without readers before the cache counts as idle.
    pub fn with_idle_after(mut self, idle_after: Duration) -> Self {
        self.idle_after = idle_after;
        self
    }

    /// Replace the current snapshot and push it to every subscriber.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let snap = Arc::new(snapshot);
        self.current.store(Some(Arc::clone(&snap)));

        let mut gone = Vec::new();
        for slot in self.subscribers.iter() {
            match slot.tx.try_send(Arc::clone(&snap)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    slot.overflowed.store(true, Ordering::Release);
                    gone.push((*slot.key(), true));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push((*slot.key(), false)),
            }
        }
        for (id, overflowed) in gone {
            self.subscribers.remove(&id);
            if overflowed {
                warn!("subscriber {id} fell behind (buffer {}), disconnecting", self.buffer);
            } else {
                debug!("subscriber {id} already closed");
            }
        }
        snap
    }

    /// Latest snapshot, if any has been published yet.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        let overflowed = Arc::new(AtomicBool::new(false));
        self.subscribers.insert(
            id,
            Slot {
                tx,
                overflowed: Arc::clone(&overflowed),
            },
        );
        debug!("subscriber {id} registered");
        self.wake.notify_waiters();
        Subscription {
            id,
            rx,
            overflowed,
            cache: Arc::clone(self),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Record a point-in-time read; keeps the sampler on its fast interval.
    /// The first read after an idle stretch wakes the sampler immediately.
    pub fn note_read(&self) {
        let was_idle = !self.is_active();
        let ms = self.started.elapsed().as_millis().min(u128::from(NEVER - 1)) as u64;
        self.last_read_ms.store(ms, Ordering::Relaxed);
        if was_idle {
            self.wake.notify_waiters();
        }
    }

    pub fn since_last_read(&self) -> Option<Duration> {
        match self.last_read_ms.load(Ordering::Relaxed) {
            NEVER => None,
            ms => Some(self.started.elapsed().saturating_sub(Duration::from_millis(ms))),
        }
    }

    /// Anyone streaming, or a REST read within `idle_after`.
    pub fn is_active(&self) -> bool {
        self.subscriber_count() > 0
            || self.since_last_read().is_some_and(|d| d < self.idle_after)
    }

    /// Signalled when the first subscriber or reader shows up.
    pub fn wake_signal(&self) -> &Notify {
        &self.wake
    }
}

/// A registered subscriber. Dropping it deregisters immediately.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<Snapshot>>,
    overflowed: Arc<AtomicBool>,
    cache: Arc<SnapshotCache>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next published snapshot. Once overflowed, nothing buffered is delivered.
    pub async fn recv(&mut self) -> Result<Arc<Snapshot>, SubscriptionError> {
        if self.overflowed.load(Ordering::Acquire) {
            return Err(SubscriptionError::Overflowed);
        }
        let next = self.rx.recv().await;
        if self.overflowed.load(Ordering::Acquire) {
            return Err(SubscriptionError::Overflowed);
        }
        next.ok_or(SubscriptionError::Closed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cache.subscribers.remove(&self.id);
        debug!("subscriber {} deregistered", self.id);
    }
}
