use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy_primitives::Address;
use dashmap::DashMap;
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    task::JoinHandle,
    time::{Instant, interval_at},
};

/// Per-address submission state of a [`super::Submitter`].
///
/// Every address seen gets a freshness flag, a submission lock and one timer
/// task. An address left unused for a whole interval after its flag was set
/// is evicted on the next tick, unless its lock is held or awaited. Evicted
/// addresses start over as first sight, so the next nonce is read fresh.
#[derive(Debug)]
pub(crate) struct NonceTracker {
    interval: Duration,
    fresh: Arc<Mutex<HashMap<Address, bool>>>,
    timers: Arc<DashMap<Address, JoinHandle<()>>>,
    locks: Arc<DashMap<Address, Arc<Mutex<()>>>>,
}

/// Drops the submission lock of `address` unless someone holds or awaits it.
fn release_lock(locks: &DashMap<Address, Arc<Mutex<()>>>, address: Address) -> bool {
    locks
        .remove_if(&address, |_, lock| Arc::strong_count(lock) == 1)
        .is_some()
        || !locks.contains_key(&address)
}

impl NonceTracker {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            fresh: Arc::default(),
            timers: Arc::default(),
            locks: Arc::default(),
        }
    }

    /// Serializes submissions of one address, held until the guard drops.
    pub(crate) async fn lock(&self, address: Address) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(address).or_default().clone();
        lock.lock_owned().await
    }

    /// Whether the next nonce of `address` must be read from the wallet
    /// daemon. Clears the flag; the first call for an address returns `true`
    /// and starts its fresh-timer.
    pub(crate) async fn take_fresh(&self, address: Address) -> bool {
        let previous = self.fresh.lock().await.insert(address, false);
        match previous {
            Some(fresh) => fresh,
            None => {
                self.start_timer(address);
                true
            }
        }
    }

    fn start_timer(&self, address: Address) {
        let fresh = self.fresh.clone();
        let timers = self.timers.clone();
        let locks = self.locks.clone();
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let mut flags = fresh.lock().await;
                if flags.get(&address) == Some(&true) && release_lock(&locks, address) {
                    flags.remove(&address);
                    timers.remove(&address);
                    tracing::trace!(%address, "idle address evicted");
                    return;
                }
                flags.insert(address, true);
                tracing::trace!(%address, "nonce marked fresh");
            }
        });
        if let Some(previous) = self.timers.insert(address, handle) {
            previous.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn timer_count(&self) -> usize {
        self.timers.len()
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for NonceTracker {
    fn drop(&mut self) {
        for timer in self.timers.iter() {
            timer.value().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_sight_is_fresh_once() {
        let tracker = NonceTracker::new(Duration::from_secs(5));
        let address = Address::with_last_byte(1);

        assert!(tracker.take_fresh(address).await);
        assert!(!tracker.take_fresh(address).await);
        assert!(!tracker.take_fresh(address).await);
        assert_eq!(tracker.timer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_marks_fresh_every_interval() {
        let tracker = NonceTracker::new(Duration::from_secs(5));
        let address = Address::with_last_byte(1);
        tracker.take_fresh(address).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!tracker.take_fresh(address).await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(tracker.take_fresh(address).await);
        assert!(!tracker.take_fresh(address).await);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(tracker.take_fresh(address).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_addresses_tracked_independently() {
        let tracker = NonceTracker::new(Duration::from_secs(5));
        let first = Address::with_last_byte(1);
        let second = Address::with_last_byte(2);

        assert!(tracker.take_fresh(first).await);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(tracker.take_fresh(second).await);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(tracker.take_fresh(first).await);
        assert!(!tracker.take_fresh(second).await);
        assert_eq!(tracker.timer_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_address_evicted() {
        let tracker = NonceTracker::new(Duration::from_secs(5));
        let address = Address::with_last_byte(1);
        drop(tracker.lock(address).await);
        assert!(tracker.take_fresh(address).await);

        // marked fresh at 5s, evicted at 10s
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(tracker.timer_count(), 0);
        assert_eq!(tracker.lock_count(), 0);

        assert!(tracker.take_fresh(address).await);
        assert!(!tracker.take_fresh(address).await);
        assert_eq!(tracker.timer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_lock_blocks_eviction() {
        let tracker = NonceTracker::new(Duration::from_secs(5));
        let address = Address::with_last_byte(1);
        let guard = tracker.lock(address).await;
        assert!(tracker.take_fresh(address).await);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(tracker.timer_count(), 1);
        assert_eq!(tracker.lock_count(), 1);
        assert!(tracker.take_fresh(address).await);

        drop(guard);
        // flag cleared above, so one more interval to mark and one to evict
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(tracker.timer_count(), 0);
        assert_eq!(tracker.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_serializes_same_address() {
        let tracker = NonceTracker::new(Duration::from_secs(5));
        let address = Address::with_last_byte(1);

        let guard = tracker.lock(address).await;
        let mut blocked = tokio_test::task::spawn(tracker.lock(address));
        tokio_test::assert_pending!(blocked.poll());

        let _other = tracker.lock(Address::with_last_byte(2)).await;
        drop(guard);
        assert!(blocked.is_woken());
        tokio_test::assert_ready!(blocked.poll());
    }
}
