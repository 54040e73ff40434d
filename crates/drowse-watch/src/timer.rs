//! Timer registry — one cancellable, one-shot timer per key.
//!
//! Each key maps to a slot holding the spawned task and a generation
//! number. Scheduling under an existing key aborts the previous task.
//! A firing callback receives a [`TimerTicket`] and may re-arm its own key
//! through it; the ticket is refused once the key has been cancelled or
//! replaced, so a tick that is still running when its watch is cancelled
//! cannot resurrect it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

struct TimerSlot {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Registry of per-key timers.
#[derive(Clone, Default)]
pub struct TimerRegistry {
    slots: Arc<Mutex<HashMap<String, TimerSlot>>>,
    generations: Arc<AtomicU64>,
}

/// Handed to a firing callback; lets it re-arm its own key exactly once.
pub struct TimerTicket {
    key: String,
    generation: u64,
    registry: TimerRegistry,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot timer for `key`, replacing any pending one.
    ///
    /// `callback` runs once after `delay` unless the key is cancelled or
    /// re-scheduled first.
    pub fn schedule<F, Fut>(&self, key: &str, delay: Duration, callback: F)
    where
        F: FnOnce(TimerTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.slots.lock().expect("timer slots lock");
        let slot = self.spawn_slot(key, delay, callback);
        if let Some(old) = slots.insert(key.to_string(), slot) {
            old.handle.abort();
            debug!(%key, "replaced pending timer");
        }
    }

    /// Cancel the timer for `key`. Unknown keys are a no-op.
    ///
    /// Returns true if a timer was pending or running.
    pub fn cancel(&self, key: &str) -> bool {
        let mut slots = self.slots.lock().expect("timer slots lock");
        match slots.remove(key) {
            Some(slot) => {
                slot.handle.abort();
                debug!(%key, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every timer. Returns how many were live.
    pub fn cancel_all(&self) -> usize {
        let mut slots = self.slots.lock().expect("timer slots lock");
        let count = slots.len();
        for (key, slot) in slots.drain() {
            slot.handle.abort();
            debug!(%key, "timer cancelled");
        }
        count
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        let slots = self.slots.lock().expect("timer slots lock");
        slots.contains_key(key)
    }

    /// Keys with a live timer.
    pub fn keys(&self) -> Vec<String> {
        let slots = self.slots.lock().expect("timer slots lock");
        slots.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let slots = self.slots.lock().expect("timer slots lock");
        slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the task for a new slot. Callers hold the slots lock, so the
    /// task cannot observe the map before its slot is inserted.
    fn spawn_slot<F, Fut>(&self, key: &str, delay: Duration, callback: F) -> TimerSlot
    where
        F: FnOnce(TimerTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let ticket = TimerTicket {
            key: key.to_string(),
            generation,
            registry: self.clone(),
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let registry = ticket.registry.clone();
            let key = ticket.key.clone();
            callback(ticket).await;
            registry.finish(&key, generation);
        });

        TimerSlot { generation, handle }
    }

    /// Drop the slot of a completed one-shot, unless it was re-armed.
    fn finish(&self, key: &str, generation: u64) {
        let mut slots = self.slots.lock().expect("timer slots lock");
        if slots.get(key).is_some_and(|slot| slot.generation == generation) {
            slots.remove(key);
        }
    }
}

impl TimerTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether this ticket's timer still owns its key.
    pub fn is_current(&self) -> bool {
        let slots = self.registry.slots.lock().expect("timer slots lock");
        slots
            .get(&self.key)
            .is_some_and(|slot| slot.generation == self.generation)
    }

    /// Re-arm this key from inside its own callback.
    ///
    /// Returns false, arming nothing, if the key was cancelled or replaced
    /// while the callback ran.
    pub fn reschedule<F, Fut>(self, delay: Duration, callback: F) -> bool
    where
        F: FnOnce(TimerTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let registry = self.registry.clone();
        let mut slots = registry.slots.lock().expect("timer slots lock");
        let current = slots
            .get(&self.key)
            .is_some_and(|slot| slot.generation == self.generation);
        if !current {
            debug!(key = %self.key, "reschedule refused, timer no longer current");
            return false;
        }

        // The replaced handle belongs to the running task; dropping it
        // detaches rather than aborts.
        let slot = registry.spawn_slot(&self.key, delay, callback);
        slots.insert(self.key, slot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn bump(
        count: &Arc<AtomicUsize>,
    ) -> impl FnOnce(TimerTicket) -> std::future::Ready<()> + Send + 'static {
        let count = count.clone();
        move |_ticket| {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let timers = TimerRegistry::new();
        let fired = counter();
        timers.schedule("b1", Duration::from_secs(10), bump(&fired));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timers.is_scheduled("b1"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_scheduled("b1"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_unknown_key_is_noop() {
        let timers = TimerRegistry::new();
        assert!(!timers.cancel("nope"));
        assert!(!timers.cancel("nope"));
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let timers = TimerRegistry::new();
        let fired = counter();
        timers.schedule("b1", Duration::from_secs(10), bump(&fired));

        assert!(timers.cancel("b1"));
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_same_key_replaces_pending() {
        let timers = TimerRegistry::new();
        let first = counter();
        let second = counter();
        timers.schedule("b1", Duration::from_secs(10), bump(&first));
        timers.schedule("b1", Duration::from_secs(30), bump(&second));
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticket_rearms_its_own_key() {
        let timers = TimerRegistry::new();
        let fired = counter();
        let inner = bump(&fired);
        let outer_count = fired.clone();
        timers.schedule("b1", Duration::from_secs(5), move |ticket| async move {
            outer_count.fetch_add(1, Ordering::SeqCst);
            assert!(ticket.is_current());
            assert!(ticket.reschedule(Duration::from_secs(5), inner));
        });

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timers.is_scheduled("b1"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(!timers.is_scheduled("b1"));
    }

    #[tokio::test(start_paused = true)]
    async fn ticket_refused_after_cancel_during_callback() {
        let timers = TimerRegistry::new();
        let fired = counter();
        let inner = bump(&fired);
        let registry = timers.clone();
        let (tx, rx) = tokio::sync::oneshot::channel::<bool>();

        timers.schedule("b1", Duration::from_secs(5), move |ticket| async move {
            // Cancellation races with a running callback.
            registry.slots.lock().unwrap().remove("b1");
            let _ = tx.send(ticket.reschedule(Duration::from_secs(5), inner));
        });

        assert!(!rx.await.unwrap());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_everything() {
        let timers = TimerRegistry::new();
        let fired = counter();
        for key in ["a", "b", "c"] {
            timers.schedule(key, Duration::from_secs(10), bump(&fired));
        }

        assert_eq!(timers.cancel_all(), 3);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
