//! Latest-value state broadcasting.
//!
//! One producer, any number of independent consumers. A new subscriber first
//! receives the current state, then every later state in publish order. Each
//! subscriber has its own unbounded queue, so a slow consumer never blocks the
//! producer or the other consumers. Queued states share their track's frozen
//! point chunks, so a backlog costs a small fixed amount per state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::lock_or_recover;
use crate::session::TrackingState;

struct Subscriber {
    id: u64,
    sender: Sender<TrackingState>,
}

struct BroadcastInner {
    latest: TrackingState,
    subscribers: Vec<Subscriber>,
}

/// Fan-out of [`TrackingState`] snapshots with replay of the latest value.
pub struct StateBroadcaster {
    inner: Mutex<BroadcastInner>,
    next_id: AtomicU64,
}

impl StateBroadcaster {
    pub fn new(initial: TrackingState) -> Self {
        Self {
            inner: Mutex::new(BroadcastInner {
                latest: initial,
                subscribers: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record `state` as the latest value and queue it for every subscriber.
    /// Subscribers whose receiving end is gone are dropped.
    pub fn publish(&self, state: TrackingState) {
        let mut inner = lock_or_recover(&self.inner);
        inner
            .subscribers
            .retain(|s| s.sender.send(state.clone()).is_ok());
        inner.latest = state;
    }

    /// Subscribe; the current state is already queued on return.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut inner = lock_or_recover(&self.inner);
        // Cannot fail: the receiver is still in hand
        let _ = sender.send(inner.latest.clone());
        inner.subscribers.push(Subscriber { id, sender });
        debug!(
            "[StateBroadcaster] Subscriber {} added ({} total)",
            id,
            inner.subscribers.len()
        );

        Subscription { id, receiver }
    }

    /// Run `handler` on a dedicated thread for the current state and every
    /// later one, until the returned handle is cancelled or dropped.
    pub fn subscribe_with<F>(self: &Arc<Self>, mut handler: F) -> SubscriptionHandle
    where
        F: FnMut(TrackingState) + Send + 'static,
    {
        let subscription = self.subscribe();
        let id = subscription.id;
        let worker = thread::spawn(move || {
            for state in subscription.iter() {
                handler(state);
            }
        });

        SubscriptionHandle {
            id,
            broadcaster: Arc::clone(self),
            worker: Some(worker),
        }
    }

    /// Stop delivering to subscriber `id`. Its queue disconnects once drained.
    pub fn unsubscribe(&self, id: u64) {
        let mut inner = lock_or_recover(&self.inner);
        inner.subscribers.retain(|s| s.id != id);
    }

    /// The most recently published state.
    pub fn latest(&self) -> TrackingState {
        lock_or_recover(&self.inner).latest.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock_or_recover(&self.inner).subscribers.len()
    }
}

/// Pull-style subscription; states arrive in publish order.
pub struct Subscription {
    id: u64,
    receiver: Receiver<TrackingState>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block for the next state. `None` once the broadcaster is gone.
    pub fn recv(&self) -> Option<TrackingState> {
        self.receiver.recv().ok()
    }

    /// Next queued state, without blocking.
    pub fn try_recv(&self) -> Option<TrackingState> {
        self.receiver.try_recv().ok()
    }

    /// Block up to `timeout` for the next state.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<TrackingState> {
        match self.receiver.recv_timeout(timeout) {
            Ok(state) => Some(state),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain the queue and keep only the newest state, if any arrived.
    pub fn latest(&self) -> Option<TrackingState> {
        self.receiver.try_iter().last()
    }

    /// Blocking iterator over states until the broadcaster goes away.
    pub fn iter(&self) -> impl Iterator<Item = TrackingState> + '_ {
        self.receiver.iter()
    }
}

/// Handle for a callback subscription running on its own thread.
pub struct SubscriptionHandle {
    id: u64,
    broadcaster: Arc<StateBroadcaster>,
    worker: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the subscription and wait for the handler to finish the states
    /// already queued for it.
    pub fn cancel(mut self) {
        self.broadcaster.unsubscribe(self.id);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        // Disconnects the queue; the worker thread exits on its own
        self.broadcaster.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TrackingPhase;

    fn state(phase: TrackingPhase) -> TrackingState {
        TrackingState {
            phase,
            ..TrackingState::idle()
        }
    }

    #[test]
    fn test_replays_latest_on_subscribe() {
        let broadcaster = StateBroadcaster::new(TrackingState::idle());
        broadcaster.publish(state(TrackingPhase::Active));
        broadcaster.publish(state(TrackingPhase::Paused));

        let sub = broadcaster.subscribe();
        assert_eq!(sub.try_recv().unwrap().phase, TrackingPhase::Paused);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_ordered_delivery() {
        let broadcaster = StateBroadcaster::new(TrackingState::idle());
        let sub = broadcaster.subscribe();
        broadcaster.publish(state(TrackingPhase::Active));
        broadcaster.publish(state(TrackingPhase::Paused));
        broadcaster.publish(state(TrackingPhase::Active));

        let phases: Vec<TrackingPhase> = sub.receiver.try_iter().map(|s| s.phase).collect();
        assert_eq!(
            phases,
            vec![
                TrackingPhase::Idle,
                TrackingPhase::Active,
                TrackingPhase::Paused,
                TrackingPhase::Active
            ]
        );
    }

    #[test]
    fn test_independent_subscribers() {
        let broadcaster = StateBroadcaster::new(TrackingState::idle());
        let early = broadcaster.subscribe();
        broadcaster.publish(state(TrackingPhase::Active));
        let late = broadcaster.subscribe();
        broadcaster.publish(state(TrackingPhase::Finalized));

        assert_eq!(early.receiver.try_iter().count(), 3);
        assert_eq!(late.receiver.try_iter().count(), 2);
    }

    #[test]
    fn test_slow_subscriber_does_not_block_publisher() {
        let broadcaster = StateBroadcaster::new(TrackingState::idle());
        let sub = broadcaster.subscribe();
        for _ in 0..10_000 {
            broadcaster.publish(state(TrackingPhase::Active));
        }
        assert_eq!(sub.latest().unwrap().phase, TrackingPhase::Active);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_dropped_subscription_pruned() {
        let broadcaster = StateBroadcaster::new(TrackingState::idle());
        let sub = broadcaster.subscribe();
        let _keep = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);
        drop(sub);
        broadcaster.publish(state(TrackingPhase::Active));
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn test_callback_subscription() {
        let broadcaster = Arc::new(StateBroadcaster::new(TrackingState::idle()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = broadcaster.subscribe_with(move |s| sink.lock().unwrap().push(s.phase));
        broadcaster.publish(state(TrackingPhase::Active));
        broadcaster.publish(state(TrackingPhase::Finalized));
        handle.cancel();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                TrackingPhase::Idle,
                TrackingPhase::Active,
                TrackingPhase::Finalized
            ]
        );
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
