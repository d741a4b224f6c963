use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, watch};

/// Notifications published by a service resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent {
    /// Membership became non-empty for the first time. Sent at most once.
    Resolved,
    /// The initial load found no instances. Sent at most once; the resolver
    /// keeps watching and may still resolve later.
    NotFound,
    /// A watch notification changed membership
    Changed { members: usize },
}

/// Where a resolver stands with respect to its first answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Pending,
    NotFound,
    Resolved,
}

/// Fan-out of lifecycle transitions for one resolver.
///
/// `broadcast` carries the event sequence for live subscribers; the `watch`
/// channel holds the latest [`Lifecycle`] for observers that arrive late.
#[derive(Debug)]
pub struct Notifier {
    events: broadcast::Sender<ServiceEvent>,
    state: watch::Sender<Lifecycle>,
    resolved: AtomicBool,
    not_found: AtomicBool,
}

impl Notifier {
    /// `capacity` must be non-zero
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (state, _) = watch::channel(Lifecycle::Pending);
        Self {
            events,
            state,
            resolved: AtomicBool::new(false),
            not_found: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.state.subscribe()
    }

    pub fn state(&self) -> Lifecycle {
        *self.state.borrow()
    }

    /// Wait until the resolver has either resolved or reported not-found
    pub async fn settled(&self) -> Lifecycle {
        let mut state = self.state.subscribe();
        match state.wait_for(|lifecycle| *lifecycle != Lifecycle::Pending).await {
            Ok(lifecycle) => *lifecycle,
            Err(_) => self.state(),
        }
    }

    /// The initial snapshot read finished; `members` is the membership size
    /// right after it was applied.
    pub fn initial_load(&self, members: usize) {
        if members > 0 {
            self.mark_resolved();
            return;
        }

        if self.not_found.swap(true, Ordering::SeqCst) {
            return;
        }
        // A watch event may have resolved the service in the meantime
        self.state.send_if_modified(|lifecycle| {
            if *lifecycle == Lifecycle::Pending {
                *lifecycle = Lifecycle::NotFound;
                true
            } else {
                false
            }
        });
        let _ = self.events.send(ServiceEvent::NotFound);
    }

    /// A watch notification changed membership to `members` instances
    pub fn changed(&self, members: usize) {
        if members > 0 {
            self.mark_resolved();
        }
        let _ = self.events.send(ServiceEvent::Changed { members });
    }

    fn mark_resolved(&self) {
        if self.resolved.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.send_replace(Lifecycle::Resolved);
        let _ = self.events.send(ServiceEvent::Resolved);
    }
}
