use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::client::{StoreClient, WatchEvent, WatchStream};
use crate::lifecycle::Notifier;
use crate::membership::MembershipStore;
use crate::tree;
use common::config::MergePolicy;

/// Keeps one service's membership in step with the store by following a
/// recursive watch on its path.
pub struct WatchSynchronizer {
    path: String,
    client: Arc<dyn StoreClient>,
    members: Arc<MembershipStore>,
    notifier: Arc<Notifier>,
    policy: MergePolicy,
    rewatch_delay: Duration,
}

impl WatchSynchronizer {
    pub fn new(
        path: String,
        client: Arc<dyn StoreClient>,
        members: Arc<MembershipStore>,
        notifier: Arc<Notifier>,
        policy: MergePolicy,
        rewatch_delay: Duration,
    ) -> Self {
        Self {
            path,
            client,
            members,
            notifier,
            policy,
            rewatch_delay,
        }
    }

    /// Follow an already open watch forever. A stream that ends is
    /// re-opened after `rewatch_delay`; membership is kept as-is in between.
    pub async fn follow(self, mut events: WatchStream) {
        loop {
            debug!(path = %self.path, policy = %self.policy, "Watching service path");

            while let Some(event) = events.next().await {
                if self.apply(event) {
                    self.notifier.changed(self.members.len());
                }
            }

            warn!(
                path = %self.path,
                "Service change watcher ended, re-opening in {:?}",
                self.rewatch_delay
            );
            tokio::time::sleep(self.rewatch_delay).await;
            events = self.client.watch(&self.path).await;
        }
    }

    /// Fold one event into membership. Returns whether membership changed.
    pub fn apply(&self, event: WatchEvent) -> bool {
        match event {
            WatchEvent::Set { key, value } => {
                debug!(path = %self.path, key = %key, "Service instance set");
                if value.is_empty() {
                    debug!(path = %self.path, key = %key, "Ignoring instance without an endpoint");
                    return false;
                }
                self.members.upsert(&key, &value)
            }
            WatchEvent::Delete { key } => {
                debug!(path = %self.path, key = %key, "Service instance removed");
                self.members.remove_tree(&key) > 0
            }
            WatchEvent::Change { payload } => {
                let found = tree::extract(&payload);
                debug!(
                    path = %self.path,
                    instances = found.len(),
                    policy = %self.policy,
                    "Service subtree changed"
                );
                match self.policy {
                    MergePolicy::Incremental => self.members.merge(found),
                    MergePolicy::Snapshot => self.members.replace(found),
                }
            }
            WatchEvent::Reconnect => {
                warn!(path = %self.path, "Service change watcher reconnected");
                false
            }
            WatchEvent::Resync => {
                info!(path = %self.path, "Service change watcher is resyncing with the store");
                false
            }
            WatchEvent::Error { detail } => {
                error!(path = %self.path, error = %detail, "Service change watcher reported an error");
                false
            }
        }
    }
}
