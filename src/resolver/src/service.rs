//! One resolved service: the live set of endpoints registered under a store path.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::IteratorRandom;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::StoreClient;
use crate::error::DiscoverError;
use crate::lifecycle::{Lifecycle, Notifier, ServiceEvent};
use crate::membership::MembershipStore;
use crate::tree;
use crate::watch::WatchSynchronizer;
use common::config::{ConfigError, DiscoveryConfig, MergePolicy};

/// Knobs for a single service resolver
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub merge_policy: MergePolicy,
    pub rewatch_delay: Duration,
    pub event_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        ServiceOptions::from(&DiscoveryConfig::default())
    }
}

impl From<&DiscoveryConfig> for ServiceOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            merge_policy: config.merge_policy,
            rewatch_delay: config.rewatch_delay,
            event_capacity: config.event_capacity,
        }
    }
}

/// Represents a named service where any number of instances may be registered.
///
/// Construction opens a watch on the service path, reads the current
/// snapshot, then follows the watch. All of it runs in the background and
/// reads never wait on the store. Dropping the last handle stops it.
#[derive(Debug)]
pub struct Service {
    path: String,
    members: Arc<MembershipStore>,
    notifier: Arc<Notifier>,
    task: JoinHandle<()>,
}

impl Service {
    /// Start resolving everything under `path`. Must be called from within a
    /// tokio runtime.
    pub fn new(
        path: impl Into<String>,
        client: Arc<dyn StoreClient>,
        options: ServiceOptions,
    ) -> Result<Arc<Self>, DiscoverError> {
        let path = path.into();
        if path.is_empty() {
            return Err(DiscoverError::MissingPath);
        }
        if options.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity.into());
        }
        if options.rewatch_delay.is_zero() {
            return Err(ConfigError::ZeroRewatchDelay.into());
        }
        let runtime = Handle::try_current().map_err(|_| DiscoverError::NoRuntime)?;

        let members = Arc::new(MembershipStore::new());
        let notifier = Arc::new(Notifier::new(options.event_capacity));

        let watcher = WatchSynchronizer::new(
            path.clone(),
            Arc::clone(&client),
            Arc::clone(&members),
            Arc::clone(&notifier),
            options.merge_policy,
            options.rewatch_delay,
        );
        let task = runtime.spawn({
            let path = path.clone();
            let members = Arc::clone(&members);
            let notifier = Arc::clone(&notifier);
            async move {
                // The watch is open before the read so instances registered
                // while it is in flight are still observed
                let events = client.watch(&path).await;
                initial_load(&path, client.as_ref(), &members, &notifier).await;
                watcher.follow(events).await;
            }
        });

        Ok(Arc::new(Self {
            path,
            members,
            notifier,
            task,
        }))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// One endpoint picked uniformly at random, or `None` while the service
    /// has no instances
    pub fn uri(&self) -> Option<String> {
        let snapshot = self.members.snapshot();
        snapshot.values().choose(&mut rand::thread_rng()).cloned()
    }

    /// Every known endpoint. Order carries no meaning.
    pub fn list(&self) -> Vec<String> {
        self.members.snapshot().values().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.notifier.subscribe()
    }

    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.notifier.lifecycle()
    }

    pub fn state(&self) -> Lifecycle {
        self.notifier.state()
    }

    /// Wait for the first answer: resolved, or not found
    pub async fn settled(&self) -> Lifecycle {
        self.notifier.settled().await
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn initial_load(
    path: &str,
    client: &dyn StoreClient,
    members: &MembershipStore,
    notifier: &Notifier,
) {
    match client.get(path).await {
        Ok(node) => {
            let found = tree::extract(&node);
            let count = found.len();
            members.merge(found);
            debug!(path, instances = count, "Populated initial service list");
        }
        Err(err) => {
            // Not necessarily a failure, the service may simply not be registered yet
            debug!(path, error = %err, "Initial attempt at service lookup failed");
        }
    }
    notifier.initial_load(members.len());
}
