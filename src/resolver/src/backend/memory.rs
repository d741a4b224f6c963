use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::client::{StoreClient, WatchEvent, WatchStream};
use crate::error::StoreError;
use crate::tree::TreeNode;

type Entries = BTreeMap<String, String>;

/// How mutations are reported to watchers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventMode {
    /// One `Set`/`Delete` per mutation
    #[default]
    Incremental,
    /// A `Change` carrying the whole watched subtree after each mutation
    Snapshot,
}

#[derive(Debug, Clone)]
enum Notification {
    Put {
        key: String,
        value: String,
        entries: Arc<Entries>,
    },
    Delete {
        key: String,
        entries: Arc<Entries>,
    },
    Signal(WatchEvent),
    Close,
}

/// Hierarchical key-value store living in process memory.
///
/// Keys are `/`-separated paths; directories exist implicitly as long as
/// something is stored below them.
pub struct InMemoryStore {
    entries: RwLock<Arc<Entries>>,
    notifications: broadcast::Sender<Notification>,
    mode: EventMode,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new(buffer_size: usize) -> Self {
        Self::with_mode(buffer_size, EventMode::Incremental)
    }

    pub fn with_mode(buffer_size: usize, mode: EventMode) -> Self {
        let (notifications, _) = broadcast::channel(buffer_size);
        Self {
            entries: RwLock::new(Arc::new(Entries::new())),
            notifications,
            mode,
            unavailable: AtomicBool::new(false),
        }
    }

    pub async fn put(&self, key: &str, value: &str) {
        let mut entries = self.entries.write().await;
        let mut next = Entries::clone(&entries);
        next.insert(key.to_string(), value.to_string());
        *entries = Arc::new(next);

        // Published under the write lock so watchers see mutations in order
        let _ = self.notifications.send(Notification::Put {
            key: key.to_string(),
            value: value.to_string(),
            entries: Arc::clone(&entries),
        });
    }

    /// Remove `key` and everything below it. Returns how many keys were removed.
    pub async fn delete(&self, key: &str) -> usize {
        let mut entries = self.entries.write().await;
        let mut next = Entries::clone(&entries);
        let before = next.len();
        next.retain(|candidate, _| !is_under(key, candidate));
        let removed = before - next.len();
        if removed == 0 {
            return 0;
        }
        *entries = Arc::new(next);

        let _ = self.notifications.send(Notification::Delete {
            key: key.to_string(),
            entries: Arc::clone(&entries),
        });
        removed
    }

    /// Store every leaf of `tree`. Returns the number of keys written.
    pub async fn put_tree(&self, tree: &TreeNode) -> usize {
        let mut written = 0;
        let mut pending = vec![tree];
        while let Some(node) = pending.pop() {
            match node {
                TreeNode::Directory { nodes, .. } => pending.extend(nodes.iter()),
                TreeNode::Leaf { key, value } if !value.is_empty() => {
                    self.put(key, value).await;
                    written += 1;
                }
                _ => {}
            }
        }
        written
    }

    /// Apply a watch event as if it had come from another writer
    pub async fn apply(&self, event: WatchEvent) {
        match event {
            WatchEvent::Set { key, value } => self.put(&key, &value).await,
            WatchEvent::Delete { key } => {
                self.delete(&key).await;
            }
            WatchEvent::Change { payload } => {
                self.put_tree(&payload).await;
            }
            signal => self.signal(signal),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Number of open watch streams
    pub fn watchers(&self) -> usize {
        self.notifications.receiver_count()
    }

    /// Make every `get` fail until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn signal_reconnect(&self) {
        self.signal(WatchEvent::Reconnect);
    }

    pub fn signal_resync(&self) {
        self.signal(WatchEvent::Resync);
    }

    pub fn signal_error(&self, detail: impl Into<String>) {
        self.signal(WatchEvent::Error {
            detail: detail.into(),
        });
    }

    /// End every open watch stream
    pub fn close_watches(&self) {
        let _ = self.notifications.send(Notification::Close);
    }

    fn signal(&self, event: WatchEvent) {
        let _ = self.notifications.send(Notification::Signal(event));
    }
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn get(&self, path: &str) -> Result<TreeNode, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }

        let entries = self.entries.read().await;
        subtree(&entries, path).ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn watch(&self, path: &str) -> WatchStream {
        // Subscribe before returning so nothing published afterwards is missed
        let mut notifications = BroadcastStream::new(self.notifications.subscribe());
        let path = path.trim_end_matches('/').to_string();
        let mode = self.mode;

        Box::pin(stream! {
            while let Some(notification) = notifications.next().await {
                let (key, value, entries) = match notification {
                    Ok(Notification::Put { key, value, entries }) => (key, Some(value), entries),
                    Ok(Notification::Delete { key, entries }) => (key, None, entries),
                    Ok(Notification::Signal(event)) => {
                        yield event;
                        continue;
                    }
                    Ok(Notification::Close) => break,
                    Err(BroadcastStreamRecvError::Lagged(_)) => {
                        yield WatchEvent::Resync;
                        continue;
                    }
                };

                // Deleting an ancestor removes the watched subtree too
                let relevant = is_under(&path, &key) || (value.is_none() && is_under(&key, &path));
                if !relevant {
                    continue;
                }

                let event = match (mode, value) {
                    (EventMode::Incremental, Some(value)) => WatchEvent::Set { key, value },
                    (EventMode::Incremental, None) => WatchEvent::Delete { key },
                    (EventMode::Snapshot, _) => WatchEvent::Change {
                        payload: subtree(&entries, &path).unwrap_or_default(),
                    },
                };
                yield event;
            }
        })
    }
}

/// Whether `candidate` is `key` itself or stored below it
fn is_under(key: &str, candidate: &str) -> bool {
    let key = key.trim_end_matches('/');
    match candidate.strip_prefix(key) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Tree of everything stored at or below `path`, mirroring the directory
/// structure implied by the keys
fn subtree(entries: &Entries, path: &str) -> Option<TreeNode> {
    let path = path.trim_end_matches('/');
    if let Some(value) = entries.get(path) {
        return Some(TreeNode::leaf(path, value.as_str()));
    }

    let dir = format!("{path}/");
    let below: Vec<(&String, &String)> = entries
        .range(dir.clone()..)
        .take_while(|(key, _)| key.starts_with(&dir))
        .collect();
    if below.is_empty() {
        return None;
    }
    Some(directory(path, &below))
}

// `entries` is sorted and every key starts with `key/`, so each child
// directory occupies a contiguous run
fn directory(key: &str, entries: &[(&String, &String)]) -> TreeNode {
    let dir = format!("{key}/");
    let mut nodes = Vec::new();
    let mut i = 0;

    while i < entries.len() {
        let (entry_key, value) = entries[i];
        match entry_key[dir.len()..].split_once('/') {
            None => {
                nodes.push(TreeNode::leaf(entry_key.as_str(), value.as_str()));
                i += 1;
            }
            Some((segment, _)) => {
                let child = format!("{dir}{segment}");
                let child_dir = format!("{child}/");
                let end = entries[i..]
                    .iter()
                    .position(|(candidate, _)| !candidate.starts_with(&child_dir))
                    .map_or(entries.len(), |offset| i + offset);
                nodes.push(directory(&child, &entries[i..end]));
                i = end;
            }
        }
    }

    TreeNode::directory(key, nodes)
}
