use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::StoreError;
use crate::tree::TreeNode;

/// One notification from a recursive watch on a store subtree.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A single key was created or updated
    Set { key: String, value: String },
    /// A key (and anything below it) was removed
    Delete { key: String },
    /// The subtree changed; the payload describes its current contents
    Change { payload: TreeNode },
    /// The client re-established the underlying subscription
    Reconnect,
    /// The client fell behind and is catching up with the store
    Resync,
    /// The subscription reported a transport failure
    Error { detail: String },
}

impl WatchEvent {
    /// Transport signals say nothing about membership
    pub fn is_transport_signal(&self) -> bool {
        matches!(
            self,
            WatchEvent::Reconnect | WatchEvent::Resync | WatchEvent::Error { .. }
        )
    }
}

pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// Read side of a hierarchical coordination store.
///
/// A single client is shared by every resolver, each holding its own watch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Recursive snapshot read of everything under `path`
    async fn get(&self, path: &str) -> Result<TreeNode, StoreError>;

    /// Recursive watch on `path`. Failures are reported in-band as
    /// [`WatchEvent::Error`]; the stream ends when the client gives up.
    async fn watch(&self, path: &str) -> WatchStream;
}
