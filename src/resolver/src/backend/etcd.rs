//! Decoding of etcd v2 keys API responses.
//!
//! A `GET /v2/keys/<path>?recursive=true` answers with a wrapper around the
//! requested node; a watch (`?wait=true&recursive=true`) answers with one
//! such wrapper per change, tagged with the action that caused it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::WatchEvent;
use crate::error::StoreError;
use crate::tree::TreeNode;

/// `errorCode` etcd uses for a missing key
pub const KEY_NOT_FOUND: u64 = 100;

/// Body returned by etcd alongside a non-2xx status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "errorCode")]
    pub error_code: u64,
    pub message: String,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub index: Option<u64>,
}

impl From<ErrorBody> for StoreError {
    fn from(body: ErrorBody) -> Self {
        let cause = body.cause.unwrap_or_default();
        if body.error_code == KEY_NOT_FOUND {
            StoreError::NotFound(cause)
        } else {
            StoreError::Unavailable(format!("{} ({}) {}", body.message, body.error_code, cause))
        }
    }
}

/// One keys API response. Nodes are kept raw and turned into a
/// [`TreeNode`] on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub action: String,
    #[serde(default)]
    pub node: Value,
    #[serde(rename = "prevNode", default, skip_serializing_if = "Value::is_null")]
    pub prev_node: Value,
}

impl Response {
    pub fn tree(&self) -> TreeNode {
        TreeNode::from_json(&self.node)
    }

    /// Translate a watch response into the event it describes.
    ///
    /// Returns `None` for changes that carry no endpoint, such as the
    /// creation of an empty directory.
    pub fn into_watch_event(self) -> Option<WatchEvent> {
        let key = self
            .node
            .get("key")
            .and_then(Value::as_str)
            .map(str::to_string);

        match self.action.as_str() {
            "set" | "create" | "update" | "compareAndSwap" => match self.tree() {
                TreeNode::Leaf { key, value } => Some(WatchEvent::Set { key, value }),
                _ => None,
            },
            "delete" | "expire" | "compareAndDelete" => key.map(|key| WatchEvent::Delete { key }),
            _ => Some(WatchEvent::Change {
                payload: self.tree(),
            }),
        }
    }
}

/// Decode the body of a recursive get
pub fn decode_get(body: &[u8]) -> Result<TreeNode, StoreError> {
    let payload: Value = serde_json::from_slice(body)?;
    if payload.get("errorCode").is_some() {
        let error: ErrorBody = serde_json::from_value(payload)?;
        return Err(error.into());
    }
    Ok(TreeNode::from_json(&payload))
}

/// Decode one watch notification
pub fn decode_watch(body: &[u8]) -> Result<Option<WatchEvent>, StoreError> {
    let payload: Value = serde_json::from_slice(body)?;
    if payload.get("errorCode").is_some() {
        let error: ErrorBody = serde_json::from_value(payload)?;
        return Ok(Some(WatchEvent::Error {
            detail: StoreError::from(error).to_string(),
        }));
    }
    let response: Response = serde_json::from_value(payload)?;
    Ok(response.into_watch_event())
}
