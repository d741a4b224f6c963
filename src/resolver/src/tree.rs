//! Store payloads as a tagged tree, and extraction of endpoint leaves from it.
//!
//! The coordination store answers reads and watch notifications with a
//! directory/leaf structure of arbitrary depth. Resolution only cares about
//! the leaves: every leaf under a service path is one registered instance,
//! keyed by its full store path.

use std::collections::HashMap;

use serde_json::Value;

/// Instance key (full store path) to endpoint
pub type MembershipMap = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TreeNode {
    Directory {
        key: String,
        nodes: Vec<TreeNode>,
    },
    Leaf {
        key: String,
        value: String,
    },
    #[default]
    Empty,
}

impl TreeNode {
    pub fn directory(key: impl Into<String>, nodes: Vec<TreeNode>) -> Self {
        TreeNode::Directory {
            key: key.into(),
            nodes,
        }
    }

    pub fn leaf(key: impl Into<String>, value: impl Into<String>) -> Self {
        TreeNode::Leaf {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Build a tree from a raw store payload.
    ///
    /// At each level the first matching shape wins: a sequence of nodes, a
    /// directory (`dir: true` with `nodes`), a wrapper carrying a single
    /// `node`, then a leaf with both `key` and a non-empty `value`. Anything
    /// else is [`TreeNode::Empty`].
    pub fn from_json(payload: &Value) -> Self {
        let object = match payload {
            Value::Array(items) => {
                return TreeNode::directory("", items.iter().map(Self::from_json).collect());
            }
            Value::Object(object) => object,
            _ => return TreeNode::Empty,
        };

        if object.get("dir").and_then(Value::as_bool).unwrap_or(false) {
            let key = object.get("key").and_then(Value::as_str).unwrap_or_default();
            let nodes = match object.get("nodes") {
                Some(Value::Array(items)) => items.iter().map(Self::from_json).collect(),
                Some(Value::Null) | None => Vec::new(),
                Some(other) => vec![Self::from_json(other)],
            };
            return TreeNode::directory(key, nodes);
        }

        match object.get("node") {
            Some(Value::Null) | None => {}
            Some(node) => return Self::from_json(node),
        }

        match (object.get("key"), object.get("value")) {
            (Some(Value::String(key)), Some(Value::String(value))) if !value.is_empty() => {
                TreeNode::leaf(key.as_str(), value.as_str())
            }
            _ => TreeNode::Empty,
        }
    }

    /// Number of endpoint leaves in this tree
    pub fn leaf_count(&self) -> usize {
        match self {
            TreeNode::Directory { nodes, .. } => nodes.iter().map(TreeNode::leaf_count).sum(),
            TreeNode::Leaf { value, .. } if !value.is_empty() => 1,
            _ => 0,
        }
    }
}

/// Flatten a tree into instance key → endpoint. Empty or malformed input
/// yields an empty map.
pub fn extract(node: &TreeNode) -> MembershipMap {
    let mut members = MembershipMap::new();
    collect(node, &mut members);
    members
}

/// Same as [`extract`] over a sequence of sibling trees
pub fn extract_all(nodes: &[TreeNode]) -> MembershipMap {
    let mut members = MembershipMap::new();
    for node in nodes {
        collect(node, &mut members);
    }
    members
}

fn collect(node: &TreeNode, members: &mut MembershipMap) {
    match node {
        TreeNode::Directory { nodes, .. } => {
            for child in nodes {
                collect(child, members);
            }
        }
        TreeNode::Leaf { key, value } => {
            // An instance without an endpoint is not resolvable
            if !key.is_empty() && !value.is_empty() {
                members.insert(key.clone(), value.clone());
            }
        }
        TreeNode::Empty => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested(depth: usize, leaves_per_level: usize) -> TreeNode {
        let prefix = format!("/discover/service/api/level{depth}");
        let mut nodes: Vec<TreeNode> = (0..leaves_per_level)
            .map(|i| TreeNode::leaf(format!("{prefix}/{i}"), format!("tcp://10.0.{depth}.{i}:80")))
            .collect();
        if depth > 0 {
            nodes.push(nested(depth - 1, leaves_per_level));
        }
        TreeNode::directory(prefix, nodes)
    }

    #[test]
    fn test_extract_counts_every_leaf_at_any_depth() {
        for depth in 0..6 {
            let tree = nested(depth, 3);
            let members = extract(&tree);
            assert_eq!(members.len(), tree.leaf_count());
            assert_eq!(members.len(), (depth + 1) * 3);
        }
    }

    #[test]
    fn test_extract_bare_leaf() {
        let members = extract(&TreeNode::leaf("/a/b", "tcp://1.2.3.4:80"));
        assert_eq!(members.get("/a/b").map(String::as_str), Some("tcp://1.2.3.4:80"));
    }

    #[test]
    fn test_extract_empty_inputs() {
        assert!(extract(&TreeNode::Empty).is_empty());
        assert!(extract(&TreeNode::directory("/a", vec![])).is_empty());
        assert!(extract_all(&[]).is_empty());
    }

    #[test]
    fn test_extract_skips_empty_endpoints() {
        let tree = TreeNode::directory(
            "/svc",
            vec![TreeNode::leaf("/svc/a", ""), TreeNode::leaf("/svc/b", "tcp://b:1")],
        );
        let members = extract(&tree);
        assert_eq!(members.len(), 1);
        assert!(members.contains_key("/svc/b"));
    }

    #[test]
    fn test_extract_ignores_sibling_order() {
        let a = TreeNode::leaf("/svc/a", "tcp://a:1");
        let b = TreeNode::directory("/svc/b", vec![TreeNode::leaf("/svc/b/c", "tcp://c:1")]);

        let forward = extract(&TreeNode::directory("/svc", vec![a.clone(), b.clone()]));
        let reverse = extract(&TreeNode::directory("/svc", vec![b, a]));
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_extract_all_merges_siblings() {
        let members = extract_all(&[
            TreeNode::leaf("/svc/a", "tcp://a:1"),
            TreeNode::leaf("/svc/b", "tcp://b:1"),
        ]);
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_from_json_etcd_get_response() {
        let payload = json!({
            "action": "get",
            "node": {
                "key": "/discover/service/proxy-api",
                "dir": true,
                "nodes": [
                    {
                        "key": "/discover/service/proxy-api/prod",
                        "dir": true,
                        "nodes": [
                            {"key": "/discover/service/proxy-api/prod/h1/c1", "value": "tcp://10.198.67.175:49155"},
                            {"key": "/discover/service/proxy-api/prod/h2/c1", "value": "tcp://10.202.158.62:49155"}
                        ]
                    },
                    {"key": "/discover/service/proxy-api/dev", "value": "tcp://10.202.159.221:49156"}
                ]
            }
        });

        let members = extract(&TreeNode::from_json(&payload));
        assert_eq!(members.len(), 3);
        assert_eq!(
            members.get("/discover/service/proxy-api/dev").map(String::as_str),
            Some("tcp://10.202.159.221:49156")
        );
    }

    #[test]
    fn test_from_json_sequence_and_wrapper() {
        let payload = json!([
            {"node": {"key": "/svc/a", "value": "tcp://a:1"}},
            {"key": "/svc/b", "value": "tcp://b:1"}
        ]);
        assert_eq!(extract(&TreeNode::from_json(&payload)).len(), 2);
    }

    #[test]
    fn test_from_json_directory_takes_precedence_over_value() {
        let payload = json!({"key": "/svc", "dir": true, "value": "ignored"});
        assert_eq!(TreeNode::from_json(&payload), TreeNode::directory("/svc", vec![]));
    }

    #[test]
    fn test_from_json_malformed_inputs() {
        for payload in [
            json!(null),
            json!(42),
            json!("tcp://a:1"),
            json!({}),
            json!({"key": "/svc/a"}),
            json!({"value": "tcp://a:1"}),
            json!({"key": "/svc/a", "value": ""}),
            json!({"key": "/svc/a", "value": 7}),
            json!({"node": null}),
            json!({"errorCode": 100, "message": "Key not found"}),
        ] {
            assert!(
                extract(&TreeNode::from_json(&payload)).is_empty(),
                "expected no members from {payload}"
            );
        }
    }
}
