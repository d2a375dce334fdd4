//! In-process node tree
//!
//! Holds the node layout the link exposes (sensor values, joystick keys and the
//! writable fast-interval setting) together with per-node subscriber counts.
//! A broker layer drives `subscribe`/`unsubscribe`/`set_value` and forwards the
//! [`NodeUpdate`]s it receives from [`NodeTree::updates`].

use super::{paths, NodeStore, Value};
use crate::controller::event_processor::{KeyIdentity, KeyState};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum NodeError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node is not writable: {0}")]
    NotWritable(String),

    #[error("Value {value} does not fit node {path}")]
    InvalidValue { path: String, value: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeType {
    /// Parent node without a value of its own
    Group,
    Number,
    Enum(Vec<String>),
}

impl NodeType {
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (NodeType::Group, _) => false,
            (NodeType::Number, Value::Number(_)) => true,
            (NodeType::Enum(variants), Value::Text(s)) => variants.iter().any(|v| v == s),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub display_name: String,
    pub value_type: NodeType,
    pub attributes: BTreeMap<String, String>,
    pub value: Option<Value>,
    pub writable: bool,
    subscribers: usize,
}

impl Node {
    pub fn group(display_name: &str) -> Self {
        Self::new(display_name, NodeType::Group)
    }

    pub fn number(display_name: &str) -> Self {
        Self::new(display_name, NodeType::Number)
    }

    /// Joystick key node, typed `[UP, DOWN]` and starting released
    pub fn key(display_name: &str) -> Self {
        let variants = vec![KeyState::Up.to_string(), KeyState::Down.to_string()];
        Self::new(display_name, NodeType::Enum(variants)).with_value(KeyState::Up.as_str())
    }

    fn new(display_name: &str, value_type: NodeType) -> Self {
        Self {
            display_name: display_name.to_string(),
            value_type,
            attributes: BTreeMap::new(),
            value: None,
            writable: false,
            subscribers: 0,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.attributes.insert("@unit".to_string(), unit.to_string());
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers
    }
}

/// A value change pushed to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub path: String,
    pub value: Value,
}

pub struct NodeTree {
    nodes: RwLock<BTreeMap<String, Node>>,
    updates: broadcast::Sender<NodeUpdate>,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            updates,
        }
    }

    /// Tree with every node the link exposes
    pub fn with_default_nodes(fast_interval_secs: f64) -> Self {
        let tree = Self::new();

        tree.add_node(paths::TEMPERATURE, Node::number("Temperature").with_unit("C"));
        tree.add_node(paths::HUMIDITY, Node::number("Humidity").with_unit("%"));
        tree.add_node(paths::PRESSURE, Node::number("Pressure").with_unit("MB"));

        for (group, display, children) in [
            (
                paths::GYROSCOPE,
                "Gyroscope",
                [paths::GYROSCOPE_PITCH, paths::GYROSCOPE_ROLL, paths::GYROSCOPE_YAW],
            ),
            (
                paths::ACCELEROMETER,
                "Accelerometer",
                [
                    paths::ACCELEROMETER_PITCH,
                    paths::ACCELEROMETER_ROLL,
                    paths::ACCELEROMETER_YAW,
                ],
            ),
        ] {
            tree.add_node(group, Node::group(display));
            for (child, name) in children.into_iter().zip(["Pitch", "Roll", "Yaw"]) {
                tree.add_node(child, Node::number(name));
            }
        }

        tree.add_node(paths::COMPASS, Node::number("Compass"));

        tree.add_node(paths::STICK, Node::group("Stick"));
        for key in KeyIdentity::ALL {
            tree.add_node(key.node_path(), Node::key(key.display_name()));
        }

        tree.add_node(paths::CONFIG, Node::group("Config"));
        tree.add_node(
            paths::FAST_INTERVAL,
            Node::number("Fast Update Interval")
                .with_unit("s")
                .with_value(fast_interval_secs)
                .writable(),
        );

        tree
    }

    pub fn add_node(&self, path: &str, node: Node) {
        debug!("Adding node {} ({})", path, node.display_name);
        self.write_nodes().insert(path.to_string(), node);
    }

    /// Snapshot of a single node
    pub fn node(&self, path: &str) -> Option<Node> {
        self.read_nodes().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.read_nodes().keys().cloned().collect()
    }

    /// Register interest in `path`; returns the new subscriber count
    pub fn subscribe(&self, path: &str) -> Result<usize, NodeError> {
        let mut nodes = self.write_nodes();
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| NodeError::UnknownNode(path.to_string()))?;
        node.subscribers += 1;
        debug!("Subscribed to {} ({} subscribers)", path, node.subscribers);
        Ok(node.subscribers)
    }

    /// Drop one subscriber from `path`; returns the remaining count
    pub fn unsubscribe(&self, path: &str) -> Result<usize, NodeError> {
        let mut nodes = self.write_nodes();
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| NodeError::UnknownNode(path.to_string()))?;
        node.subscribers = node.subscribers.saturating_sub(1);
        debug!("Unsubscribed from {} ({} subscribers)", path, node.subscribers);
        Ok(node.subscribers)
    }

    /// External write, e.g. a broker client changing the fast interval
    pub fn set_value(&self, path: &str, value: Value) -> Result<(), NodeError> {
        let mut nodes = self.write_nodes();
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| NodeError::UnknownNode(path.to_string()))?;
        if !node.writable {
            return Err(NodeError::NotWritable(path.to_string()));
        }
        if !node.value_type.accepts(&value) {
            return Err(NodeError::InvalidValue {
                path: path.to_string(),
                value,
            });
        }
        node.value = Some(value.clone());
        drop(nodes);

        self.notify(path, value);
        Ok(())
    }

    pub fn updates(&self) -> broadcast::Receiver<NodeUpdate> {
        self.updates.subscribe()
    }

    fn notify(&self, path: &str, value: Value) {
        // No receiver simply means no transport is attached right now.
        let _ = self.updates.send(NodeUpdate {
            path: path.to_string(),
            value,
        });
    }

    fn read_nodes(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Node>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_nodes(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Node>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NodeStore for NodeTree {
    fn is_subscribed(&self, path: &str) -> bool {
        self.read_nodes()
            .get(path)
            .is_some_and(|node| node.subscribers > 0)
    }

    fn get_value(&self, path: &str) -> Option<Value> {
        self.read_nodes().get(path).and_then(|node| node.value.clone())
    }

    fn publish(&self, path: &str, value: Value) {
        {
            let mut nodes = self.write_nodes();
            match nodes.get_mut(path) {
                Some(node) => node.value = Some(value.clone()),
                None => {
                    warn!("Dropping value for unknown node {}", path);
                    return;
                }
            }
        }
        trace!("Published {} = {}", path, value);
        self.notify(path, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tree_has_released_keys_and_units() {
        let tree = NodeTree::with_default_nodes(0.05);

        for key in KeyIdentity::ALL {
            assert_eq!(tree.get_value(key.node_path()), Some(Value::from("UP")));
        }
        let temperature = tree.node(paths::TEMPERATURE).unwrap();
        assert_eq!(temperature.attributes.get("@unit").map(String::as_str), Some("C"));
        assert_eq!(tree.get_value(paths::FAST_INTERVAL), Some(Value::Number(0.05)));
        assert!(tree.node(paths::GYROSCOPE_YAW).is_some());
    }

    #[test]
    fn subscription_counts_gate_is_subscribed() {
        let tree = NodeTree::with_default_nodes(0.05);
        assert!(!tree.is_subscribed(paths::COMPASS));

        assert_eq!(tree.subscribe(paths::COMPASS), Ok(1));
        assert_eq!(tree.subscribe(paths::COMPASS), Ok(2));
        assert!(tree.is_subscribed(paths::COMPASS));

        assert_eq!(tree.unsubscribe(paths::COMPASS), Ok(1));
        assert_eq!(tree.unsubscribe(paths::COMPASS), Ok(0));
        assert_eq!(tree.unsubscribe(paths::COMPASS), Ok(0));
        assert!(!tree.is_subscribed(paths::COMPASS));

        assert_eq!(
            tree.subscribe("/nope"),
            Err(NodeError::UnknownNode("/nope".to_string()))
        );
    }

    #[test]
    fn set_value_only_touches_writable_nodes_with_matching_type() {
        let tree = NodeTree::with_default_nodes(0.05);

        tree.set_value(paths::FAST_INTERVAL, Value::Number(1.0)).unwrap();
        assert_eq!(tree.get_value(paths::FAST_INTERVAL), Some(Value::Number(1.0)));

        assert_eq!(
            tree.set_value(paths::TEMPERATURE, Value::Number(3.0)),
            Err(NodeError::NotWritable(paths::TEMPERATURE.to_string()))
        );
        assert!(matches!(
            tree.set_value(paths::FAST_INTERVAL, Value::from("fast")),
            Err(NodeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn publish_updates_value_and_broadcasts() {
        let tree = NodeTree::with_default_nodes(0.05);
        let mut updates = tree.updates();

        tree.publish("/stick/up", Value::from("DOWN"));
        tree.publish("/not/there", Value::Number(1.0));

        assert_eq!(tree.get_value("/stick/up"), Some(Value::from("DOWN")));
        assert_eq!(
            updates.try_recv().unwrap(),
            NodeUpdate {
                path: "/stick/up".to_string(),
                value: Value::from("DOWN"),
            }
        );
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn enum_type_accepts_only_its_variants() {
        let node = Node::key("Up");
        assert!(node.value_type.accepts(&Value::from("DOWN")));
        assert!(!node.value_type.accepts(&Value::from("SIDEWAYS")));
        assert!(!node.value_type.accepts(&Value::Number(1.0)));
    }
}
