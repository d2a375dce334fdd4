//! Node boundary shared by the input pipeline and the sampling scheduler
//!
//! Both subsystems only ever talk to the outside world through [`NodeStore`]:
//!
//! ```text
//! stick-input thread ──┐
//!                      ├──► NodeStore::is_subscribed / publish ──► broker layer
//! sampling scheduler ──┘         NodeStore::get_value (fast interval)
//! ```
//!
//! Subscription state is advisory. A value published a moment after the last
//! subscriber left is harmless and nothing here tries to prevent it.

pub mod node_tree;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use node_tree::{Node, NodeError, NodeTree, NodeType, NodeUpdate};

/// Well-known node paths
pub mod paths {
    pub const TEMPERATURE: &str = "/temperature";
    pub const HUMIDITY: &str = "/humidity";
    pub const PRESSURE: &str = "/pressure";

    pub const GYROSCOPE: &str = "/gyroscope";
    pub const GYROSCOPE_PITCH: &str = "/gyroscope/pitch";
    pub const GYROSCOPE_ROLL: &str = "/gyroscope/roll";
    pub const GYROSCOPE_YAW: &str = "/gyroscope/yaw";

    pub const ACCELEROMETER: &str = "/accelerometer";
    pub const ACCELEROMETER_PITCH: &str = "/accelerometer/pitch";
    pub const ACCELEROMETER_ROLL: &str = "/accelerometer/roll";
    pub const ACCELEROMETER_YAW: &str = "/accelerometer/yaw";

    pub const COMPASS: &str = "/compass";

    pub const STICK: &str = "/stick";

    pub const CONFIG: &str = "/config";
    /// Fast sampling cycle interval in seconds
    pub const FAST_INTERVAL: &str = "/config/fast_interval";
}

/// Value carried by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Number(_) => None,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Minimal view of the node/broker layer the core depends on
///
/// Implementations must tolerate concurrent calls from the input thread and the
/// scheduler thread. `publish` is fire-and-forget: no acknowledgement, no
/// backpressure.
pub trait NodeStore: Send + Sync {
    /// Whether at least one consumer currently watches `path`
    fn is_subscribed(&self, path: &str) -> bool;

    /// Current value held by `path`, if the node exists and has one
    fn get_value(&self, path: &str) -> Option<Value>;

    /// Push a new value to `path`
    fn publish(&self, path: &str, value: Value);
}

/// Publishes `value` only when `path` has a subscriber. Returns whether it did.
pub fn publish_if_subscribed(store: &dyn NodeStore, path: &str, value: impl Into<Value>) -> bool {
    if store.is_subscribed(path) {
        store.publish(path, value.into());
        true
    } else {
        false
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{NodeStore, Value};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Store double that records every publish call
    #[derive(Default)]
    pub struct RecordingStore {
        subscribed: Mutex<HashSet<String>>,
        values: Mutex<HashMap<String, Value>>,
        published: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingStore {
        pub fn subscribed_to(paths: &[&str]) -> Self {
            let store = Self::default();
            for path in paths {
                store.subscribe(path);
            }
            store
        }

        pub fn subscribe(&self, path: &str) {
            self.subscribed.lock().unwrap().insert(path.to_string());
        }

        pub fn set(&self, path: &str, value: Value) {
            self.values.lock().unwrap().insert(path.to_string(), value);
        }

        pub fn published(&self) -> Vec<(String, Value)> {
            self.published.lock().unwrap().clone()
        }

        pub fn publish_count(&self, path: &str) -> usize {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == path)
                .count()
        }
    }

    impl NodeStore for RecordingStore {
        fn is_subscribed(&self, path: &str) -> bool {
            self.subscribed.lock().unwrap().contains(path)
        }

        fn get_value(&self, path: &str) -> Option<Value> {
            self.values.lock().unwrap().get(path).cloned()
        }

        fn publish(&self, path: &str, value: Value) {
            self.published
                .lock()
                .unwrap()
                .push((path.to_string(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingStore;
    use super::*;

    #[test]
    fn publish_if_subscribed_skips_unwatched_nodes() {
        let store = RecordingStore::subscribed_to(&[paths::TEMPERATURE]);

        assert!(publish_if_subscribed(&store, paths::TEMPERATURE, 21.5));
        assert!(!publish_if_subscribed(&store, paths::HUMIDITY, 40.0));

        assert_eq!(
            store.published(),
            vec![(paths::TEMPERATURE.to_string(), Value::Number(21.5))]
        );
    }

    #[test]
    fn value_accessors() {
        assert_eq!(Value::from(0.05).as_f64(), Some(0.05));
        assert_eq!(Value::from("DOWN").as_str(), Some("DOWN"));
        assert_eq!(Value::from("DOWN").as_f64(), None);
        assert_eq!(Value::from(2.0).to_string(), "2");
    }
}
