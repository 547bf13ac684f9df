//! In-memory cache of the latest value for each dependency.

use dashmap::{DashMap, DashSet};
use tracing::debug;

use crate::dependency::Dep;
use crate::template::Value;

/// Fingerprint-keyed store the templates read from.
///
/// Reads are non-blocking snapshots; writers never hold a lock across an
/// await. `remember` both stores the value and marks the dependency as
/// received, which is what closes a template's dependency set.
#[derive(Debug, Default)]
pub struct Brain {
    data: DashMap<String, Value>,
    received: DashSet<String>,
}

impl Brain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, dep: &Dep, value: Value) {
        debug!("(brain) remembering {}", dep.fingerprint());
        self.data.insert(dep.fingerprint().to_string(), value);
        self.received.insert(dep.fingerprint().to_string());
    }

    /// Snapshot of the latest value, if one was ever received.
    pub fn recall(&self, fingerprint: &str) -> Option<Value> {
        self.data.get(fingerprint).map(|v| v.clone())
    }

    pub fn remembered(&self, fingerprint: &str) -> bool {
        self.received.contains(fingerprint)
    }

    pub fn forget(&self, dep: &Dep) {
        debug!("(brain) forgetting {}", dep.fingerprint());
        self.data.remove(dep.fingerprint());
        self.received.remove(dep.fingerprint());
    }

    /// Stores a value under a raw fingerprint, marking it received.
    /// Used to seed state that did not arrive through a View.
    pub fn force_set(&self, fingerprint: &str, value: Value) {
        debug!("(brain) force-setting {}", fingerprint);
        self.data.insert(fingerprint.to_string(), value);
        self.received.insert(fingerprint.to_string());
    }
}

#[cfg(test)]
mod brain_test {
    use std::sync::Arc;

    use super::*;
    use crate::dependency::KvGet;

    fn dep(path: &str) -> Dep {
        Arc::new(KvGet::new(path, None, None))
    }

    #[test]
    fn test_remember_and_recall() {
        let brain = Brain::new();
        let d = dep("foo");
        assert!(brain.recall(d.fingerprint()).is_none());
        assert!(!brain.remembered(d.fingerprint()));

        brain.remember(&d, Value::from("bar"));
        assert_eq!(brain.recall(d.fingerprint()), Some(Value::from("bar")));
        assert!(brain.remembered(d.fingerprint()));
    }

    #[test]
    fn test_forget_clears_received() {
        let brain = Brain::new();
        let d = dep("foo");
        brain.remember(&d, Value::Null);
        brain.forget(&d);
        assert!(brain.recall(d.fingerprint()).is_none());
        assert!(!brain.remembered(d.fingerprint()));
    }

    #[test]
    fn test_force_set_marks_received() {
        let brain = Brain::new();
        brain.force_set("kv.get|foo", Value::from("seeded"));
        assert!(brain.remembered("kv.get|foo"));
        assert_eq!(brain.recall("kv.get|foo"), Some(Value::from("seeded")));
    }

    #[test]
    fn test_equal_fingerprints_share_one_slot() {
        let brain = Brain::new();
        let a = dep("foo");
        let b = dep("foo");
        brain.remember(&a, Value::from("1"));
        brain.remember(&b, Value::from("2"));
        assert_eq!(brain.recall(a.fingerprint()), Some(Value::from("2")));
    }
}
