// Task inputs
// String map whose keys compare without regard to ASCII case

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;

/// Inputs of a task step. `Script` and `script` name the same input; the
/// spelling seen first is the one written back out.
#[derive(Debug, Clone, Default)]
pub struct TaskInputs {
    entries: BTreeMap<String, (String, String)>,
}

impl TaskInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`. An existing input with the same name keeps its
    /// original spelling.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.get_mut(&key.to_ascii_lowercase()) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.insert(key.to_ascii_lowercase(), (key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.entries.get(&key.to_ascii_lowercase()).map(|(_, value)| value)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(&key.to_ascii_lowercase()).map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Input names as first written
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.values().map(|(key, _)| key)
    }

    /// Entries ordered by lowercased name, keyed by the first spelling
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.values().map(|(key, value)| (key, value))
    }
}

impl PartialEq for TaskInputs {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((a, (_, x)), (b, (_, y)))| a == b && x == y)
    }
}

impl Eq for TaskInputs {}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TaskInputs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut inputs = Self::new();
        inputs.extend(iter);
        inputs
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for TaskInputs {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl Serialize for TaskInputs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
