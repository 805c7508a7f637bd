// YAML emitter
// Receives the inverse of the reader's event sequence and renders it

use crate::error::{ParseError, ParseResult};
use crate::yaml::reader::Value;

use std::collections::BTreeMap;

enum Frame {
    Mapping {
        map: serde_yaml::Mapping,
        key: Option<String>,
    },
    Sequence(Vec<serde_yaml::Value>),
}

/// Event-driven YAML writer.
///
/// Converters call `mapping_start`/`scalar`/`mapping_end` (and the sequence
/// counterparts) in document order; the writer assembles an order-preserving
/// `serde_yaml::Value` and renders it with `serde_yaml`.
#[derive(Default)]
pub struct YamlWriter {
    stack: Vec<Frame>,
    root: Option<serde_yaml::Value>,
}

impl YamlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mapping_start(&mut self) {
        self.stack.push(Frame::Mapping {
            map: serde_yaml::Mapping::new(),
            key: None,
        });
    }

    pub fn mapping_end(&mut self) {
        if let Some(Frame::Mapping { map, .. }) = self.stack.pop() {
            self.push_value(serde_yaml::Value::Mapping(map));
        }
    }

    pub fn sequence_start(&mut self) {
        self.stack.push(Frame::Sequence(Vec::new()));
    }

    pub fn sequence_end(&mut self) {
        if let Some(Frame::Sequence(items)) = self.stack.pop() {
            self.push_value(serde_yaml::Value::Sequence(items));
        }
    }

    /// Emit a scalar. Inside a mapping, scalars alternate between key and value.
    pub fn scalar(&mut self, value: impl Into<String>) {
        let value = value.into();
        if let Some(Frame::Mapping { key: key @ None, .. }) = self.stack.last_mut() {
            *key = Some(value);
            return;
        }
        self.push_value(serde_yaml::Value::String(value));
    }

    /// Emit a key followed by a scalar value
    pub fn entry(&mut self, key: &str, value: impl Into<String>) {
        self.scalar(key);
        self.scalar(value);
    }

    fn push_value(&mut self, value: serde_yaml::Value) {
        match self.stack.last_mut() {
            None => self.root = Some(value),
            Some(Frame::Sequence(items)) => items.push(value),
            Some(Frame::Mapping { map, key }) => match key.take() {
                Some(k) => {
                    map.insert(serde_yaml::Value::String(k), value);
                }
                None => {
                    // Non-scalar keys never come from the converters; keep
                    // the value reachable under its rendered form.
                    let rendered = serde_yaml::to_string(&value).unwrap_or_default();
                    *key = Some(rendered.trim_end().to_string());
                }
            },
        }
    }

    // =========================================================================
    // Object graph writers
    // =========================================================================

    pub fn write_mapping(&mut self, value: &BTreeMap<String, Value>) {
        self.mapping_start();
        for (key, item) in value {
            self.scalar(key.as_str());
            self.write_value(item);
        }
        self.mapping_end();
    }

    pub fn write_string_map(&mut self, value: &BTreeMap<String, String>) {
        self.write_string_pairs(value.iter());
    }

    pub fn write_string_pairs<'a>(&mut self, pairs: impl Iterator<Item = (&'a String, &'a String)>) {
        self.mapping_start();
        for (key, item) in pairs {
            self.entry(key, item.as_str());
        }
        self.mapping_end();
    }

    pub fn write_sequence(&mut self, value: &[Value]) {
        self.sequence_start();
        for item in value {
            self.write_value(item);
        }
        self.sequence_end();
    }

    pub fn write_strings(&mut self, value: &[String]) {
        self.sequence_start();
        for item in value {
            self.scalar(item.as_str());
        }
        self.sequence_end();
    }

    pub fn write_value(&mut self, value: &Value) {
        match value {
            Value::String(s) => self.scalar(s.as_str()),
            Value::Sequence(items) => self.write_sequence(items),
            Value::Mapping(map) => self.write_mapping(map),
        }
    }

    /// The assembled document, `Null` when nothing was written
    pub fn finish(self) -> serde_yaml::Value {
        self.root.unwrap_or(serde_yaml::Value::Null)
    }

    pub fn into_string(self) -> ParseResult<String> {
        serde_yaml::to_string(&self.finish())
            .map_err(|e| ParseError::validation(format!("Failed to render YAML: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yaml::YamlReader;

    #[test]
    fn test_writer_preserves_order() {
        let mut writer = YamlWriter::new();
        writer.mapping_start();
        writer.entry("script", "echo hi");
        writer.entry("name", "greet");
        writer.mapping_end();

        let text = writer.into_string().unwrap();
        assert_eq!(text, "script: echo hi\nname: greet\n");
    }

    #[test]
    fn test_writer_nested_sequence() {
        let mut writer = YamlWriter::new();
        writer.mapping_start();
        writer.scalar("steps");
        writer.sequence_start();
        writer.mapping_start();
        writer.entry("bash", "make");
        writer.mapping_end();
        writer.sequence_end();
        writer.mapping_end();

        let text = writer.into_string().unwrap();
        assert_eq!(text, "steps:\n- bash: make\n");
    }

    #[test]
    fn test_write_mapping_reads_back() {
        let mut r = YamlReader::new("a: x\nb:\n  - 1\n  - c: d\n").unwrap();
        let original = r.read_mapping(1).unwrap();

        let mut writer = YamlWriter::new();
        writer.write_mapping(&original);
        let text = writer.into_string().unwrap();

        let mut r = YamlReader::new(&text).unwrap();
        assert_eq!(r.read_mapping(1).unwrap(), original);
    }

    #[test]
    fn test_boolean_like_strings_are_quoted() {
        let mut writer = YamlWriter::new();
        writer.mapping_start();
        writer.entry("enabled", "false");
        writer.mapping_end();

        let text = writer.into_string().unwrap();
        let mut r = YamlReader::new(&text).unwrap();
        r.expect_mapping_start().unwrap();
        r.expect_scalar().unwrap();
        assert!(!r.read_boolean().unwrap());
    }

    #[test]
    fn test_empty_writer_is_null() {
        assert_eq!(YamlWriter::new().finish(), serde_yaml::Value::Null);
    }
}
