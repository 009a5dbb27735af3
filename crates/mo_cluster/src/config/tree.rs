use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::util::errors::{Error, Result, StdError};

/// A nested key/value configuration document addressed by paths of keys.
///
/// Merging is receiver-wins: when both trees hold a leaf at the same path the receiver keeps
/// its own value. Precedence therefore follows the receiver. Start from the highest priority
/// mergeable layer, merge lower layers into it, and apply computed values with [`set`] last.
///
/// [`set`]: ConfigTree::set
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigTree(Map<String, Value>);

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::StdError(StdError::InvalidArgument(format!(
                "configuration document must be a table, got {other}"
            )))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replaces the value at `path`, creating intermediate tables. Non-table values found on the
    /// way are replaced by tables. An empty path is a no-op.
    pub fn set(&mut self, path: &[&str], value: impl Into<Value>) {
        let Some((leaf, parents)) = path.split_last() else {
            return;
        };
        let mut node = &mut self.0;
        for key in parents {
            let entry = node
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            node = match entry {
                Value::Object(map) => map,
                _ => unreachable!("entry was just made a table"),
            };
        }
        node.insert(leaf.to_string(), value.into());
    }

    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (leaf, parents) = path.split_last()?;
        let mut node = &self.0;
        for key in parents {
            node = node.get(*key)?.as_object()?;
        }
        node.get(*leaf)
    }

    /// Unions `other` into the receiver. Existing leaves win, tables present on both sides are
    /// merged recursively, and everything only `other` has is copied in.
    pub fn merge(&mut self, other: &ConfigTree) {
        merge_tables(&mut self.0, &other.0);
    }

    /// Serializes the document as TOML.
    pub fn render(&self) -> Result<String> {
        toml::to_string(&self.0).map_err(|e| Error::StdError(StdError::SerializationError(e.to_string())))
    }
}

fn merge_tables(receiver: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        match receiver.get_mut(key) {
            Some(Value::Object(mine)) => {
                if let Value::Object(theirs) = value {
                    merge_tables(mine, theirs);
                }
            }
            Some(_) => {}
            None => {
                receiver.insert(key.clone(), value.clone());
            }
        }
    }
}

impl JsonSchema for ConfigTree {
    fn schema_name() -> String {
        "ConfigTree".to_string()
    }

    fn is_referenceable() -> bool {
        false
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        serde_json::from_value(serde_json::json!({
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true,
        }))
        .expect("static schema is valid")
    }
}
