//! Field schema registry and path-keyed records.
//!
//! The schema is data, not a fixed type hierarchy: a runtime-loaded ordered
//! list of field descriptors with path-based lookup, so mandatory flags and
//! signal hints can be customized per deployment without code changes.
//! Loaded once at startup and immutable for the process lifetime.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Primitive type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Date,
    Time,
    Number,
    Enum,
    List,
}

/// Normalizer signal kind that may gap-fill a field (see `signals.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Date,
    Time,
    Phone,
    Amount,
    Offense,
}

/// A single field definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Dotted path locating the value, e.g. `complainant.phone`.
    pub path: String,
    /// Human-readable label for forms and reports.
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Allowed values for `enum` fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default)]
    pub mandatory: bool,
    /// Which normalizer signal may fill this field when extraction leaves it empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalKind>,
}

/// On-disk schema document.
#[derive(Deserialize)]
struct SchemaDoc {
    fields: Vec<FieldDef>,
}

/// Process-wide field schema. Read-only after load, safe to share via `Arc`.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<FieldDef>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// Load a schema from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        let schema = Self::from_json(&content)?;
        tracing::info!(
            "Loaded schema: {} fields ({} mandatory) from {:?}",
            schema.fields.len(),
            schema.mandatory_fields().len(),
            path
        );
        Ok(schema)
    }

    /// Parse and validate a schema from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, SchemaError> {
        let doc: SchemaDoc = serde_json::from_str(content)?;

        if doc.fields.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut index = HashMap::new();
        for (i, field) in doc.fields.iter().enumerate() {
            if index.insert(field.path.clone(), i).is_some() {
                return Err(SchemaError::DuplicatePath(field.path.clone()));
            }
            if field.field_type == FieldType::Enum && field.options.is_empty() {
                return Err(SchemaError::EmptyEnum(field.path.clone()));
            }
            if field.mandatory && field.field_type == FieldType::List {
                return Err(SchemaError::MandatoryList(field.path.clone()));
            }
        }

        // A path that is a dot-prefix of another declared path is a container;
        // mandatory fields must be leaf scalars.
        for field in &doc.fields {
            if !field.mandatory {
                continue;
            }
            let prefix = format!("{}.", field.path);
            if doc.fields.iter().any(|f| f.path.starts_with(&prefix)) {
                return Err(SchemaError::MandatoryContainer(field.path.clone()));
            }
        }

        Ok(Self {
            fields: doc.fields,
            index,
        })
    }

    /// All field definitions in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Look up a field definition by path.
    pub fn field(&self, path: &str) -> Option<&FieldDef> {
        self.index.get(path).map(|&i| &self.fields[i])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Paths of all mandatory fields, in declaration order.
    pub fn mandatory_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.mandatory)
            .map(|f| f.path.as_str())
            .collect()
    }
}

/// Sparse path-keyed record. `BTreeMap` keeps iteration deterministic for
/// exports and tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub BTreeMap<String, serde_json::Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&serde_json::Value> {
        self.0.get(path)
    }

    pub fn set(&mut self, path: &str, value: serde_json::Value) {
        self.0.insert(path.to_string(), value);
    }

    /// A path counts as missing when it is absent, null, an empty or
    /// whitespace-only string, or an empty list.
    pub fn is_missing(&self, path: &str) -> bool {
        match self.0.get(path) {
            None => true,
            Some(value) => value_is_empty(value),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

/// Emptiness rule shared by the validator and the signal gap-fill policy.
pub fn value_is_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
