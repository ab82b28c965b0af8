//! Physical index descriptors

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::document::{Document, ID_FIELD};

/// Name of the identity index every table keeps
pub const IDENTITY_INDEX_NAME: &str = "_id_";

/// One key of an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    /// Indexed field
    pub field: String,
    /// 1 for ascending, -1 for descending
    pub direction: i32,
}

impl IndexKey {
    /// Ascending key on a field
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: 1,
        }
    }
}

/// Physical index descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// Index name, unique per table
    pub name: String,
    /// Ordered key list
    pub keys: Vec<IndexKey>,
    /// Uniqueness flag
    #[serde(default)]
    pub unique: bool,
    /// Build without blocking reads
    #[serde(default)]
    pub background: bool,
    /// Restricts the index (and its uniqueness) to matching documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_filter: Option<Document>,
}

impl Index {
    /// Create a non-unique ascending index over the given fields
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            keys: fields.iter().map(|f| IndexKey::asc(*f)).collect(),
            unique: false,
            background: false,
            partial_filter: None,
        }
    }

    /// The identity index the store creates with every table
    pub fn identity() -> Self {
        Self::new(IDENTITY_INDEX_NAME, &[ID_FIELD]).unique()
    }

    /// Mark unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Build in background
    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    /// Attach a partial filter
    pub fn with_partial_filter(mut self, filter: Document) -> Self {
        self.partial_filter = Some(filter);
        self
    }

    /// Field names in key order
    pub fn field_names(&self) -> Vec<&str> {
        self.keys.iter().map(|k| k.field.as_str()).collect()
    }

    /// Field names irrespective of order
    pub fn field_set(&self) -> BTreeSet<&str> {
        self.keys.iter().map(|k| k.field.as_str()).collect()
    }

    /// Same set of indexed fields, ignoring order and name
    pub fn same_fields(&self, other: &Index) -> bool {
        self.field_set() == other.field_set()
    }

    /// Same key pattern, uniqueness and predicate; name and build options
    /// ignored
    pub fn equivalent(&self, other: &Index) -> bool {
        self.keys == other.keys
            && self.unique == other.unique
            && self.partial_filter == other.partial_filter
    }

    /// True for an index whose only key is the identity field
    pub fn is_identity(&self) -> bool {
        self.keys.len() == 1 && self.keys[0].field == ID_FIELD
    }
}
