//! Metadata Reader
//!
//! Read-only access to object, attribute and logical uniqueness definitions.

use cmdb_store::{doc, Datastore, Document, FindQuery};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{UpgradeError, UpgradeResult};
use crate::tables::{
    ATTRIBUTE_TABLE, BIZ_ID_FIELD, OBJECT_TABLE, OBJECT_UNIQUE_TABLE, OBJ_ID_FIELD, OWNER_ID_FIELD,
};

/// Object definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDef {
    /// Object ID
    #[serde(rename = "bk_obj_id")]
    pub object_id: String,
    /// Predefined (built-in) object
    #[serde(rename = "ispre", default)]
    pub is_predefined: bool,
    /// Tenant
    #[serde(rename = "bk_supplier_account", default)]
    pub owner_id: String,
}

impl ObjectDef {
    /// Tenant, or `fallback` when the definition has none
    pub fn owner_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.owner_id.is_empty() {
            fallback
        } else {
            &self.owner_id
        }
    }
}

/// Declared attribute type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PropertyType {
    SingleChar,
    LongChar,
    Int,
    Float,
    Enum,
    Date,
    Time,
    User,
    TimeZone,
    Bool,
    List,
    Organization,
    ForeignKey,
    Other(String),
}

impl PropertyType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SingleChar => "singlechar",
            Self::LongChar => "longchar",
            Self::Int => "int",
            Self::Float => "float",
            Self::Enum => "enum",
            Self::Date => "date",
            Self::Time => "time",
            Self::User => "objuser",
            Self::TimeZone => "timezone",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Organization => "organization",
            Self::ForeignKey => "foreignkey",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for PropertyType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "singlechar" => Self::SingleChar,
            "longchar" => Self::LongChar,
            "int" => Self::Int,
            "float" => Self::Float,
            "enum" => Self::Enum,
            "date" => Self::Date,
            "time" => Self::Time,
            "objuser" => Self::User,
            "timezone" => Self::TimeZone,
            "bool" => Self::Bool,
            "list" => Self::List,
            "organization" => Self::Organization,
            "foreignkey" => Self::ForeignKey,
            _ => Self::Other(s),
        }
    }
}

impl From<PropertyType> for String {
    fn from(t: PropertyType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Numeric attribute ID, referenced by unique constraints
    pub id: u64,
    /// Owning object
    #[serde(rename = "bk_obj_id", default)]
    pub object_id: String,
    /// Field name in instance documents
    #[serde(rename = "bk_property_id")]
    pub property_id: String,
    /// Declared type
    #[serde(rename = "bk_property_type")]
    pub property_type: PropertyType,
    /// Business scope; 0 for public attributes
    #[serde(rename = "bk_biz_id", default)]
    pub biz_id: i64,
}

impl Attribute {
    /// Public attributes apply to every business
    pub fn is_public(&self) -> bool {
        self.biz_id == 0
    }
}

/// One key of a logical unique constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueKey {
    #[serde(rename = "key_kind")]
    pub kind: String,
    #[serde(rename = "key_id")]
    pub id: u64,
}

/// Logical unique constraint over attribute IDs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectUnique {
    pub id: u64,
    #[serde(rename = "bk_obj_id")]
    pub object_id: String,
    #[serde(default)]
    pub must_check: bool,
    pub keys: Vec<UniqueKey>,
    #[serde(rename = "ispre", default)]
    pub is_predefined: bool,
    #[serde(rename = "bk_supplier_account", default)]
    pub owner_id: String,
}

impl ObjectUnique {
    /// Order-insensitive identity of the constraint's key set
    pub fn identity(&self) -> BTreeSet<(&str, u64)> {
        self.keys.iter().map(|k| (k.kind.as_str(), k.id)).collect()
    }
}

/// Keep the lowest-ID constraint of every identity
pub fn dedup_uniques(mut uniques: Vec<ObjectUnique>) -> Vec<ObjectUnique> {
    uniques.sort_by_key(|u| u.id);
    let mut kept: Vec<ObjectUnique> = Vec::with_capacity(uniques.len());
    for unique in uniques {
        if let Some(first) = kept.iter().find(|k| k.identity() == unique.identity()) {
            warn!(
                object_id = %unique.object_id,
                kept = first.id,
                dropped = unique.id,
                "Duplicate unique constraint ignored"
            );
            continue;
        }
        kept.push(unique);
    }
    kept
}

fn decode<T: DeserializeOwned>(table: &str, row: Document) -> UpgradeResult<T> {
    serde_json::from_value(Value::Object(row))
        .map_err(|e| UpgradeError::metadata(format!("malformed row in {}: {}", table, e)))
}

/// Reads metadata tables
pub struct MetadataReader {
    store: Arc<dyn Datastore>,
}

impl MetadataReader {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Every object definition, ordered by object ID
    pub async fn list_objects(&self) -> UpgradeResult<Vec<ObjectDef>> {
        let query = FindQuery::all()
            .sort_by(OBJ_ID_FIELD)
            .fields(&[OBJ_ID_FIELD, "ispre", OWNER_ID_FIELD]);
        let rows = self.store.find(OBJECT_TABLE, &query).await?;
        rows.into_iter().map(|row| decode(OBJECT_TABLE, row)).collect()
    }

    /// Public attributes of an object keyed by attribute ID
    pub async fn attributes(&self, object_id: &str) -> UpgradeResult<HashMap<u64, Attribute>> {
        let query = FindQuery::new(doc(json!({ OBJ_ID_FIELD: object_id }))).fields(&[
            "id",
            OBJ_ID_FIELD,
            "bk_property_id",
            "bk_property_type",
            BIZ_ID_FIELD,
        ]);
        let rows = self.store.find(ATTRIBUTE_TABLE, &query).await?;

        let mut attributes = HashMap::with_capacity(rows.len());
        for row in rows {
            let attribute: Attribute = decode(ATTRIBUTE_TABLE, row)?;
            if attribute.is_public() {
                attributes.insert(attribute.id, attribute);
            }
        }
        debug!(object_id = %object_id, count = attributes.len(), "Loaded attributes");
        Ok(attributes)
    }

    /// Unique constraints of an object, deduplicated by key set
    pub async fn uniques(&self, object_id: &str) -> UpgradeResult<Vec<ObjectUnique>> {
        let query = FindQuery::new(doc(json!({ OBJ_ID_FIELD: object_id })));
        let rows = self.store.find(OBJECT_UNIQUE_TABLE, &query).await?;
        let uniques = rows
            .into_iter()
            .map(|row| decode(OBJECT_UNIQUE_TABLE, row))
            .collect::<UpgradeResult<Vec<ObjectUnique>>>()?;
        Ok(dedup_uniques(uniques))
    }
}
