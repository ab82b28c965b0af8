//! Unique constraint translation
//!
//! A logical unique constraint names attribute IDs. The storage engine needs
//! field names, and because documents are schema-less the uniqueness must be
//! restricted to documents whose fields carry the expected type. Otherwise
//! rows written before a field existed (or with a legacy type) would collide.

use cmdb_store::document::TYPE_OPERATOR;
use cmdb_store::{Document, Index};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;

use crate::error::{UpgradeError, UpgradeResult};
use crate::metadata::{Attribute, ObjectUnique, PropertyType};

/// Name prefix of translated unique indexes
pub const UNIQUE_INDEX_PREFIX: &str = "bkcc_unique_";

/// Physical type a predicate checks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateType {
    String,
    Number,
}

impl PredicateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
        }
    }

    /// Predicate type for an attribute type; `None` when the type cannot
    /// back a unique index
    pub fn for_property(property_type: &PropertyType) -> Option<Self> {
        match property_type {
            PropertyType::SingleChar | PropertyType::Enum | PropertyType::Date | PropertyType::List => {
                Some(Self::String)
            }
            PropertyType::Int | PropertyType::Float => Some(Self::Number),
            _ => None,
        }
    }
}

impl fmt::Display for PredicateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type that is known to disagree with stored data
#[derive(Debug, Clone, PartialEq)]
pub struct TypeOverride {
    pub object_id: &'static str,
    pub property_id: &'static str,
    pub effective_type: PropertyType,
}

/// Legacy host fields: the cloud ID is declared as a foreign key but stored
/// as an integer, and the IP/operator fields hold lists of strings.
pub const TYPE_OVERRIDES: &[TypeOverride] = &[
    TypeOverride {
        object_id: "host",
        property_id: "bk_cloud_id",
        effective_type: PropertyType::Int,
    },
    TypeOverride {
        object_id: "host",
        property_id: "bk_host_innerip",
        effective_type: PropertyType::List,
    },
    TypeOverride {
        object_id: "host",
        property_id: "bk_host_outerip",
        effective_type: PropertyType::List,
    },
    TypeOverride {
        object_id: "host",
        property_id: "operator",
        effective_type: PropertyType::List,
    },
    TypeOverride {
        object_id: "host",
        property_id: "bk_bak_operator",
        effective_type: PropertyType::List,
    },
];

/// Type used for index translation after overrides
pub fn effective_type<'a>(object_id: &str, attribute: &'a Attribute) -> &'a PropertyType {
    TYPE_OVERRIDES
        .iter()
        .find(|o| o.object_id == object_id && o.property_id == attribute.property_id)
        .map(|o| &o.effective_type)
        .unwrap_or(&attribute.property_type)
}

/// Index name for a constraint
pub fn unique_index_name(unique_id: u64) -> String {
    format!("{}{}", UNIQUE_INDEX_PREFIX, unique_id)
}

/// Translate a logical unique constraint into a partial unique index
pub fn translate(unique: &ObjectUnique, attributes: &HashMap<u64, Attribute>) -> UpgradeResult<Index> {
    let mut fields = Vec::with_capacity(unique.keys.len());
    let mut predicate = Document::new();

    for key in &unique.keys {
        let attribute = attributes.get(&key.id).ok_or_else(|| UpgradeError::MissingAttribute {
            object_id: unique.object_id.clone(),
            unique_id: unique.id,
            attribute_id: key.id,
        })?;

        let property_type = effective_type(&unique.object_id, attribute);
        let physical = PredicateType::for_property(property_type).ok_or_else(|| {
            UpgradeError::UnsupportedPropertyType {
                object_id: unique.object_id.clone(),
                unique_id: unique.id,
                property_id: attribute.property_id.clone(),
                property_type: property_type.to_string(),
            }
        })?;

        fields.push(attribute.property_id.as_str());
        predicate.insert(attribute.property_id.clone(), type_check(physical));
    }

    Ok(Index::new(unique_index_name(unique.id), &fields)
        .unique()
        .background()
        .with_partial_filter(predicate))
}

fn type_check(physical: PredicateType) -> Value {
    json!({ TYPE_OPERATOR: physical.as_str() })
}
