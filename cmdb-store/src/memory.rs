//! In-Memory Datastore
//!
//! A document engine held behind a `tokio::sync::RwLock`. It enforces the
//! index rules the upgrader depends on: a per-table index limit, unique
//! indexes restricted by partial filters, and conflict detection for
//! indexes that share a name or a key pattern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{compare_values, matches_filter, Document, ID_FIELD, TYPE_OPERATOR};
use crate::error::{StoreError, StoreResult};
use crate::index::{Index, IDENTITY_INDEX_NAME};
use crate::traits::{Datastore, FindQuery};

/// In-memory engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Maximum indexes per table, identity index included
    pub max_indexes_per_table: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_indexes_per_table: 64,
        }
    }
}

#[derive(Debug, Default)]
struct Table {
    documents: Vec<Document>,
    indexes: Vec<Index>,
}

impl Table {
    fn new() -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![Index::identity()],
        }
    }

    /// Check `candidate` against every unique index, ignoring the document
    /// at `skip` (the one being replaced)
    fn check_unique(&self, name: &str, candidate: &Document, skip: Option<usize>) -> StoreResult<()> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            if !participates(index, candidate) {
                continue;
            }
            let wanted = index_keys(index, candidate);
            let clash = self
                .documents
                .iter()
                .enumerate()
                .filter(|(pos, _)| Some(*pos) != skip)
                .filter(|(_, existing)| participates(index, existing))
                .any(|(_, existing)| !index_keys(index, existing).is_disjoint(&wanted));
            if clash {
                return Err(duplicate_key(name, index));
            }
        }
        Ok(())
    }
}

/// In-memory datastore
pub struct MemoryDatastore {
    config: MemoryStoreConfig,
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryDatastore {
    /// Create an empty store with default limits
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Create an empty store
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

fn participates(index: &Index, document: &Document) -> bool {
    index
        .partial_filter
        .as_ref()
        .map_or(true, |filter| matches_filter(document, filter))
}

fn canonical(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("n:{}", f as i64),
            _ => format!("n:{}", n),
        },
        other => other.to_string(),
    }
}

/// Key tuples a document contributes to an index; list values contribute
/// one tuple per element
fn index_keys(index: &Index, document: &Document) -> HashSet<String> {
    let mut tuples = vec![String::new()];
    for key in &index.keys {
        let parts: Vec<String> = match document.get(&key.field) {
            Some(Value::Array(items)) if !items.is_empty() => items.iter().map(canonical).collect(),
            Some(value) => vec![canonical(value)],
            None => vec![canonical(&Value::Null)],
        };
        tuples = tuples
            .iter()
            .flat_map(|prefix| parts.iter().map(move |p| format!("{}\u{1f}{}", prefix, p)))
            .collect();
    }
    tuples.into_iter().collect()
}

fn duplicate_key(table: &str, index: &Index) -> StoreError {
    StoreError::DuplicateKey {
        table: table.to_string(),
        index: index.name.clone(),
        keys: index.field_names().iter().map(|f| f.to_string()).collect(),
    }
}

fn new_id() -> Value {
    Value::String(uuid::Uuid::new_v4().simple().to_string())
}

fn project(document: &Document, fields: &[String]) -> Document {
    if fields.is_empty() {
        return document.clone();
    }
    document
        .iter()
        .filter(|(k, _)| k.as_str() == ID_FIELD || fields.iter().any(|f| f == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn sort_position(document: &Document, field: &str) -> (Option<Value>, Option<Value>) {
    (document.get(field).cloned(), document.get(ID_FIELD).cloned())
}

fn compare_positions(a: &(Option<Value>, Option<Value>), b: &(Option<Value>, Option<Value>)) -> Ordering {
    compare_values(a.0.as_ref(), b.0.as_ref()).then_with(|| compare_values(a.1.as_ref(), b.1.as_ref()))
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn has_table(&self, table: &str) -> StoreResult<bool> {
        Ok(self.tables.read().await.contains_key(table))
    }

    async fn create_table(&self, table: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.contains_key(table) {
            return Err(StoreError::TableExists(table.to_string()));
        }
        tables.insert(table.to_string(), Table::new());
        debug!(table = %table, "Table created");
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn indexes(&self, table: &str) -> StoreResult<Vec<Index>> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.indexes.clone())
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    async fn create_index(&self, table: &str, index: &Index) -> StoreResult<()> {
        if index.keys.is_empty() {
            return Err(StoreError::invalid(format!("index {} has no keys", index.name)));
        }

        let mut tables = self.tables.write().await;
        let entry = tables.entry(table.to_string()).or_insert_with(Table::new);

        if let Some(existing) = entry.indexes.iter().find(|i| i.name == index.name) {
            if existing.equivalent(index) {
                return Ok(());
            }
            return Err(StoreError::IndexAlreadyExists {
                table: table.to_string(),
                index: index.name.clone(),
                reason: "an index with this name has a different definition".to_string(),
            });
        }

        if let Some(existing) = entry.indexes.iter().find(|i| i.keys == index.keys) {
            return Err(StoreError::IndexAlreadyExists {
                table: table.to_string(),
                index: index.name.clone(),
                reason: format!("key pattern already indexed by {}", existing.name),
            });
        }

        if entry.indexes.len() >= self.config.max_indexes_per_table {
            return Err(StoreError::IndexLimitExceeded {
                table: table.to_string(),
                max: self.config.max_indexes_per_table,
            });
        }

        if index.unique {
            let mut seen = HashSet::new();
            for document in entry.documents.iter().filter(|d| participates(index, d)) {
                for key in index_keys(index, document) {
                    if !seen.insert(key) {
                        return Err(duplicate_key(table, index));
                    }
                }
            }
        }

        entry.indexes.push(index.clone());
        debug!(table = %table, index = %index.name, unique = index.unique, "Index created");
        Ok(())
    }

    async fn drop_index(&self, table: &str, name: &str) -> StoreResult<()> {
        if name == IDENTITY_INDEX_NAME {
            return Err(StoreError::backend("cannot drop the identity index"));
        }

        let mut tables = self.tables.write().await;
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        let before = entry.indexes.len();
        entry.indexes.retain(|i| i.name != name);
        if entry.indexes.len() == before {
            return Err(StoreError::IndexNotFound {
                table: table.to_string(),
                index: name.to_string(),
            });
        }
        debug!(table = %table, index = %name, "Index dropped");
        Ok(())
    }

    async fn find(&self, table: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        let tables = self.tables.read().await;
        let Some(entry) = tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&Document> = entry
            .documents
            .iter()
            .filter(|d| matches_filter(d, &query.filter))
            .collect();

        let sort_field = match (&query.sort, &query.after) {
            (Some(field), _) => Some(field.as_str()),
            (None, Some(_)) => Some(ID_FIELD),
            (None, None) => None,
        };

        if let Some(field) = sort_field {
            matched.sort_by(|a, b| compare_positions(&sort_position(a, field), &sort_position(b, field)));

            if let Some(cursor) = &query.after {
                let start = (Some(cursor.sort_value.clone()), Some(cursor.id.clone()));
                matched.retain(|d| compare_positions(&sort_position(d, field), &start) == Ordering::Greater);
            }
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .take(limit)
            .map(|d| project(d, &query.fields))
            .collect())
    }

    async fn count(&self, table: &str, filter: &Document) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map(|t| t.documents.iter().filter(|d| matches_filter(d, filter)).count() as u64)
            .unwrap_or(0))
    }

    async fn insert(&self, table: &str, mut document: Document) -> StoreResult<()> {
        document.entry(ID_FIELD.to_string()).or_insert_with(new_id);

        let mut tables = self.tables.write().await;
        let entry = tables.entry(table.to_string()).or_insert_with(Table::new);
        entry.check_unique(table, &document, None)?;
        entry.documents.push(document);
        Ok(())
    }

    async fn upsert(&self, table: &str, filter: &Document, document: Document) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let entry = tables.entry(table.to_string()).or_insert_with(Table::new);

        let position = entry.documents.iter().position(|d| matches_filter(d, filter));
        match position {
            Some(pos) => {
                let mut merged = entry.documents[pos].clone();
                if let (Some(old), Some(new)) = (merged.get(ID_FIELD), document.get(ID_FIELD)) {
                    if old != new {
                        return Err(StoreError::invalid("upsert may not change _id"));
                    }
                }
                merged.extend(document);
                entry.check_unique(table, &merged, Some(pos))?;
                entry.documents[pos] = merged;
            }
            None => {
                let mut created: Document = filter
                    .iter()
                    .filter(|(_, v)| !matches!(v, Value::Object(op) if op.contains_key(TYPE_OPERATOR)))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                created.extend(document);
                created.entry(ID_FIELD.to_string()).or_insert_with(new_id);
                entry.check_unique(table, &created, None)?;
                entry.documents.push(created);
            }
        }
        Ok(())
    }
}
