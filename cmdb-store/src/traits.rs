//! Datastore Trait
//!
//! The storage-engine contract the upgrader is written against. Engines are
//! replaceable; the in-memory engine in [`crate::memory`] implements the
//! same semantics as the document database used in production.

use async_trait::async_trait;
use serde_json::Value;

use crate::document::{Document, ID_FIELD};
use crate::error::StoreResult;
use crate::index::Index;

/// Keyset position of the last document of a page
#[derive(Debug, Clone, PartialEq)]
pub struct PageCursor {
    /// Sort-field value of the last document (`Null` when absent)
    pub sort_value: Value,
    /// Identity of the last document, breaks ties between equal sort values
    pub id: Value,
}

impl PageCursor {
    /// Cursor positioned at `document`
    pub fn from_document(document: &Document, sort_field: &str) -> Self {
        Self {
            sort_value: document.get(sort_field).cloned().unwrap_or(Value::Null),
            id: document.get(ID_FIELD).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Query options for [`Datastore::find`]
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    /// Equality / `$type` filter
    pub filter: Document,
    /// Sort field, ascending; `_id` breaks ties
    pub sort: Option<String>,
    /// Only documents strictly after this position (requires `sort`)
    pub after: Option<PageCursor>,
    /// Maximum number of documents
    pub limit: Option<usize>,
    /// Projection; empty means every field. `_id` is always returned
    pub fields: Vec<String>,
}

impl FindQuery {
    /// Query with a filter
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Query over every document
    pub fn all() -> Self {
        Self::default()
    }

    /// Sort ascending by a field
    pub fn sort_by(mut self, field: &str) -> Self {
        self.sort = Some(field.to_string());
        self
    }

    /// Resume after a cursor
    pub fn after(mut self, cursor: Option<PageCursor>) -> Self {
        self.after = cursor;
        self
    }

    /// Limit result size
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Project fields
    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// Document datastore
///
/// All operations are async and safe to call concurrently.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Check whether a table exists
    async fn has_table(&self, table: &str) -> StoreResult<bool>;

    /// Create a table with its identity index; fails if it exists
    async fn create_table(&self, table: &str) -> StoreResult<()>;

    /// Drop a table and its indexes
    async fn drop_table(&self, table: &str) -> StoreResult<()>;

    /// List table names
    async fn list_tables(&self) -> StoreResult<Vec<String>>;

    /// List a table's indexes, identity index included
    async fn indexes(&self, table: &str) -> StoreResult<Vec<Index>>;

    /// Create an index.
    ///
    /// Fails with `IndexAlreadyExists` when an index of the same name or the
    /// same key pattern is present, and with `DuplicateKey` when existing
    /// documents violate a unique index.
    async fn create_index(&self, table: &str, index: &Index) -> StoreResult<()>;

    /// Drop an index by name
    async fn drop_index(&self, table: &str, name: &str) -> StoreResult<()>;

    /// Find documents; a missing table yields no documents
    async fn find(&self, table: &str, query: &FindQuery) -> StoreResult<Vec<Document>>;

    /// Count documents matching a filter
    async fn count(&self, table: &str, filter: &Document) -> StoreResult<u64>;

    /// Insert a new document, assigning `_id` when absent
    async fn insert(&self, table: &str, document: Document) -> StoreResult<()>;

    /// Update the first document matching `filter` by setting the fields of
    /// `document`, or insert `filter`'s equality fields merged with
    /// `document` when nothing matches. Writing to a missing table creates it.
    async fn upsert(&self, table: &str, filter: &Document, document: Document) -> StoreResult<()>;

    /// Find a single document
    async fn find_one(&self, table: &str, filter: &Document) -> StoreResult<Option<Document>> {
        let query = FindQuery::new(filter.clone()).limit(1);
        Ok(self.find(table, &query).await?.into_iter().next())
    }

    /// Create a table unless it already exists
    async fn create_table_if_missing(&self, table: &str) -> StoreResult<bool> {
        if self.has_table(table).await? {
            return Ok(false);
        }
        match self.create_table(table).await {
            Ok(()) => Ok(true),
            Err(crate::error::StoreError::TableExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
