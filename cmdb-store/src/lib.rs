//! CMDB Store
//!
//! Storage contract for the CMDB upgrader: schema-less documents, tables,
//! physical indexes (optionally unique and partial), and paged queries.
//!
//! # Layout
//!
//! - [`traits::Datastore`] - the engine contract
//! - [`memory::MemoryDatastore`] - in-memory engine used by tests and dry runs
//! - [`index::Index`] - physical index descriptor
//! - [`document`] - document and filter helpers

pub mod document;
pub mod error;
pub mod index;
pub mod memory;
pub mod traits;

pub use document::{doc, Document, ID_FIELD};
pub use error::{StoreError, StoreResult};
pub use index::{Index, IndexKey, IDENTITY_INDEX_NAME};
pub use memory::{MemoryDatastore, MemoryStoreConfig};
pub use traits::{Datastore, FindQuery, PageCursor};
