//! CMDB Upgrader
//!
//! Versioned upgrades of the CMDB's persisted state. The core step splits
//! the monolithic generic instance table (`cc_ObjectBase`) and association
//! table (`cc_InstAsst`) into per-tenant, per-object shards, builds the
//! instance identity mapping, and reconciles every shard's indexes,
//! including partial unique indexes translated from logical uniqueness
//! constraints.
//!
//! # Modules
//!
//! - [`registry`] - step registry and watermark-driven orchestrator
//! - [`reshard`] - the resharding step
//! - [`copier`] - bounded concurrent table copy
//! - [`index`] - unique constraint translation and index reconciliation
//! - [`metadata`] - object, attribute and constraint definitions
//! - [`version`] - version string ordering
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cmdb_store::MemoryDatastore;
//! use cmdb_upgrader::{Orchestrator, StepRegistry, UpgraderConfig};
//!
//! let config = UpgraderConfig::from_env();
//! cmdb_upgrader::telemetry::init_logging(&config.log)?;
//! let orchestrator = Orchestrator::new(Arc::new(MemoryDatastore::new()), StepRegistry::standard()?, config);
//! let report = orchestrator.upgrade().await?;
//! ```

pub mod config;
pub mod copier;
pub mod error;
pub mod index;
pub mod metadata;
pub mod registry;
pub mod reshard;
pub mod tables;
pub mod telemetry;
pub mod version;

pub use config::UpgraderConfig;
pub use copier::{BoundedCopier, CopyStats, SourceQuery};
pub use error::{UpgradeError, UpgradeResult};
pub use index::{IndexReconciler, ReconcileReport};
pub use metadata::{Attribute, MetadataReader, ObjectDef, ObjectUnique, PropertyType};
pub use registry::{Orchestrator, StepRegistry, UpgradeReport, UpgradeStep};
pub use reshard::{InstanceResharder, ReshardPhase, ReshardReport, ReshardStep, RESHARD_VERSION};
pub use telemetry::{init_logging, LogConfig, LogFormat, LogLevel};
pub use version::UpgradeVersion;
