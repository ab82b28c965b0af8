//! Instance Resharding
//!
//! Splits the monolithic instance and association tables into per-tenant,
//! per-object shards.
//!
//! # Phases
//!
//! 1. **ListObjects**: read every object definition
//! 2. **CreateTables**: association shard for every object, instance shard
//!    for every object without a fixed table, identity mapping table
//! 3. **CreateIndexes**: structural and translated unique indexes
//! 4. **CopyInstances**: instance rows into shards, one mapping row each
//! 5. **CopyAssociations**: association rows into both endpoint shards
//!
//! Every write is an upsert keyed by stable identity. A failed run leaves
//! partially converged state that the next run completes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cmdb_store::document::display_value;
use cmdb_store::{doc, Datastore, Document, StoreError, StoreResult, ID_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::UpgraderConfig;
use crate::copier::{BoundedCopier, CopyStats, SourceQuery};
use crate::error::{UpgradeError, UpgradeResult};
use crate::index::defaults::{association_indexes, instance_indexes, mapping_indexes};
use crate::index::{translate, IndexReconciler, ReconcileReport};
use crate::metadata::{MetadataReader, ObjectDef};
use crate::registry::UpgradeStep;
use crate::tables::{
    association_table, builtin_instance_table, instance_table, ASSOCIATION_ID_FIELD, ASST_OBJ_ID_FIELD,
    INST_ASST_TABLE, INST_ID_FIELD, OBJECT_BASE_MAPPING_TABLE, OBJECT_BASE_TABLE, OBJ_ID_FIELD,
    OWNER_ID_FIELD,
};

/// Version at which the instance tables were sharded
pub const RESHARD_VERSION: &str = "y3.10.202104221702";

// ============================================================================
// Run State
// ============================================================================

/// Resharding phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReshardPhase {
    #[default]
    Created,
    ListObjects,
    CreateTables,
    CreateIndexes,
    CopyInstances,
    CopyAssociations,
    Done,
    Failed,
}

/// Recorded phase change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: ReshardPhase,
    pub to: ReshardPhase,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one resharding run
#[derive(Debug, Clone, Serialize)]
pub struct ReshardReport {
    /// Current phase
    pub phase: ReshardPhase,
    /// Started at
    pub started_at: DateTime<Utc>,
    /// Finished at (success or failure)
    pub finished_at: Option<DateTime<Utc>>,
    /// Phase history
    pub transitions: Vec<PhaseTransition>,
    /// Object definitions processed
    pub objects: usize,
    /// Tables this run created
    pub tables_created: Vec<String>,
    /// Per-table index reconciliation
    pub indexes: Vec<ReconcileReport>,
    /// Instance copy counts
    pub instances: CopyStats,
    /// Association copy counts
    pub associations: CopyStats,
    /// Error message (if failed)
    pub error_message: Option<String>,
}

impl ReshardReport {
    fn new() -> Self {
        Self {
            phase: ReshardPhase::Created,
            started_at: Utc::now(),
            finished_at: None,
            transitions: Vec::new(),
            objects: 0,
            tables_created: Vec::new(),
            indexes: Vec::new(),
            instances: CopyStats::default(),
            associations: CopyStats::default(),
            error_message: None,
        }
    }

    /// Transition to next phase
    pub fn transition_to(&mut self, phase: ReshardPhase) {
        let from = self.phase;
        self.phase = phase;
        self.transitions.push(PhaseTransition {
            from,
            to: phase,
            timestamp: Utc::now(),
        });
        info!(from = ?from, to = ?phase, "Resharding phase");
    }

    pub fn is_complete(&self) -> bool {
        self.phase == ReshardPhase::Done
    }
}

// ============================================================================
// Record Delivery
// ============================================================================

/// Upsert, retrying once when the only conflict is on the index backing the
/// upsert filter. That conflict means a concurrent writer inserted the same
/// identity first, so the retry turns into an update.
pub async fn upsert_idempotent(
    store: &dyn Datastore,
    table: &str,
    filter: &Document,
    document: Document,
) -> StoreResult<()> {
    match store.upsert(table, filter, document.clone()).await {
        Err(StoreError::DuplicateKey { index, keys, .. })
            if !keys.is_empty() && keys.iter().all(|k| filter.contains_key(k)) =>
        {
            debug!(table = %table, index = %index, "Upsert raced on its own key, retrying");
            store.upsert(table, filter, document).await
        }
        other => other,
    }
}

fn record_owner(record: &Document, fallback: &str) -> String {
    let owner = display_value(record.get(OWNER_ID_FIELD));
    if owner.is_empty() {
        fallback.to_string()
    } else {
        owner
    }
}

fn required(record: &Document, field: &str, table: &str) -> UpgradeResult<String> {
    let value = display_value(record.get(field));
    if value.is_empty() {
        return Err(UpgradeError::metadata(format!(
            "record {} in {} has no {}",
            display_value(record.get(ID_FIELD)),
            table,
            field
        )));
    }
    Ok(value)
}

async fn write(store: &dyn Datastore, table: &str, filter: &Document, record: Document) -> UpgradeResult<()> {
    let id = display_value(filter.values().next());
    upsert_idempotent(store, table, filter, record)
        .await
        .map_err(|source| {
            error!(table = %table, record = %id, error = %source, "Failed to copy record");
            UpgradeError::Copy {
                table: table.to_string(),
                record: id,
                source,
            }
        })
}

/// Copy one instance into its shard and record its owner in the mapping
pub async fn copy_instance(store: &dyn Datastore, fallback_owner: &str, record: Document) -> UpgradeResult<()> {
    let object_id = required(&record, OBJ_ID_FIELD, OBJECT_BASE_TABLE)?;
    required(&record, INST_ID_FIELD, OBJECT_BASE_TABLE)?;
    let owner = record_owner(&record, fallback_owner);

    let mapping_filter = doc(json!({ INST_ID_FIELD: record.get(INST_ID_FIELD).cloned() }));
    let mapping = doc(json!({ OBJ_ID_FIELD: object_id, OWNER_ID_FIELD: owner }));
    write(store, OBJECT_BASE_MAPPING_TABLE, &mapping_filter, mapping).await?;

    let filter = doc(json!({ ID_FIELD: record.get(ID_FIELD).cloned() }));
    write(store, &instance_table(&owner, &object_id), &filter, record).await
}

/// Copy one association into the shards of both endpoint objects
pub async fn copy_association(store: &dyn Datastore, fallback_owner: &str, record: Document) -> UpgradeResult<()> {
    let object_id = required(&record, OBJ_ID_FIELD, INST_ASST_TABLE)?;
    let asst_object_id = required(&record, ASST_OBJ_ID_FIELD, INST_ASST_TABLE)?;
    let owner = record_owner(&record, fallback_owner);

    let filter = doc(json!({ ID_FIELD: record.get(ID_FIELD).cloned() }));
    let own_table = association_table(&owner, &object_id);
    let peer_table = association_table(&owner, &asst_object_id);

    if own_table != peer_table {
        write(store, &peer_table, &filter, record.clone()).await?;
    }
    write(store, &own_table, &filter, record).await
}

// ============================================================================
// Driver
// ============================================================================

/// Drives one resharding run
pub struct InstanceResharder {
    store: Arc<dyn Datastore>,
    config: UpgraderConfig,
    reader: MetadataReader,
    reconciler: IndexReconciler,
    report: ReshardReport,
}

impl InstanceResharder {
    pub fn new(store: Arc<dyn Datastore>, config: UpgraderConfig) -> Self {
        Self {
            reader: MetadataReader::new(store.clone()),
            reconciler: IndexReconciler::new(store.clone()),
            store,
            config,
            report: ReshardReport::new(),
        }
    }

    /// Run every phase; the first error aborts the run
    pub async fn run(mut self) -> UpgradeResult<ReshardReport> {
        self.config.validate()?;

        match self.execute().await {
            Ok(()) => {
                self.report.transition_to(ReshardPhase::Done);
                self.report.finished_at = Some(Utc::now());
                info!(
                    objects = self.report.objects,
                    tables_created = self.report.tables_created.len(),
                    instances = self.report.instances.delivered,
                    associations = self.report.associations.delivered,
                    "Resharding complete"
                );
                Ok(self.report)
            }
            Err(e) => {
                let failed_in = self.report.phase;
                self.report.error_message = Some(e.to_string());
                self.report.transition_to(ReshardPhase::Failed);
                self.report.finished_at = Some(Utc::now());
                error!(phase = ?failed_in, error = %e, "Resharding failed");
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> UpgradeResult<()> {
        self.report.transition_to(ReshardPhase::ListObjects);
        let objects = self.reader.list_objects().await?;
        self.report.objects = objects.len();
        info!(count = objects.len(), "Objects listed");

        self.report.transition_to(ReshardPhase::CreateTables);
        self.create_tables(&objects).await?;

        self.report.transition_to(ReshardPhase::CreateIndexes);
        self.create_indexes(&objects).await?;

        self.report.transition_to(ReshardPhase::CopyInstances);
        self.copy_instances(&objects).await?;

        self.report.transition_to(ReshardPhase::CopyAssociations);
        self.copy_associations().await
    }

    /// True when instances live in a shard rather than a fixed table
    fn is_sharded(object: &ObjectDef) -> bool {
        !(object.is_predefined && builtin_instance_table(&object.object_id).is_some())
    }

    async fn ensure_table(&mut self, table: String) -> UpgradeResult<()> {
        if self.store.create_table_if_missing(&table).await? {
            debug!(table = %table, "Table created");
            self.report.tables_created.push(table);
        }
        Ok(())
    }

    async fn create_tables(&mut self, objects: &[ObjectDef]) -> UpgradeResult<()> {
        for object in objects {
            let owner = object.owner_or(&self.config.owner_id).to_string();
            self.ensure_table(association_table(&owner, &object.object_id)).await?;

            if Self::is_sharded(object) {
                if object.is_predefined {
                    warn!(object_id = %object.object_id, "Predefined object without a fixed table, sharding it");
                }
                self.ensure_table(instance_table(&owner, &object.object_id)).await?;
            }
        }
        self.ensure_table(OBJECT_BASE_MAPPING_TABLE.to_string()).await
    }

    async fn create_indexes(&mut self, objects: &[ObjectDef]) -> UpgradeResult<()> {
        let report = self
            .reconciler
            .reconcile(OBJECT_BASE_MAPPING_TABLE, &mapping_indexes())
            .await?;
        self.report.indexes.push(report);

        for object in objects {
            let owner = object.owner_or(&self.config.owner_id).to_string();

            let report = self
                .reconciler
                .reconcile(&association_table(&owner, &object.object_id), &association_indexes())
                .await?;
            self.report.indexes.push(report);

            let attributes = self.reader.attributes(&object.object_id).await?;
            let uniques = self
                .reader
                .uniques(&object.object_id)
                .await?
                .iter()
                .map(|unique| translate(unique, &attributes))
                .collect::<UpgradeResult<Vec<_>>>()?;

            let (table, desired) = if Self::is_sharded(object) {
                let mut desired = instance_indexes();
                desired.extend(uniques);
                (instance_table(&owner, &object.object_id), desired)
            } else {
                match builtin_instance_table(&object.object_id) {
                    Some(table) => (table.to_string(), uniques),
                    None => continue,
                }
            };

            if !self.store.has_table(&table).await? {
                warn!(object_id = %object.object_id, table = %table, "Instance table missing, creating it");
                self.ensure_table(table.clone()).await?;
            }
            let report = self.reconciler.reconcile(&table, &desired).await?;
            self.report.indexes.push(report);
        }
        Ok(())
    }

    async fn copy_instances(&mut self, objects: &[ObjectDef]) -> UpgradeResult<()> {
        let copier = BoundedCopier::new(self.store.clone(), self.config.worker_count);

        for object in objects.iter().filter(|o| Self::is_sharded(o)) {
            let source = SourceQuery::new(OBJECT_BASE_TABLE, INST_ID_FIELD, self.config.page_size)
                .with_filter(doc(json!({ OBJ_ID_FIELD: object.object_id })));

            let store = self.store.clone();
            let fallback = object.owner_or(&self.config.owner_id).to_string();
            let stats = copier
                .copy(&source, move |record| {
                    let store = store.clone();
                    let fallback = fallback.clone();
                    async move { copy_instance(store.as_ref(), &fallback, record).await }
                })
                .await?;

            info!(object_id = %object.object_id, copied = stats.delivered, "Instances copied");
            self.report.instances.add(&stats);
        }
        Ok(())
    }

    async fn copy_associations(&mut self) -> UpgradeResult<()> {
        let copier = BoundedCopier::new(self.store.clone(), self.config.worker_count);
        let source = SourceQuery::new(INST_ASST_TABLE, ASSOCIATION_ID_FIELD, self.config.page_size);

        let store = self.store.clone();
        let fallback = self.config.owner_id.clone();
        let stats = copier
            .copy(&source, move |record| {
                let store = store.clone();
                let fallback = fallback.clone();
                async move { copy_association(store.as_ref(), &fallback, record).await }
            })
            .await?;

        info!(copied = stats.delivered, "Associations copied");
        self.report.associations = stats;
        Ok(())
    }
}

/// Upgrade step wrapping [`InstanceResharder`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ReshardStep;

#[async_trait]
impl UpgradeStep for ReshardStep {
    fn version(&self) -> &str {
        RESHARD_VERSION
    }

    fn description(&self) -> &str {
        "split generic instance and association tables into per-object shards"
    }

    async fn run(&self, store: Arc<dyn Datastore>, config: &UpgraderConfig) -> UpgradeResult<()> {
        InstanceResharder::new(store, config.clone()).run().await.map(|_| ())
    }
}
