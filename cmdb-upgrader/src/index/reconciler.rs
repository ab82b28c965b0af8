//! Index Reconciler
//!
//! Converges a table's indexes towards a desired set. Existing indexes are
//! matched by name first. An undesired index over the same field set is
//! then dropped, so indexes created under legacy names are replaced rather
//! than duplicated.

use cmdb_store::{Datastore, Index};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::UpgradeResult;

/// Outcome of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Table reconciled
    pub table: String,
    /// Indexes created
    pub created: Vec<String>,
    /// Stale or conflicting indexes dropped
    pub dropped: Vec<String>,
    /// Desired indexes already in place
    pub unchanged: Vec<String>,
}

impl ReconcileReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    /// True when nothing was created or dropped
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.dropped.is_empty()
    }
}

/// True when two desired indexes cannot both exist: they share a key
/// pattern, or both enforce uniqueness over the same field set.
fn collides(a: &Index, b: &Index) -> bool {
    a.keys == b.keys || (a.unique && b.unique && a.same_fields(b))
}

/// Drop desired indexes that collide with an earlier one.
///
/// The first index wins, unless a later one is unique and the kept one is
/// not: a uniqueness requirement is never given up. Plain indexes over the
/// same fields in a different order are distinct and both kept.
pub fn dedup_desired(desired: &[Index]) -> Vec<Index> {
    let mut kept: Vec<Index> = Vec::with_capacity(desired.len());
    for index in desired {
        match kept.iter_mut().find(|k| collides(k, index)) {
            Some(existing) if index.unique && !existing.unique => {
                debug!(replaced = %existing.name, by = %index.name, "Unique index supersedes plain index");
                *existing = index.clone();
            }
            Some(existing) => {
                debug!(kept = %existing.name, skipped = %index.name, "Index collides with an already desired one");
            }
            None => kept.push(index.clone()),
        }
    }
    kept
}

/// Converges table indexes
pub struct IndexReconciler {
    store: Arc<dyn Datastore>,
}

impl IndexReconciler {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Reconcile `table` against `desired`
    pub async fn reconcile(&self, table: &str, desired: &[Index]) -> UpgradeResult<ReconcileReport> {
        let mut report = ReconcileReport::new(table);
        let mut current = self.store.indexes(table).await?;
        let desired = dedup_desired(desired);
        let desired_names: HashSet<&str> = desired.iter().map(|i| i.name.as_str()).collect();

        for index in desired.iter().cloned() {
            if index.is_identity() {
                report.unchanged.push(index.name.clone());
                continue;
            }

            if let Some(pos) = current.iter().position(|i| i.name == index.name) {
                if current[pos].equivalent(&index) {
                    report.unchanged.push(index.name.clone());
                    continue;
                }
                let stale = current.remove(pos);
                self.drop_index(table, &stale.name).await?;
                report.dropped.push(stale.name);
            }

            // Desired indexes are reconciled under their own name
            let legacy = current
                .iter()
                .position(|i| !desired_names.contains(i.name.as_str()) && i.same_fields(&index));
            if let Some(pos) = legacy {
                if current[pos].is_identity() {
                    report.unchanged.push(index.name.clone());
                    continue;
                }
                let conflicting = current.remove(pos);
                self.drop_index(table, &conflicting.name).await?;
                report.dropped.push(conflicting.name);
            }

            match self.store.create_index(table, &index).await {
                Ok(()) => {
                    debug!(table = %table, index = %index.name, "Index created");
                    report.created.push(index.name.clone());
                }
                Err(e) if e.is_duplicated() => {
                    debug!(table = %table, index = %index.name, "Index already present");
                    report.unchanged.push(index.name.clone());
                }
                Err(e) => {
                    error!(table = %table, index = %index.name, error = %e, "Failed to create index");
                    return Err(e.into());
                }
            }
            current.push(index);
        }

        info!(
            table = %table,
            created = report.created.len(),
            dropped = report.dropped.len(),
            unchanged = report.unchanged.len(),
            "Indexes reconciled"
        );
        Ok(report)
    }

    async fn drop_index(&self, table: &str, name: &str) -> UpgradeResult<()> {
        match self.store.drop_index(table, name).await {
            Ok(()) => {
                debug!(table = %table, index = %name, "Index dropped");
                Ok(())
            }
            Err(e) if e.is_index_not_found() => Ok(()),
            Err(e) => {
                error!(table = %table, index = %name, error = %e, "Failed to drop index");
                Err(e.into())
            }
        }
    }
}
