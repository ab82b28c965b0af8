//! Index translation and reconciliation

pub mod defaults;
pub mod reconciler;
pub mod translator;

pub use reconciler::{dedup_desired, IndexReconciler, ReconcileReport};
pub use translator::{translate, PredicateType, TypeOverride, TYPE_OVERRIDES};
