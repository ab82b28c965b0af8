//! Shared fixtures for upgrader integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cmdb_store::{doc, Datastore, Document, FindQuery, Index, MemoryDatastore, StoreError, StoreResult};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const SWITCHES: u64 = 23;
pub const ROUTERS: u64 = 6;

/// Route test logs through the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn switch_id(n: u64) -> u64 {
    n
}

pub fn router_id(n: u64) -> u64 {
    1000 + n
}

/// A pre-sharding store: a built-in `host`, custom `switch` and `router`
/// objects, their attributes and constraints, instances and associations.
pub async fn seeded_store() -> Arc<MemoryDatastore> {
    let store = Arc::new(MemoryDatastore::new());

    for row in [
        json!({"bk_obj_id": "host", "ispre": true, "bk_supplier_account": "0"}),
        json!({"bk_obj_id": "switch", "ispre": false, "bk_supplier_account": "0"}),
        json!({"bk_obj_id": "router", "ispre": false, "bk_supplier_account": "0"}),
    ] {
        store.insert("cc_ObjDes", doc(row)).await.unwrap();
    }

    for row in [
        json!({"id": 10, "bk_obj_id": "host", "bk_property_id": "bk_host_innerip", "bk_property_type": "singlechar", "bk_biz_id": 0}),
        json!({"id": 11, "bk_obj_id": "host", "bk_property_id": "bk_cloud_id", "bk_property_type": "foreignkey", "bk_biz_id": 0}),
        json!({"id": 20, "bk_obj_id": "switch", "bk_property_id": "serial", "bk_property_type": "singlechar", "bk_biz_id": 0}),
        json!({"id": 21, "bk_obj_id": "switch", "bk_property_id": "rack", "bk_property_type": "int", "bk_biz_id": 0}),
        json!({"id": 22, "bk_obj_id": "switch", "bk_property_id": "vendor", "bk_property_type": "longchar", "bk_biz_id": 0}),
        json!({"id": 30, "bk_obj_id": "router", "bk_property_id": "bk_inst_name", "bk_property_type": "singlechar", "bk_biz_id": 0}),
    ] {
        store.insert("cc_ObjAttDes", doc(row)).await.unwrap();
    }

    for row in [
        unique(1, "host", &[10, 11]),
        unique(2, "switch", &[20]),
        unique(5, "switch", &[20, 21]),
        // Same key set as 5 in another order
        unique(6, "switch", &[21, 20]),
    ] {
        store.insert("cc_ObjectUnique", doc(row)).await.unwrap();
    }

    for n in 1..=SWITCHES {
        let row = json!({
            "_id": format!("sw-{:03}", n),
            "bk_obj_id": "switch",
            "bk_inst_id": switch_id(n),
            "bk_inst_name": format!("switch-{}", n),
            "bk_supplier_account": "0",
            "serial": format!("SN{:05}", n),
            "rack": n % 4,
        });
        store.insert("cc_ObjectBase", doc(row)).await.unwrap();
    }
    for n in 1..=ROUTERS {
        let row = json!({
            "_id": format!("rt-{:03}", n),
            "bk_obj_id": "router",
            "bk_inst_id": router_id(n),
            "bk_inst_name": format!("router-{}", n),
            "bk_supplier_account": "0",
        });
        store.insert("cc_ObjectBase", doc(row)).await.unwrap();
    }

    for (id, edge) in associations().into_iter().enumerate() {
        let (obj, inst, asst_obj, asst_inst) = edge;
        let row = json!({
            "_id": format!("as-{:03}", id),
            "id": id as u64 + 1,
            "bk_obj_id": obj,
            "bk_inst_id": inst,
            "bk_asst_obj_id": asst_obj,
            "bk_asst_inst_id": asst_inst,
            "bk_obj_asst_id": format!("{}_connect_{}", obj, asst_obj),
            "bk_supplier_account": "0",
        });
        store.insert("cc_InstAsst", doc(row)).await.unwrap();
    }

    store
}

/// (object, instance, associated object, associated instance)
pub fn associations() -> Vec<(&'static str, u64, &'static str, u64)> {
    let mut edges = Vec::new();
    for n in 1..=ROUTERS {
        edges.push(("switch", switch_id(n), "router", router_id(n)));
        edges.push(("router", router_id(n), "switch", switch_id(n + 1)));
    }
    edges.push(("switch", switch_id(1), "switch", switch_id(2)));
    edges.push(("host", 500, "switch", switch_id(3)));
    edges
}

fn unique(id: u64, object_id: &str, keys: &[u64]) -> serde_json::Value {
    let keys: Vec<_> = keys
        .iter()
        .map(|k| json!({"key_kind": "property", "key_id": k}))
        .collect();
    json!({
        "id": id,
        "bk_obj_id": object_id,
        "must_check": true,
        "keys": keys,
        "ispre": false,
        "bk_supplier_account": "0",
    })
}

pub async fn all_rows(store: &dyn Datastore, table: &str) -> Vec<Document> {
    store
        .find(table, &FindQuery::all().sort_by("_id"))
        .await
        .unwrap()
}

pub fn index_names(indexes: &[Index]) -> Vec<String> {
    let mut names: Vec<String> = indexes.iter().map(|i| i.name.clone()).collect();
    names.sort();
    names
}

/// Every table with its rows and index definitions, in a comparable form
pub async fn snapshot(store: &dyn Datastore) -> Vec<(String, Vec<Document>, Vec<Index>)> {
    let mut tables = store.list_tables().await.unwrap();
    tables.sort();

    let mut out = Vec::with_capacity(tables.len());
    for table in tables {
        let rows = all_rows(store, &table).await;
        let mut indexes = store.indexes(&table).await.unwrap();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        out.push((table, rows, indexes));
    }
    out
}

// ============ Fault Injection ============

/// Delegates to an in-memory store and fails exactly the `fail_at`-th upsert
pub struct FlakyStore {
    inner: Arc<MemoryDatastore>,
    upserts: AtomicUsize,
    fail_at: usize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryDatastore>, fail_at: usize) -> Self {
        Self {
            inner,
            upserts: AtomicUsize::new(0),
            fail_at,
        }
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Datastore for FlakyStore {
    async fn has_table(&self, table: &str) -> StoreResult<bool> {
        self.inner.has_table(table).await
    }

    async fn create_table(&self, table: &str) -> StoreResult<()> {
        self.inner.create_table(table).await
    }

    async fn drop_table(&self, table: &str) -> StoreResult<()> {
        self.inner.drop_table(table).await
    }

    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        self.inner.list_tables().await
    }

    async fn indexes(&self, table: &str) -> StoreResult<Vec<Index>> {
        self.inner.indexes(table).await
    }

    async fn create_index(&self, table: &str, index: &Index) -> StoreResult<()> {
        self.inner.create_index(table, index).await
    }

    async fn drop_index(&self, table: &str, name: &str) -> StoreResult<()> {
        self.inner.drop_index(table, name).await
    }

    async fn find(&self, table: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        self.inner.find(table, query).await
    }

    async fn count(&self, table: &str, filter: &Document) -> StoreResult<u64> {
        self.inner.count(table, filter).await
    }

    async fn insert(&self, table: &str, document: Document) -> StoreResult<()> {
        self.inner.insert(table, document).await
    }

    async fn upsert(&self, table: &str, filter: &Document, document: Document) -> StoreResult<()> {
        let n = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at {
            return Err(StoreError::backend("injected write failure"));
        }
        self.inner.upsert(table, filter, document).await
    }
}
