//! Integration tests for the datastore contract
//!
//! These tests drive the in-memory engine through `Arc<dyn Datastore>`, the
//! way the upgrader holds it.

use cmdb_store::{doc, Datastore, Document, FindQuery, Index, MemoryDatastore, PageCursor, StoreError};
use serde_json::json;
use std::sync::Arc;

fn store() -> Arc<dyn Datastore> {
    Arc::new(MemoryDatastore::new())
}

// ============ Concurrency ============

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upserts_on_one_key_leave_one_row() {
    let store = store();
    store
        .create_index("cc_ObjectBaseMapping", &Index::new("bkcc_idx_bkInstId", &["bk_inst_id"]).unique())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .upsert(
                    "cc_ObjectBaseMapping",
                    &doc(json!({"bk_inst_id": 42})),
                    doc(json!({"bk_obj_id": "switch", "bk_supplier_account": "0"})),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let rows = store
        .find("cc_ObjectBaseMapping", &FindQuery::all())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["bk_inst_id"], json!(42));
    assert_eq!(rows[0]["bk_obj_id"], json!("switch"));
}

// ============ Pagination ============

#[tokio::test]
async fn test_keyset_pages_survive_concurrent_inserts() {
    let store = store();
    for i in 0..10 {
        store
            .insert("cc_InstAsst", doc(json!({"_id": format!("a{:02}", i), "id": i})))
            .await
            .unwrap();
    }

    let first = store
        .find("cc_InstAsst", &FindQuery::all().sort_by("id").limit(4))
        .await
        .unwrap();
    let cursor = first.last().map(|d| PageCursor::from_document(d, "id"));

    // A row inserted before the cursor position is not returned again and
    // does not shift the remaining pages
    store
        .insert("cc_InstAsst", doc(json!({"_id": "late", "id": 1})))
        .await
        .unwrap();

    let mut rest: Vec<Document> = Vec::new();
    let mut cursor = cursor;
    loop {
        let page = store
            .find("cc_InstAsst", &FindQuery::all().sort_by("id").after(cursor.clone()).limit(4))
            .await
            .unwrap();
        if page.is_empty() {
            break;
        }
        cursor = page.last().map(|d| PageCursor::from_document(d, "id"));
        rest.extend(page);
    }

    let ids: Vec<i64> = first
        .iter()
        .chain(rest.iter())
        .filter_map(|d| d["id"].as_i64())
        .collect();
    assert_eq!(ids, (0..10).collect::<Vec<i64>>());
}

// ============ Indexes ============

#[tokio::test]
async fn test_typed_partial_unique_on_list_field() {
    let store = store();
    let index = Index::new("bkcc_unique_1", &["bk_host_innerip", "bk_cloud_id"])
        .unique()
        .background()
        .with_partial_filter(doc(json!({
            "bk_host_innerip": {"$type": "string"},
            "bk_cloud_id": {"$type": "number"}
        })));
    store.create_index("cc_HostBase", &index).await.unwrap();

    store
        .insert("cc_HostBase", doc(json!({"bk_host_innerip": ["10.0.0.1"], "bk_cloud_id": 0})))
        .await
        .unwrap();
    // Same IP in another cloud area
    store
        .insert("cc_HostBase", doc(json!({"bk_host_innerip": ["10.0.0.1"], "bk_cloud_id": 1})))
        .await
        .unwrap();
    // Legacy row with a string cloud ID is outside the predicate
    store
        .insert("cc_HostBase", doc(json!({"bk_host_innerip": ["10.0.0.1"], "bk_cloud_id": "0"})))
        .await
        .unwrap();

    let err = store
        .insert(
            "cc_HostBase",
            doc(json!({"bk_host_innerip": ["10.0.0.9", "10.0.0.1"], "bk_cloud_id": 0})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey { ref index, .. } if index == "bkcc_unique_1"));
    assert_eq!(store.count("cc_HostBase", &Document::new()).await.unwrap(), 3);
}

#[tokio::test]
async fn test_missing_table_errors() {
    let store = store();
    assert!(matches!(store.indexes("nope").await, Err(StoreError::TableNotFound(_))));
    assert!(matches!(store.drop_table("nope").await, Err(StoreError::TableNotFound(_))));
    assert!(matches!(
        store.drop_index("nope", "bkcc_idx_bkObjId").await,
        Err(StoreError::TableNotFound(_))
    ));
    assert_eq!(store.count("nope", &Document::new()).await.unwrap(), 0);
}
