//! Structural indexes of the sharded tables

use cmdb_store::Index;

use crate::tables::{
    ASSOCIATION_ID_FIELD, ASST_INST_ID_FIELD, ASST_OBJ_ID_FIELD, INST_ID_FIELD, INST_NAME_FIELD,
    OBJ_ID_FIELD, OWNER_ID_FIELD,
};

/// Name prefix of structural indexes
pub const INDEX_PREFIX: &str = "bkcc_idx_";

fn name(suffix: &str) -> String {
    format!("{}{}", INDEX_PREFIX, suffix)
}

/// Indexes of every instance shard
pub fn instance_indexes() -> Vec<Index> {
    vec![
        Index::new(name("bkObjId"), &[OBJ_ID_FIELD]).background(),
        Index::new(name("bkSupplierAccount"), &[OWNER_ID_FIELD]).background(),
        Index::new(name("bkInstId"), &[INST_ID_FIELD]).unique().background(),
        Index::new(name("bkInstName"), &[INST_NAME_FIELD]),
    ]
}

/// Indexes of every association shard
pub fn association_indexes() -> Vec<Index> {
    vec![
        Index::new(name("bkObjId_bkInstID"), &[OBJ_ID_FIELD, INST_ID_FIELD]).background(),
        Index::new("bkcc_unique_id", &[ASSOCIATION_ID_FIELD])
            .unique()
            .background(),
        Index::new(name("bkInstId_bkObjId"), &[INST_ID_FIELD, OBJ_ID_FIELD]).background(),
        Index::new(name("bkAsstObjId_bkAsstInstId"), &[ASST_OBJ_ID_FIELD, ASST_INST_ID_FIELD])
            .background(),
    ]
}

/// Indexes of the instance identity mapping
pub fn mapping_indexes() -> Vec<Index> {
    vec![
        Index::new(name("bkInstId"), &[INST_ID_FIELD]).unique().background(),
        Index::new(name("bkObjId"), &[OBJ_ID_FIELD]).background(),
    ]
}
