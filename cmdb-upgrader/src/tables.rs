//! Table and field names of the persisted CMDB layout

/// Object definitions
pub const OBJECT_TABLE: &str = "cc_ObjDes";
/// Attribute definitions
pub const ATTRIBUTE_TABLE: &str = "cc_ObjAttDes";
/// Logical uniqueness constraints
pub const OBJECT_UNIQUE_TABLE: &str = "cc_ObjectUnique";
/// Monolithic generic instance table
pub const OBJECT_BASE_TABLE: &str = "cc_ObjectBase";
/// Monolithic association table
pub const INST_ASST_TABLE: &str = "cc_InstAsst";
/// Instance ID to (object, tenant) lookup
pub const OBJECT_BASE_MAPPING_TABLE: &str = "cc_ObjectBaseMapping";
/// System settings, holds the version watermark
pub const SYSTEM_TABLE: &str = "cc_System";

pub const OBJ_ID_FIELD: &str = "bk_obj_id";
pub const OWNER_ID_FIELD: &str = "bk_supplier_account";
pub const INST_ID_FIELD: &str = "bk_inst_id";
pub const INST_NAME_FIELD: &str = "bk_inst_name";
pub const ASST_OBJ_ID_FIELD: &str = "bk_asst_obj_id";
pub const ASST_INST_ID_FIELD: &str = "bk_asst_inst_id";
pub const ASSOCIATION_ID_FIELD: &str = "id";
pub const BIZ_ID_FIELD: &str = "bk_biz_id";

/// Objects that kept a dedicated table from earlier releases
const BUILTIN_TABLES: &[(&str, &str)] = &[
    ("host", "cc_HostBase"),
    ("biz", "cc_ApplicationBase"),
    ("set", "cc_SetBase"),
    ("module", "cc_ModuleBase"),
    ("plat", "cc_PlatBase"),
    ("process", "cc_Process"),
    ("bk_biz_set_obj", "cc_BizSetBase"),
    ("bk_project", "cc_ProjectBase"),
];

/// Shard holding one tenant's instances of one object
pub fn instance_table(owner_id: &str, object_id: &str) -> String {
    format!("{}_{}_pub_{}", OBJECT_BASE_TABLE, owner_id, object_id)
}

/// Shard holding one tenant's associations touching one object
pub fn association_table(owner_id: &str, object_id: &str) -> String {
    format!("{}_{}_pub_{}", INST_ASST_TABLE, owner_id, object_id)
}

/// Fixed instance table of a built-in object
pub fn builtin_instance_table(object_id: &str) -> Option<&'static str> {
    BUILTIN_TABLES
        .iter()
        .find(|(obj, _)| *obj == object_id)
        .map(|(_, table)| *table)
}
