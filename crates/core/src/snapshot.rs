use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-enforced ceiling on snapshot page size.
pub const MAX_SNAPSHOT_LIMIT: u32 = 200;
/// Page size when the caller does not specify one.
pub const DEFAULT_SNAPSHOT_LIMIT: u32 = 50;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub limit: u32,
    pub offset: u64,
    pub has_more: bool,
}

/// One full point-in-time read of a dashboard category. Items are opaque to
/// the sync layer; the cache replaces pages wholesale, never merges.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SnapshotPage {
    #[serde(rename = "data")]
    pub items: Vec<Value>,
    pub pagination: Pagination,
}
