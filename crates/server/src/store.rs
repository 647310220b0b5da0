use std::collections::HashMap;
use std::sync::Mutex;

use readylayer_core::{Category, Scope};
use serde_json::Value;

/// Read boundary for dashboard rows. Production ReadyLayer keeps these in a
/// relational store; the sync layer only needs paged reads, so persistence
/// stays behind this trait.
pub trait DashboardStore: Send + Sync + 'static {
    /// One page of rows for a category under a scope, plus the filtered
    /// total.
    fn list(
        &self,
        category: Category,
        scope: &Scope,
        limit: u32,
        offset: u64,
    ) -> anyhow::Result<(Vec<Value>, u64)>;

    /// Append one row. Used by the publish edge and by tests.
    fn put(&self, category: Category, scope: &Scope, row: Value) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
struct StoredRow {
    repository_id: Option<String>,
    row: Value,
}

/// In-memory store. Not durable, but good for tests and demos.
#[derive(Default)]
pub struct MemoryStore {
    // (category, org) -> insertion-ordered rows
    inner: Mutex<HashMap<(Category, String), Vec<StoredRow>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DashboardStore for MemoryStore {
    fn list(
        &self,
        category: Category,
        scope: &Scope,
        limit: u32,
        offset: u64,
    ) -> anyhow::Result<(Vec<Value>, u64)> {
        let inner = self.inner.lock().unwrap();
        let rows = inner
            .get(&(category, scope.organization_id.clone()))
            .map(|v| v.as_slice())
            .unwrap_or_default();

        let filtered: Vec<&StoredRow> = rows
            .iter()
            .filter(|r| match (&scope.repository_id, &r.repository_id) {
                (Some(want), Some(have)) => want == have,
                (Some(_), None) => true, // org-wide rows show in repo views
                (None, _) => true,
            })
            .collect();

        let total = filtered.len() as u64;
        let page = filtered
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|r| r.row.clone())
            .collect();
        Ok((page, total))
    }

    fn put(&self, category: Category, scope: &Scope, row: Value) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .entry((category, scope.organization_id.clone()))
            .or_default()
            .push(StoredRow {
                repository_id: scope.repository_id.clone(),
                row,
            });
        Ok(())
    }
}
