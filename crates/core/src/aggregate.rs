//! Read/administrative view composing every domain store.
//!
//! Probe order is fixed: video first, then image. Listing materializes
//! the full merged set, filters, sorts, and only then paginates — this
//! system targets in-memory scale, not streamed result sets.

use std::sync::Arc;

use serde::Serialize;

use crate::error::CoreError;
use crate::store::TaskStore;
use crate::task::{TaskSnapshot, TaskStatus};
use crate::types::{TaskId, TaskKind};

/// Sort direction for [`TaskDirectory::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl std::str::FromStr for SortOrder {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(CoreError::Validation(format!(
                "Invalid order: \"{other}\" (expected \"asc\" or \"desc\")"
            ))),
        }
    }
}

/// Filter, sort, and pagination parameters for the aggregated list.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub kind: Option<TaskKind>,
    pub status: Option<TaskStatus>,
    pub order: SortOrder,
    /// 1-based page number.
    pub page: usize,
    pub size: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            kind: None,
            status: None,
            order: SortOrder::Desc,
            page: 1,
            size: 20,
        }
    }
}

/// One page of the aggregated, sorted task list.
#[derive(Debug, Serialize)]
pub struct TaskPage {
    pub total: usize,
    pub page: usize,
    pub size: usize,
    pub items: Vec<TaskSnapshot>,
}

/// Composes the per-domain [`TaskStore`]s into one view.
pub struct TaskDirectory {
    /// Stores in fixed probe order.
    stores: Vec<Arc<TaskStore>>,
}

impl TaskDirectory {
    pub fn new(stores: Vec<Arc<TaskStore>>) -> Self {
        Self { stores }
    }

    /// The store owning `kind`, if one is registered.
    pub fn store(&self, kind: TaskKind) -> Option<&Arc<TaskStore>> {
        self.stores.iter().find(|s| s.kind() == kind)
    }

    pub fn stores(&self) -> &[Arc<TaskStore>] {
        &self.stores
    }

    /// Probe each store in order until the id is found.
    pub fn find(&self, id: &str) -> Option<TaskSnapshot> {
        self.stores
            .iter()
            .find_map(|store| store.get(id))
            .map(|task| task.snapshot())
    }

    /// Merged, filtered, stably sorted, paginated list. Sorting is by
    /// `created_at` only; equal keys keep their store-probe order.
    pub fn list(&self, query: &ListQuery) -> TaskPage {
        let mut items: Vec<TaskSnapshot> = self
            .stores
            .iter()
            .filter(|store| query.kind.map_or(true, |k| store.kind() == k))
            .flat_map(|store| store.list(query.status))
            .collect();

        // Stable in both directions: equal keys keep store-probe order.
        match query.order {
            SortOrder::Asc => items.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            SortOrder::Desc => items.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }

        let total = items.len();
        let size = query.size.max(1);
        let page = query.page.max(1);
        let start = (page - 1).saturating_mul(size).min(total);
        let end = start.saturating_add(size).min(total);

        TaskPage {
            total,
            page,
            size,
            items: items[start..end].to_vec(),
        }
    }

    /// Attempt each id against every store, summing successes. Unknown
    /// ids never abort the batch.
    pub fn delete_many(&self, ids: &[TaskId]) -> usize {
        self.stores
            .iter()
            .map(|store| store.delete_many(ids))
            .sum()
    }

    /// Clear matching tasks across stores, optionally scoped to one
    /// kind and/or one status.
    pub fn clear(&self, kind: Option<TaskKind>, status: Option<TaskStatus>) -> usize {
        self.stores
            .iter()
            .filter(|store| kind.map_or(true, |k| store.kind() == k))
            .map(|store| store.clear(status))
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
