//! Pagination and Sorting
//!
//! Shared by instance listing and history queries.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::instance::WorkflowInstance;

/// Maximum page size a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    StartTime,
    EndTime,
    Duration,
    Status,
    WorkflowName,
    Priority,
    Progress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Page request: 1-based page number plus sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            sort_field: SortField::StartTime,
            sort_order: SortOrder::Desc,
        }
    }
}

impl Pagination {
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page,
            limit,
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_field = field;
        self.sort_order = order;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page: usize,
    pub pages: usize,
    pub limit: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: PageInfo,
}

/// Slices an already-sorted list into the requested page.
///
/// Page numbers below 1 are treated as 1 and the limit is clamped to
/// `1..=MAX_PAGE_SIZE`. A page past the end is empty but still reports
/// the totals.
pub fn paginate<T>(items: Vec<T>, request: &Pagination) -> Page<T> {
    let limit = request.limit.clamp(1, MAX_PAGE_SIZE);
    let page = request.page.max(1);
    let total = items.len();
    let pages = total.div_ceil(limit);

    let items = items
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();

    Page {
        items,
        pagination: PageInfo {
            page,
            pages,
            limit,
            total,
        },
    }
}

/// Sorts instances in place. Missing values sort last in ascending order.
pub fn sort_instances<T, F>(items: &mut [T], field: SortField, order: SortOrder, instance_of: F)
where
    F: Fn(&T) -> &WorkflowInstance,
{
    items.sort_by(|a, b| {
        let (a, b) = (instance_of(a), instance_of(b));
        let ordering = compare(a, b, field).then_with(|| a.id.cmp(&b.id));
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

fn compare(a: &WorkflowInstance, b: &WorkflowInstance, field: SortField) -> Ordering {
    match field {
        SortField::StartTime => a.start_time.cmp(&b.start_time),
        SortField::EndTime => none_last(a.end_time, b.end_time),
        SortField::Duration => none_last(a.duration, b.duration),
        SortField::Status => a.status.as_str().cmp(b.status.as_str()),
        SortField::WorkflowName => a
            .workflow_name
            .cmp(&b.workflow_name)
            .then_with(|| a.namespace.cmp(&b.namespace)),
        SortField::Priority => a.priority.cmp(&b.priority),
        SortField::Progress => a.progress.cmp(&b.progress),
    }
}

fn none_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
