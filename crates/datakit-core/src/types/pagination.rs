//! Paged result wrapper.

use serde::{Deserialize, Serialize};

/// One page of results together with the total row count of the
/// underlying (unpaged) query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedList<T> {
    /// The items on this page.
    pub items: Vec<T>,
    /// Current page number (1-based).
    pub page_index: i64,
    /// Number of items per page.
    pub page_size: i64,
    /// Total number of items across all pages.
    pub total_count: i64,
    /// Total number of pages.
    pub total_pages: i64,
    /// Whether there is a next page.
    pub has_next: bool,
    /// Whether there is a previous page.
    pub has_previous: bool,
}

impl<T> PagedList<T> {
    /// Create a new paged list.
    ///
    /// A missing page index or size yields a single page holding every item.
    pub fn new(
        items: Vec<T>,
        page_index: Option<i64>,
        page_size: Option<i64>,
        total_count: i64,
    ) -> Self {
        let (page_index, page_size) = match (page_index, page_size) {
            (Some(index), Some(size)) if size > 0 => (index.max(1), size),
            _ => (1, total_count.max(items.len() as i64)),
        };
        let total_pages = if total_count == 0 || page_size == 0 {
            1
        } else {
            (total_count + page_size - 1) / page_size
        };
        Self {
            items,
            page_index,
            page_size,
            total_count,
            total_pages,
            has_next: page_index < total_pages,
            has_previous: page_index > 1,
        }
    }

    /// Number of items on this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether this page holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
