//! Paging and topping parameters.

use serde::{Deserialize, Serialize};

/// Page window plus the total row count written back by the compiler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    /// Page number (1-based).
    pub page_index: Option<i64>,
    /// Number of rows per page.
    pub page_size: Option<i64>,
    /// Row count of the unpaged query; set when the query executes.
    pub total_count: i64,
}

impl Paging {
    /// Paging applies only when both values are present and the size is
    /// positive.
    pub fn is_enabled(&self) -> bool {
        matches!((self.page_index, self.page_size), (Some(_), Some(size)) if size > 0)
    }

    /// Rows to skip. Page indexes below 1 are treated as the first page.
    pub fn skip(&self) -> usize {
        match (self.page_index, self.page_size) {
            (Some(index), Some(size)) if size > 0 => {
                let rows = (index.max(1) - 1).saturating_mul(size);
                usize::try_from(rows).unwrap_or(usize::MAX)
            }
            _ => 0,
        }
    }

    /// Rows to take.
    pub fn take(&self) -> usize {
        self.page_size
            .and_then(|size| usize::try_from(size).ok())
            .unwrap_or(0)
    }
}

/// A top-N row limit independent of paging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topping {
    /// Maximum number of rows.
    pub top_rows: Option<i64>,
}

impl Topping {
    /// Topping applies only for a positive row count.
    pub fn is_enabled(&self) -> bool {
        self.top_rows.is_some_and(|rows| rows > 0)
    }

    /// Rows to take.
    pub fn take(&self) -> usize {
        self.top_rows
            .and_then(|rows| usize::try_from(rows).ok())
            .unwrap_or(0)
    }
}
