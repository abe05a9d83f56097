//! Paging descriptor and page result.

use serde::{Deserialize, Serialize};

/// Requested window of a filtered read.
///
/// `skip` absent or negative means no OFFSET. `take` absent means the
/// configured max page size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingParams {
    pub skip: Option<i64>,
    pub take: Option<i64>,
    /// Also compute the total number of matches.
    pub total: bool,
}

impl PagingParams {
    pub fn new(skip: i64, take: i64, total: bool) -> Self {
        Self {
            skip: Some(skip),
            take: Some(take),
            total,
        }
    }
}

/// One page of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPage<T> {
    pub items: Vec<T>,
    /// `None` when the total was not requested.
    pub total: Option<i64>,
}

impl<T> DataPage<T> {
    pub fn new(items: Vec<T>, total: Option<i64>) -> Self {
        Self { items, total }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
