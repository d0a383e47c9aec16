use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

// Keeps `offset()` within i64 at the largest page size
const MAX_PAGE_NUMBER: i64 = i64::MAX / MAX_PAGE_SIZE;

/// 1-based page window, clamped to sane bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub size: i64,
}

impl Page {
    pub fn new(number: Option<i64>, size: Option<i64>) -> Self {
        Self {
            number: number.unwrap_or(1).clamp(1, MAX_PAGE_NUMBER),
            size: size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.number - 1) * self.size
    }

    pub fn summary(&self, total: i64) -> Pagination {
        Pagination {
            page: self.number,
            limit: self.size,
            total,
            total_pages: (total + self.size - 1) / self.size,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}
