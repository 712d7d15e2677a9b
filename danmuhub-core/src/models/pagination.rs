//! Pagination support for repository queries

use serde::{Deserialize, Serialize};

/// Default page size for list queries
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Maximum allowed page size to prevent OOM
pub const MAX_PAGE_SIZE: u32 = 500;

/// Minimum page number (1-indexed)
pub const MIN_PAGE: u32 = 1;

/// Pagination parameters for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    /// Page number (1-indexed)
    pub page: u32,
    /// Number of items per page
    pub page_size: u32,
}

impl PageParams {
    #[must_use]
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        let page = page.unwrap_or(MIN_PAGE).max(MIN_PAGE);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        Self { page, page_size }
    }

    /// Calculate OFFSET for SQL query
    #[must_use]
    pub const fn offset(&self) -> i64 {
        ((self.page - 1) * self.page_size) as i64
    }

    /// Get LIMIT for SQL query
    #[must_use]
    pub const fn limit(&self) -> i64 {
        self.page_size as i64
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Paginated response containing items and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(items: Vec<T>, total: u64, params: PageParams) -> Self {
        Self {
            items,
            total,
            page: params.page,
            page_size: params.page_size,
        }
    }

    /// Map the items to a different type, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let params = PageParams::default();
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn caps_at_max_page_size() {
        let params = PageParams::new(Some(1), Some(10_000));
        assert_eq!(params.page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn zero_page_clamps_to_first() {
        let params = PageParams::new(Some(0), Some(0));
        assert_eq!(params.page, MIN_PAGE);
        assert_eq!(params.page_size, 1);
    }

    #[test]
    fn offset_calculation() {
        assert_eq!(PageParams::new(Some(1), Some(20)).offset(), 0);
        assert_eq!(PageParams::new(Some(3), Some(50)).offset(), 100);
    }
}
