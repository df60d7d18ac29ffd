//! Pagination metadata shared by list, search, and discovery responses

use serde::{Deserialize, Serialize};

/// Query-side pagination parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageParams {
    /// 1-based page number
    #[serde(default = "default_page")]
    pub page: usize,

    /// Items per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl PageParams {
    /// Clamp to sane bounds: page ≥ 1, 1 ≤ page_size ≤ `max_page_size`
    #[must_use]
    pub fn clamped(self, max_page_size: usize) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, max_page_size),
        }
    }
}

/// Response-side pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageInfo {
    pub current_page: usize,
    pub page_size: usize,
    pub total_agents: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageInfo {
    /// Derive metadata for a total item count under `params`
    #[must_use]
    pub fn new(params: PageParams, total: usize) -> Self {
        let total_pages = total.div_ceil(params.page_size).max(1);
        let current_page = params.page.min(total_pages);
        Self {
            current_page,
            page_size: params.page_size,
            total_agents: total,
            total_pages,
            has_next: current_page < total_pages,
            has_prev: current_page > 1,
        }
    }

    /// Slice bounds for the current page over a collection of `total` items
    #[must_use]
    pub fn bounds(&self) -> (usize, usize) {
        let start = (self.current_page - 1) * self.page_size;
        let end = (start + self.page_size).min(self.total_agents);
        (start.min(end), end)
    }
}

/// Select the current page out of a full, already-ordered result set
pub fn paginate<T>(items: Vec<T>, params: PageParams) -> (Vec<T>, PageInfo) {
    let info = PageInfo::new(params, items.len());
    let (start, end) = info.bounds();
    let page = items.into_iter().skip(start).take(end - start).collect();
    (page, info)
}

const fn default_page() -> usize {
    1
}

const fn default_page_size() -> usize {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_has_one_page() {
        let info = PageInfo::new(PageParams::default(), 0);
        assert_eq!(info.total_pages, 1);
        assert_eq!(info.current_page, 1);
        assert!(!info.has_next);
        assert!(!info.has_prev);
    }

    #[test]
    fn test_page_navigation_flags() {
        let params = PageParams {
            page: 2,
            page_size: 10,
        };
        let info = PageInfo::new(params, 35);
        assert_eq!(info.total_pages, 4);
        assert!(info.has_next);
        assert!(info.has_prev);
    }

    #[test]
    fn test_page_past_end_clamps() {
        let params = PageParams {
            page: 99,
            page_size: 10,
        };
        let (items, info) = paginate((0..25).collect::<Vec<_>>(), params);
        assert_eq!(info.current_page, 3);
        assert_eq!(items, vec![20, 21, 22, 23, 24]);
    }

    #[test]
    fn test_clamped_params() {
        let params = PageParams {
            page: 0,
            page_size: 10_000,
        }
        .clamped(100);
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, 100);
    }

    #[test]
    fn test_paginate_slices_in_order() {
        let params = PageParams {
            page: 1,
            page_size: 3,
        };
        let (items, info) = paginate(vec!["a", "b", "c", "d"], params);
        assert_eq!(items, vec!["a", "b", "c"]);
        assert!(info.has_next);
    }
}
