//! Page/limit pagination shared by storage queries and in-memory slicing

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;

/// A requested page. Non-positive values fall back to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page: if page > 0 { page } else { DEFAULT_PAGE },
            limit: if limit > 0 { limit } else { DEFAULT_LIMIT },
        }
    }

    /// Build from optional query values; `default_limit` applies when the
    /// limit is absent, coercion applies when it is present but invalid
    pub fn from_query(page: Option<i64>, limit: Option<i64>, default_limit: i64) -> Self {
        Self::new(page.unwrap_or(DEFAULT_PAGE), limit.unwrap_or(default_limit))
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// Pagination metadata returned next to a page of data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub current_page: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageInfo {
    pub fn new(request: PageRequest, total_items: i64) -> Self {
        let total_items = total_items.max(0);
        // ceil(total / limit) without overflowing on a huge limit
        let total_pages =
            total_items / request.limit + i64::from(total_items % request.limit != 0);
        Self {
            current_page: request.page,
            page_size: request.limit,
            total_items,
            total_pages,
            has_next: request.page < total_pages,
            has_prev: request.page > 1,
        }
    }
}

/// A page of data with its metadata
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}

impl<T> Page<T> {
    /// Wrap a page already sliced by storage
    pub fn from_parts(data: Vec<T>, request: PageRequest, total_items: i64) -> Self {
        Self {
            data,
            pagination: PageInfo::new(request, total_items),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

/// Slice an in-memory sequence
pub fn paginate<T: Clone>(items: &[T], request: PageRequest) -> Page<T> {
    let start = usize::try_from(request.offset()).unwrap_or(usize::MAX);
    let end = start.saturating_add(request.limit as usize).min(items.len());
    let data = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();
    Page::from_parts(data, request, items.len() as i64)
}
