// Pagination Engine - pure page math, no I/O
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;

/// Validate caller page/limit inputs, applying the `{1, 10}` defaults
pub fn normalize(page: Option<i64>, limit: Option<i64>) -> Result<(u64, u64), BrokerError> {
    let page = match page {
        None => DEFAULT_PAGE,
        Some(p) if p < 1 => {
            return Err(BrokerError::invalid_range(format!(
                "page must be >= 1, got {}",
                p
            )))
        }
        Some(p) => p as u64,
    };
    let limit = match limit {
        None => DEFAULT_LIMIT,
        Some(l) if l < 1 => {
            return Err(BrokerError::invalid_range(format!(
                "limit must be >= 1, got {}",
                l
            )))
        }
        Some(l) => l as u64,
    };
    Ok((page, limit))
}

/// Page coordinates to store offsets: `((page-1)*limit, limit)`
pub fn to_skip_take(page: u64, limit: u64) -> (u64, u64) {
    (page.saturating_sub(1) * limit, limit)
}

/// Build page metadata from a total count and the request coordinates.
/// `returned` is the actual page length, used only to flag store misbehavior.
pub fn to_meta(total: u64, page: u64, limit: u64, returned: usize) -> PageMeta {
    if returned as u64 > limit {
        tracing::warn!(
            returned,
            limit,
            "store returned more rows than the page limit"
        );
    }
    PageMeta {
        page,
        limit,
        total,
        total_pages: if limit == 0 { 0 } else { (total + limit - 1) / limit },
        has_next_page: page * limit < total,
        has_prev_page: page > 1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

/// One page of results plus its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_defaults() {
        assert_eq!(normalize(None, None).unwrap(), (1, 10));
        assert_eq!(normalize(Some(3), Some(25)).unwrap(), (3, 25));
    }

    #[test]
    fn test_normalize_rejects_bad_ranges() {
        assert!(normalize(Some(0), None).is_err());
        assert!(normalize(None, Some(-5)).is_err());
    }

    #[test]
    fn test_to_skip_take() {
        assert_eq!(to_skip_take(1, 10), (0, 10));
        assert_eq!(to_skip_take(3, 25), (50, 25));
    }

    #[test]
    fn test_meta_invariants() {
        let meta = to_meta(45, 2, 10, 10);
        assert_eq!(meta.total_pages, 5);
        assert!(meta.has_next_page);
        assert!(meta.has_prev_page);

        // Exact boundary: page*limit == total means no next page
        let meta = to_meta(30, 3, 10, 10);
        assert!(!meta.has_next_page);

        let meta = to_meta(0, 1, 10, 0);
        assert_eq!(meta.total_pages, 0);
        assert!(!meta.has_next_page);
        assert!(!meta.has_prev_page);
    }

    #[test]
    fn test_past_the_end_page() {
        let meta = to_meta(5, 9, 10, 0);
        assert_eq!(meta.total_pages, 1);
        assert!(!meta.has_next_page);
        assert!(meta.has_prev_page);
    }
}
