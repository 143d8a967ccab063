//! Pagination and sorting helpers shared by every list endpoint.

use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};

const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 100;

/// Common list query string: `?page=2&limit=20&search=abc&sort_by=name&sort_dir=asc`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    /// 1-based page index
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
}

impl ListQuery {
    /// Page and limit after clamping: page >= 1, limit in 1..=100.
    pub fn page_and_limit(&self) -> (u32, u32) {
        let page = self.page.filter(|p| *p > 0).unwrap_or(1);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        (page, limit)
    }

    /// `(limit, offset)` ready for binding.
    pub fn limit_offset(&self) -> (i64, i64) {
        let (page, limit) = self.page_and_limit();
        (limit as i64, (page as i64 - 1) * limit as i64)
    }

    /// `%term%` for ILIKE filters, or None for an empty search.
    pub fn search_pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                let escaped = s
                    .replace('\\', "\\\\")
                    .replace('%', "\\%")
                    .replace('_', "\\_");
                format!("%{escaped}%")
            })
    }

    /// Resolve `sort_by`/`sort_dir` into an ORDER BY fragment.
    ///
    /// Only columns in `allowed` are accepted, anything else falls back to
    /// `default_column`, so the result is safe to push into SQL.
    pub fn order_by(&self, allowed: &[&'static str], default_column: &'static str) -> String {
        let column = self
            .sort_by
            .as_deref()
            .and_then(|requested| allowed.iter().find(|c| **c == requested))
            .copied()
            .unwrap_or(default_column);
        let direction = match self.sort_dir.as_deref().map(str::to_ascii_lowercase) {
            Some(d) if d == "asc" => "ASC",
            _ => "DESC",
        };
        format!("{column} {direction}")
    }

    /// Append `ORDER BY ... LIMIT ... OFFSET ...` to a query.
    pub fn push_page(
        &self,
        builder: &mut QueryBuilder<'_, Postgres>,
        allowed: &[&'static str],
        default_column: &'static str,
    ) {
        let (limit, offset) = self.limit_offset();
        builder
            .push(" ORDER BY ")
            .push(self.order_by(allowed, default_column))
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
    }
}

/// One page of results.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total_items: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, query: &ListQuery, total_items: i64) -> Self {
        let (page, limit) = query.page_and_limit();
        let total_pages = (total_items + limit as i64 - 1) / limit as i64;
        Self {
            data,
            page,
            limit,
            total_items,
            total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            total_items: self.total_items,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<u32>, limit: Option<u32>) -> ListQuery {
        ListQuery {
            page,
            limit,
            ..Default::default()
        }
    }

    #[test]
    fn clamps_zero_page_and_limit() {
        assert_eq!(query(Some(0), Some(0)).page_and_limit(), (1, 1));
        assert_eq!(query(None, None).page_and_limit(), (1, 10));
    }

    #[test]
    fn clamps_upper_limit_and_computes_offset() {
        let q = query(Some(3), Some(1000));
        assert_eq!(q.limit_offset(), (100, 200));
    }

    #[test]
    fn order_by_rejects_unknown_columns() {
        let q = ListQuery {
            sort_by: Some("name; DROP TABLE students".to_string()),
            sort_dir: Some("asc".to_string()),
            ..Default::default()
        };
        assert_eq!(q.order_by(&["name", "nis"], "created_at"), "created_at ASC");
    }

    #[test]
    fn order_by_accepts_whitelisted_column() {
        let q = ListQuery {
            sort_by: Some("nis".to_string()),
            sort_dir: Some("DESC".to_string()),
            ..Default::default()
        };
        assert_eq!(q.order_by(&["name", "nis"], "created_at"), "nis DESC");
    }

    #[test]
    fn search_pattern_escapes_wildcards() {
        let q = ListQuery {
            search: Some("  10%_off ".to_string()),
            ..Default::default()
        };
        assert_eq!(q.search_pattern().as_deref(), Some("%10\\%\\_off%"));
        assert!(ListQuery::default().search_pattern().is_none());
    }

    #[test]
    fn search_pattern_escapes_backslashes_first() {
        let q = ListQuery {
            search: Some("C:\\".to_string()),
            ..Default::default()
        };
        // The trailing wildcard stays a wildcard
        assert_eq!(q.search_pattern().as_deref(), Some("%C:\\\\%"));

        let q = ListQuery {
            search: Some("a\\%".to_string()),
            ..Default::default()
        };
        assert_eq!(q.search_pattern().as_deref(), Some("%a\\\\\\%%"));
    }

    #[test]
    fn page_counts_partial_pages() {
        let page = Page::new(vec![1, 2, 3], &query(Some(1), Some(3)), 7);
        assert_eq!(page.total_pages, 3);
        let empty: Page<i32> = Page::new(vec![], &query(None, None), 0);
        assert_eq!(empty.total_pages, 0);
    }
}
