//! Page, sort and filter state of a list view

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }
}

impl std::str::FromStr for SortDir {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDir::Asc),
            "desc" => Ok(SortDir::Desc),
            _ => Err("dir must be 'asc' or 'desc'".to_string()),
        }
    }
}

/// What a list view asks the server for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    /// Zero-based page index
    pub page: u32,
    /// Page size, always > 0
    pub size: u32,
    /// Sort column
    pub sort: String,
    pub dir: SortDir,
    /// Filter field → value; empty values are not sent
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl PageQuery {
    pub fn new(size: u32, sort: impl Into<String>, dir: SortDir) -> Self {
        Self {
            page: 0,
            size: size.max(1),
            sort: sort.into(),
            dir,
            filters: BTreeMap::new(),
        }
    }

    /// Query-string pairs for the list endpoint.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("page".to_string(), self.page.to_string()),
            ("size".to_string(), self.size.to_string()),
            ("sort".to_string(), self.sort.clone()),
            ("dir".to_string(), self.dir.as_str().to_string()),
        ];
        params.extend(
            self.active_filters()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        params
    }

    /// Filters with a non-blank value.
    pub fn active_filters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.filters
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Apply a partial update. Returns true if anything changed.
    ///
    /// A change of sort, direction, filters or size sends the view back to page 0.
    pub fn apply(&mut self, patch: QueryPatch) -> bool {
        let before = self.clone();

        if let Some(page) = patch.page {
            self.page = page;
        }
        if let Some(size) = patch.size {
            self.size = size.max(1);
        }
        if let Some(sort) = patch.sort {
            self.sort = sort;
        }
        if let Some(dir) = patch.dir {
            self.dir = dir;
        }
        if let Some(filters) = patch.filters {
            self.filters = filters;
        }

        let criteria_changed = self.sort != before.sort
            || self.dir != before.dir
            || self.filters != before.filters
            || self.size != before.size;
        if criteria_changed {
            self.page = 0;
        }

        *self != before
    }

    /// Clamp `page` into `[0, total_pages - 1]`. Returns true if it moved.
    pub fn clamp_page(&mut self, total_pages: u32) -> bool {
        let last = total_pages.max(1) - 1;
        if self.page > last {
            self.page = last;
            true
        } else {
            false
        }
    }

    /// Patch for a click on a column header: the active column flips
    /// direction, any other column becomes the ascending sort.
    pub fn toggle_sort(&self, column: &str) -> QueryPatch {
        if self.sort == column {
            QueryPatch::default().dir(self.dir.flipped())
        } else {
            QueryPatch::default().sort(column).dir(SortDir::Asc)
        }
    }
}

impl Default for PageQuery {
    fn default() -> Self {
        Self::new(20, "id", SortDir::Asc)
    }
}

/// Partial update of a [`PageQuery`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPatch {
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub sort: Option<String>,
    pub dir: Option<SortDir>,
    /// Replaces the whole filter map
    pub filters: Option<BTreeMap<String, String>>,
}

impl QueryPatch {
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn dir(mut self, dir: SortDir) -> Self {
        self.dir = Some(dir);
        self
    }

    pub fn filters<K, V>(mut self, filters: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.filters = Some(
            filters
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_on_page(page: u32) -> PageQuery {
        let mut q = PageQuery::new(5, "id", SortDir::Asc);
        q.page = page;
        q
    }

    #[test]
    fn test_filter_change_resets_page() {
        let mut q = query_on_page(3);
        assert!(q.apply(QueryPatch::default().filters([("name", "bolt")])));
        assert_eq!(q.page, 0);
        assert_eq!(q.filters["name"], "bolt");
    }

    #[test]
    fn test_sort_and_dir_change_reset_page() {
        let mut q = query_on_page(3);
        q.apply(QueryPatch::default().sort("name"));
        assert_eq!(q.page, 0);

        let mut q = query_on_page(3);
        q.apply(QueryPatch::default().dir(SortDir::Desc));
        assert_eq!(q.page, 0);
    }

    #[test]
    fn test_size_change_resets_page_and_is_never_zero() {
        let mut q = query_on_page(2);
        q.apply(QueryPatch::default().size(0));
        assert_eq!(q.size, 1);
        assert_eq!(q.page, 0);
    }

    #[test]
    fn test_page_only_patch_keeps_page() {
        let mut q = query_on_page(0);
        assert!(q.apply(QueryPatch::default().page(4)));
        assert_eq!(q.page, 4);
    }

    #[test]
    fn test_criteria_change_wins_over_explicit_page() {
        let mut q = query_on_page(0);
        q.apply(QueryPatch::default().page(4).sort("price"));
        assert_eq!(q.page, 0);
    }

    #[test]
    fn test_unchanged_patch_reports_no_change() {
        let mut q = query_on_page(1);
        assert!(!q.apply(QueryPatch::default().sort("id").page(1)));
        assert!(!q.apply(QueryPatch::default()));
    }

    #[test]
    fn test_clamp_page() {
        let mut q = query_on_page(5);
        assert!(q.clamp_page(2));
        assert_eq!(q.page, 1);
        assert!(!q.clamp_page(2));

        let mut q = query_on_page(3);
        assert!(q.clamp_page(0));
        assert_eq!(q.page, 0);
    }

    #[test]
    fn test_toggle_sort() {
        let q = PageQuery::new(5, "name", SortDir::Asc);
        assert_eq!(q.toggle_sort("name"), QueryPatch::default().dir(SortDir::Desc));
        assert_eq!(
            q.toggle_sort("price"),
            QueryPatch::default().sort("price").dir(SortDir::Asc)
        );

        let q = PageQuery::new(5, "name", SortDir::Desc);
        assert_eq!(q.toggle_sort("name"), QueryPatch::default().dir(SortDir::Asc));
    }

    #[test]
    fn test_to_params_skips_blank_filters() {
        let mut q = PageQuery::new(20, "id", SortDir::Desc);
        q.filters.insert("name".into(), "acme".into());
        q.filters.insert("postalTownName".into(), "  ".into());

        let params = q.to_params();
        assert!(params.contains(&("dir".into(), "desc".into())));
        assert!(params.contains(&("name".into(), "acme".into())));
        assert!(!params.iter().any(|(k, _)| k == "postalTownName"));
    }
}
