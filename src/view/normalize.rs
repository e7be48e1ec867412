//! Canonical envelope for paginated list responses
//!
//! Endpoints in front of the same backend disagree on pagination shape:
//! bare arrays, `{items, totalPages}`, Spring-style `{content, totalElements}`
//! and offset/limit `{items, total}`. [`normalize`] reduces all of them to a
//! [`ListEnvelope`] by a fixed fallback order and never fails.

use serde::Serialize;
use serde_json::Value;

/// Result of one list fetch, whatever shape the server answered with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListEnvelope {
    pub items: Vec<Value>,
    /// Always >= 1, so an empty list still has one (empty) page
    pub total_pages: u32,
    /// Record count when the server reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_elements: Option<u64>,
}

impl ListEnvelope {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_pages: 1,
            total_elements: None,
        }
    }
}

impl Default for ListEnvelope {
    fn default() -> Self {
        Self::empty()
    }
}

/// Normalize a list response body.
///
/// Items: the body itself if it is an array, else `items`, else `content`,
/// else nothing. Pages: a positive `totalPages`, else `ceil(total / size)`
/// from `total` or `totalElements`, else 1.
pub fn normalize(raw: &Value, requested_size: u32) -> ListEnvelope {
    let items = resolve_items(raw);
    let total_elements = resolve_count(raw);

    let total_pages = positive_number(raw.get("totalPages"))
        .map(|pages| pages.ceil() as u32)
        .or_else(|| total_elements.map(|count| pages_for(count, requested_size)))
        .unwrap_or(1)
        .max(1);

    ListEnvelope {
        items,
        total_pages,
        total_elements,
    }
}

/// The page size the server actually used, when it echoes one that differs
/// from what was requested.
pub fn size_hint(raw: &Value, requested_size: u32) -> Option<u32> {
    positive_number(raw.get("size"))
        .map(|size| size as u32)
        .filter(|size| *size > 0 && *size != requested_size)
}

fn resolve_items(raw: &Value) -> Vec<Value> {
    if let Value::Array(items) = raw {
        return items.clone();
    }
    ["items", "content"]
        .iter()
        .find_map(|key| raw.get(key).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

fn resolve_count(raw: &Value) -> Option<u64> {
    ["total", "totalElements"]
        .iter()
        .find_map(|key| raw.get(key).and_then(Value::as_f64))
        .filter(|count| count.is_finite() && *count >= 0.0)
        .map(|count| count as u64)
}

fn pages_for(count: u64, requested_size: u32) -> u32 {
    let size = u64::from(requested_size.max(1));
    let pages = count.div_ceil(size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

fn positive_number(value: Option<&Value>) -> Option<f64> {
    value
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite() && *n > 0.0)
}
