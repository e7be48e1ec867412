//! Typed views of the few response bodies the console inspects

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::error::FieldError;

/// One bulk-import job (`GET /import`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOperation {
    pub id: i64,
    pub status: String,
    #[serde(default)]
    pub created_count: Option<i64>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

impl ImportOperation {
    pub fn started(&self) -> Option<NaiveDateTime> {
        self.started_at.as_deref().and_then(parse_local_time)
    }

    pub fn finished(&self) -> Option<NaiveDateTime> {
        self.finished_at.as_deref().and_then(parse_local_time)
    }

    /// Wall-clock duration, when both ends are known
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished()? - self.started()?)
    }
}

/// Result of `POST /import/<entity>/upload`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportResponse {
    pub created_count: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

/// The server serializes `LocalDateTime`, with or without fractional seconds.
fn parse_local_time(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()
}
