//! Small shared helpers

use chrono::Utc;

/// Truncate a string to at most `max` characters, respecting char boundaries.
pub fn str_left(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Screenshot blob name for a source: `{source_id}_{yyyymmddhhmmss}.png`
pub fn snapshot_name(source_id: i64) -> String {
    format!("{}_{}.png", source_id, Utc::now().format("%Y%m%d%H%M%S"))
}
