//! Shapes for the analytical brain's logical storage layout (spec.md §6):
//! the documents table, the file-state table backing directory-change
//! detection, and the spreadsheet registry. These are plain data records,
//! not the `AnalyticalStore` trait itself (that lives in
//! `nancy_core::contracts`), so that both the contract and its concrete
//! SQLite adapter in `nancy-infra` share one definition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row to upsert into the documents table. Idempotent on `doc_id`: a
/// second upsert of the same id is a no-op per spec.md §4.2.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadataRecord {
    pub doc_id: String,
    pub filename: String,
    pub size: u64,
    pub file_type: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub ingested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A row read back from the documents table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub filename: String,
    pub size: u64,
    pub file_type: String,
    pub author: Option<String>,
    pub ingested_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// Filter predicates for `AnalyticalStore::query_documents`: date ranges,
/// file-type sets, size bounds, and a filename substring, per spec.md §4.2.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentQueryFilter {
    #[serde(default)]
    pub filename_contains: Option<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub min_size: Option<u64>,
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub ingested_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ingested_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// The lifecycle of a watched file on disk, backing the directory-watcher's
/// change-detection table (spec.md §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileProcessingStatus {
    Pending,
    Completed,
    Error,
    Deleted,
}

/// An observation of a file on disk, used to detect whether it needs
/// (re-)ingestion. Mirrors spec.md §6's file-state table columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileStateObservation {
    pub path: String,
    pub content_hash: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    pub root: String,
    pub relative_path: String,
}

/// A single named table extracted from a spreadsheet-like document,
/// registered in the spreadsheet registry alongside its row/column counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpreadsheetRegistryEntry {
    pub doc_id: String,
    pub sheet_name: String,
    pub table_name: String,
    pub row_count: usize,
    pub column_count: usize,
}

/// Normalizes a column name to an identifier-safe form: lowercased, with
/// any run of non-alphanumeric characters collapsed to a single
/// underscore, and a leading digit prefixed with `col_` so the result is
/// always a valid SQL identifier. Grounded on the column-sanitization step
/// implied by spec.md §4.2's "normalizes column names to an
/// identifier-safe form".
pub fn normalize_column_name(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    let mut last_was_separator = false;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            normalized.push(ch.to_ascii_lowercase());
            last_was_separator = false;
        } else if !last_was_separator {
            normalized.push('_');
            last_was_separator = true;
        }
    }
    let trimmed = normalized.trim_matches('_').to_string();
    let trimmed = if trimmed.is_empty() {
        "column".to_string()
    } else {
        trimmed
    };
    if trimmed.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("col_{trimmed}")
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_spaces_and_punctuation() {
        assert_eq!(normalize_column_name("Thermal Limit (C)"), "thermal_limit_c");
    }

    #[test]
    fn prefixes_leading_digit() {
        assert_eq!(normalize_column_name("2024_revenue"), "col_2024_revenue");
    }

    #[test]
    fn empty_input_becomes_placeholder() {
        assert_eq!(normalize_column_name("   "), "column");
    }

    #[test]
    fn already_clean_name_is_unchanged() {
        assert_eq!(normalize_column_name("component_id"), "component_id");
    }
}
