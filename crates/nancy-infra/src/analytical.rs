//! Analytical brain: structured-field, tabular, and document-registry
//! storage backed by SQLite.
//!
//! Grounded on `brain_infra::database::DatabaseManager` for pool setup and
//! schema migration style, generalized from Brain's memory/concept tables
//! to the `documents` / `structured_fields` / `document_tables` /
//! `file_state` / `spreadsheet_registry` shape spec.md §6's storage layout
//! names. Table storage itself was left as a `# TODO` in the original
//! implementation; this backend implements it for real, serializing each
//! table's rows to JSON rather than modeling arbitrary columns relationally.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nancy_core::contracts::{AnalyticalStore, BrainHealth, BrainResult};
use nancy_types::error::{NancyError, Result};
use nancy_types::packet::AnalyticalData;
use nancy_types::storage::{
    normalize_column_name, DocumentMetadataRecord, DocumentQueryFilter, DocumentRecord, FileStateObservation,
};
use sqlx::{Row, SqlitePool};

pub struct SqliteAnalyticalStore {
    pool: SqlitePool,
}

impl SqliteAnalyticalStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await.map_err(|e| {
            NancyError::BackendUnavailable {
                brain: format!("analytical ({e})"),
            }
        })?;
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn connect_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let url = format!("sqlite:{}", path.as_ref().display());
        Self::connect(&url).await
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                doc_id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                size INTEGER NOT NULL,
                file_type TEXT NOT NULL,
                author TEXT,
                ingested_at TEXT NOT NULL,
                metadata_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sqlx_err("documents"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS structured_fields (
                document_id TEXT NOT NULL,
                field_key TEXT NOT NULL,
                field_value TEXT NOT NULL,
                PRIMARY KEY (document_id, field_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sqlx_err("structured_fields"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_tables (
                document_id TEXT NOT NULL,
                table_name TEXT NOT NULL,
                columns_json TEXT NOT NULL,
                rows_json TEXT NOT NULL,
                PRIMARY KEY (document_id, table_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sqlx_err("document_tables"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_statistics (
                document_id TEXT NOT NULL,
                stat_key TEXT NOT NULL,
                stat_value REAL NOT NULL,
                PRIMARY KEY (document_id, stat_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sqlx_err("document_statistics"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spreadsheet_registry (
                doc_id TEXT NOT NULL,
                sheet_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                column_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (doc_id, table_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sqlx_err("spreadsheet_registry"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_state (
                path TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                size INTEGER NOT NULL,
                processing_status TEXT NOT NULL,
                doc_id TEXT,
                error_message TEXT,
                root TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sqlx_err("file_state"))?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn sqlx_err(table: &'static str) -> impl Fn(sqlx::Error) -> NancyError {
    move |e| NancyError::Other(format!("analytical brain: failed on {table}: {e}"))
}

#[async_trait]
impl AnalyticalStore for SqliteAnalyticalStore {
    async fn upsert(&self, document_id: &str, data: &AnalyticalData) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| NancyError::Other(format!("analytical brain: begin tx: {e}")))?;

        for (key, value) in &data.structured_fields {
            let value_str = value.to_string();
            sqlx::query(
                "INSERT INTO structured_fields (document_id, field_key, field_value) VALUES (?, ?, ?)
                 ON CONFLICT(document_id, field_key) DO UPDATE SET field_value = excluded.field_value",
            )
            .bind(document_id)
            .bind(key)
            .bind(value_str)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_err("structured_fields"))?;
        }

        for table in &data.table_data {
            let columns_json = serde_json::to_string(&table.columns)?;
            let rows_json = serde_json::to_string(&table.rows)?;
            sqlx::query(
                "INSERT INTO document_tables (document_id, table_name, columns_json, rows_json) VALUES (?, ?, ?, ?)
                 ON CONFLICT(document_id, table_name) DO UPDATE SET columns_json = excluded.columns_json, rows_json = excluded.rows_json",
            )
            .bind(document_id)
            .bind(&table.table_name)
            .bind(columns_json)
            .bind(rows_json)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_err("document_tables"))?;
        }

        if let Some(statistics) = &data.statistics {
            for (key, value) in statistics {
                sqlx::query(
                    "INSERT INTO document_statistics (document_id, stat_key, stat_value) VALUES (?, ?, ?)
                     ON CONFLICT(document_id, stat_key) DO UPDATE SET stat_value = excluded.stat_value",
                )
                .bind(document_id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(sqlx_err("document_statistics"))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| NancyError::Other(format!("analytical brain: commit tx: {e}")))?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        for table in [
            "structured_fields",
            "document_tables",
            "document_statistics",
            "documents",
            "spreadsheet_registry",
        ] {
            let column = if table == "documents" { "doc_id" } else { "document_id" };
            let column = if table == "spreadsheet_registry" { "doc_id" } else { column };
            sqlx::query(&format!("DELETE FROM {table} WHERE {column} = ?"))
                .bind(document_id)
                .execute(&self.pool)
                .await
                .map_err(sqlx_err("delete"))?;
        }
        Ok(())
    }

    async fn upsert_document_metadata(&self, record: &DocumentMetadataRecord) -> Result<()> {
        let metadata_json = serde_json::to_string(&record.metadata)?;
        let ingested_at = record.ingested_at.unwrap_or_else(Utc::now);
        sqlx::query(
            "INSERT INTO documents (doc_id, filename, size, file_type, author, ingested_at, metadata_json)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(doc_id) DO UPDATE SET
                filename = excluded.filename,
                size = excluded.size,
                file_type = excluded.file_type,
                author = excluded.author,
                metadata_json = excluded.metadata_json",
        )
        .bind(&record.doc_id)
        .bind(&record.filename)
        .bind(record.size as i64)
        .bind(&record.file_type)
        .bind(&record.author)
        .bind(ingested_at.to_rfc3339())
        .bind(metadata_json)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err("documents"))?;
        Ok(())
    }

    async fn register_table(
        &self,
        document_id: &str,
        table_name: &str,
        columns: &[String],
        rows: &[Vec<serde_json::Value>],
    ) -> Result<()> {
        let normalized_columns: Vec<String> = columns.iter().map(|c| normalize_column_name(c)).collect();
        let columns_json = serde_json::to_string(&normalized_columns)?;
        let rows_json = serde_json::to_string(rows)?;

        sqlx::query(
            "INSERT INTO document_tables (document_id, table_name, columns_json, rows_json) VALUES (?, ?, ?, ?)
             ON CONFLICT(document_id, table_name) DO UPDATE SET columns_json = excluded.columns_json, rows_json = excluded.rows_json",
        )
        .bind(document_id)
        .bind(table_name)
        .bind(&columns_json)
        .bind(&rows_json)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err("document_tables"))?;

        sqlx::query(
            "INSERT INTO spreadsheet_registry (doc_id, sheet_name, table_name, row_count, column_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(doc_id, table_name) DO UPDATE SET
                row_count = excluded.row_count,
                column_count = excluded.column_count",
        )
        .bind(document_id)
        .bind(table_name)
        .bind(table_name)
        .bind(rows.len() as i64)
        .bind(normalized_columns.len() as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(sqlx_err("spreadsheet_registry"))?;

        Ok(())
    }

    async fn query_documents(&self, filter: &DocumentQueryFilter) -> Result<Vec<DocumentRecord>> {
        let mut sql = String::from("SELECT doc_id, filename, size, file_type, author, ingested_at, metadata_json FROM documents WHERE 1=1");
        if filter.filename_contains.is_some() {
            sql.push_str(" AND filename LIKE ?");
        }
        if !filter.file_types.is_empty() {
            let placeholders = filter.file_types.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            sql.push_str(&format!(" AND file_type IN ({placeholders})"));
        }
        if filter.min_size.is_some() {
            sql.push_str(" AND size >= ?");
        }
        if filter.max_size.is_some() {
            sql.push_str(" AND size <= ?");
        }
        if filter.ingested_after.is_some() {
            sql.push_str(" AND ingested_at >= ?");
        }
        if filter.ingested_before.is_some() {
            sql.push_str(" AND ingested_at <= ?");
        }
        sql.push_str(" ORDER BY ingested_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        if let Some(substr) = &filter.filename_contains {
            query = query.bind(format!("%{substr}%"));
        }
        for file_type in &filter.file_types {
            query = query.bind(file_type);
        }
        if let Some(min_size) = filter.min_size {
            query = query.bind(min_size as i64);
        }
        if let Some(max_size) = filter.max_size {
            query = query.bind(max_size as i64);
        }
        if let Some(after) = filter.ingested_after {
            query = query.bind(after.to_rfc3339());
        }
        if let Some(before) = filter.ingested_before {
            query = query.bind(before.to_rfc3339());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(sqlx_err("documents"))?;
        rows.iter().map(row_to_document_record).collect()
    }

    async fn query_by_filters(&self, filters: &HashMap<String, String>) -> Result<Vec<BrainResult>> {
        let mut results = Vec::new();
        for (key, value) in filters {
            let rows = sqlx::query(
                "SELECT document_id, field_value FROM structured_fields WHERE field_key = ? AND field_value = ?",
            )
            .bind(key)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err("structured_fields"))?;

            for row in rows {
                let document_id: String = row.get("document_id");
                let field_value: String = row.get("field_value");
                results.push(BrainResult {
                    source_brain: "analytical",
                    document_id,
                    chunk_id: None,
                    content: format!("{key} = {field_value}"),
                    distance: 0.0,
                    metadata: HashMap::new(),
                });
            }
        }
        Ok(results)
    }

    async fn query_sql(&self, sql: &str) -> Result<Vec<BrainResult>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| NancyError::Other(format!("analytical brain: raw query failed: {e}")))?;

        let mut results = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let mut rendered = Vec::new();
            for column in row.columns() {
                if let Ok(value) = row.try_get::<String, _>(column.ordinal()) {
                    rendered.push(format!("{}={}", column.name(), value));
                }
            }
            results.push(BrainResult {
                source_brain: "analytical",
                document_id: format!("row_{i}"),
                chunk_id: None,
                content: rendered.join(", "),
                distance: 0.0,
                metadata: HashMap::new(),
            });
        }
        Ok(results)
    }

    async fn upsert_file_state(&self, observation: &FileStateObservation) -> Result<bool> {
        let existing = sqlx::query("SELECT content_hash, processing_status FROM file_state WHERE path = ?")
            .bind(&observation.path)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err("file_state"))?;

        let changed = match &existing {
            None => true,
            Some(row) => {
                let prior_hash: String = row.get("content_hash");
                let prior_status: String = row.get("processing_status");
                prior_hash != observation.content_hash || prior_status != "completed"
            }
        };

        let now = Utc::now().to_rfc3339();
        if existing.is_none() {
            sqlx::query(
                "INSERT INTO file_state (path, content_hash, last_modified, size, processing_status, doc_id, error_message, root, relative_path, created_at, updated_at)
                 VALUES (?, ?, ?, ?, 'pending', NULL, NULL, ?, ?, ?, ?)",
            )
            .bind(&observation.path)
            .bind(&observation.content_hash)
            .bind(observation.last_modified.to_rfc3339())
            .bind(observation.size as i64)
            .bind(&observation.root)
            .bind(&observation.relative_path)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err("file_state"))?;
        } else {
            sqlx::query(
                "UPDATE file_state SET content_hash = ?, last_modified = ?, size = ?, processing_status = 'pending', updated_at = ? WHERE path = ?",
            )
            .bind(&observation.content_hash)
            .bind(observation.last_modified.to_rfc3339())
            .bind(observation.size as i64)
            .bind(&now)
            .bind(&observation.path)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err("file_state"))?;
        }

        Ok(changed)
    }

    async fn mark_file_processed(&self, path: &str, completed: bool, error_message: Option<&str>) -> Result<()> {
        let status = if completed { "completed" } else { "error" };
        sqlx::query(
            "UPDATE file_state SET processing_status = ?, error_message = ?, updated_at = ? WHERE path = ?",
        )
        .bind(status)
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(path)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err("file_state"))?;
        Ok(())
    }

    async fn health(&self) -> Result<BrainHealth> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(BrainHealth::ok("sqlite pool reachable")),
            Err(e) => Ok(BrainHealth::unhealthy(format!("{e}"))),
        }
    }
}

fn row_to_document_record(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentRecord> {
    let metadata_json: String = row.get("metadata_json");
    let metadata: HashMap<String, String> = serde_json::from_str(&metadata_json)?;
    let ingested_at_str: String = row.get("ingested_at");
    let ingested_at: DateTime<Utc> = ingested_at_str
        .parse()
        .map_err(|e| NancyError::Other(format!("analytical brain: malformed ingested_at timestamp: {e}")))?;
    Ok(DocumentRecord {
        doc_id: row.get("doc_id"),
        filename: row.get("filename"),
        size: row.get::<i64, _>("size") as u64,
        file_type: row.get("file_type"),
        author: row.get("author"),
        ingested_at,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nancy_types::packet::NamedTable;

    #[tokio::test]
    async fn upsert_and_filter_structured_fields() {
        let store = SqliteAnalyticalStore::connect_in_memory().await.unwrap();
        let mut fields = HashMap::new();
        fields.insert("owner".to_string(), serde_json::json!("Sarah Chen"));
        let data = AnalyticalData {
            structured_fields: fields,
            table_data: Vec::new(),
            time_series: None,
            statistics: None,
        };
        store.upsert("doc1", &data).await.unwrap();

        let mut filters = HashMap::new();
        filters.insert("owner".to_string(), "\"Sarah Chen\"".to_string());
        let results = store.query_by_filters(&filters).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "doc1");
    }

    #[tokio::test]
    async fn table_rows_round_trip_through_json_encoding() {
        let store = SqliteAnalyticalStore::connect_in_memory().await.unwrap();
        let data = AnalyticalData {
            structured_fields: HashMap::new(),
            table_data: vec![NamedTable {
                table_name: "components".to_string(),
                columns: vec!["component_id".to_string(), "thermal_limit_c".to_string()],
                rows: vec![vec![serde_json::json!("PCB-001"), serde_json::json!(85.0)]],
            }],
            time_series: None,
            statistics: None,
        };
        store.upsert("doc1", &data).await.unwrap();

        let row = sqlx::query("SELECT rows_json FROM document_tables WHERE document_id = 'doc1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let rows_json: String = row.get("rows_json");
        assert!(rows_json.contains("PCB-001"));
    }

    #[tokio::test]
    async fn delete_document_removes_all_rows() {
        let store = SqliteAnalyticalStore::connect_in_memory().await.unwrap();
        let mut fields = HashMap::new();
        fields.insert("owner".to_string(), serde_json::json!("Sarah Chen"));
        let data = AnalyticalData {
            structured_fields: fields,
            table_data: Vec::new(),
            time_series: None,
            statistics: None,
        };
        store.upsert("doc1", &data).await.unwrap();
        store.delete_document("doc1").await.unwrap();

        let mut filters = HashMap::new();
        filters.insert("owner".to_string(), "\"Sarah Chen\"".to_string());
        let results = store.query_by_filters(&filters).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn health_check_reports_healthy_for_live_pool() {
        let store = SqliteAnalyticalStore::connect_in_memory().await.unwrap();
        let health = store.health().await.unwrap();
        assert!(health.healthy);
    }

    fn document_record(doc_id: &str, filename: &str, size: u64, file_type: &str) -> DocumentMetadataRecord {
        DocumentMetadataRecord {
            doc_id: doc_id.to_string(),
            filename: filename.to_string(),
            size,
            file_type: file_type.to_string(),
            author: Some("Sarah Chen".to_string()),
            ingested_at: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn reingesting_same_doc_id_leaves_one_row() {
        let store = SqliteAnalyticalStore::connect_in_memory().await.unwrap();
        store
            .upsert_document_metadata(&document_record("doc1", "report.txt", 1024, "text/plain"))
            .await
            .unwrap();
        store
            .upsert_document_metadata(&document_record("doc1", "report.txt", 2048, "text/plain"))
            .await
            .unwrap();

        let rows = store.query_documents(&DocumentQueryFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].size, 2048);
    }

    #[tokio::test]
    async fn query_documents_filters_by_file_type_and_filename_substring() {
        let store = SqliteAnalyticalStore::connect_in_memory().await.unwrap();
        store
            .upsert_document_metadata(&document_record("doc1", "thermal_report.txt", 100, "text/plain"))
            .await
            .unwrap();
        store
            .upsert_document_metadata(&document_record("doc2", "components.csv", 100, "text/csv"))
            .await
            .unwrap();

        let filter = DocumentQueryFilter {
            file_types: vec!["text/csv".to_string()],
            ..Default::default()
        };
        let rows = store.query_documents(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].doc_id, "doc2");

        let filter = DocumentQueryFilter {
            filename_contains: Some("thermal".to_string()),
            ..Default::default()
        };
        let rows = store.query_documents(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].doc_id, "doc1");
    }

    #[tokio::test]
    async fn file_state_reports_changed_on_hash_difference_and_incomplete_status() {
        let store = SqliteAnalyticalStore::connect_in_memory().await.unwrap();
        let observation = FileStateObservation {
            path: "/watch/components.csv".to_string(),
            content_hash: "hash_a".to_string(),
            last_modified: Utc::now(),
            size: 1024,
            root: "/watch".to_string(),
            relative_path: "components.csv".to_string(),
        };

        assert!(store.upsert_file_state(&observation).await.unwrap(), "first observation is always a change");
        // Status is still "pending" (never marked processed), so re-observing the
        // identical hash should still report changed.
        assert!(store.upsert_file_state(&observation).await.unwrap());

        store.mark_file_processed(&observation.path, true, None).await.unwrap();
        assert!(!store.upsert_file_state(&observation).await.unwrap(), "completed + unchanged hash is not a change");

        let mut modified = observation.clone();
        modified.content_hash = "hash_b".to_string();
        assert!(store.upsert_file_state(&modified).await.unwrap(), "hash change is always a change");
    }

    #[tokio::test]
    async fn register_table_normalizes_column_names_and_updates_registry() {
        let store = SqliteAnalyticalStore::connect_in_memory().await.unwrap();
        store
            .register_table(
                "doc1",
                "components",
                &["Component ID".to_string(), "Thermal Limit (C)".to_string()],
                &[vec![serde_json::json!("PCB-001"), serde_json::json!(85.0)]],
            )
            .await
            .unwrap();

        let row = sqlx::query("SELECT columns_json FROM document_tables WHERE document_id = 'doc1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let columns_json: String = row.get("columns_json");
        assert!(columns_json.contains("component_id"));
        assert!(columns_json.contains("thermal_limit_c"));

        let registry_row = sqlx::query("SELECT row_count, column_count FROM spreadsheet_registry WHERE doc_id = 'doc1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let row_count: i64 = registry_row.get("row_count");
        assert_eq!(row_count, 1);
    }
}
