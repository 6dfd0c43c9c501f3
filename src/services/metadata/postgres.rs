use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;

use super::MetadataStore;
use crate::error::PersistenceError;
use crate::models::{Document, MetadataDriver, QueryRecord};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        filename TEXT NOT NULL,
        file_type TEXT NOT NULL,
        file_size BIGINT NOT NULL,
        file_hash TEXT NOT NULL,
        storage_key TEXT NOT NULL,
        chunk_count INTEGER NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (owner_id, file_hash)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents (owner_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS query_history (
        id BIGSERIAL PRIMARY KEY,
        owner_id TEXT NOT NULL,
        question TEXT NOT NULL,
        answer TEXT NOT NULL,
        sources JSONB NOT NULL DEFAULT '[]',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_query_history_owner ON query_history (owner_id, created_at DESC)",
];

const DOCUMENT_COLUMNS: &str =
    "id, owner_id, filename, file_type, file_size, file_hash, storage_key, chunk_count, created_at";

/// PostgreSQL-backed metadata store.
pub struct PostgresMetadataStore {
    pool: PgPool,
}

fn classify(err: sqlx::Error) -> PersistenceError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_) => PersistenceError::Unavailable(err.to_string()),
        other => PersistenceError::QueryError(other.to_string()),
    }
}

fn read_document(row: &PgRow) -> Result<Document, PersistenceError> {
    let invalid = |e: sqlx::Error| PersistenceError::InvalidRow(e.to_string());
    Ok(Document {
        id: row.try_get("id").map_err(invalid)?,
        owner_id: row.try_get("owner_id").map_err(invalid)?,
        filename: row.try_get("filename").map_err(invalid)?,
        file_type: row.try_get("file_type").map_err(invalid)?,
        file_size: row.try_get::<i64, _>("file_size").map_err(invalid)? as u64,
        file_hash: row.try_get("file_hash").map_err(invalid)?,
        storage_key: row.try_get("storage_key").map_err(invalid)?,
        chunk_count: row.try_get::<i32, _>("chunk_count").map_err(invalid)? as u32,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(invalid)?,
    })
}

impl PostgresMetadataStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), PersistenceError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(classify)?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn find_by_hash(
        &self,
        owner_id: &str,
        file_hash: &str,
    ) -> Result<Option<Document>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM documents WHERE owner_id = $1 AND file_hash = $2",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(owner_id)
            .bind(file_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.as_ref().map(read_document).transpose()
    }

    async fn insert_document(&self, document: &Document) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, filename, file_type, file_size, file_hash,
                                   storage_key, chunk_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&document.id)
        .bind(&document.owner_id)
        .bind(&document.filename)
        .bind(&document.file_type)
        .bind(document.file_size as i64)
        .bind(&document.file_hash)
        .bind(&document.storage_key)
        .bind(document.chunk_count as i32)
        .bind(document.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(PersistenceError::Conflict {
                    owner_id: document.owner_id.clone(),
                    file_hash: document.file_hash.clone(),
                })
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn get_document(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM documents WHERE id = $1 AND owner_id = $2",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(document_id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.as_ref().map(read_document).transpose()
    }

    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>, PersistenceError> {
        let query = format!(
            "SELECT {} FROM documents WHERE owner_id = $1 ORDER BY created_at DESC, id",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.iter().map(read_document).collect()
    }

    async fn delete_document(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<bool, PersistenceError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1 AND owner_id = $2")
            .bind(document_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_query(&self, record: &QueryRecord) -> Result<(), PersistenceError> {
        let sources = serde_json::to_string(&record.sources)
            .map_err(|e| PersistenceError::QueryError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO query_history (owner_id, question, answer, sources, created_at)
            VALUES ($1, $2, $3, $4::jsonb, $5)
            "#,
        )
        .bind(&record.owner_id)
        .bind(&record.question)
        .bind(&record.answer)
        .bind(sources)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    async fn recent_queries(
        &self,
        owner_id: &str,
        limit: u32,
    ) -> Result<Vec<QueryRecord>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id, question, answer, sources::text AS sources, created_at
            FROM query_history
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(owner_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.iter()
            .map(|row| {
                let invalid = |e: sqlx::Error| PersistenceError::InvalidRow(e.to_string());
                let sources: String = row.try_get("sources").map_err(invalid)?;
                Ok(QueryRecord {
                    owner_id: row.try_get("owner_id").map_err(invalid)?,
                    question: row.try_get("question").map_err(invalid)?,
                    answer: row.try_get("answer").map_err(invalid)?,
                    sources: serde_json::from_str(&sources)
                        .map_err(|e| PersistenceError::InvalidRow(e.to_string()))?,
                    created_at: row.try_get("created_at").map_err(invalid)?,
                })
            })
            .collect()
    }

    fn driver(&self) -> MetadataDriver {
        MetadataDriver::PostgreSQL
    }
}
