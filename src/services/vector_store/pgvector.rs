use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;

use super::{MAX_IDENTIFIER_LEN, VectorStore, collection_name, short_digest};
use crate::error::VectorStoreError;
use crate::models::{ChunkPayload, ScoredRecord, VectorDriver, VectorRecord, VectorStoreConfig};

/// PostgreSQL + pgvector backend; one table per owner.
pub struct PgVectorBackend {
    pool: PgPool,
    schema: Option<String>,
    prefix: Option<String>,
}

/// Connection-level failures become `Unavailable`.
fn classify(err: sqlx::Error, otherwise: fn(String) -> VectorStoreError) -> VectorStoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_) => VectorStoreError::Unavailable(err.to_string()),
        other => otherwise(other.to_string()),
    }
}

impl PgVectorBackend {
    pub async fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let url = config.postgres.database_url.as_deref().ok_or_else(|| {
            VectorStoreError::PostgresError(
                "vector_store.postgres.database_url (or DATABASE_URL) is required".to_string(),
            )
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))?;

        let backend = Self {
            pool,
            schema: config.postgres.schema.clone(),
            prefix: config.collection_prefix.clone(),
        };

        backend.check_pgvector_extension().await?;

        if let Some(ref schema) = backend.schema {
            backend.ensure_schema(schema).await?;
        }

        Ok(backend)
    }

    async fn check_pgvector_extension(&self) -> Result<(), VectorStoreError> {
        let result: Option<(String,)> =
            sqlx::query_as("SELECT extname FROM pg_extension WHERE extname = 'vector'")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| classify(e, VectorStoreError::PostgresError))?;

        if result.is_none() {
            return Err(VectorStoreError::PgVectorExtensionError(
                "pgvector extension is not installed. Run: CREATE EXTENSION vector;".to_string(),
            ));
        }

        Ok(())
    }

    async fn ensure_schema(&self, schema: &str) -> Result<(), VectorStoreError> {
        let query = format!("CREATE SCHEMA IF NOT EXISTS {}", schema);
        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, VectorStoreError::PostgresError))?;
        Ok(())
    }

    fn table(&self, owner: &str) -> (String, String) {
        let name = collection_name(self.prefix.as_deref(), owner);
        let qualified = match &self.schema {
            Some(schema) => format!("{}.{}", schema, name),
            None => name.clone(),
        };
        (name, qualified)
    }

    async fn table_exists(&self, name: &str) -> Result<bool, VectorStoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = COALESCE($1, current_schema()) AND table_name = $2",
        )
        .bind(&self.schema)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, VectorStoreError::CollectionError))?;

        Ok(row.is_some())
    }
}

fn read_row(row: &PgRow) -> Result<ScoredRecord, VectorStoreError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;
    let invalid = |e: sqlx::Error| VectorStoreError::InvalidPayload {
        id: id.clone(),
        reason: e.to_string(),
    };

    let score: f64 = row.try_get("score").map_err(invalid)?;
    let chunk_index: i32 = row.try_get("chunk_index").map_err(invalid)?;
    let page: Option<i32> = row.try_get("page").map_err(invalid)?;
    let char_offset: Option<i64> = row.try_get("char_offset").map_err(invalid)?;

    let payload = ChunkPayload {
        document_id: row.try_get("document_id").map_err(invalid)?,
        owner_id: row.try_get("owner_id").map_err(invalid)?,
        filename: row.try_get("filename").map_err(invalid)?,
        file_type: row.try_get("file_type").map_err(invalid)?,
        chunk_index: chunk_index.max(0) as u32,
        content: row.try_get("content").map_err(invalid)?,
        page: page.map(|p| p as u32),
        offset: char_offset.map(|o| o as u64),
    };

    Ok(ScoredRecord {
        id,
        score: score as f32,
        payload,
    })
}

/// `{table}_{column}_idx`, or a hashed form when that would be truncated.
/// Index names share a namespace across tables, so they must stay distinct.
fn index_name(table: &str, column: &str) -> String {
    let name = format!("{}_{}_idx", table, column);
    if name.len() <= MAX_IDENTIFIER_LEN {
        name
    } else {
        format!("idx_{}_{}", short_digest(table), column)
    }
}

#[async_trait]
impl VectorStore for PgVectorBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::Unavailable(e.to_string()))
    }

    async fn ensure_collection(&self, owner: &str, dimension: u64) -> Result<(), VectorStoreError> {
        let (name, table) = self.table(owner);
        if self.table_exists(&name).await? {
            return Ok(());
        }

        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id UUID PRIMARY KEY,
                document_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                file_type TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                page INTEGER,
                char_offset BIGINT,
                embedding vector({}) NOT NULL
            )
            "#,
            table, dimension
        );

        sqlx::query(&create_table)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, VectorStoreError::CollectionError))?;

        let indices = [
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING hnsw (embedding vector_cosine_ops)",
                index_name(&name, "embedding"),
                table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (document_id)",
                index_name(&name, "document_id"),
                table
            ),
        ];

        for index_sql in &indices {
            sqlx::query(index_sql)
                .execute(&self.pool)
                .await
                .map_err(|e| classify(e, VectorStoreError::CollectionError))?;
        }

        tracing::info!(owner, table = %table, dimension, "created vector table");
        Ok(())
    }

    async fn upsert(
        &self,
        owner: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), VectorStoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let (_, table) = self.table(owner);
        let query = format!(
            r#"
            INSERT INTO {} (id, document_id, owner_id, filename, file_type, chunk_index,
                            content, page, char_offset, embedding)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                document_id = EXCLUDED.document_id,
                owner_id = EXCLUDED.owner_id,
                filename = EXCLUDED.filename,
                file_type = EXCLUDED.file_type,
                chunk_index = EXCLUDED.chunk_index,
                content = EXCLUDED.content,
                page = EXCLUDED.page,
                char_offset = EXCLUDED.char_offset,
                embedding = EXCLUDED.embedding
            "#,
            table
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify(e, VectorStoreError::UpsertError))?;

        for record in records {
            let id = uuid::Uuid::parse_str(&record.id)
                .map_err(|e| VectorStoreError::UpsertError(format!("invalid UUID: {}", e)))?;
            let payload = record.payload;

            sqlx::query(&query)
                .bind(id)
                .bind(&payload.document_id)
                .bind(&payload.owner_id)
                .bind(&payload.filename)
                .bind(&payload.file_type)
                .bind(payload.chunk_index as i32)
                .bind(&payload.content)
                .bind(payload.page.map(|p| p as i32))
                .bind(payload.offset.map(|o| o as i64))
                .bind(Vector::from(record.vector))
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(e, VectorStoreError::UpsertError))?;
        }

        tx.commit()
            .await
            .map_err(|e| classify(e, VectorStoreError::UpsertError))?;

        Ok(())
    }

    async fn search(
        &self,
        owner: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError> {
        let (name, table) = self.table(owner);
        if !self.table_exists(&name).await? {
            return Ok(Vec::new());
        }

        let query = format!(
            r#"
            SELECT
                id::text AS id,
                1 - (embedding <=> $1) AS score,
                document_id, owner_id, filename, file_type, chunk_index,
                content, page, char_offset
            FROM {}
            ORDER BY embedding <=> $1
            LIMIT $2
            "#,
            table
        );

        let rows = sqlx::query(&query)
            .bind(Vector::from(vector))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, VectorStoreError::SearchError))?;

        rows.iter().map(read_row).collect()
    }

    async fn delete_by_document(
        &self,
        owner: &str,
        document_id: &str,
    ) -> Result<(), VectorStoreError> {
        let (name, table) = self.table(owner);
        if !self.table_exists(&name).await? {
            return Ok(());
        }

        let query = format!("DELETE FROM {} WHERE document_id = $1", table);
        sqlx::query(&query)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, VectorStoreError::DeleteError))?;

        Ok(())
    }

    async fn count_by_document(
        &self,
        owner: &str,
        document_id: &str,
    ) -> Result<u64, VectorStoreError> {
        let (name, table) = self.table(owner);
        if !self.table_exists(&name).await? {
            return Ok(0);
        }

        let query = format!("SELECT COUNT(*) FROM {} WHERE document_id = $1", table);
        let row: (i64,) = sqlx::query_as(&query)
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, VectorStoreError::CountError))?;

        Ok(row.0 as u64)
    }

    fn driver(&self) -> VectorDriver {
        VectorDriver::PostgreSQL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name_short_table() {
        assert_eq!(
            index_name("user_alice_docs", "embedding"),
            "user_alice_docs_embedding_idx"
        );
    }

    #[test]
    fn test_index_name_long_tables_stay_distinct() {
        let a = collection_name(Some("tenant_production"), &format!("{}_one", "x".repeat(40)));
        let b = collection_name(Some("tenant_production"), &format!("{}_two", "x".repeat(40)));

        let (ia, ib) = (index_name(&a, "document_id"), index_name(&b, "document_id"));
        assert!(ia.len() <= MAX_IDENTIFIER_LEN);
        assert!(ib.len() <= MAX_IDENTIFIER_LEN);
        assert_ne!(ia, ib);
    }
}
