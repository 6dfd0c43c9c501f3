use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::MetadataStore;
use crate::error::PersistenceError;
use crate::models::{Document, MetadataDriver, QueryRecord};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    file_type TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    file_hash TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    chunk_count INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (owner_id, file_hash)
);

CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id, created_at);

CREATE TABLE IF NOT EXISTS query_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id TEXT NOT NULL,
    question TEXT NOT NULL,
    answer TEXT NOT NULL,
    sources TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_query_history_owner ON query_history(owner_id, created_at);
"#;

const DOCUMENT_COLUMNS: &str =
    "id, owner_id, filename, file_type, file_size, file_hash, storage_key, chunk_count, created_at";

/// SQLite-backed metadata store for single-machine use.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

fn query_error(e: rusqlite::Error) -> PersistenceError {
    PersistenceError::QueryError(e.to_string())
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistenceError::InvalidRow(format!("bad timestamp '{}': {}", raw, e)))
}

/// Raw column values; timestamps are parsed after the row callback returns.
struct DocumentRow {
    document: Document,
    created_at: String,
}

fn read_document(row: &Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        document: Document {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            filename: row.get(2)?,
            file_type: row.get(3)?,
            file_size: row.get::<_, i64>(4)? as u64,
            file_hash: row.get(5)?,
            storage_key: row.get(6)?,
            chunk_count: row.get::<_, i64>(7)? as u32,
            created_at: DateTime::<Utc>::MIN_UTC,
        },
        created_at: row.get(8)?,
    })
}

impl DocumentRow {
    fn into_document(self) -> Result<Document, PersistenceError> {
        let mut document = self.document;
        document.created_at = parse_timestamp(&self.created_at)?;
        Ok(document)
    }
}

impl SqliteMetadataStore {
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        }
        let conn =
            Connection::open(path).map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(query_error)?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(SCHEMA).map_err(query_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| PersistenceError::Unavailable("connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| PersistenceError::Unavailable(e.to_string()))?
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn find_by_hash(
        &self,
        owner_id: &str,
        file_hash: &str,
    ) -> Result<Option<Document>, PersistenceError> {
        let owner_id = owner_id.to_string();
        let file_hash = file_hash.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM documents WHERE owner_id = ?1 AND file_hash = ?2",
                DOCUMENT_COLUMNS
            );
            conn.query_row(&sql, params![owner_id, file_hash], read_document)
                .optional()
                .map_err(query_error)?
                .map(DocumentRow::into_document)
                .transpose()
        })
        .await
    }

    async fn insert_document(&self, document: &Document) -> Result<(), PersistenceError> {
        let doc = document.clone();
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO documents (id, owner_id, filename, file_type, file_size, file_hash,
                                        storage_key, chunk_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    doc.id,
                    doc.owner_id,
                    doc.filename,
                    doc.file_type,
                    doc.file_size as i64,
                    doc.file_hash,
                    doc.storage_key,
                    i64::from(doc.chunk_count),
                    timestamp(&doc.created_at),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(PersistenceError::Conflict {
                        owner_id: doc.owner_id,
                        file_hash: doc.file_hash,
                    })
                }
                Err(e) => Err(query_error(e)),
            }
        })
        .await
    }

    async fn get_document(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, PersistenceError> {
        let owner_id = owner_id.to_string();
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM documents WHERE id = ?1 AND owner_id = ?2",
                DOCUMENT_COLUMNS
            );
            conn.query_row(&sql, params![document_id, owner_id], read_document)
                .optional()
                .map_err(query_error)?
                .map(DocumentRow::into_document)
                .transpose()
        })
        .await
    }

    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>, PersistenceError> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM documents WHERE owner_id = ?1 ORDER BY created_at DESC, id",
                DOCUMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(query_error)?;
            let rows = stmt
                .query_map(params![owner_id], read_document)
                .map_err(query_error)?;

            let mut documents = Vec::new();
            for row in rows {
                documents.push(row.map_err(query_error)?.into_document()?);
            }
            Ok(documents)
        })
        .await
    }

    async fn delete_document(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<bool, PersistenceError> {
        let owner_id = owner_id.to_string();
        let document_id = document_id.to_string();
        self.with_conn(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM documents WHERE id = ?1 AND owner_id = ?2",
                    params![document_id, owner_id],
                )
                .map_err(query_error)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn insert_query(&self, record: &QueryRecord) -> Result<(), PersistenceError> {
        let record = record.clone();
        let sources = serde_json::to_string(&record.sources)
            .map_err(|e| PersistenceError::QueryError(e.to_string()))?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO query_history (owner_id, question, answer, sources, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.owner_id,
                    record.question,
                    record.answer,
                    sources,
                    timestamp(&record.created_at),
                ],
            )
            .map_err(query_error)?;
            Ok(())
        })
        .await
    }

    async fn recent_queries(
        &self,
        owner_id: &str,
        limit: u32,
    ) -> Result<Vec<QueryRecord>, PersistenceError> {
        let owner_id = owner_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT owner_id, question, answer, sources, created_at FROM query_history
                     WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
                )
                .map_err(query_error)?;
            let rows = stmt
                .query_map(params![owner_id, i64::from(limit)], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(query_error)?;

            let mut records = Vec::new();
            for row in rows {
                let (owner_id, question, answer, sources, created_at) = row.map_err(query_error)?;
                records.push(QueryRecord {
                    owner_id,
                    question,
                    answer,
                    sources: serde_json::from_str(&sources)
                        .map_err(|e| PersistenceError::InvalidRow(e.to_string()))?,
                    created_at: parse_timestamp(&created_at)?,
                });
            }
            Ok(records)
        })
        .await
    }

    fn driver(&self) -> MetadataDriver {
        MetadataDriver::Sqlite
    }
}
