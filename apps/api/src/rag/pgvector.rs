//! Postgres + pgvector implementation of `VectorIndex`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::index::{validate_entries, validate_query, VectorIndex};
use crate::errors::PipelineError;
use crate::models::document::{Chunk, EntryMetadata, IndexEntry, PageRange};

const DEFAULT_TABLE: &str = "resume_chunks";

pub struct PgVectorIndex {
    pool: PgPool,
    table: String,
    dimension: usize,
}

impl PgVectorIndex {
    /// Ensures the extension and table exist and that the stored vector
    /// dimension matches `dimension`.
    pub async fn connect(pool: PgPool, dimension: usize) -> Result<Self, PipelineError> {
        if dimension == 0 {
            return Err(PipelineError::InvalidConfig(
                "embedding dimension must be positive".to_string(),
            ));
        }
        let index = Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
            dimension,
        };
        index.ensure_schema().await?;
        info!(
            "pgvector index ready (table={}, dimension={})",
            index.table, index.dimension
        );
        Ok(index)
    }

    async fn ensure_schema(&self) -> Result<(), PipelineError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                chunk_order BIGINT NOT NULL,
                text TEXT NOT NULL,
                page_start INTEGER NOT NULL,
                page_end INTEGER NOT NULL,
                start_offset BIGINT NOT NULL,
                end_offset BIGINT NOT NULL,
                section TEXT,
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                embedding VECTOR({dims}) NOT NULL,
                seq BIGSERIAL
            )",
            table = self.table,
            dims = self.dimension
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

        // tables created before section chunking lack the column
        let section_ddl = format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS section TEXT",
            table = self.table
        );
        sqlx::query(&section_ddl)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

        let index_ddl = format!(
            "CREATE INDEX IF NOT EXISTS {table}_document_id_idx ON {table} (document_id)",
            table = self.table
        );
        sqlx::query(&index_ddl)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

        // vector(n) stores n as the column type modifier
        let stored: Option<i32> = sqlx::query_scalar(
            "SELECT atttypmod FROM pg_attribute \
             WHERE attrelid = to_regclass($1) AND attname = 'embedding'",
        )
        .bind(&self.table)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        match stored {
            Some(dims) if dims > 0 && dims as usize != self.dimension => {
                Err(PipelineError::InvalidConfig(format!(
                    "table {} stores {}-dimensional vectors but the embedding provider produces {}",
                    self.table, dims, self.dimension
                )))
            }
            _ => Ok(()),
        }
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} \
                (chunk_id, document_id, chunk_order, text, page_start, page_end, \
                 start_offset, end_offset, section, metadata, embedding) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (chunk_id) DO UPDATE SET \
                document_id = EXCLUDED.document_id, \
                chunk_order = EXCLUDED.chunk_order, \
                text = EXCLUDED.text, \
                page_start = EXCLUDED.page_start, \
                page_end = EXCLUDED.page_end, \
                start_offset = EXCLUDED.start_offset, \
                end_offset = EXCLUDED.end_offset, \
                section = EXCLUDED.section, \
                metadata = EXCLUDED.metadata, \
                embedding = EXCLUDED.embedding",
            self.table
        )
    }

    async fn insert_entry<'e, E>(
        &self,
        executor: E,
        entry: &IndexEntry,
        sql: &str,
    ) -> Result<(), PipelineError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let chunk = &entry.chunk;
        sqlx::query(sql)
            .bind(&chunk.id)
            .bind(&entry.metadata.source_document_id)
            .bind(chunk.order as i64)
            .bind(&chunk.text)
            .bind(chunk.page_range.start as i32)
            .bind(chunk.page_range.end as i32)
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(chunk.section.as_deref())
            .bind(sqlx::types::Json(&entry.metadata.extra))
            .bind(Vector::from(entry.vector.clone()))
            .execute(executor)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    fn kind(&self) -> &'static str {
        "pgvector"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), PipelineError> {
        validate_entries(&entries, self.dimension, None)?;
        let sql = self.upsert_sql();
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        for entry in &entries {
            self.insert_entry(&mut *tx, entry, &sql).await?;
        }
        tx.commit().await.map_err(map_db_error)?;
        debug!("Upserted {} index entries", entries.len());
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<(IndexEntry, f32)>, PipelineError> {
        validate_query(vector, k, self.dimension)?;
        let sql = format!(
            "SELECT chunk_id, document_id, chunk_order, text, page_start, page_end, \
                    start_offset, end_offset, section, metadata, embedding, \
                    embedding <=> $1 AS distance \
             FROM {} \
             WHERE ($2::TEXT IS NULL OR document_id = $2) \
             ORDER BY distance ASC, seq ASC \
             LIMIT $3",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(Vector::from(vector.to_vec()))
            .bind(document_id)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;

        rows.iter()
            .map(|row| {
                let distance: Option<f64> = row.try_get("distance").map_err(map_db_error)?;
                let score = distance
                    .filter(|d| d.is_finite())
                    .map(|d| (1.0 - d) as f32)
                    .unwrap_or(0.0);
                Ok((entry_from_row(row)?, score))
            })
            .collect()
    }

    async fn clear(&self, document_id: Option<&str>) -> Result<u64, PipelineError> {
        let result = match document_id {
            Some(doc) => {
                sqlx::query(&format!("DELETE FROM {} WHERE document_id = $1", self.table))
                    .bind(doc)
                    .execute(&self.pool)
                    .await
            }
            None => {
                sqlx::query(&format!("DELETE FROM {}", self.table))
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(map_db_error)?;
        Ok(result.rows_affected())
    }

    async fn replace_document(
        &self,
        document_id: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<(), PipelineError> {
        validate_entries(&entries, self.dimension, Some(document_id))?;
        let sql = self.upsert_sql();

        // Readers outside the transaction keep seeing the old rows until commit.
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        sqlx::query(&format!("DELETE FROM {} WHERE document_id = $1", self.table))
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        for entry in &entries {
            self.insert_entry(&mut *tx, entry, &sql).await?;
        }
        tx.commit().await.map_err(map_db_error)?;
        debug!(
            "Replaced entries of document {} with {}",
            document_id,
            entries.len()
        );
        Ok(())
    }

    async fn count(&self, document_id: Option<&str>) -> Result<usize, PipelineError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE ($1::TEXT IS NULL OR document_id = $1)",
            self.table
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(count.max(0) as usize)
    }
}

fn entry_from_row(row: &PgRow) -> Result<IndexEntry, PipelineError> {
    let document_id: String = row.try_get("document_id").map_err(map_db_error)?;
    let extra: sqlx::types::Json<BTreeMap<String, String>> =
        row.try_get("metadata").map_err(map_db_error)?;
    let embedding: Vector = row.try_get("embedding").map_err(map_db_error)?;
    let get_i64 = |name: &str| -> Result<i64, PipelineError> {
        row.try_get::<i64, _>(name).map_err(map_db_error)
    };
    let get_i32 = |name: &str| -> Result<i32, PipelineError> {
        row.try_get::<i32, _>(name).map_err(map_db_error)
    };

    Ok(IndexEntry {
        chunk: Chunk {
            id: row.try_get("chunk_id").map_err(map_db_error)?,
            text: row.try_get("text").map_err(map_db_error)?,
            source_document_id: document_id.clone(),
            page_range: PageRange {
                start: get_i32("page_start")?.max(0) as u32,
                end: get_i32("page_end")?.max(0) as u32,
            },
            order: get_i64("chunk_order")?.max(0) as usize,
            start_offset: get_i64("start_offset")?.max(0) as usize,
            end_offset: get_i64("end_offset")?.max(0) as usize,
            section: row.try_get("section").map_err(map_db_error)?,
        },
        vector: embedding.to_vec(),
        metadata: EntryMetadata {
            source_document_id: document_id,
            extra: extra.0,
        },
    })
}

/// SQLSTATE class 53 (insufficient resources) and 54 (program limit
/// exceeded) are capacity problems; everything else is an outage.
fn map_db_error(err: sqlx::Error) -> PipelineError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());
    match code {
        Some(code) if code.starts_with("53") || code.starts_with("54") => {
            PipelineError::QuotaExceeded(format!("vector store capacity: {err}"))
        }
        _ => PipelineError::BackendUnavailable(format!("vector store: {err}")),
    }
}
