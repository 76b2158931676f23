//! Repository for indexed chunk storage
//!
//! Vector columns go through raw SQL (`$n::vector`); everything else uses the
//! SeaORM query builder.

use crate::db::models::{format_embedding, IndexedChunkColumn, IndexedChunkEntity};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::index::IndexFilter;
use crate::models::{Chunk, ChunkMetadata, RetrievalHit};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QueryResult, QuerySelect, Statement,
    TransactionTrait,
};

/// Repository scoped to one collection
#[derive(Clone)]
pub struct ChunkRepository {
    pool: DbPool,
    collection: String,
}

impl ChunkRepository {
    pub fn new(pool: DbPool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the extension, table and indexes if missing
    pub async fn ensure_schema(&self, dimension: usize) -> Result<()> {
        self.pool.ping().await?;

        let statements = [
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS rag_chunks (
                    collection TEXT NOT NULL,
                    chunk_id TEXT NOT NULL,
                    source_document_id TEXT NOT NULL,
                    book_name TEXT NOT NULL,
                    chunk_index INTEGER NOT NULL,
                    total_chunks INTEGER NOT NULL,
                    page_number INTEGER,
                    chapter TEXT,
                    entity_name TEXT,
                    citation TEXT,
                    content TEXT NOT NULL,
                    embedding vector({}),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (collection, chunk_id)
                )
                "#,
                dimension
            ),
            "CREATE INDEX IF NOT EXISTS rag_chunks_book_idx ON rag_chunks (collection, book_name)"
                .to_string(),
        ];

        for sql in statements {
            self.conn().execute_unprepared(&sql).await?;
        }

        Ok(())
    }

    /// Insert or replace chunks with their embeddings in one transaction
    pub async fn upsert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<usize> {
        check_lengths(chunks, embeddings)?;

        let txn = self.conn().begin().await?;
        self.insert_chunks(&txn, chunks, embeddings).await?;
        txn.commit().await?;
        Ok(chunks.len())
    }

    /// Delete a document's chunks and write its new set in one transaction
    pub async fn replace_document(
        &self,
        source_document_id: &str,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<usize> {
        check_lengths(chunks, embeddings)?;

        let txn = self.conn().begin().await?;
        IndexedChunkEntity::delete_many()
            .filter(IndexedChunkColumn::Collection.eq(self.collection.as_str()))
            .filter(IndexedChunkColumn::SourceDocumentId.eq(source_document_id))
            .exec(&txn)
            .await?;
        self.insert_chunks(&txn, chunks, embeddings).await?;
        txn.commit().await?;
        Ok(chunks.len())
    }

    async fn insert_chunks(
        &self,
        txn: &DatabaseTransaction,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let meta = chunk.metadata();
            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO rag_chunks (
                    collection, chunk_id, source_document_id, book_name, chunk_index,
                    total_chunks, page_number, chapter, entity_name, citation,
                    content, embedding, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12::vector, NOW())
                ON CONFLICT (collection, chunk_id) DO UPDATE SET
                    source_document_id = EXCLUDED.source_document_id,
                    book_name = EXCLUDED.book_name,
                    chunk_index = EXCLUDED.chunk_index,
                    total_chunks = EXCLUDED.total_chunks,
                    page_number = EXCLUDED.page_number,
                    chapter = EXCLUDED.chapter,
                    entity_name = EXCLUDED.entity_name,
                    citation = EXCLUDED.citation,
                    content = EXCLUDED.content,
                    embedding = EXCLUDED.embedding,
                    created_at = NOW()
                "#,
                vec![
                    self.collection.clone().into(),
                    chunk.id().into(),
                    meta.source_document_id.clone().into(),
                    meta.book_name.clone().into(),
                    (meta.chunk_index as i32).into(),
                    (meta.total_chunks as i32).into(),
                    meta.page_number.map(|p| p as i32).into(),
                    meta.chapter.clone().into(),
                    meta.entity_name.clone().into(),
                    chunk.citation().map(str::to_string).into(),
                    chunk.text().to_string().into(),
                    format_embedding(embedding).into(),
                ],
            );

            txn.execute(stmt).await?;
        }

        Ok(())
    }

    /// Nearest chunks by L2 distance; the reported distance is squared
    pub async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<RetrievalHit>> {
        let mut values: Vec<sea_orm::Value> = vec![
            format_embedding(embedding).into(),
            self.collection.clone().into(),
            (limit as i64).into(),
        ];

        let filter_sql = match filter {
            None => String::new(),
            Some(IndexFilter::BookEquals(book)) => {
                values.push(book.clone().into());
                "AND book_name = $4".to_string()
            }
            Some(IndexFilter::BookIn(books)) => {
                let placeholders = (0..books.len())
                    .map(|i| format!("${}", i + 4))
                    .collect::<Vec<_>>()
                    .join(", ");
                values.extend(books.iter().map(|b| sea_orm::Value::from(b.clone())));
                format!("AND book_name IN ({})", placeholders)
            }
        };

        let sql = format!(
            r#"
            SELECT
                content, source_document_id, book_name, chunk_index, total_chunks,
                page_number, chapter, entity_name, citation,
                power(embedding <-> $1::vector, 2)::float8 AS distance
            FROM rag_chunks
            WHERE collection = $2
              AND embedding IS NOT NULL
              {}
            ORDER BY embedding <-> $1::vector
            LIMIT $3
            "#,
            filter_sql
        );

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);

        self.conn()
            .query_all(stmt)
            .await?
            .iter()
            .map(row_to_hit)
            .collect()
    }

    /// Number of chunks in the collection
    pub async fn count(&self) -> Result<u64> {
        IndexedChunkEntity::find()
            .filter(IndexedChunkColumn::Collection.eq(self.collection.as_str()))
            .count(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Distinct book names, sorted
    pub async fn list_sources(&self) -> Result<Vec<String>> {
        IndexedChunkEntity::find()
            .select_only()
            .column(IndexedChunkColumn::BookName)
            .distinct()
            .filter(IndexedChunkColumn::Collection.eq(self.collection.as_str()))
            .order_by_asc(IndexedChunkColumn::BookName)
            .into_tuple::<String>()
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Delete every chunk of the collection
    pub async fn delete_all(&self) -> Result<u64> {
        let result = IndexedChunkEntity::delete_many()
            .filter(IndexedChunkColumn::Collection.eq(self.collection.as_str()))
            .exec(self.conn())
            .await?;

        Ok(result.rows_affected)
    }
}

fn check_lengths(chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != embeddings.len() {
        return Err(AppError::Internal {
            message: format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            ),
        });
    }
    Ok(())
}

fn row_to_hit(row: &QueryResult) -> Result<RetrievalHit> {
    let metadata = ChunkMetadata {
        source_document_id: row.try_get("", "source_document_id")?,
        book_name: row.try_get("", "book_name")?,
        chunk_index: row.try_get::<i32>("", "chunk_index")?.max(0) as usize,
        total_chunks: row.try_get::<i32>("", "total_chunks")?.max(0) as usize,
        page_number: row
            .try_get::<Option<i32>>("", "page_number")?
            .and_then(|p| u32::try_from(p).ok()),
        chapter: row.try_get("", "chapter")?,
        entity_name: row.try_get("", "entity_name")?,
    };

    let text: String = row.try_get("", "content")?;
    let citation: Option<String> = row.try_get("", "citation")?;
    let distance: f64 = row.try_get("", "distance")?;

    Ok(RetrievalHit {
        chunk: Chunk::restore(text, metadata, citation),
        distance: distance.max(0.0) as f32,
    })
}
