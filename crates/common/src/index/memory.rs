//! In-process corpus index with brute-force squared-L2 search

use super::{CorpusIndex, IndexFilter, IndexStats};
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::models::{Chunk, RetrievalHit};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Entry {
    chunk: Chunk,
    embedding: Vec<f32>,
}

#[derive(Default)]
struct Store {
    entries: Vec<Entry>,
    positions: HashMap<String, usize>,
}

pub struct MemoryIndex {
    embedder: Arc<dyn Embedder>,
    collection_name: String,
    store: RwLock<Store>,
}

impl Store {
    fn insert(&mut self, chunk: &Chunk, embedding: Vec<f32>) {
        let id = chunk.id();
        let entry = Entry {
            chunk: chunk.clone(),
            embedding,
        };
        match self.positions.get(&id).copied() {
            Some(pos) => self.entries[pos] = entry,
            None => {
                self.positions.insert(id, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn remove_document(&mut self, source_document_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.chunk.metadata().source_document_id != source_document_id);
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.chunk.id(), pos))
            .collect();
        before - self.entries.len()
    }
}

impl MemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>, collection_name: impl Into<String>) -> Self {
        Self {
            embedder,
            collection_name: collection_name.into(),
            store: RwLock::new(Store::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text().to_string()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(AppError::CorpusIndex {
                message: format!(
                    "embedder returned {} vectors for {} chunks",
                    embeddings.len(),
                    chunks.len()
                ),
            });
        }
        Ok(embeddings)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[async_trait]
impl CorpusIndex for MemoryIndex {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<RetrievalHit>> {
        let query_embedding = self.embedder.embed(query).await?;

        let store = self.read();
        let mut hits: Vec<RetrievalHit> = store
            .entries
            .iter()
            .filter(|e| filter.map_or(true, |f| f.matches(e.chunk.book_name())))
            .map(|e| RetrievalHit {
                chunk: e.chunk.clone(),
                distance: squared_l2(&query_embedding, &e.embedding),
            })
            .collect();
        drop(store);

        // Stable: equal distances keep insertion order
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn upsert(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let embeddings = self.embed_chunks(chunks).await?;

        let mut store = self.write();
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            store.insert(chunk, embedding);
        }

        Ok(chunks.len())
    }

    async fn replace_document(&self, source_document_id: &str, chunks: &[Chunk]) -> Result<usize> {
        // Embed before taking the lock so a failure leaves the old set in place
        let embeddings = self.embed_chunks(chunks).await?;

        let mut store = self.write();
        store.remove_document(source_document_id);
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            store.insert(chunk, embedding);
        }

        Ok(chunks.len())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let count = self.read().entries.len() as u64;
        Ok(IndexStats::new(count, self.collection_name.clone()))
    }

    async fn list_sources(&self) -> Result<Vec<String>> {
        let sources: BTreeSet<String> = self
            .read()
            .entries
            .iter()
            .map(|e| e.chunk.book_name().to_string())
            .collect();
        Ok(sources.into_iter().collect())
    }

    async fn reset(&self) -> Result<()> {
        let mut store = self.write();
        store.entries.clear();
        store.positions.clear();
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        !self.read().entries.is_empty()
    }

    fn collection_name(&self) -> &str {
        &self.collection_name
    }
}
