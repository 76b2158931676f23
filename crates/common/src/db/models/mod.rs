//! SeaORM entity models
//!
//! Database entities for the pgvector corpus index

mod chunk;

pub use chunk::{
    format_embedding,
    Entity as IndexedChunkEntity,
    Model as IndexedChunk,
    Column as IndexedChunkColumn,
};
