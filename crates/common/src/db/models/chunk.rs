//! Indexed chunk entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rag_chunks")]
pub struct Model {
    /// Logical collection; several corpora can share one table
    #[sea_orm(primary_key, auto_increment = false)]
    pub collection: String,

    /// `{source_document_id}:{chunk_index}`
    #[sea_orm(primary_key, auto_increment = false)]
    pub chunk_id: String,

    pub source_document_id: String,

    pub book_name: String,

    pub chunk_index: i32,

    pub total_chunks: i32,

    pub page_number: Option<i32>,

    pub chapter: Option<String>,

    pub entity_name: Option<String>,

    /// Provenance label fixed at ingestion time
    pub citation: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    /// pgvector embedding stored as text for SeaORM compatibility
    /// Actual vector operations done via raw SQL
    #[sea_orm(column_type = "Text", nullable)]
    pub embedding: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Format an embedding in pgvector's text representation "[1,2,3]"
pub fn format_embedding(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}
