//! Multi-source retrieval fusion and answer consensus.
//!
//! Sparse, dense and encyclopedia sources each rank documents independently; [`fusion`] merges
//! their rankings with Reciprocal Rank Fusion and [`consensus`] picks one answer among the
//! candidates generated from the fused context.

pub mod answer;
pub mod config;
pub mod consensus;
pub mod corpus;
pub mod dense;
pub mod error;
pub mod fusion;
pub mod index;
pub mod lexical;
pub mod llm;
pub mod persist;
pub mod pipeline;
pub mod rankings;
pub mod relax;
pub mod retry;
pub mod rewrite;
pub mod sparse;
pub mod tokenizer;
pub mod wiki;

pub type DocumentId = String;
pub type QueryId = String;
/// Document IDs, most relevant first, no duplicates.
pub type RankedList = Vec<DocumentId>;

pub use error::{FuseError, Result};
pub use index::InvertedIndex;
