//! Chunk Index: LanceDB-backed storage of chunk metadata and embeddings.
//!
//! One data table (default `chunks`) plus a small key/value `meta` table
//! recording which embedder produced the stored vectors.

pub mod schema;
pub mod table;

mod store;

pub use store::ChunkIndex;
