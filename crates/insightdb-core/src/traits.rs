//! Seams to the out-of-process collaborators: embedding model, joint scorer
//! and generative categorization service.

use async_trait::async_trait;

pub trait Embedder: Send + Sync {
    /// Stable identifier for the model and its output space (e.g. `bge-m3:d1024`).
    /// Vectors produced under different ids must never share an index.
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Cross-encoder style relevance model: scores `(query, candidate)` pairs jointly.
///
/// Must return exactly one finite score per candidate, higher meaning more relevant.
pub trait JointScorer: Send + Sync {
    fn scorer_id(&self) -> &str;
    fn score_pairs(&self, query: &str, candidates: &[String]) -> anyhow::Result<Vec<f32>>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    /// Returns the raw model reply. Callers are responsible for parsing it.
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}
