//! Recall stage: embed the selection and cast a broad net over the index.

use std::sync::Arc;
use std::time::{Duration, Instant};

use insightdb_core::error::{Error, Result};
use insightdb_core::traits::Embedder;
use insightdb_core::types::{CandidateResult, SelectionQuery};
use insightdb_index::ChunkIndex;

pub struct RecallStage {
    embedder: Arc<dyn Embedder>,
    index: Arc<ChunkIndex>,
    top_n: usize,
    timeout: Duration,
}

impl RecallStage {
    /// Fails when the embedder does not produce vectors in the index's space.
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<ChunkIndex>, top_n: usize, timeout: Duration) -> Result<Self> {
        if embedder.embedder_id() != index.embedder_id() || embedder.dim() != index.dim() {
            return Err(Error::EmbeddingMismatch {
                expected: format!("{} (dim {})", index.embedder_id(), index.dim()),
                found: format!("{} (dim {})", embedder.embedder_id(), embedder.dim()),
            });
        }
        Ok(Self { embedder, index, top_n, timeout })
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    pub async fn recall(&self, query: &SelectionQuery) -> Result<Vec<CandidateResult>> {
        let start = Instant::now();
        let vector = self.embed_query(query.text()).await?;
        if vector.iter().all(|v| *v == 0.0) {
            tracing::debug!("selection has no embeddable content");
            return Ok(Vec::new());
        }
        let filter = query.chunk_filter();
        let candidates = self.index.query(&vector, self.top_n, filter.as_ref()).await?;
        tracing::debug!(
            candidates = candidates.len(),
            filtered = filter.is_some(),
            elapsed_ms = start.elapsed().as_millis(),
            "recall done"
        );
        Ok(candidates)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = self.embedder.clone();
        let texts = vec![text.to_string()];
        let task = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts));
        let mut vectors = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => return Err(Error::unavailable(format!("query embedding timed out after {:?}", self.timeout))),
            Ok(Err(join)) => return Err(Error::unavailable(format!("query embedding task failed: {join}"))),
            Ok(Ok(Err(e))) => return Err(Error::unavailable(format!("query embedding failed: {e}"))),
            Ok(Ok(Ok(vectors))) => vectors,
        };
        if vectors.len() != 1 {
            return Err(Error::unavailable(format!("embedder returned {} vectors for one query", vectors.len())));
        }
        let vector = vectors.remove(0);
        if vector.len() != self.index.dim() {
            return Err(Error::EmbeddingMismatch {
                expected: format!("dim {}", self.index.dim()),
                found: format!("dim {}", vector.len()),
            });
        }
        Ok(vector)
    }
}

/// Embeds chunk texts for ingestion, off the async runtime.
pub(crate) async fn embed_for_ingest(embedder: Arc<dyn Embedder>, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
    let expected = texts.len();
    let dim = embedder.dim();
    let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
        .await
        .map_err(|e| Error::Operation(format!("embedding task failed: {e}")))?
        .map_err(|e| Error::Operation(format!("embedding failed: {e}")))?;
    if vectors.len() != expected {
        return Err(Error::Operation(format!("embedder returned {} vectors for {expected} chunks", vectors.len())));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(Error::EmbeddingMismatch { expected: format!("dim {dim}"), found: format!("dim {}", bad.len()) });
    }
    Ok(vectors)
}
