use std::sync::Arc;
use std::time::{Duration, Instant};

use insightdb_core::config::RerankSettings;
use insightdb_core::traits::JointScorer;
use insightdb_core::types::{CandidateResult, RankedResult, ScoreSource};

use crate::dedup::dedup_ranked;

#[derive(Debug, Clone, Default)]
pub struct RerankOutcome {
    /// Best-first, deduplicated, at most `top_k` long.
    pub results: Vec<RankedResult>,
    /// Joint scoring failed and `results` follow recall order.
    pub degraded: bool,
}

pub struct PrecisionReranker {
    scorer: Option<Arc<dyn JointScorer>>,
    top_k: usize,
    timeout: Duration,
    dedup_threshold: f32,
}

impl PrecisionReranker {
    /// `scorer = None` keeps recall order (reranking disabled).
    pub fn new(scorer: Option<Arc<dyn JointScorer>>, settings: &RerankSettings) -> Self {
        Self {
            scorer,
            top_k: settings.top_k,
            timeout: settings.timeout(),
            dedup_threshold: settings.dedup_threshold,
        }
    }

    pub fn top_k(&self) -> usize { self.top_k }

    /// Never fails: any scorer problem falls back to the recall ordering.
    pub async fn rerank(&self, query: &str, candidates: Vec<CandidateResult>) -> RerankOutcome {
        if candidates.is_empty() {
            return RerankOutcome::default();
        }
        let (ranked, degraded) = match &self.scorer {
            None => (recall_order(candidates), false),
            Some(scorer) => match self.joint_scores(scorer.clone(), query, &candidates).await {
                Ok(scores) => (joint_order(candidates, &scores), false),
                Err(reason) => {
                    tracing::warn!(scorer = scorer.scorer_id(), reason = %reason, "rerank degraded to recall order");
                    (recall_order(candidates), true)
                }
            },
        };
        let before = ranked.len();
        let mut results = dedup_ranked(ranked, self.dedup_threshold);
        let deduped = before - results.len();
        results.truncate(self.top_k);
        tracing::debug!(candidates = before, deduped, kept = results.len(), degraded, "rerank done");
        RerankOutcome { results, degraded }
    }

    async fn joint_scores(
        &self,
        scorer: Arc<dyn JointScorer>,
        query: &str,
        candidates: &[CandidateResult],
    ) -> Result<Vec<f32>, String> {
        let start = Instant::now();
        let query = query.to_string();
        let texts: Vec<String> = candidates.iter().map(|c| c.chunk.raw_text.clone()).collect();
        let n = texts.len();
        let task = tokio::task::spawn_blocking(move || scorer.score_pairs(&query, &texts));
        let scores = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => return Err(format!("timed out after {:?}", self.timeout)),
            Ok(Err(join)) => return Err(format!("scorer task failed: {join}")),
            Ok(Ok(Err(e))) => return Err(e.to_string()),
            Ok(Ok(Ok(scores))) => scores,
        };
        if scores.len() != n {
            return Err(format!("got {} scores for {n} candidates", scores.len()));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err("non-finite score".to_string());
        }
        tracing::debug!(pairs = n, elapsed_ms = start.elapsed().as_millis(), "joint scoring done");
        Ok(scores)
    }
}

fn recall_order(candidates: Vec<CandidateResult>) -> Vec<RankedResult> {
    let mut ranked: Vec<RankedResult> = candidates
        .into_iter()
        .map(|c| RankedResult { chunk: c.chunk, score: c.similarity, source: ScoreSource::Recall })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

fn joint_order(candidates: Vec<CandidateResult>, scores: &[f32]) -> Vec<RankedResult> {
    let mut ranked: Vec<RankedResult> = candidates
        .into_iter()
        .zip(scores)
        .map(|(c, &score)| RankedResult { chunk: c.chunk, score, source: ScoreSource::Joint })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}
