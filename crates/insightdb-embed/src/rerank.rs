use anyhow::{ensure, Result};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use candle_core::{DType, Device, D};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaForSequenceClassification};
use tokenizers::Tokenizer;

use insightdb_core::normalize::normalized_words;
use insightdb_core::traits::JointScorer;

use crate::{load_weights, select_device, tokenize};

/// bge-reranker style cross-encoder: one logit per `(query, passage)` pair,
/// squashed through a sigmoid so scores land in `(0, 1)`.
pub struct CrossEncoderScorer {
    model: XLMRobertaForSequenceClassification,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
    batch_size: usize,
    id: String,
}

impl CrossEncoderScorer {
    pub fn from_dir(model_dir: &Path, max_len: usize, batch_size: usize) -> Result<Self> {
        let device = select_device();
        tracing::info!(dir = %model_dir.display(), "loading cross-encoder");
        let tokenizer = tokenize::load_tokenizer(&model_dir.join("tokenizer.json"), max_len)?;
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let vb = load_weights(model_dir, &device)?;
        let model = XLMRobertaForSequenceClassification::new(1, &config, vb)?;
        let name = model_dir.file_name().map_or_else(|| "cross-encoder".to_string(), |n| n.to_string_lossy().to_string());
        Ok(Self { model, tokenizer, device, max_len, batch_size: batch_size.max(1), id: format!("cross:{name}") })
    }
}

impl JointScorer for CrossEncoderScorer {
    fn scorer_id(&self) -> &str { &self.id }

    fn score_pairs(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let start = Instant::now();
        let mut scores = Vec::with_capacity(candidates.len());
        // All pairs share the query, so batches differ only in the passage side.
        for batch in candidates.chunks(self.batch_size) {
            let encodings = tokenize::tokenize_pairs(&self.tokenizer, query, batch)?;
            let (input_ids, attention_mask, token_type_ids) =
                tokenize::encodings_to_tensors(&encodings, self.max_len, &self.device)?;
            let logits = self.model.forward(&input_ids, &attention_mask, &token_type_ids)?;
            let logits: Vec<f32> = logits.to_dtype(DType::F32)?.squeeze(D::Minus1)?.to_device(&Device::Cpu)?.to_vec1()?;
            scores.extend(logits.into_iter().map(|l| 1.0 / (1.0 + (-l).exp())));
        }
        ensure!(scores.len() == candidates.len(), "scorer returned {} scores for {} pairs", scores.len(), candidates.len());
        tracing::debug!(pairs = candidates.len(), elapsed_ms = start.elapsed().as_millis(), "cross-encoder scored");
        Ok(scores)
    }
}

/// Query-coverage scorer: share of query words (and word bigrams) found in
/// the candidate. Deterministic stand-in for the cross-encoder.
#[derive(Debug, Default)]
pub struct LexicalScorer;

impl LexicalScorer {
    pub fn new() -> Self { Self }
}

#[allow(clippy::cast_precision_loss)]
fn coverage(needles: &[String], haystack: &HashSet<String>) -> f32 {
    if needles.is_empty() {
        return 0.0;
    }
    needles.iter().filter(|n| haystack.contains(*n)).count() as f32 / needles.len() as f32
}

fn bigrams(words: &[String]) -> Vec<String> {
    words.windows(2).map(|w| format!("{} {}", w[0], w[1])).collect()
}

impl JointScorer for LexicalScorer {
    fn scorer_id(&self) -> &str { "lexical" }

    fn score_pairs(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let q_words = normalized_words(query);
        let q_bigrams = bigrams(&q_words);
        Ok(candidates
            .iter()
            .map(|c| {
                let words = normalized_words(c);
                let word_set: HashSet<String> = words.iter().cloned().collect();
                let bigram_set: HashSet<String> = bigrams(&words).into_iter().collect();
                let uni = coverage(&q_words, &word_set);
                let bi = if q_bigrams.is_empty() { uni } else { coverage(&q_bigrams, &bigram_set) };
                0.8 * uni + 0.2 * bi
            })
            .collect())
    }
}
