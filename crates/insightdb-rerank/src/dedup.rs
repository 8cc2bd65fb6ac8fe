//! Near-duplicate detection between ranked results.
//!
//! Two texts are duplicates when their normalized forms are equal, or when the
//! Jaccard similarity of their word-trigram sets is at least the threshold.
//! Texts shorter than three words are compared on word unigrams instead.

use std::collections::HashSet;

use insightdb_core::normalize::normalized_words;
use insightdb_core::types::RankedResult;

const SHINGLE: usize = 3;

#[derive(Debug, Clone)]
pub struct TextSignature {
    normalized: String,
    shingles: HashSet<String>,
}

impl TextSignature {
    pub fn new(text: &str) -> Self {
        let words = normalized_words(text);
        let shingles = if words.len() < SHINGLE {
            words.iter().cloned().collect()
        } else {
            words.windows(SHINGLE).map(|w| w.join(" ")).collect()
        };
        Self { normalized: words.join(" "), shingles }
    }

    pub fn is_duplicate_of(&self, other: &TextSignature, threshold: f32) -> bool {
        self.normalized == other.normalized || jaccard(&self.shingles, &other.shingles) >= threshold
    }
}

#[allow(clippy::cast_precision_loss)]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f32 / union as f32
}

/// Keep the first occurrence of every near-duplicate group. Input must be
/// ranked best-first so the survivor is the highest-scoring instance.
pub fn dedup_ranked(results: Vec<RankedResult>, threshold: f32) -> Vec<RankedResult> {
    let mut kept: Vec<(TextSignature, RankedResult)> = Vec::with_capacity(results.len());
    for result in results {
        let sig = TextSignature::new(&result.chunk.raw_text);
        if kept.iter().any(|(k, _)| sig.is_duplicate_of(k, threshold)) {
            tracing::trace!(id = %result.chunk.id, "dropping near-duplicate");
            continue;
        }
        kept.push((sig, result));
    }
    kept.into_iter().map(|(_, r)| r).collect()
}
