//! Precision rerank stage: joint scoring of `(selection, candidate)` pairs,
//! near-duplicate collapsing and truncation to the top-K.

pub mod dedup;
mod stage;

pub use dedup::{dedup_ranked, jaccard, TextSignature};
pub use stage::{PrecisionReranker, RerankOutcome};
