//! Retrieval orchestration: recall, rerank and categorization composed behind
//! [`InsightEngine`], with request coalescing and short-lived caches.

pub mod coalesce;
mod orchestrator;
pub mod recall;

pub use coalesce::InFlight;
pub use orchestrator::InsightEngine;
pub use recall::RecallStage;
