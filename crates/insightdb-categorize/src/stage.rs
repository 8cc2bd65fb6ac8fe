use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use insightdb_core::config::CategorizeSettings;
use insightdb_core::traits::Generator;
use insightdb_core::types::{CategoryStatus, InsightCategory, InsightKind, RankedResult};
use tokio::task::JoinSet;

use crate::parse::{parse_category_reply, CategoryReply};
use crate::prompt::category_prompt;

/// The three categories of one selection. Each is independently complete,
/// failed or timed out.
#[derive(Debug, Clone, PartialEq)]
pub struct Categorization {
    pub contradictions: InsightCategory,
    pub enhancements: InsightCategory,
    pub connections: InsightCategory,
}

impl Categorization {
    fn all(status: CategoryStatus) -> Self {
        Self {
            contradictions: InsightCategory::empty(InsightKind::Contradiction, status),
            enhancements: InsightCategory::empty(InsightKind::Enhancement, status),
            connections: InsightCategory::empty(InsightKind::Connection, status),
        }
    }

    fn slot(&mut self, kind: InsightKind) -> &mut InsightCategory {
        match kind {
            InsightKind::Contradiction => &mut self.contradictions,
            InsightKind::Enhancement => &mut self.enhancements,
            InsightKind::Connection => &mut self.connections,
        }
    }

    pub fn is_partial(&self) -> bool {
        [&self.contradictions, &self.enhancements, &self.connections].iter().any(|c| !c.is_complete())
    }
}

pub struct Categorizer {
    generator: Arc<dyn Generator>,
    timeout: Duration,
    per_category_limit: usize,
}

impl Categorizer {
    pub fn new(generator: Arc<dyn Generator>, settings: &CategorizeSettings) -> Self {
        Self { generator, timeout: settings.timeout(), per_category_limit: settings.per_category_limit }
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Issues the three category requests concurrently. Never fails as a whole;
    /// dropping the returned future aborts outstanding requests.
    pub async fn categorize(&self, selection: &str, ranked: &[RankedResult]) -> Categorization {
        if ranked.is_empty() {
            return Categorization::all(CategoryStatus::Complete);
        }
        let candidates: Arc<[RankedResult]> = ranked.into();
        let mut tasks = JoinSet::new();
        for kind in InsightKind::ALL {
            let generator = self.generator.clone();
            let prompt = category_prompt(kind, selection, &candidates, self.per_category_limit);
            let candidates = candidates.clone();
            let timeout = self.timeout;
            let limit = self.per_category_limit;
            tasks.spawn(async move {
                let category = run_category(generator, kind, prompt, &candidates, timeout, limit).await;
                (kind, category)
            });
        }

        let mut out = Categorization::all(CategoryStatus::Failed);
        let mut seen = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((kind, category)) => {
                    seen.insert(kind);
                    *out.slot(kind) = category;
                }
                Err(e) => tracing::warn!(error = %e, "categorization task did not finish"),
            }
        }
        if seen.len() < InsightKind::ALL.len() {
            tracing::warn!(finished = seen.len(), "categorization is partial");
        }
        out
    }
}

async fn run_category(
    generator: Arc<dyn Generator>,
    kind: InsightKind,
    prompt: String,
    candidates: &[RankedResult],
    timeout: Duration,
    limit: usize,
) -> InsightCategory {
    let start = Instant::now();
    let raw = match tokio::time::timeout(timeout, generator.generate(&prompt)).await {
        Err(_) => {
            tracing::warn!(kind = kind.as_str(), timeout_ms = timeout.as_millis(), "categorization timed out");
            return InsightCategory::empty(kind, CategoryStatus::TimedOut);
        }
        Ok(Err(e)) => {
            tracing::warn!(kind = kind.as_str(), generator = generator.name(), error = %e, "categorization failed");
            return InsightCategory::empty(kind, CategoryStatus::Failed);
        }
        Ok(Ok(raw)) => raw,
    };
    match parse_category_reply(kind, &raw) {
        Ok(reply) => {
            let category = resolve(kind, reply, candidates, limit);
            tracing::debug!(
                kind = kind.as_str(),
                picks = category.results.len(),
                elapsed_ms = start.elapsed().as_millis(),
                "category resolved"
            );
            category
        }
        Err(e) => {
            tracing::warn!(kind = kind.as_str(), error = %e, "unparseable categorization reply");
            InsightCategory::empty(kind, CategoryStatus::Failed)
        }
    }
}

/// Maps echoed ids back onto the candidates. Unknown ids are ignored; the
/// survivors keep rank order, appear once, and are capped at `limit`.
fn resolve(kind: InsightKind, reply: CategoryReply, candidates: &[RankedResult], limit: usize) -> InsightCategory {
    let picked: HashSet<&str> = reply.picks.iter().map(String::as_str).collect();
    let results: Vec<RankedResult> =
        candidates.iter().filter(|r| picked.contains(r.chunk.id.as_str())).take(limit).cloned().collect();
    let unknown = picked.iter().filter(|id| !candidates.iter().any(|r| r.chunk.id == **id)).count();
    if unknown > 0 {
        tracing::debug!(kind = kind.as_str(), unknown, "ignoring ids outside the candidate set");
    }
    InsightCategory { kind, results, commentary: reply.commentary, status: CategoryStatus::Complete }
}
