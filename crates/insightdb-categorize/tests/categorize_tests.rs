use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use insightdb_categorize::prompt::{CANDIDATES_BEGIN, CANDIDATES_END, TASK_PREFIX};
use insightdb_categorize::{Categorizer, Persona, PersonaScripter};
use insightdb_core::config::CategorizeSettings;
use insightdb_core::traits::Generator;
use insightdb_core::types::{CategoryStatus, ChunkDraft, InsightKind, RankedResult, ScoreSource, StructuralRole};
use tokio::sync::Barrier;

fn ranked(n: u32) -> Vec<RankedResult> {
    (0..n)
        .map(|i| RankedResult {
            chunk: ChunkDraft::new(format!("passage {i}"), StructuralRole::Body, 1, "S").into_chunk("lib.pdf", i),
            score: 1.0 - f32::from(u8::try_from(i).expect("small")) / 100.0,
            source: ScoreSource::Joint,
        })
        .collect()
}

fn settings() -> CategorizeSettings {
    CategorizeSettings { timeout_ms: 300, per_category_limit: 5, ..CategorizeSettings::default() }
}

fn task_of(prompt: &str) -> InsightKind {
    let line = prompt.lines().next().expect("task line");
    let name = line.strip_prefix(TASK_PREFIX).expect("task prefix");
    InsightKind::ALL.into_iter().find(|k| k.as_str() == name).expect("known kind")
}

fn candidate_ids(prompt: &str) -> Vec<String> {
    let start = prompt.find(CANDIDATES_BEGIN).expect("begin") + CANDIDATES_BEGIN.len();
    let end = prompt.find(CANDIDATES_END).expect("end");
    let rows: Vec<serde_json::Value> = serde_json::from_str(prompt[start..end].trim()).expect("json");
    rows.iter().map(|r| r["chunk_id"].as_str().expect("id").to_string()).collect()
}

/// Picks candidates back-to-front with a few made-up ids mixed in.
struct ScriptedGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str { "scripted" }
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let kind = task_of(prompt);
        let mut ids = candidate_ids(prompt);
        ids.reverse();
        ids.insert(1, "ghost.pdf:99".to_string());
        ids.push(ids[0].clone());
        let picks: Vec<serde_json::Value> = ids.iter().map(|id| serde_json::json!({ "chunk_id": id })).collect();
        Ok(format!(
            "Here is my answer:\n{}",
            serde_json::json!({ kind.response_key(): picks, "commentary": ["Host line", "Analyst line"] })
        ))
    }
}

/// Every call waits until all three are in flight at once.
struct RendezvousGenerator {
    barrier: Barrier,
}

#[async_trait]
impl Generator for RendezvousGenerator {
    fn name(&self) -> &str { "rendezvous" }
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.barrier.wait().await;
        Ok(format!("{{\"{}\": []}}", task_of(prompt).response_key()))
    }
}

/// Contradictions hang, enhancements error, connections answer with prose only.
struct MixedGenerator;

#[async_trait]
impl Generator for MixedGenerator {
    fn name(&self) -> &str { "mixed" }
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        match task_of(prompt) {
            InsightKind::Contradiction => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("{}".to_string())
            }
            InsightKind::Enhancement => anyhow::bail!("quota exceeded"),
            InsightKind::Connection => Ok("Nothing stood out to me.".to_string()),
        }
    }
}

struct CountingGenerator {
    calls: AtomicUsize,
    reply: &'static str,
}

#[async_trait]
impl Generator for CountingGenerator {
    fn name(&self) -> &str { "counting" }
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.to_string())
    }
}

#[tokio::test]
async fn picks_follow_rank_order_ignore_unknown_ids_and_respect_limit() {
    let generator = Arc::new(ScriptedGenerator { calls: AtomicUsize::new(0) });
    let categorizer = Categorizer::new(generator.clone(), &settings());
    let input = ranked(8);
    let out = categorizer.categorize("selected passage", &input).await;

    assert_eq!(generator.calls.load(Ordering::SeqCst), 3, "one request per category");
    assert!(!out.is_partial());
    for category in [&out.contradictions, &out.enhancements, &out.connections] {
        assert_eq!(category.status, CategoryStatus::Complete);
        let ids: Vec<&str> = category.results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["lib.pdf:0", "lib.pdf:1", "lib.pdf:2", "lib.pdf:3", "lib.pdf:4"]);
        assert_eq!(category.commentary.len(), 2);
        assert_eq!(category.commentary[1].speaker, "Analyst");
    }
}

#[tokio::test]
async fn three_requests_are_in_flight_concurrently() {
    let generator = Arc::new(RendezvousGenerator { barrier: Barrier::new(3) });
    let categorizer = Categorizer::new(generator, &settings());
    let out = tokio::time::timeout(Duration::from_secs(2), categorizer.categorize("q", &ranked(3)))
        .await
        .expect("requests would deadlock if issued sequentially");
    assert!(!out.is_partial());
}

#[tokio::test]
async fn each_category_fails_independently() {
    let categorizer = Categorizer::new(Arc::new(MixedGenerator), &settings());
    let started = std::time::Instant::now();
    let out = categorizer.categorize("q", &ranked(4)).await;
    assert!(started.elapsed() < Duration::from_secs(2), "slow category is cut off by its timeout");

    assert_eq!(out.contradictions.status, CategoryStatus::TimedOut);
    assert_eq!(out.enhancements.status, CategoryStatus::Failed);
    assert_eq!(out.connections.status, CategoryStatus::Failed);
    assert!(out.is_partial());
    assert!(out.contradictions.results.is_empty());
}

#[tokio::test]
async fn empty_input_makes_no_requests() {
    let generator = Arc::new(CountingGenerator { calls: AtomicUsize::new(0), reply: "{}" });
    let categorizer = Categorizer::new(generator.clone(), &settings());
    let out = categorizer.categorize("q", &[]).await;
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert!(!out.is_partial());
    assert!(out.connections.results.is_empty());
}

#[tokio::test]
async fn persona_scripts_fall_back_per_persona() {
    let generator = Arc::new(CountingGenerator {
        calls: AtomicUsize::new(0),
        reply: r#"{"conversation": ["Welcome.", "Thanks.", "So what happened?", "Sales fell.", "Why?"]}"#,
    });
    let scripter = PersonaScripter::new(generator.clone(), Duration::from_millis(500));
    let scripts = scripter.scripts("q", &ranked(2)).await;

    assert_eq!(generator.calls.load(Ordering::SeqCst), 4);
    assert_eq!(scripts.iter().map(|s| s.persona).collect::<Vec<_>>(), Persona::ALL.to_vec());
    for script in &scripts {
        assert!(!script.fallback);
        assert_eq!(script.lines.len(), 4, "odd trailing line is dropped");
        assert_eq!(script.lines[0].speaker, "Host");
        assert_eq!(script.lines[1].speaker, "Analyst");
    }

    let terse = Arc::new(CountingGenerator { calls: AtomicUsize::new(0), reply: r#"{"conversation": ["Hi."]}"# });
    let scripts = PersonaScripter::new(terse, Duration::from_millis(500)).scripts("q", &ranked(2)).await;
    assert!(scripts.iter().all(|s| s.fallback && s.lines.len() % 2 == 0 && s.lines.len() >= 4));
}
