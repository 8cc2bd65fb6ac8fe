use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use moka::sync::Cache;

use insightdb_categorize::{Categorizer, GeminiGenerator, PersonaScript, PersonaScripter};
use insightdb_core::config::{Config, InsightSettings};
use insightdb_core::error::{Error, Result};
use insightdb_core::ingest::{group_into_documents, SmartChunk};
use insightdb_core::traits::{Embedder, Generator, JointScorer};
use insightdb_core::types::{
    CategorizedInsightSet, Chunk, ChunkDraft, ChunkRecord, DocumentId, RankedResult, SelectionQuery,
};
use insightdb_embed::{get_default_embedder, get_default_scorer};
use insightdb_index::ChunkIndex;
use insightdb_rerank::PrecisionReranker;

use crate::coalesce::InFlight;
use crate::recall::{embed_for_ingest, RecallStage};

const INGEST_BATCH: usize = 32;

/// Stage 1+2 output, tagged with the index epoch it was computed against.
#[derive(Debug, Clone)]
struct RelatedSet {
    epoch: u64,
    results: Vec<RankedResult>,
    degraded: bool,
    recall_count: usize,
}

#[derive(Debug, Clone)]
struct InsightSnapshot {
    epoch: u64,
    set: CategorizedInsightSet,
}

/// Entry point of the retrieval pipeline. Cheap to clone; clones share the
/// index, caches and in-flight registries.
#[derive(Clone)]
pub struct InsightEngine {
    inner: Arc<Inner>,
}

struct Inner {
    settings: InsightSettings,
    embedder: Arc<dyn Embedder>,
    index: Arc<ChunkIndex>,
    recall: RecallStage,
    reranker: PrecisionReranker,
    categorizer: Categorizer,
    scripter: PersonaScripter,
    related_cache: Cache<String, Arc<RelatedSet>>,
    insight_cache: Cache<String, Arc<InsightSnapshot>>,
    related_inflight: InFlight<RelatedSet>,
    insight_inflight: InFlight<InsightSnapshot>,
    latest_insight_key: Mutex<Option<String>>,
    /// Bumped by every index write; results from an older epoch are not cached.
    epoch: AtomicU64,
    /// Orders cache publication against epoch bumps.
    publish: Mutex<()>,
}

impl InsightEngine {
    pub fn new(
        settings: InsightSettings,
        index: ChunkIndex,
        embedder: Arc<dyn Embedder>,
        scorer: Option<Arc<dyn JointScorer>>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        settings.validate()?;
        let index = Arc::new(index);
        let recall = RecallStage::new(
            embedder.clone(),
            index.clone(),
            settings.retrieval.recall_top_n,
            settings.embedding.timeout(),
        )?;
        let reranker = PrecisionReranker::new(scorer, &settings.rerank);
        let categorizer = Categorizer::new(generator.clone(), &settings.categorize);
        let scripter = PersonaScripter::new(generator, settings.categorize.persona_timeout());
        let cache_capacity = settings.cache.capacity;
        let related_cache = Cache::builder().max_capacity(cache_capacity).time_to_live(settings.cache.ttl()).build();
        let insight_cache = Cache::builder().max_capacity(cache_capacity).time_to_live(settings.cache.ttl()).build();
        tracing::info!(
            embedder = embedder.embedder_id(),
            index = %index.path().display(),
            recall_top_n = recall.top_n(),
            rerank_top_k = reranker.top_k(),
            categorizer = categorizer.generator_name(),
            "insight engine ready"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                embedder,
                index,
                recall,
                reranker,
                categorizer,
                scripter,
                related_cache,
                insight_cache,
                related_inflight: InFlight::new(),
                insight_inflight: InFlight::new(),
                latest_insight_key: Mutex::new(None),
                epoch: AtomicU64::new(0),
                publish: Mutex::new(()),
            }),
        })
    }

    /// Builds the engine from layered configuration: local models from
    /// `embed`, the LanceDB index at `index.path`, Gemini for categorization.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let settings = config.settings()?;
        let embedder: Arc<dyn Embedder> = Arc::from(get_default_embedder(&settings.embedding)?);
        let index = ChunkIndex::open(
            &settings.index.resolved_path(),
            &settings.index.table,
            embedder.embedder_id(),
            embedder.dim(),
        )
        .await?;
        let scorer: Option<Arc<dyn JointScorer>> = match get_default_scorer(&settings.rerank) {
            Ok(scorer) => scorer.map(Arc::from),
            Err(e) => {
                tracing::warn!(error = %e, "joint scorer unavailable, related results will use recall order");
                None
            }
        };
        let generator: Arc<dyn Generator> = match GeminiGenerator::from_settings(&settings.categorize) {
            Ok(g) => Arc::new(g),
            Err(e) => {
                tracing::warn!(error = %e, "categorization service not configured");
                Arc::new(Unconfigured { reason: e.to_string() })
            }
        };
        Ok(Self::new(settings, index, embedder, scorer, generator)?)
    }

    pub fn settings(&self) -> &InsightSettings {
        &self.inner.settings
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.inner.index
    }

    /// Number of distinct selections currently being computed.
    pub fn in_flight(&self) -> usize {
        self.inner.related_inflight.len() + self.inner.insight_inflight.len()
    }

    /// Embeds and stores one document's chunks, replacing any previous version.
    /// Returns the number of chunks stored.
    pub async fn ingest(&self, document_id: &str, drafts: Vec<ChunkDraft>) -> Result<usize> {
        let document_id = document_id.trim();
        if document_id.is_empty() {
            return Err(Error::Operation("document id is empty".to_string()));
        }
        let start = Instant::now();
        let texts: Vec<String> = drafts.iter().map(ChunkDraft::embedding_text).collect();
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(INGEST_BATCH) {
            embeddings.extend(embed_for_ingest(self.inner.embedder.clone(), batch.to_vec()).await?);
        }
        let mut records = Vec::with_capacity(drafts.len());
        for (position, (draft, embedding)) in drafts.into_iter().zip(embeddings).enumerate() {
            let position = u32::try_from(position).map_err(|_| Error::Operation("document has too many chunks".into()))?;
            records.push(ChunkRecord { chunk: draft.into_chunk(document_id, position), embedding });
        }
        self.inner.index.replace_document(document_id, &records).await?;
        self.inner.invalidate();
        tracing::info!(
            document = document_id,
            chunks = records.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "document ingested"
        );
        Ok(records.len())
    }

    /// Ingests raw parser output, grouped by the document each section names.
    pub async fn ingest_smart_chunks(
        &self,
        sections: Vec<SmartChunk>,
        fallback_document: &str,
    ) -> Result<Vec<(DocumentId, usize)>> {
        let mut stored = Vec::new();
        for (document_id, drafts) in group_into_documents(sections, fallback_document) {
            let n = self.ingest(&document_id, drafts).await?;
            stored.push((document_id, n));
        }
        Ok(stored)
    }

    /// Removes every chunk of a document. Unknown documents are a no-op.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.inner.index.remove(document_id).await?;
        self.inner.invalidate();
        tracing::info!(document = document_id, "document removed");
        Ok(())
    }

    pub async fn documents(&self) -> Result<Vec<DocumentId>> {
        self.inner.index.document_ids().await
    }

    /// The "related sections" view: recall plus precision rerank.
    pub async fn get_related(&self, selection: &str, document_filter: Option<&str>) -> Result<Vec<RankedResult>> {
        let query = self.inner.query(selection, document_filter)?;
        let related = self.inner.clone().related(query).await?;
        Ok(related.results)
    }

    /// The full pipeline over the whole library.
    pub async fn get_insights(&self, selection: &str) -> Result<CategorizedInsightSet> {
        self.retrieve(selection, None).await
    }

    /// The full pipeline, optionally restricted to one document.
    pub async fn retrieve(&self, selection: &str, document_filter: Option<&str>) -> Result<CategorizedInsightSet> {
        let query = self.inner.query(selection, document_filter)?;
        let key = query.fingerprint();
        self.inner.set_latest_insight_key(&key);

        let current = self.inner.epoch();
        if let Some(hit) = self.inner.insight_cache.get(&key).filter(|s| s.epoch == current) {
            tracing::debug!(key = %key, "insight cache hit");
            return Ok(hit.set.clone());
        }
        let inner = self.inner.clone();
        let owned_key = key.clone();
        let snapshot = self
            .inner
            .insight_inflight
            .run(&key, move || async move { inner.compute_insights(query, owned_key).await })
            .await?;
        let mut set = snapshot.set.clone();
        if snapshot.epoch != self.inner.epoch() {
            // categories only ever pick from `related`
            let chunks: Vec<&Chunk> = set.related.iter().map(|r| &r.chunk).collect();
            let current = self.inner.index.unchanged_chunks(&chunks).await?;
            set.retain_chunks(|c| current.contains(&c.id));
        }
        Ok(set)
    }

    /// Four persona-styled Host/Analyst scripts about the selection, for narration.
    pub async fn persona_scripts(&self, selection: &str) -> Result<Vec<PersonaScript>> {
        let query = self.inner.query(selection, None)?;
        let text = query.text().to_string();
        let related = self.inner.clone().related(query).await?;
        Ok(self.inner.scripter.scripts(&text, &related.results).await)
    }
}

impl Inner {
    fn query(&self, selection: &str, document_filter: Option<&str>) -> Result<SelectionQuery> {
        SelectionQuery::new(selection, document_filter.map(str::to_string), self.settings.retrieval.min_selection_chars)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn invalidate(&self) {
        let _publish = self.publish.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.related_cache.invalidate_all();
        self.insight_cache.invalidate_all();
    }

    fn set_latest_insight_key(&self, key: &str) {
        let mut latest = self.latest_insight_key.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *latest = Some(key.to_string());
    }

    fn is_latest_insight_key(&self, key: &str) -> bool {
        let latest = self.latest_insight_key.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        latest.as_deref() == Some(key)
    }

    /// Stage 1+2 through the related cache and in-flight registry. Results whose
    /// chunk was removed or rewritten in the meantime are dropped.
    async fn related(self: Arc<Self>, query: SelectionQuery) -> Result<RelatedSet> {
        let key = query.fingerprint();
        let current = self.epoch();
        let shared = match self.related_cache.get(&key).filter(|s| s.epoch == current) {
            Some(hit) => {
                tracing::debug!(key = %key, "related cache hit");
                hit
            }
            None => {
                let inner = self.clone();
                let owned_key = key.clone();
                self.related_inflight.run(&key, move || async move { inner.compute_related(query, owned_key).await }).await?
            }
        };
        let mut related = (*shared).clone();
        if related.epoch != self.epoch() {
            let chunks: Vec<&Chunk> = related.results.iter().map(|r| &r.chunk).collect();
            let current = self.index.unchanged_chunks(&chunks).await?;
            related.results.retain(|r| current.contains(&r.chunk.id));
        }
        Ok(related)
    }

    async fn compute_related(self: Arc<Self>, query: SelectionQuery, key: String) -> Result<RelatedSet> {
        let epoch = self.epoch();
        let start = Instant::now();
        let candidates = self.recall.recall(&query).await?;
        let recall_count = candidates.len();
        let outcome = self.reranker.rerank(query.text(), candidates).await;
        let related = RelatedSet { epoch, results: outcome.results, degraded: outcome.degraded, recall_count };
        tracing::info!(
            recalled = recall_count,
            ranked = related.results.len(),
            degraded = related.degraded,
            elapsed_ms = start.elapsed().as_millis(),
            "related sections ready"
        );
        {
            let _publish = self.publish.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if self.epoch() == epoch {
                self.related_cache.insert(key, Arc::new(related.clone()));
            }
        }
        Ok(related)
    }

    async fn compute_insights(self: Arc<Self>, query: SelectionQuery, key: String) -> Result<InsightSnapshot> {
        let start = Instant::now();
        let text = query.text().to_string();
        let related = self.clone().related(query).await?;
        let categories = self.categorizer.categorize(&text, &related.results).await;
        let snapshot = InsightSnapshot {
            epoch: related.epoch,
            set: CategorizedInsightSet {
                related: related.results,
                contradictions: categories.contradictions,
                enhancements: categories.enhancements,
                connections: categories.connections,
                rerank_degraded: related.degraded,
                recall_count: related.recall_count,
            },
        };
        if snapshot.set.is_partial() {
            tracing::warn!(incomplete = ?snapshot.set.incomplete_categories(), "categorization partial");
        }
        tracing::info!(elapsed_ms = start.elapsed().as_millis(), "insights ready");
        {
            let _publish = self.publish.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if self.epoch() != snapshot.epoch {
                tracing::debug!(key = %key, "index changed during request, not caching");
            } else if !self.is_latest_insight_key(&key) {
                tracing::debug!(key = %key, "superseded by a newer selection, not caching");
            } else {
                self.insight_cache.insert(key, Arc::new(snapshot.clone()));
            }
        }
        Ok(snapshot)
    }
}

/// Stands in for the categorization service when no API key is configured;
/// every category then reports `Failed`.
struct Unconfigured {
    reason: String,
}

#[async_trait]
impl Generator for Unconfigured {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("categorization service unavailable: {}", self.reason)
    }
}
