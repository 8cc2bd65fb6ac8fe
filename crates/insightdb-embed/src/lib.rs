//! Local models behind the core collaborator traits.
//!
//! - [`BgeM3Embedder`]: BGE-M3 sentence embeddings on candle (masked mean + L2)
//! - [`CrossEncoderScorer`]: XLM-R sequence classifier (bge-reranker) for joint scoring
//! - [`FakeEmbedder`] / [`LexicalScorer`]: deterministic stand-ins for tests and
//!   offline development (`APP_USE_FAKE_EMBEDDINGS=1`, `APP_USE_FAKE_RERANKER=1`)

use anyhow::{anyhow, ensure, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;

use insightdb_core::config::{env_flag, expand_path, EmbeddingSettings, RerankSettings};
use insightdb_core::normalize::normalized_words;
use insightdb_core::traits::{Embedder, JointScorer};

mod device;
mod pool;
mod rerank;
mod tokenize;

pub use device::select_device;
pub use pool::masked_mean_l2;
pub use rerank::{CrossEncoderScorer, LexicalScorer};

pub const BGE_M3_DIM: usize = 1024;

pub struct BgeM3Embedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
    id: String,
}

impl BgeM3Embedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        let model_dir = resolve_model_dir(settings.model_dir.as_deref(), "APP_MODEL_DIR", "bge-m3")?;
        Self::from_dir(&model_dir, settings.max_len)
    }

    pub fn from_dir(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = select_device();
        tracing::info!(dir = %model_dir.display(), "loading BGE-M3");
        let tokenizer = tokenize::load_tokenizer(&model_dir.join("tokenizer.json"), max_len)?;
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let vb = load_weights(model_dir, &device)?;
        let model = XLMRobertaModel::new(&config, vb)?;
        let id = format!("bge-m3:d{}", config.hidden_size);
        tracing::info!(embedder = %id, "BGE-M3 loaded");
        Ok(Self { model, tokenizer, device, max_len, id })
    }
}

impl Embedder for BgeM3Embedder {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { BGE_M3_DIM }
    fn max_len(&self) -> usize { self.max_len }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let encodings = tokenize::tokenize_texts(&self.tokenizer, texts)?;
        let (input_ids, attention_mask, token_type_ids) =
            tokenize::encodings_to_tensors(&encodings, self.max_len, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vectors: Vec<Vec<f32>> = pooled.to_dtype(DType::F32)?.to_device(&Device::Cpu)?.to_vec2()?;
        ensure!(vectors.iter().all(|v| v.len() == BGE_M3_DIM), "unexpected embedding width");
        tracing::debug!(batch = texts.len(), elapsed_ms = start.elapsed().as_millis(), "embedded batch");
        Ok(vectors)
    }
}

/// Hashed bag-of-words vectors: deterministic, L2-normalized, no model files.
pub struct FakeEmbedder {
    dim: usize,
    id: String,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim, id: format!("fake:xxh64:d{dim}") }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        for (i, token) in normalized_words(text).iter().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += 0.5 + val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for FakeEmbedder {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Box<dyn Embedder>> {
    if settings.use_fake || env_flag("USE_FAKE_EMBEDDINGS") {
        tracing::info!("using FakeEmbedder");
        return Ok(Box::new(FakeEmbedder::new(BGE_M3_DIM)));
    }
    Ok(Box::new(BgeM3Embedder::new(settings)?))
}

/// `None` when reranking is disabled in configuration.
pub fn get_default_scorer(settings: &RerankSettings) -> Result<Option<Box<dyn JointScorer>>> {
    if !settings.enabled {
        return Ok(None);
    }
    if settings.use_fake || env_flag("USE_FAKE_RERANKER") {
        tracing::info!("using LexicalScorer");
        return Ok(Some(Box::new(LexicalScorer::new())));
    }
    let model_dir = resolve_model_dir(settings.model_dir.as_deref(), "APP_RERANKER_DIR", "bge-reranker-base")?;
    Ok(Some(Box::new(CrossEncoderScorer::from_dir(&model_dir, settings.max_len, settings.batch_size)?)))
}

/// Prefer `model.safetensors` (memory-mapped), fall back to `pytorch_model.bin`.
pub(crate) fn load_weights(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        // SAFETY: the weights file is not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[safetensors], DType::F32, device)? };
        return Ok(vb);
    }
    let weights_path = model_dir.join("pytorch_model.bin");
    let weights = candle_core::pickle::read_all(&weights_path)
        .map_err(|e| anyhow!("Failed to read weights {}: {}", weights_path.display(), e))?;
    let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
    Ok(VarBuilder::from_tensors(weights_map, DType::F32, device))
}

fn resolve_model_dir(explicit: Option<&str>, env_var: &str, name: &str) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        let p = expand_path(dir);
        if p.exists() {
            return Ok(p);
        }
        tracing::warn!(dir = %p.display(), "configured model dir does not exist");
    }
    if let Ok(dir) = std::env::var(env_var) {
        let p = expand_path(&dir);
        if p.exists() {
            tracing::info!(dir = %p.display(), "using {}", env_var);
            return Ok(p);
        }
    }
    for candidate in [format!("../models/{name}"), format!("models/{name}")] {
        let p = PathBuf::from(&candidate);
        if p.exists() {
            return Ok(p);
        }
    }
    Err(anyhow!("Could not locate {} model directory", name))
}
