//! Configuration loader and path helpers.
//!
//! Uses Figment to merge compiled defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates nested keys, e.g. `APP_RERANK__TOP_K`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(InsightSettings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            other => tracing::warn!(env = other, "unknown RUST_ENV, only config.toml is read"),
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    /// Wrap an already assembled figment (used by tests and embedding hosts).
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment: Figment::from(Serialized::defaults(InsightSettings::default())).merge(figment) }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Typed, validated view of the whole configuration.
    pub fn settings(&self) -> anyhow::Result<InsightSettings> {
        let settings: InsightSettings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InsightSettings {
    pub index: IndexSettings,
    pub embedding: EmbeddingSettings,
    pub rerank: RerankSettings,
    pub retrieval: RetrievalSettings,
    pub categorize: CategorizeSettings,
    pub cache: CacheSettings,
}

impl InsightSettings {
    /// Enforces monotonic narrowing between stages and sane limits.
    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if self.retrieval.recall_top_n == 0 {
            return invalid("retrieval.recall_top_n must be positive".into());
        }
        if self.rerank.top_k == 0 || self.rerank.top_k > self.retrieval.recall_top_n {
            return invalid(format!(
                "rerank.top_k ({}) must be in 1..=retrieval.recall_top_n ({})",
                self.rerank.top_k, self.retrieval.recall_top_n
            ));
        }
        if self.categorize.per_category_limit > self.rerank.top_k {
            return invalid(format!(
                "categorize.per_category_limit ({}) exceeds rerank.top_k ({})",
                self.categorize.per_category_limit, self.rerank.top_k
            ));
        }
        if !(self.rerank.dedup_threshold > 0.0 && self.rerank.dedup_threshold <= 1.0) {
            return invalid(format!("rerank.dedup_threshold ({}) must be in (0, 1]", self.rerank.dedup_threshold));
        }
        if self.rerank.batch_size == 0 {
            return invalid("rerank.batch_size must be positive".into());
        }
        for (name, ms) in [
            ("embedding.timeout_ms", self.embedding.timeout_ms),
            ("rerank.timeout_ms", self.rerank.timeout_ms),
            ("categorize.timeout_ms", self.categorize.timeout_ms),
            ("categorize.persona_timeout_ms", self.categorize.persona_timeout_ms),
        ] {
            if ms == 0 {
                return invalid(format!("{name} must be positive"));
            }
        }
        if self.cache.capacity == 0 || self.cache.ttl_secs == 0 {
            return invalid("cache.capacity and cache.ttl_secs must be positive".into());
        }
        if self.index.table.trim().is_empty() {
            return invalid("index.table must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexSettings {
    pub path: String,
    pub table: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { path: "~/.local/share/insightdb/lancedb".to_string(), table: "chunks".to_string() }
    }
}

impl IndexSettings {
    pub fn resolved_path(&self) -> PathBuf {
        expand_path(&self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model_dir: Option<String>,
    pub max_len: usize,
    pub timeout_ms: u64,
    pub use_fake: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { model_dir: None, max_len: 256, timeout_ms: 5_000, use_fake: false }
    }
}

impl EmbeddingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RerankSettings {
    pub enabled: bool,
    pub model_dir: Option<String>,
    pub use_fake: bool,
    pub batch_size: usize,
    pub max_len: usize,
    pub timeout_ms: u64,
    /// Word-trigram Jaccard similarity at or above which two results are duplicates.
    pub dedup_threshold: f32,
    pub top_k: usize,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model_dir: None,
            use_fake: false,
            batch_size: 16,
            max_len: 512,
            timeout_ms: 3_000,
            dedup_threshold: 0.9,
            top_k: 30,
        }
    }
}

impl RerankSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalSettings {
    pub recall_top_n: usize,
    pub min_selection_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { recall_top_n: 100, min_selection_chars: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CategorizeSettings {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub persona_timeout_ms: u64,
    pub per_category_limit: usize,
}

impl Default for CategorizeSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash-latest".to_string(),
            api_key_env: "GOOGLE_API_KEY".to_string(),
            timeout_ms: 8_000,
            persona_timeout_ms: 15_000,
            per_category_limit: 5,
        }
    }
}

impl CategorizeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn persona_timeout(&self) -> Duration {
        Duration::from_millis(self.persona_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    pub capacity: u64,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { capacity: 64, ttl_secs: 300 }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// True when `APP_<NAME>` is set to `1` or `true`.
pub fn env_flag(name: &str) -> bool {
    env::var(format!("APP_{name}"))
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
