//! HTTP client for the Gemini `generateContent` endpoint.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use insightdb_core::config::CategorizeSettings;
use insightdb_core::traits::Generator;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

pub struct GeminiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    name: String,
}

impl GeminiGenerator {
    pub fn new(endpoint: &str, model: &str, api_key: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.into(),
            name: format!("gemini:{model}"),
        })
    }

    /// Reads the API key from the environment variable named in the settings.
    pub fn from_settings(settings: &CategorizeSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .map_err(|_| anyhow!("environment variable {} is not set", settings.api_key_env))?;
        // the per-call tokio timeouts are shorter; this only bounds stuck sockets
        let request_timeout = settings.timeout().max(settings.persona_timeout()) * 2;
        Self::new(&settings.endpoint, &settings.model, api_key, request_timeout)
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }

    /// The key travels in a header marked sensitive, so it never shows up in
    /// URLs carried by errors or in request debug output.
    fn request(&self, prompt: &str) -> Result<reqwest::Request> {
        let body = GenerateRequest {
            contents: [Content { role: "user", parts: [RequestPart { text: prompt }] }],
            generation_config: GenerationConfig { response_mime_type: "application/json", temperature: 0.2 },
        };
        let mut key = HeaderValue::from_str(&self.api_key).context("API key is not a valid header value")?;
        key.set_sensitive(true);
        self.client
            .post(self.url())
            .header(API_KEY_HEADER, key)
            .json(&body)
            .build()
            .context("building generate request")
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = self.request(prompt)?;
        let resp = self.client.execute(request).await.context("sending generate request")?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            bail!("{} returned {status}: {}", self.name, detail.chars().take(300).collect::<String>());
        }
        let parsed: GenerateResponse = resp.json().await.context("decoding generate response")?;
        reply_text(parsed)
    }
}

fn reply_text(resp: GenerateResponse) -> Result<String> {
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        bail!("prompt blocked: {reason}");
    }
    let candidate = resp.candidates.into_iter().next().ok_or_else(|| anyhow!("reply has no candidates"))?;
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        bail!("empty reply (finish reason {})", candidate.finish_reason.as_deref().unwrap_or("unknown"));
    }
    Ok(text)
}
