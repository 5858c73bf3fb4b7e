//! REST client for the generative backend (`generateContent` and long-running predictions).
//!
//! Failures are classified into [`ServiceError`] here so the governor can decide what to
//! retry: HTTP 429 / `RESOURCE_EXHAUSTED` is a quota signal, 5xx and transport errors are
//! transient, everything else is fatal.
//!
//! API key: `GROWTHLAB_API_KEY` (or `GEMINI_API_KEY` / `API_KEY`), sent as `x-goog-api-key`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GeminiSettings;
use crate::content::{Article, MarketingStrategy, Source, Trend};
use crate::error::{ServiceError, ServiceResult};
use crate::operation::{OperationBackend, OperationHandle, OperationStatus};
use crate::scheduler::ContentGenerator;

const ARTICLE_PROMPT: &str = "Write a short, original marketing insight article for growth marketers. \
    Pick one concrete, current topic (paid social, SEO, lifecycle email, creator partnerships, \
    conversion optimisation). Return a title, a one-sentence excerpt, about 300 words of content, \
    and a one-word category.";

const TRENDS_PROMPT: &str = "Identify the top trending marketing strategies or shifts right now. \
    Focus on digital advertising and consumer behavior.";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Default)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize, Default)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Deserialize, Default)]
struct WebChunk {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn sources(&self) -> Vec<Source> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|g| {
                g.grounding_chunks
                    .iter()
                    .filter_map(|chunk| chunk.web.as_ref())
                    .map(|web| Source {
                        title: web.title.clone().unwrap_or_else(|| "Source".to_string()),
                        uri: web.uri.clone().unwrap_or_else(|| "#".to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct OperationResponse {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Thin async client over the REST API. Cheap to clone.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    settings: GeminiSettings,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, settings: GeminiSettings) -> ServiceResult<Self> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(ServiceError::Config("API key is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| ServiceError::Config(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            api_key,
            settings,
            client,
        })
    }

    /// `Ok(None)` when no API key is present in the environment. A key that is present but
    /// unusable, or a client that fails to build, is an error.
    pub fn from_env(settings: GeminiSettings) -> ServiceResult<Option<Self>> {
        Self::from_optional_key(GeminiSettings::api_key_from_env(), settings)
    }

    fn from_optional_key(
        key: Option<String>,
        settings: GeminiSettings,
    ) -> ServiceResult<Option<Self>> {
        key.map(|key| Self::new(key, settings)).transpose()
    }

    pub fn settings(&self) -> &GeminiSettings {
        &self.settings
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.settings.api_base.trim_end_matches('/'),
            model,
            method
        )
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> ServiceResult<R> {
        let res = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn decode<R: DeserializeOwned>(res: reqwest::Response) -> ServiceResult<R> {
        let status = res.status();
        if !status.is_success() {
            let body = match res.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(status = status.as_u16(), error = %e, "error response body unreadable");
                    format!("<body unreadable: {}>", e)
                }
            };
            return Err(ServiceError::from_status(status.as_u16(), &body));
        }
        let bytes = res.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn generate(&self, request: &GenerateRequest<'_>) -> ServiceResult<GenerateResponse> {
        let url = self.model_url(&self.settings.model, "generateContent");
        debug!(model = %self.settings.model, "generateContent");
        self.post(&url, request).await
    }

    /// Free-text completion.
    pub async fn generate_text(&self, prompt: &str) -> ServiceResult<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![TextPart { text: prompt }],
            }],
            generation_config: None,
            tools: None,
        };
        Ok(self.generate(&request).await?.text())
    }

    /// Completion constrained to `schema`, parsed into `T`. A body that does not match is fatal.
    pub async fn generate_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        schema: serde_json::Value,
    ) -> ServiceResult<T> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![TextPart { text: prompt }],
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json",
                response_schema: schema,
            }),
            tools: None,
        };
        let text = self.generate(&request).await?.text();
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }

    /// Search-grounded completion: returns the answer and the web sources backing it.
    pub async fn generate_grounded(&self, prompt: &str) -> ServiceResult<(String, Vec<Source>)> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![TextPart { text: prompt }],
            }],
            generation_config: None,
            tools: Some(vec![serde_json::json!({ "google_search": {} })]),
        };
        let response = self.generate(&request).await?;
        Ok((response.text(), response.sources()))
    }

    pub async fn generate_strategy(
        &self,
        brand_name: &str,
        product_description: &str,
    ) -> ServiceResult<MarketingStrategy> {
        let prompt = format!(
            "Create a professional marketing strategy for: {}. Description: {}",
            brand_name, product_description
        );
        self.generate_json(&prompt, MarketingStrategy::response_schema())
            .await
    }

    pub async fn generate_article(&self) -> ServiceResult<Article> {
        let article: Article = self
            .generate_json(ARTICLE_PROMPT, Article::response_schema())
            .await?;
        Ok(article.stamped())
    }

    pub async fn fetch_trend(&self) -> ServiceResult<Trend> {
        let (text, sources) = self.generate_grounded(TRENDS_PROMPT).await?;
        Ok(Trend {
            topic: "Search-Driven Trends".to_string(),
            description: text,
            relevance_score: 95,
            sources,
        })
    }

    /// Start a video generation job; returns the operation handle to poll.
    pub async fn start_video(&self, prompt: &str) -> ServiceResult<OperationHandle> {
        let url = self.model_url(&self.settings.video_model, "predictLongRunning");
        let body = serde_json::json!({
            "instances": [{ "prompt": prompt }],
            "parameters": { "aspectRatio": "16:9" }
        });
        let op: OperationResponse = self.post(&url, &body).await?;
        Ok(OperationHandle { name: op.name })
    }

    async fn get_operation(&self, handle: &OperationHandle) -> ServiceResult<OperationStatus> {
        let url = format!(
            "{}/{}",
            self.settings.api_base.trim_end_matches('/'),
            handle.name
        );
        let res = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        let op: OperationResponse = Self::decode(res).await?;
        Ok(OperationStatus {
            done: op.done,
            result_uri: op.response.as_ref().and_then(video_uri),
            error: op.error.map(|e| e.message),
        })
    }
}

/// `response.generateVideoResponse.generatedSamples[0].video.uri`
fn video_uri(response: &serde_json::Value) -> Option<String> {
    response
        .pointer("/generateVideoResponse/generatedSamples/0/video/uri")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    async fn generate_primary(&self) -> ServiceResult<Article> {
        self.generate_article().await
    }

    async fn generate_secondary(&self) -> ServiceResult<Trend> {
        self.fetch_trend().await
    }
}

#[async_trait]
impl OperationBackend for GeminiClient {
    async fn poll(&self, handle: &OperationHandle) -> ServiceResult<OperationStatus> {
        self.get_operation(handle).await
    }
}
