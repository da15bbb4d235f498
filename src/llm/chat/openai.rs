use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn };
use reqwest::{ Client as HttpClient, Response, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::Serialize;

use super::stream::{ decode_stream, DeltaAccumulator };
use super::{ ChatClient, ChatError };
use crate::config::persona::Persona;
use crate::llm::{ LlmConfig, SamplingConfig, DEFAULT_BASE_URL };

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAIChatClient {
    http: HttpClient,
    base_url: String,
    sampling: SamplingConfig,
}

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    stream: bool,
}

impl OpenAIChatClient {
    pub fn new(
        api_key: &str,
        base_url: Option<String>,
        sampling: SamplingConfig
    ) -> Result<Self, ChatError> {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
            ChatError::Config(format!("Invalid API key format: {}", e))
        )?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ChatError::Config(e.to_string()))?;

        Ok(Self { http, base_url, sampling })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatError> {
        let api_key = config.api_key.as_deref().unwrap_or_default();
        if api_key.is_empty() {
            warn!("No API key configured; upstream requests will likely be rejected.");
        }
        Self::new(api_key, config.base_url.clone(), config.sampling)
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request<'a>(&self, persona: &'a Persona, message: &'a str) -> OpenAIChatRequest<'a> {
        OpenAIChatRequest {
            model: &persona.model,
            messages: vec![
                OpenAIMessage { role: "system", content: &persona.system_prompt },
                OpenAIMessage { role: "user", content: message }
            ],
            temperature: self.sampling.temperature,
            max_tokens: self.sampling.max_tokens,
            top_p: self.sampling.top_p,
            stream: true,
        }
    }

    /// Drains the whole body through the decoder and accumulator.
    async fn read_reply(resp: Response) -> Result<String, ChatError> {
        let mut fragments = Box::pin(decode_stream(resp.bytes_stream()));
        let mut acc = DeltaAccumulator::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            debug!("Upstream raw chunk: {}", fragment);
            acc.feed(&fragment);
        }
        let skipped = acc.skipped_lines();
        if skipped > 0 {
            warn!("Skipped {} malformed stream line(s)", skipped);
        }
        Ok(acc.finish())
    }
}

/// Builds the error for a non-success response: status plus the JSON body
/// re-serialised, or the reason phrase when the body is not JSON.
async fn http_error(resp: Response) -> ChatError {
    let status = resp.status();
    let reason = status.canonical_reason().unwrap_or("").to_string();
    let detail = match resp.text().await {
        Ok(body) =>
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(json) => json.to_string(),
                Err(_) => reason,
            }
        Err(_) => reason,
    };
    ChatError::Http { status: status.as_u16(), detail }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(&self, persona: &Persona, message: &str) -> Result<String, ChatError> {
        info!("Starting API request: persona={}, model={}", persona.id, persona.model);
        let req = self.build_request(persona, message);
        let resp = self.http.post(self.completions_url()).json(&req).send().await?;

        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }

        Self::read_reply(resp).await
    }

    async fn list_models(&self) -> Result<serde_json::Value, ChatError> {
        let url = format!("{}/models", self.base_url);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }
        let models = resp.json::<serde_json::Value>().await?;
        info!("Available models: {}", models);
        Ok(models)
    }
}
