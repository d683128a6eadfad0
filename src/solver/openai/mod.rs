use super::Solver;
use crate::errors::AutosignResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const CONNECT_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 120;

const CHOOSE_OPTION_PROMPT: &str = "You are an image recognition assistant. Given an image, a \
question and a list of options, choose the single correct option. Reply in JSON: \
{\"option\": \"<one of the options, verbatim>\", \"reason\": \"<under 30 words>\"}";

/// Solver backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiSolver {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl OpenAiSolver {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Configure from `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_MODEL`.
    /// Returns `None` without an API key.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())?;
        let base_url = std::env::var("OPENAI_BASE_URL").ok().filter(|u| !u.is_empty());
        let model = std::env::var("OPENAI_MODEL").ok().filter(|m| !m.is_empty());
        Some(Self::new(api_key, model, base_url))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, payload: Value) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("POST {} (model {})", url, self.model);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await
            .context("chat completion request failed")?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .context("chat completion response is not JSON")?;
        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown error");
            anyhow::bail!("chat completion failed with {}: {}", status, message);
        }
        parse_content(&body)
    }
}

fn parse_content(body: &Value) -> Result<String> {
    body["choices"]
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|choice| choice["message"]["content"].as_str())
        .map(str::to_string)
        .context("No content in chat completion response")
}

/// Extract the chosen option from a JSON-mode reply.
fn parse_option(content: &str) -> Result<String> {
    let value: Value =
        serde_json::from_str(content).context("option reply is not a JSON object")?;
    value["option"]
        .as_str()
        .map(str::to_string)
        .context("option reply has no 'option' field")
}

#[async_trait]
impl Solver for OpenAiSolver {
    async fn choose_option(
        &self,
        image: &[u8],
        query: &str,
        options: &[String],
    ) -> AutosignResult<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let text_query = format!(
            "Question: {}. Options: {}.",
            query,
            serde_json::to_string(options)?
        );
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": CHOOSE_OPTION_PROMPT},
                {"role": "user", "content": [
                    {"type": "text", "text": text_query},
                    {"type": "image_url", "image_url": {"url": format!("data:image/jpeg;base64,{}", encoded)}}
                ]}
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.1,
        });
        let content = self.complete(payload).await?;
        Ok(parse_option(&content)?)
    }

    async fn answer(&self, prompt: &str, question: &str) -> AutosignResult<String> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt},
                {"role": "user", "content": question}
            ],
        });
        Ok(self.complete(payload).await?)
    }
}
