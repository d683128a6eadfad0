//! Outbound notifications for monitor matches.

use crate::errors::{AutosignError, AutosignResult};
use anyhow::Context;
use regex::Regex;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT_SECS: u64 = 30;

static SCTP_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sctp(\d+)t").expect("Failed to compile sctp key regex"));

fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// ServerChan push endpoint for `send_key`.
pub fn server_chan_url(send_key: &str) -> AutosignResult<String> {
    if send_key.starts_with("sctp") {
        let caps = SCTP_KEY.captures(send_key).ok_or_else(|| {
            AutosignError::Config("invalid ServerChan sctp send key".into())
        })?;
        Ok(format!(
            "https://{}.push.ft07.com/send/{}.send",
            &caps[1], send_key
        ))
    } else {
        Ok(format!("https://sctapi.ftqq.com/{}.send", send_key))
    }
}

pub struct ServerChan {
    url: String,
    client: Client,
}

impl ServerChan {
    pub fn new(send_key: &str) -> AutosignResult<Self> {
        Ok(Self::with_url(server_chan_url(send_key)?))
    }

    pub fn with_url(url: String) -> Self {
        Self {
            url,
            client: http_client(),
        }
    }

    pub async fn send(&self, title: &str, body: &str) -> AutosignResult<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&json!({"title": title, "desp": body}))
            .send()
            .await
            .context("ServerChan request failed")?;
        let status = resp.status();
        let result: Value = resp
            .json()
            .await
            .context("ServerChan response is not JSON")?;
        let code = result["code"].as_i64().unwrap_or(-1);
        if !status.is_success() || code != 0 {
            return Err(AutosignError::Backend(format!(
                "ServerChan push failed ({}): {}",
                status,
                result["message"].as_str().unwrap_or("unknown error")
            )));
        }
        debug!("ServerChan push delivered");
        Ok(())
    }
}

/// POSTs JSON payloads to a fixed URL.
pub struct WebhookForwarder {
    url: String,
    client: Client,
}

impl WebhookForwarder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: http_client(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn forward(&self, payload: &Value) -> AutosignResult<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("webhook POST to {} failed", self.url))?;
        if !resp.status().is_success() {
            return Err(AutosignError::Backend(format!(
                "webhook {} answered {}",
                self.url,
                resp.status()
            )));
        }
        Ok(())
    }
}
