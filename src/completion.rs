// src/completion.rs
//! Text-completion capability: one system prompt, one user prompt, one
//! text answer. Failures are errors, never empty strings.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const MAX_TOKENS: u32 = 4096;

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("dostobot/0.1")
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .context("building completion http client")
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

// ---------------- Anthropic ----------------

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, model: Option<&str>) -> Result<Self> {
        if api_key.is_empty() {
            bail!("ANTHROPIC_API_KEY not set");
        }
        Ok(Self {
            http: http_client()?,
            api_key: api_key.to_string(),
            model: model.unwrap_or(DEFAULT_ANTHROPIC_MODEL).to_string(),
            url: ANTHROPIC_URL.to_string(),
        })
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }
}

#[derive(Deserialize)]
struct AnthropicResp {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

fn parse_anthropic(body: &str) -> Result<String> {
    let resp: AnthropicResp =
        serde_json::from_str(body).context("decoding anthropic response")?;
    if let Some(err) = resp.error {
        bail!("anthropic api error: {} - {}", err.kind, err.message);
    }
    resp.content
        .into_iter()
        .next()
        .map(|b| b.text)
        .ok_or_else(|| anyhow!("empty response from anthropic api"))
}

#[async_trait]
impl Completion for AnthropicClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            system: &'a str,
            messages: Vec<Msg<'a>>,
        }

        let resp = self
            .http
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Req {
                model: &self.model,
                max_tokens: MAX_TOKENS,
                system,
                messages: vec![Msg {
                    role: "user",
                    content: user,
                }],
            })
            .send()
            .await
            .context("sending anthropic request")?;

        let status = resp.status();
        let body = resp.text().await.context("reading anthropic response")?;
        if !status.is_success() {
            bail!("anthropic api error (status {status}): {body}");
        }
        parse_anthropic(&body)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

// ---------------- OpenAI ----------------

/// Chat Completions API.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, model: Option<&str>) -> Result<Self> {
        if api_key.is_empty() {
            bail!("OPENAI_API_KEY not set");
        }
        Ok(Self {
            http: http_client()?,
            api_key: api_key.to_string(),
            model: model.unwrap_or(DEFAULT_OPENAI_MODEL).to_string(),
            base_url: "https://api.openai.com".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

fn parse_openai(body: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct Resp {
        #[serde(default)]
        choices: Vec<Choice>,
        error: Option<ApiError>,
    }
    #[derive(Deserialize)]
    struct Choice {
        message: ChoiceMsg,
    }
    #[derive(Deserialize)]
    struct ChoiceMsg {
        #[serde(default)]
        content: Option<String>,
    }

    let resp: Resp = serde_json::from_str(body).context("decoding openai response")?;
    if let Some(err) = resp.error {
        bail!("openai api error: {} - {}", err.kind, err.message);
    }
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| anyhow!("empty response from openai api"))
}

#[async_trait]
impl Completion for OpenAiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }

        let resp = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: system,
                    },
                    Msg {
                        role: "user",
                        content: user,
                    },
                ],
                temperature: 0.2,
                max_tokens: MAX_TOKENS,
            })
            .send()
            .await
            .context("sending openai request")?;

        let status = resp.status();
        let body = resp.text().await.context("reading openai response")?;
        if !status.is_success() {
            bail!("openai api error (status {status}): {body}");
        }
        parse_openai(&body)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
