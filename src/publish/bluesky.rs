// src/publish/bluesky.rs
//! Bluesky over AT Protocol XRPC: `createSession` once, then `createRecord`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{PostContent, PostReceipt, Publisher};
use crate::formatter::{fits_in_limit, format_for_limit, BLUESKY_MAX_LENGTH};

pub const DEFAULT_BASE_URL: &str = "https://bsky.social/xrpc";
const POST_COLLECTION: &str = "app.bsky.feed.post";

#[derive(Clone)]
struct Session {
    access_jwt: String,
    did: String,
}

pub struct BlueskyPublisher {
    http: reqwest::Client,
    base_url: String,
    handle: String,
    app_password: String,
    session: Mutex<Option<Session>>,
}

impl BlueskyPublisher {
    pub fn new(handle: &str, app_password: &str) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, handle, app_password)
    }

    pub fn with_base_url(base_url: &str, handle: &str, app_password: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("dostobot/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("building bluesky http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            handle: handle.to_string(),
            app_password: app_password.to_string(),
            session: Mutex::new(None),
        })
    }

    async fn session(&self) -> Result<Session> {
        let mut guard = self.session.lock().await;
        if let Some(s) = guard.as_ref() {
            return Ok(s.clone());
        }

        #[derive(Serialize)]
        struct Req<'a> {
            identifier: &'a str,
            password: &'a str,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Resp {
            did: String,
            #[serde(default)]
            handle: String,
            access_jwt: String,
        }

        let resp = self
            .http
            .post(format!("{}/com.atproto.server.createSession", self.base_url))
            .json(&Req {
                identifier: &self.handle,
                password: &self.app_password,
            })
            .send()
            .await
            .context("sending createSession")?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            bail!("authentication failed (status {status}): {body}");
        }
        let r: Resp = serde_json::from_str(&body).context("parsing createSession response")?;
        tracing::debug!(handle = %r.handle, did = %r.did, "authenticated with bluesky");

        let s = Session {
            access_jwt: r.access_jwt,
            did: r.did,
        };
        *guard = Some(s.clone());
        Ok(s)
    }

    fn render(content: &PostContent) -> String {
        if !content.text.is_empty() && fits_in_limit(&content.text, BLUESKY_MAX_LENGTH) {
            return content.text.clone();
        }
        format_for_limit(
            &content.quote_text,
            &content.source_book,
            &content.character,
            BLUESKY_MAX_LENGTH,
        )
    }
}

/// Access JWTs expire after a couple of hours; XRPC reports that as 401
/// or as 400 with an `ExpiredToken`/`InvalidToken` error.
fn session_rejected(status: reqwest::StatusCode, body: &str) -> bool {
    status == reqwest::StatusCode::UNAUTHORIZED
        || (status == reqwest::StatusCode::BAD_REQUEST
            && (body.contains("ExpiredToken") || body.contains("InvalidToken")))
}

/// `at://did:plc:x/app.bsky.feed.post/<rkey>` → `https://bsky.app/profile/<handle>/post/<rkey>`
pub fn post_url(handle: &str, uri: &str) -> Option<String> {
    let parts: Vec<&str> = uri
        .trim_start_matches("at://")
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 3 {
        return None;
    }
    let rkey = parts[parts.len() - 1];
    Some(format!("https://bsky.app/profile/{handle}/post/{rkey}"))
}

#[async_trait]
impl Publisher for BlueskyPublisher {
    fn platform(&self) -> &str {
        "bluesky"
    }

    fn max_length(&self) -> usize {
        BLUESKY_MAX_LENGTH
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.session().await.map(|_| ())
    }

    async fn post(&self, content: &PostContent) -> Result<PostReceipt> {
        let session = self.session().await.context("authenticate")?;

        #[derive(Serialize)]
        struct Record<'a> {
            #[serde(rename = "$type")]
            kind: &'a str,
            text: &'a str,
            #[serde(rename = "createdAt")]
            created_at: String,
            langs: [&'a str; 1],
        }
        #[derive(Serialize)]
        struct Req<'a> {
            repo: &'a str,
            collection: &'a str,
            record: Record<'a>,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            uri: String,
        }

        let text = Self::render(content);
        let resp = self
            .http
            .post(format!("{}/com.atproto.repo.createRecord", self.base_url))
            .bearer_auth(&session.access_jwt)
            .json(&Req {
                repo: &session.did,
                collection: POST_COLLECTION,
                record: Record {
                    kind: POST_COLLECTION,
                    text: &text,
                    created_at: chrono::Utc::now()
                        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    langs: ["en"],
                },
            })
            .send()
            .await
            .context("sending createRecord")?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            if session_rejected(status, &body) {
                // re-authenticate on the next post
                *self.session.lock().await = None;
                tracing::warn!(%status, "bluesky session rejected, cleared");
            }
            bail!("post failed (status {status}): {body}");
        }
        let r: Resp = serde_json::from_str(&body).context("parsing createRecord response")?;
        let url = post_url(&self.handle, &r.uri).unwrap_or_default();
        tracing::info!(uri = %r.uri, url = %url, "posted to bluesky");

        Ok(PostReceipt {
            post_id: r.uri,
            post_url: url,
        })
    }
}
