// src/config/mod.rs
//! Process configuration, read from the environment (and `.env` in dev).

pub mod terms;

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Where candidate quotes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Fused vector + lexical ranking.
    Hybrid,
    /// Brute-force cosine index only.
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    // storage
    pub database_path: PathBuf,

    // embeddings
    pub embed_provider: String, // "ollama" | "openai"
    pub ollama_host: String,
    pub ollama_model: String,
    pub openai_api_key: String,
    pub openai_embed_model: String,

    // completions
    pub completion_provider: String, // "anthropic" | "openai"
    pub anthropic_api_key: String,
    pub completion_model: Option<String>,

    // publishing
    pub bluesky_handle: String,
    pub bluesky_app_password: String,

    // monitors
    pub reddit_client_id: String,
    pub reddit_client_secret: String,
    pub reddit_user_agent: String,
    pub hn_max_stories: usize,
    pub min_trend_score: Option<i64>,
    pub safety_terms_path: Option<PathBuf>,

    // scheduling
    pub monitor_interval: Duration,
    pub post_interval: Duration,
    pub max_posts_per_day: i64,
    pub retrieval_mode: RetrievalMode,
    pub dry_run: bool,

    // status surface
    pub http_addr: Option<String>,
}

impl Config {
    /// Loads `.env` (if present) and then reads the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Builds a config from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let get_or = |k: &str, default: &str| get(k).unwrap_or_else(|| default.to_string());

        let monitor_interval = parse_duration(&get_or("MONITOR_INTERVAL", "30m"))
            .context("invalid MONITOR_INTERVAL")?;
        let post_interval =
            parse_duration(&get_or("POST_INTERVAL", "4h")).context("invalid POST_INTERVAL")?;

        let max_posts_per_day: i64 = get_or("MAX_POSTS_PER_DAY", "6")
            .parse()
            .context("invalid MAX_POSTS_PER_DAY")?;
        let hn_max_stories: usize = get_or("HN_MAX_STORIES", "30")
            .parse()
            .context("invalid HN_MAX_STORIES")?;
        let min_trend_score = get("MIN_TREND_SCORE")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("invalid MIN_TREND_SCORE")?;

        let retrieval_mode = match get_or("RETRIEVAL_MODE", "hybrid").to_ascii_lowercase().as_str() {
            "hybrid" => RetrievalMode::Hybrid,
            "memory" => RetrievalMode::Memory,
            other => bail!("invalid RETRIEVAL_MODE: {other} (must be 'hybrid' or 'memory')"),
        };

        let dry_run = matches!(
            get_or("DRY_RUN", "false").to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        );

        Ok(Self {
            database_path: PathBuf::from(get_or("DATABASE_PATH", "data/dostobot.db")),
            embed_provider: get_or("EMBED_PROVIDER", "ollama").to_ascii_lowercase(),
            ollama_host: normalize_ollama_host(&get_or("OLLAMA_HOST", "http://localhost:11434")),
            ollama_model: get_or("OLLAMA_MODEL", "nomic-embed-text"),
            openai_api_key: get_or("OPENAI_API_KEY", ""),
            openai_embed_model: get_or("OPENAI_EMBED_MODEL", "text-embedding-3-small"),
            completion_provider: get_or("COMPLETION_PROVIDER", "anthropic").to_ascii_lowercase(),
            anthropic_api_key: get_or("ANTHROPIC_API_KEY", ""),
            completion_model: get("COMPLETION_MODEL"),
            bluesky_handle: get_or("BLUESKY_HANDLE", ""),
            bluesky_app_password: get_or("BLUESKY_APP_PASSWORD", ""),
            reddit_client_id: get_or("REDDIT_CLIENT_ID", ""),
            reddit_client_secret: get_or("REDDIT_CLIENT_SECRET", ""),
            reddit_user_agent: get_or("REDDIT_USER_AGENT", "dostobot:v1.0.0"),
            hn_max_stories,
            min_trend_score,
            safety_terms_path: get("SAFETY_TERMS_PATH").map(PathBuf::from),
            monitor_interval,
            post_interval,
            max_posts_per_day,
            retrieval_mode,
            dry_run,
            http_addr: get("HTTP_ADDR"),
        })
    }

    pub fn reddit_enabled(&self) -> bool {
        !self.reddit_client_id.is_empty() && !self.reddit_client_secret.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            bail!("DATABASE_PATH is required");
        }
        if self.max_posts_per_day < 0 {
            bail!("MAX_POSTS_PER_DAY must not be negative");
        }
        Ok(())
    }

    pub fn validate_for_embedding(&self) -> Result<()> {
        self.validate()?;
        match self.embed_provider.as_str() {
            "openai" if self.openai_api_key.is_empty() => {
                bail!("OPENAI_API_KEY is required when EMBED_PROVIDER is openai")
            }
            "openai" | "ollama" => Ok(()),
            other => bail!("invalid EMBED_PROVIDER: {other} (must be 'ollama' or 'openai')"),
        }
    }

    pub fn validate_for_completion(&self) -> Result<()> {
        self.validate()?;
        match self.completion_provider.as_str() {
            "anthropic" if self.anthropic_api_key.is_empty() => {
                bail!("ANTHROPIC_API_KEY is required when COMPLETION_PROVIDER is anthropic")
            }
            "openai" if self.openai_api_key.is_empty() => {
                bail!("OPENAI_API_KEY is required when COMPLETION_PROVIDER is openai")
            }
            "anthropic" | "openai" => Ok(()),
            other => bail!("invalid COMPLETION_PROVIDER: {other} (must be 'anthropic' or 'openai')"),
        }
    }

    pub fn validate_for_posting(&self) -> Result<()> {
        self.validate()?;
        if self.bluesky_handle.is_empty() {
            bail!("BLUESKY_HANDLE is required for posting");
        }
        if self.bluesky_app_password.is_empty() {
            bail!("BLUESKY_APP_PASSWORD is required for posting");
        }
        Ok(())
    }

    /// Everything the daemon needs. Publishing credentials are optional in dry-run mode.
    pub fn validate_for_serve(&self) -> Result<()> {
        self.validate_for_embedding()?;
        self.validate_for_completion()?;
        if !self.dry_run {
            self.validate_for_posting()?;
        }
        if self.monitor_interval.is_zero() || self.post_interval.is_zero() {
            bail!("MONITOR_INTERVAL and POST_INTERVAL must be greater than zero");
        }
        for (name, value) in [
            ("MONITOR_INTERVAL", self.monitor_interval),
            ("POST_INTERVAL", self.post_interval),
        ] {
            if value > MAX_INTERVAL {
                bail!("{name} must be at most 30d");
            }
        }
        Ok(())
    }
}

/// Upper bound for the scheduler intervals.
pub const MAX_INTERVAL: Duration = Duration::from_secs(30 * 86_400);

/// Parses `90s`, `30m`, `4h`, `1d` or a plain number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    if s.is_empty() {
        bail!("empty duration");
    }
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let n: u64 = num
        .parse()
        .map_err(|_| anyhow!("duration must start with a number: {raw:?}"))?;
    let scale: u64 = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        other => bail!("unknown duration unit {other:?} in {raw:?}"),
    };
    let secs = n
        .checked_mul(scale)
        .ok_or_else(|| anyhow!("duration out of range: {raw:?}"))?;
    Ok(Duration::from_secs(secs))
}

/// A bind address like `0.0.0.0` is not a usable client URL.
fn normalize_ollama_host(host: &str) -> String {
    match host {
        "" | "0.0.0.0" | "0.0.0.0:11434" => "http://localhost:11434".to_string(),
        h if h.starts_with("http://") || h.starts_with("https://") => h.to_string(),
        h => format!("http://{h}"),
    }
}
