// src/monitor/mod.rs
//! Trend sources. Each monitor is independently fallible; the aggregator
//! logs and skips the ones that fail.

pub mod hackernews;
pub mod reddit;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::NewTrend;

pub use hackernews::HackerNewsMonitor;
pub use reddit::RedditMonitor;

#[async_trait]
pub trait Monitor: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_trends(&self) -> Result<Vec<NewTrend>>;
}

static RE_BREAKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*(br|/p|p)\s*/?>").expect("valid regex"));
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("valid regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Plain text from an HTML-ish snippet: tags become spaces or vanish,
/// entities are decoded, whitespace collapses.
pub fn normalize_text(s: &str) -> String {
    let out = RE_BREAKS.replace_all(s, " ");
    let out = RE_TAGS.replace_all(&out, "");
    // decode after stripping so escaped `&lt;b&gt;` survives as text
    let out = html_escape::decode_html_entities(&out);
    let out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    RE_WS.replace_all(&out, " ").trim().to_string()
}

/// At most `max` chars, ending in `...` when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}
