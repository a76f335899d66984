// src/config/terms.rs
//! Extra denylist terms for the safety filter, from TOML (`terms = [...]`)
//! or a plain JSON array.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_PATH: &str = "SAFETY_TERMS_PATH";

/// Load terms from an explicit path.
pub fn load_terms_from(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading safety terms from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_terms(&content, ext.as_str())
}

/// Resolution order:
/// 1) explicit path (from config / $SAFETY_TERMS_PATH)
/// 2) config/safety_terms.toml
/// 3) config/safety_terms.json
///
/// No file at all means no extra terms.
pub fn load_terms(explicit: Option<&Path>) -> Result<Vec<String>> {
    let from_env = std::env::var(ENV_PATH).ok().filter(|v| !v.trim().is_empty());
    if let Some(p) = explicit
        .map(Path::to_path_buf)
        .or_else(|| from_env.map(PathBuf::from))
    {
        if !p.exists() {
            return Err(anyhow!("{ENV_PATH} points to non-existent path {}", p.display()));
        }
        return load_terms_from(&p);
    }
    for fallback in ["config/safety_terms.toml", "config/safety_terms.json"] {
        let p = PathBuf::from(fallback);
        if p.exists() {
            return load_terms_from(&p);
        }
    }
    Ok(Vec::new())
}

fn parse_terms(s: &str, hint_ext: &str) -> Result<Vec<String>> {
    let try_toml = hint_ext == "toml" || s.contains("terms");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported safety terms format"))
}

fn parse_toml(s: &str) -> Result<Vec<String>> {
    #[derive(serde::Deserialize)]
    struct TomlTerms {
        terms: Vec<String>,
    }
    let v: TomlTerms = toml::from_str(s)?;
    Ok(clean_list(v.terms))
}

fn parse_json(s: &str) -> Result<Vec<String>> {
    let v: Vec<String> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

/// Trim, lowercase, drop blanks, dedupe.
fn clean_list(items: Vec<String>) -> Vec<String> {
    use std::collections::BTreeSet;
    items
        .into_iter()
        .map(|it| it.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
