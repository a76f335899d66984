// src/selector.rs
//! Relevance selector: one completion call judges a whole batch of candidate
//! quotes against a trend.
//!
//! Model output is not trusted to be pure JSON. Parsing is two-phase (direct
//! decode, then the first balanced `{...}` in the text) and anything that
//! still fails to yield a usable index is "no suitable match", not an error.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::completion::Completion;
use crate::models::{Quote, Trend};

pub const SYSTEM_PROMPT: &str = "You are an expert at connecting Dostoyevsky's literary wisdom to contemporary topics. Your task is to evaluate whether a quote would make a thoughtful, relevant social media post in response to a current trending topic.

Guidelines for evaluation:
1. RELEVANCE: The quote should genuinely connect to the topic's themes, not just share keywords
2. TONE: The quote should add thoughtful commentary, not seem opportunistic or inappropriate
3. DEPTH: Prefer quotes that offer insight rather than surface-level connections
4. APPROPRIATENESS: The pairing should not trivialize serious topics or seem insensitive

Rate the match on a scale of 0.0 to 1.0:
- 0.0-0.3: Poor match, irrelevant or inappropriate
- 0.4-0.5: Weak connection, forced or superficial
- 0.6-0.7: Decent match, reasonable thematic connection
- 0.8-0.9: Strong match, insightful and appropriate
- 1.0: Perfect match, profound connection";

const BATCH_TASK: &str = "For each quote, provide a relevance score (0.0-1.0) and brief reasoning.
Return the single best match, or indicate if none are suitable.

Respond with JSON:
{
  \"best_match_index\": 0-based index or -1 if none suitable,
  \"evaluations\": [
    {
      \"index\": 0,
      \"score\": 0.0-1.0,
      \"reasoning\": \"brief explanation\"
    }
  ],
  \"recommendation\": \"The best quote is #X because...\" or \"None are suitable because...\"
}";

/// Per-candidate verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteEvaluation {
    pub index: usize,
    pub score: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchJudgment {
    /// Index into the candidate slice; `None` means nothing is suitable.
    pub best_match_index: Option<usize>,
    pub evaluations: Vec<QuoteEvaluation>,
    pub recommendation: String,
}

impl BatchJudgment {
    pub fn none() -> Self {
        Self::default()
    }

    /// The evaluation entry for the chosen candidate, if the model gave one.
    pub fn best_evaluation(&self) -> Option<&QuoteEvaluation> {
        let best = self.best_match_index?;
        self.evaluations.iter().find(|e| e.index == best)
    }
}

pub struct Selector {
    completion: Arc<dyn Completion>,
}

impl Selector {
    pub fn new(completion: Arc<dyn Completion>) -> Self {
        Self { completion }
    }

    /// Completion failures propagate; unusable output does not.
    pub async fn evaluate_batch(&self, trend: &Trend, quotes: &[Quote]) -> Result<BatchJudgment> {
        if quotes.is_empty() {
            return Ok(BatchJudgment::none());
        }

        let prompt = build_batch_prompt(trend, quotes);
        let response = self
            .completion
            .complete(SYSTEM_PROMPT, &prompt)
            .await
            .with_context(|| format!("{} completion for batch selection", self.completion.name()))?;

        Ok(parse_judgment(&response, quotes.len()))
    }
}

pub fn build_batch_prompt(trend: &Trend, quotes: &[Quote]) -> String {
    let mut list = String::new();
    for (i, q) in quotes.iter().enumerate() {
        let _ = write!(
            list,
            "\n{i}. \"{}\"\n   — From {}\n   Themes: {}\n",
            q.text,
            q.source_book,
            q.themes.join(", ")
        );
    }

    format!(
        "Evaluate these candidate quotes for responding to the following trending topic.\n\n\
         TRENDING TOPIC:\nTitle: {}\nDescription: {}\n\n\
         CANDIDATE QUOTES:\n{}\n\n{}",
        trend.title,
        trend.description.as_deref().unwrap_or_default(),
        list,
        BATCH_TASK
    )
}

#[derive(Deserialize)]
struct RawJudgment {
    #[serde(default)]
    best_match_index: Option<i64>,
    #[serde(default)]
    evaluations: Vec<RawEvaluation>,
    #[serde(default)]
    recommendation: String,
}

#[derive(Deserialize)]
struct RawEvaluation {
    index: i64,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    reasoning: String,
}

/// Decodes a model response against `n` candidates.
pub fn parse_judgment(response: &str, n: usize) -> BatchJudgment {
    let raw = serde_json::from_str::<RawJudgment>(response.trim()).ok().or_else(|| {
        extract_json_object(response).and_then(|s| serde_json::from_str::<RawJudgment>(s).ok())
    });

    let Some(raw) = raw else {
        tracing::warn!(response_len = response.len(), "selector response had no usable JSON");
        return BatchJudgment::none();
    };

    let in_range = |i: i64| usize::try_from(i).ok().filter(|&i| i < n);

    BatchJudgment {
        best_match_index: raw.best_match_index.and_then(in_range),
        evaluations: raw
            .evaluations
            .into_iter()
            .filter_map(|e| {
                Some(QuoteEvaluation {
                    index: in_range(e.index)?,
                    score: e.score.clamp(0.0, 1.0),
                    reasoning: e.reasoning,
                })
            })
            .collect(),
        recommendation: raw.recommendation,
    }
}

/// First balanced `{...}` in `text`, skipping braces inside JSON strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trend() -> Trend {
        Trend {
            id: 1,
            source: "hackernews".into(),
            external_id: Some("42".into()),
            title: "Burnout in tech".into(),
            url: None,
            description: Some("Engineers report exhaustion".into()),
            score: 300,
            matched: false,
            skipped: false,
            skip_reason: None,
            detected_at: Utc::now(),
        }
    }

    fn quote(text: &str) -> Quote {
        Quote {
            id: 1,
            text: text.into(),
            text_hash: "h".into(),
            source_book: "Notes from Underground".into(),
            chapter: None,
            character: None,
            themes: vec!["suffering".into(), "work".into()],
            embedding: None,
            times_posted: 0,
            last_posted_at: None,
        }
    }

    #[test]
    fn prompt_lists_every_candidate_with_themes() {
        let p = build_batch_prompt(&trend(), &[quote("first"), quote("second")]);
        assert!(p.contains("Title: Burnout in tech"));
        assert!(p.contains("Description: Engineers report exhaustion"));
        assert!(p.contains("0. \"first\"\n   — From Notes from Underground\n   Themes: suffering, work"));
        assert!(p.contains("1. \"second\""));
        assert!(p.contains("best_match_index"));
    }

    #[test]
    fn direct_json_is_parsed() {
        let j = parse_judgment(
            r#"{"best_match_index": 1, "evaluations":[{"index":1,"score":0.75,"reasoning":"apt"}], "recommendation":"ok"}"#,
            3,
        );
        assert_eq!(j.best_match_index, Some(1));
        let best = j.best_evaluation().unwrap();
        assert_eq!(best.score, 0.75);
        assert_eq!(best.reasoning, "apt");
        assert_eq!(j.recommendation, "ok");
    }

    #[test]
    fn json_wrapped_in_prose_is_found() {
        let resp = "Sure! Here is my answer:\n```json\n{\"best_match_index\": 0, \"evaluations\": [{\"index\": 0, \"score\": 0.9, \"reasoning\": \"uses {braces} in text\"}], \"recommendation\": \"go\"}\n```\nThanks.";
        let j = parse_judgment(resp, 2);
        assert_eq!(j.best_match_index, Some(0));
        assert_eq!(j.evaluations[0].reasoning, "uses {braces} in text");
    }

    #[test]
    fn unusable_output_means_no_match() {
        assert_eq!(parse_judgment("I cannot decide.", 2), BatchJudgment::none());
        assert_eq!(parse_judgment("{ unbalanced", 2), BatchJudgment::none());
        assert_eq!(
            parse_judgment(r#"{"best_match_index": -1, "recommendation": "none"}"#, 2).best_match_index,
            None
        );
        assert_eq!(
            parse_judgment(r#"{"best_match_index": 5}"#, 2).best_match_index,
            None
        );
    }

    #[test]
    fn scores_are_clamped() {
        let j = parse_judgment(
            r#"{"best_match_index":0,"evaluations":[{"index":0,"score":1.7}]}"#,
            1,
        );
        assert_eq!(j.evaluations[0].score, 1.0);
    }

    #[test]
    fn extractor_handles_escapes_and_nesting() {
        let text = r#"pre {"a": {"b": "quote \" and } brace"}} post }"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"a": {"b": "quote \" and } brace"}}"#)
        );
        assert_eq!(extract_json_object("no braces"), None);
    }
}
