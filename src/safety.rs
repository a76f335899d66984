// src/safety.rs
//! Safety filter: keeps divisive, tragic or explicit trends away from the
//! matcher. Pure and deterministic; no I/O.

use std::fmt;

use crate::models::NewTrend;

/// Built-in denylist. Matching is a case-insensitive substring test over
/// `title + " " + description`.
pub const SENSITIVE_TOPICS: &[&str] = &[
    // political figures
    "trump", "biden", "obama", "clinton", "putin", "xi jinping",
    "maga", "democrat", "republican", "liberal", "conservative",
    // hot-button issues
    "abortion", "pro-life", "pro-choice",
    "gun control", "second amendment", "2nd amendment",
    "immigration", "border", "deportation",
    "lgbtq", "transgender", "gay rights",
    // tragedy / violence
    "shooting", "massacre", "terrorist", "terrorism",
    "murder", "killed", "death toll", "casualties",
    "suicide", "self-harm",
    // religion
    "atheism", "christian", "muslim", "jewish", "religion debate",
    // explicit content
    "nsfw", "porn", "sex", "nude",
    // hate speech
    "racist", "racism", "nazi", "white supremac", "hate crime",
    // active conflicts
    "ukraine", "russia war", "gaza", "israel", "hamas",
    // conspiracy theories
    "qanon", "deep state", "illuminati", "flat earth",
    "anti-vax", "plandemic",
];

/// Why a trend was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    ScoreBelowMinimum { score: i64, min_score: i64 },
    SensitiveTerm(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::ScoreBelowMinimum { score, min_score } => {
                write!(f, "score below threshold ({score} < {min_score})")
            }
            RejectReason::SensitiveTerm(term) => write!(f, "contains sensitive topic: {term}"),
        }
    }
}

/// Outcome of [`SafetyFilter::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub pass: bool,
    pub reason: Option<RejectReason>,
}

impl SafetyVerdict {
    fn pass() -> Self {
        Self {
            pass: true,
            reason: None,
        }
    }

    fn reject(reason: RejectReason) -> Self {
        Self {
            pass: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyFilter {
    terms: Vec<String>, // lowercased, built-ins first
    min_score: Option<i64>,
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::new::<&str>(&[], None)
    }
}

impl SafetyFilter {
    /// `additional_terms` are appended after the built-in list; blanks are ignored.
    pub fn new<S: AsRef<str>>(additional_terms: &[S], min_score: Option<i64>) -> Self {
        let terms = SENSITIVE_TOPICS
            .iter()
            .map(|t| t.to_string())
            .chain(
                additional_terms
                    .iter()
                    .map(|t| t.as_ref().trim().to_string())
                    .filter(|t| !t.is_empty()),
            )
            .map(|t| t.to_lowercase())
            .collect();
        Self { terms, min_score }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Score gate first, then the first denylisted term found wins.
    pub fn check(&self, trend: &NewTrend) -> SafetyVerdict {
        if let Some(min_score) = self.min_score {
            if trend.score < min_score {
                return SafetyVerdict::reject(RejectReason::ScoreBelowMinimum {
                    score: trend.score,
                    min_score,
                });
            }
        }

        let haystack = format!("{} {}", trend.title, trend.description).to_lowercase();
        match self.terms.iter().find(|t| haystack.contains(t.as_str())) {
            Some(term) => SafetyVerdict::reject(RejectReason::SensitiveTerm(term.clone())),
            None => SafetyVerdict::pass(),
        }
    }

    /// Keeps passing trends, preserving order.
    pub fn filter_trends(&self, trends: Vec<NewTrend>) -> Vec<NewTrend> {
        trends
            .into_iter()
            .filter(|t| {
                let verdict = self.check(t);
                if let Some(reason) = &verdict.reason {
                    tracing::debug!(source = %t.source, title = %t.title, %reason, "trend filtered");
                }
                verdict.pass
            })
            .collect()
    }
}
