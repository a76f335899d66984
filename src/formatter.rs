// src/formatter.rs
//! Post text rendering. Every length here is a count of chars, not bytes.
//!
//! Layout: `"quote text"\n\n— Character, Book`

use crate::models::NARRATOR;

pub const BLUESKY_MAX_LENGTH: usize = 300;
pub const TWITTER_MAX_LENGTH: usize = 280;
pub const HASHTAG: &str = "#Dostoyevsky";

const ELLIPSIS: &str = "...";

fn len(s: &str) -> usize {
    s.chars().count()
}

/// `— Character, Book`, or `— Book` when the character is blank or the narrator.
pub fn attribution(book: &str, character: &str) -> String {
    let character = character.trim();
    if character.is_empty() || character == NARRATOR {
        format!("— {book}")
    } else {
        format!("— {character}, {book}")
    }
}

pub fn format_quote(text: &str, book: &str, character: &str) -> String {
    format!("\"{text}\"\n\n{}", attribution(book, character))
}

/// Same as [`format_quote`], plus a hashtag line when a trend is referenced.
pub fn format_with_trend(
    text: &str,
    book: &str,
    character: &str,
    trend_title: &str,
    include_trend: bool,
) -> String {
    let base = format_quote(text, book, character);
    if include_trend && !trend_title.is_empty() {
        format!("{base}\n\n{HASHTAG}")
    } else {
        base
    }
}

pub fn fits_in_limit(formatted: &str, limit: usize) -> bool {
    len(formatted) <= limit
}

/// Shortens `quote` so that `format_quote` of the result, with
/// `attribution`, fits in `max_len`.
///
/// Cuts at the last whitespace inside the budget (mid-word only when the
/// budget holds no whitespace), drops trailing punctuation, appends `...`.
pub fn truncate_quote(quote: &str, max_len: usize, attribution: &str) -> String {
    // two quote marks + blank line
    let frame = 4 + len(attribution);
    if len(quote) + frame <= max_len {
        return quote.to_string();
    }

    let available = max_len.saturating_sub(frame + ELLIPSIS.len());
    let chars: Vec<char> = quote.chars().collect();
    let window: String = chars[..available.min(chars.len())].iter().collect();

    let boundary_after = chars.get(available).is_some_and(|c| c.is_whitespace());
    let cut = if boundary_after {
        window.as_str()
    } else {
        match window.rfind(char::is_whitespace) {
            Some(i) if i > 0 => &window[..i],
            _ => window.as_str(),
        }
    };

    let trimmed = cut.trim_end_matches(|c: char| c.is_whitespace() || ".,;:!?".contains(c));
    format!("{trimmed}{ELLIPSIS}")
}

/// Quote formatted to fit `limit`, truncating the text if needed.
pub fn format_for_limit(text: &str, book: &str, character: &str, limit: usize) -> String {
    let full = format_quote(text, book, character);
    if fits_in_limit(&full, limit) {
        return full;
    }
    let attr = attribution(book, character);
    format_quote(&truncate_quote(text, limit, &attr), book, character)
}

/// Splits an over-long quote into numbered, self-describing parts:
///
/// ```text
/// "first part... (1/3)
/// ...middle part... (2/3)
/// ...last part" (3/3)
///
/// — Book
/// ```
///
/// `None` when the formatted quote already fits, when the text has no words,
/// or when `limit` cannot hold a closing part with its attribution. Every
/// returned part fits `limit`.
pub fn split_long_quote(text: &str, book: &str, character: &str, limit: usize) -> Option<Vec<String>> {
    if fits_in_limit(&format_quote(text, book, character), limit) {
        return None;
    }
    if text.split_whitespace().next().is_none() {
        return None;
    }
    let attr = attribution(book, character);

    // indicator width depends on the part count; widen until stable
    let mut digits = 1;
    loop {
        let parts = pack_parts(text, len(&attr), limit, digits)?;
        let n = parts.len();
        if n.to_string().len() <= digits {
            return Some(render_parts(&parts, &attr));
        }
        digits = n.to_string().len();
    }
}

/// Greedy word packing. Only the final part is packed against the budget
/// that leaves room for the attribution, so a middle part never takes the
/// last word. `None` when no closing part can fit.
fn pack_parts(text: &str, attr_len: usize, limit: usize, digits: usize) -> Option<Vec<String>> {
    let indicator = 4 + 2 * digits; // " (i/N)"
    // closing quote + blank line + attribution, worst-case lead
    limit
        .checked_sub(indicator + ELLIPSIS.len() + 3 + attr_len)
        .filter(|b| *b > 0)?;

    let mut words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    words.reverse(); // pop from the end

    let mut parts: Vec<String> = Vec::new();
    while !words.is_empty() {
        let lead = if parts.is_empty() { 1 } else { ELLIPSIS.len() };
        let last_budget = limit.saturating_sub(indicator + lead + 3 + attr_len);
        let rest_len = words.iter().map(|w| len(w)).sum::<usize>() + words.len() - 1;
        if rest_len <= last_budget {
            let mut rest: Vec<String> = std::mem::take(&mut words);
            rest.reverse();
            parts.push(rest.join(" "));
            break;
        }

        let budget = limit
            .checked_sub(indicator + lead + ELLIPSIS.len())
            .filter(|b| *b > 0)?;
        let mut cur = String::new();
        let mut cur_len = 0;
        while words.len() > 1 {
            let Some(word) = words.last() else { break };
            let add = len(word) + usize::from(!cur.is_empty());
            if cur_len + add > budget {
                break;
            }
            if !cur.is_empty() {
                cur.push(' ');
            }
            cur.push_str(word);
            cur_len += add;
            words.pop();
        }
        if cur.is_empty() {
            // a word longer than a whole part, or a last word too long for
            // the closing part: cut it, always leaving a non-empty tail
            let word = words.pop()?;
            let take = budget.min(len(&word).saturating_sub(1)).max(1);
            let head: String = word.chars().take(take).collect();
            let tail: String = word.chars().skip(take).collect();
            if !tail.is_empty() {
                words.push(tail);
            }
            cur = head;
        }
        parts.push(cur);
    }
    Some(parts)
}

fn render_parts(parts: &[String], attr: &str) -> Vec<String> {
    let n = parts.len();
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let indicator = format!(" ({}/{n})", i + 1);
            let lead = if i == 0 { "\"" } else { ELLIPSIS };
            if i + 1 == n {
                format!("{lead}{part}\"{indicator}\n\n{attr}")
            } else {
                format!("{lead}{part}{ELLIPSIS}{indicator}")
            }
        })
        .collect()
}
