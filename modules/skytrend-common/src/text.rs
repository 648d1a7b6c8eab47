use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

static RE_CLAUSE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[!?,.:;()"\[\]{}]+"#).expect("valid regex"));

/// Split a query into clauses on punctuation. Blank clauses are dropped.
pub fn split_clauses(sentence: &str) -> Vec<String> {
    RE_CLAUSE_BREAK
        .split(sentence)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a reply into chunks of at most `max_chars` characters, breaking on
/// whitespace. A single word longer than `max_chars` is hard-split.
pub fn chunk_reply(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() { word_len } else { current_len + 1 + word_len };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Parse an LLM topic answer like `"LangChain, OpenAI"` into topics.
/// Straight and curly quotes are removed, blanks dropped, first occurrence wins.
pub fn parse_topic_list(raw: &str) -> Vec<String> {
    let cleaned = raw.replace(['"', '“', '”'], "");
    let mut seen = HashSet::new();
    cleaned
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

/// Remove every `@handle` mention of the bot, case-insensitively.
pub fn strip_handle(text: &str, handle: &str) -> String {
    let handle = handle.trim_start_matches('@');
    if handle.is_empty() {
        return text.trim().to_string();
    }
    let pattern = format!(r"(?i)@{}\b", regex::escape(handle));
    match Regex::new(&pattern) {
        Ok(re) => re
            .replace_all(text, "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
        Err(_) => text.trim().to_string(),
    }
}

// --- Hour buckets ---

/// `2025-01-01T13:00` for any instant within that hour.
pub fn hour_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:00").to_string()
}

pub fn topk_key(at: DateTime<Utc>) -> String {
    format!("topics-topk:{}", hour_bucket(at))
}

pub fn cms_key(at: DateTime<Utc>) -> String {
    format!("topics-cms:{}", hour_bucket(at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn clauses_split_on_punctuation() {
        assert_eq!(
            split_clauses("What's hot? And what are people saying about AI?"),
            vec!["What's hot", "And what are people saying about AI"]
        );
        assert_eq!(split_clauses("a (b) [c] {d}; e: f"), vec!["a", "b", "c", "d", "e", "f"]);
        assert!(split_clauses("?!...").is_empty());
    }

    #[test]
    fn exactly_max_is_one_chunk() {
        let text = "a".repeat(150) + " " + &"b".repeat(149);
        assert_eq!(text.chars().count(), 300);
        assert_eq!(chunk_reply(&text, 300), vec![text.clone()]);
    }

    #[test]
    fn one_over_max_is_two_chunks() {
        let text = "a".repeat(150) + " " + &"b".repeat(150);
        assert_eq!(text.chars().count(), 301);
        let chunks = chunk_reply(&text, 300);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(150));
        assert_eq!(chunks[1], "b".repeat(150));
    }

    #[test]
    fn chunks_never_split_words() {
        let text = "the quick brown fox jumps over the lazy dog ".repeat(20);
        let chunks = chunk_reply(&text, 40);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40);
            for word in chunk.split(' ') {
                assert!(["the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog"].contains(&word));
            }
        }
        assert_eq!(chunks.join(" "), text.trim());
    }

    #[test]
    fn overlong_word_is_hard_split() {
        let chunks = chunk_reply(&format!("hi {}", "x".repeat(25)), 10);
        assert_eq!(chunks, vec!["hi", "xxxxxxxxxx", "xxxxxxxxxx", "xxxxx"]);
    }

    #[test]
    fn chunk_counts_chars_not_bytes() {
        let text = "é".repeat(10);
        assert_eq!(chunk_reply(&text, 10).len(), 1);
    }

    #[test]
    fn empty_reply_has_no_chunks() {
        assert!(chunk_reply("   ", 300).is_empty());
    }

    #[test]
    fn topic_list_parsing() {
        assert_eq!(
            parse_topic_list("\"LangChain, OpenAI, Prompt Engineering\""),
            vec!["LangChain", "OpenAI", "Prompt Engineering"]
        );
        assert_eq!(
            parse_topic_list("“Climate Policy, NATO”"),
            vec!["Climate Policy", "NATO"]
        );
        assert!(parse_topic_list("\"\"").is_empty());
        assert!(parse_topic_list("").is_empty());
        assert_eq!(parse_topic_list("A, , A, B"), vec!["A", "B"]);
    }

    #[test]
    fn handle_is_stripped() {
        assert_eq!(
            strip_handle("@SkyTrend.bsky.social what's trending?", "skytrend.bsky.social"),
            "what's trending?"
        );
        assert_eq!(strip_handle("hey @bot, summarize AI", "@bot"), "hey , summarize AI");
        assert_eq!(strip_handle("  no mention  ", "bot"), "no mention");
    }

    #[test]
    fn hour_bucket_truncates() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 13, 47, 12).unwrap();
        assert_eq!(hour_bucket(at), "2025-01-01T13:00");
        assert_eq!(topk_key(at), "topics-topk:2025-01-01T13:00");
        assert_eq!(cms_key(at), "topics-cms:2025-01-01T13:00");
    }
}
