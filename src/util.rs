//! Utility helpers for Sentinel.
//!
//! Shared pattern compilation and the prompt snippet sanitizer used by the
//! telemetry tag set.  These helpers are deliberately lightweight and avoid
//! external dependencies beyond what is already needed by the main
//! application.

use ahash::AHasher;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A memoising wrapper around `AhoCorasick::new` to avoid recompiling
/// automata for repeated lists.  The cache key is a hash of the pattern list.
static AC_CACHE: Lazy<DashMap<u64, Arc<AhoCorasick>>> = Lazy::new(DashMap::new);

/// Given a list of literal patterns, return a shared `AhoCorasick` matcher.
/// If a matcher for the list already exists in the cache, a cloned Arc is
/// returned.  Otherwise a new matcher is constructed and inserted.  The
/// caller must ensure that the pattern set does not change between calls.
pub fn ac_for(list: &[String]) -> Arc<AhoCorasick> {
    let mut hasher = AHasher::default();
    for pat in list {
        pat.hash(&mut hasher);
    }
    let key = hasher.finish();
    if let Some(existing) = AC_CACHE.get(&key) {
        return existing.clone();
    }
    // Case insensitive by lower-casing patterns as well as enabling the
    // ASCII-insensitive matcher option.
    let mut lower = Vec::with_capacity(list.len());
    for p in list {
        lower.push(p.to_lowercase());
    }
    let ac = AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .build(lower)
        .unwrap();
    let arc = Arc::new(ac);
    AC_CACHE.insert(key, arc.clone());
    arc
}

/// Sanitize the leading portion of a prompt for use inside a metrics tag.
/// Newlines are stripped and spaces replaced so the snippet survives tag
/// parsing on the metrics backend.  Truncation happens on a character
/// boundary to keep the result valid UTF-8.
pub fn sanitize_snippet(prompt: &str, max_chars: usize) -> String {
    if prompt.is_empty() {
        return "none".to_string();
    }
    prompt
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .take(max_chars)
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

/// Truncate a string to at most `max_chars` characters without splitting a
/// code point.  Used for the incident event excerpt.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
