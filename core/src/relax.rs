//! Bounded prefix backoff for exact-match lookups.
//!
//! Exact-match sources tend to miss on long questions but hit on a short leading noun phrase.
//! The query is tried as given, then re-joined from its first `n-1`, `n-2`, ... words down to a
//! floor of two words.

use std::future::Future;

pub const MIN_WORDS: usize = 2;

/// Every query tried, in order: the original, then the word prefixes from `n-1` down to
/// [`MIN_WORDS`].
pub fn relaxation_attempts(query: &str) -> Vec<String> {
    let words: Vec<&str> = query.split_whitespace().collect();
    let mut attempts = vec![query.to_string()];
    for i in (MIN_WORDS..words.len()).rev() {
        attempts.push(words[..i].join(" "));
    }
    attempts
}

/// Return the first non-empty lookup result, or `None` once every attempt has missed.
/// `lookup` signals an empty result with `None`.
pub fn with_relaxation<T, F>(query: &str, mut lookup: F) -> Option<T>
where
    F: FnMut(&str) -> Option<T>,
{
    for (attempt, q) in relaxation_attempts(query).iter().enumerate() {
        if let Some(found) = lookup(q) {
            if attempt > 0 { tracing::debug!(query, relaxed = %q, attempt, "relaxed lookup matched"); }
            return Some(found);
        }
    }
    tracing::debug!(query, "relaxation exhausted");
    None
}

/// Async form of [`with_relaxation`]. Attempts run strictly one after another; a lookup error
/// is not a miss and ends the loop immediately.
pub async fn with_relaxation_async<T, E, F, Fut>(query: &str, mut lookup: F) -> Result<Option<T>, E>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for (attempt, q) in relaxation_attempts(query).into_iter().enumerate() {
        if let Some(found) = lookup(q.clone()).await? {
            if attempt > 0 { tracing::debug!(query, relaxed = %q, attempt, "relaxed lookup matched"); }
            return Ok(Some(found));
        }
    }
    tracing::debug!(query, "relaxation exhausted");
    Ok(None)
}
