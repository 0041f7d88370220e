//! Query rewriting: turns a conversational question into a shorter retrieval query. The result
//! fills `modified_query` in query files.

use crate::error::Result;
use crate::llm::Completion;

pub fn rewrite_prompt(question: &str) -> String {
    format!(
        "{question}\n\nRewrite the question above as a short, self-contained search query. \
         Keep every name, date and quantity it mentions and output only the rewritten query."
    )
}

/// First non-empty line of the reply, without a leading `... query:` label or wrapping quotes.
/// `None` when nothing usable is left.
pub fn clean_rewrite(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = match line.split_once(':') {
        Some((label, rest)) if label.to_lowercase().contains("query") && label.split_whitespace().count() <= 3 => rest.trim(),
        _ => line,
    };
    let line = line.trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '*').trim();
    (!line.is_empty()).then(|| line.to_string())
}

/// Rewritten query, or the question unchanged when the reply is unusable.
pub async fn rewrite_query(llm: &dyn Completion, question: &str) -> Result<String> {
    let raw = llm.complete(&rewrite_prompt(question)).await?;
    Ok(match clean_rewrite(&raw) {
        Some(rewritten) => rewritten,
        None => {
            tracing::warn!(question, "empty rewrite, keeping original question");
            question.to_string()
        }
    })
}
