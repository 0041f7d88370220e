//! Answer generation prompts and the per-source answer artifacts fed to consensus.

use crate::error::Result;
use crate::llm::Completion;
use crate::QueryId;
use serde::{Deserialize, Serialize};

pub const MAX_CONTEXT_CHARS: usize = 1500;

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

pub fn context_prompt(question: &str, context: &str) -> String {
    format!(
        "Consider the context and generate a brief 1-2 line answer to the question. Output only the answer.\n\n\
         Context: {}\n\nQuestion: {}\n",
        truncate_chars(context, MAX_CONTEXT_CHARS),
        question
    )
}

pub fn zero_shot_prompt(question: &str) -> String {
    format!("Answer the following question:\n\nQuestion: {question}\n")
}

pub fn keywords_prompt(question: &str) -> String {
    format!("{question} \n\n Give the Keywords for the above sentence and output nothing else.")
}

/// Strip the label and separators models tend to wrap keyword lists in.
pub fn clean_keywords(raw: &str) -> String {
    let text = raw.replace("Keywords:", "").replace(',', "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Answer with supporting context, or zero-shot when there is none.
pub async fn generate_answer(llm: &dyn Completion, question: &str, context: Option<&str>) -> Result<String> {
    let prompt = match context {
        Some(ctx) if !ctx.trim().is_empty() => context_prompt(question, ctx),
        _ => zero_shot_prompt(question),
    };
    Ok(llm.complete(&prompt).await?.trim().to_string())
}

pub fn article_prompt(query: &str) -> String {
    format!(
        "Using the query provided, generate a well-researched and informative short article. \
         Cover the key facts and the background needed to understand the topic, in a neutral tone. \
         Keep the article short.\n\nQuery: {query}"
    )
}

/// Model-written background article for `query`, used as answer context when no retrieved
/// document is available.
pub async fn generate_article(llm: &dyn Completion, query: &str) -> Result<String> {
    let article = llm.complete(&article_prompt(query)).await?.trim().to_string();
    if article.is_empty() { tracing::warn!(query, "empty article"); }
    Ok(article)
}

pub async fn extract_keywords(llm: &dyn Completion, question: &str) -> Result<String> {
    Ok(clean_keywords(&llm.complete(&keywords_prompt(question)).await?))
}

/// One generated answer, as written to a per-source answer file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub query_id: QueryId,
    pub input: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold_answer: Option<String>,
}
