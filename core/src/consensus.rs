//! Best-answer selection across sibling candidates.
//!
//! The judge is asked once to pick the best candidate, then asked twice more to pull the source
//! label and the answer text out of its own reply, one field per call. Neither reply is trusted:
//! the label must name one of the candidates and the answer must be non-empty, otherwise the
//! query fails with [`FuseError::ConsensusExtraction`]. The returned answer is always the winning
//! candidate's text, verbatim.

use crate::answer::AnswerRecord;
use crate::error::{FuseError, Result};
use crate::llm::Completion;
use crate::QueryId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerCandidate {
    pub source: String,
    pub text: String,
}

impl AnswerCandidate {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self { source: source.into(), text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub query_id: QueryId,
    pub question: String,
    #[serde(rename = "best_model")]
    pub source: String,
    #[serde(rename = "best_answer")]
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusQuestion {
    pub query_id: QueryId,
    pub question: String,
    pub candidates: Vec<AnswerCandidate>,
}

#[derive(Debug, Serialize)]
pub struct ConsensusFailure {
    pub query_id: QueryId,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ConsensusBatch {
    pub results: Vec<ConsensusResult>,
    pub failures: Vec<ConsensusFailure>,
}

pub fn selection_prompt(question: &str, candidates: &[AnswerCandidate]) -> String {
    let answers: serde_json::Map<String, serde_json::Value> = candidates
        .iter()
        .map(|c| (c.source.clone(), serde_json::Value::String(c.text.clone())))
        .collect();
    let input = serde_json::json!({ "question": question, "answers": answers });
    let pretty = serde_json::to_string_pretty(&input).unwrap_or_else(|_| input.to_string());
    format!(
        "Input JSON:\n{pretty}\n\n\
         For the above question, identify which model gave the best response based on accuracy. \
         Ensure the chosen response is an answer and not a follow-up question. Provide the output in the format:\n\
         {{\n    \"best_model\": \"<model_name>\",\n    \"best_answer\": \"<answer>\"\n}}\n\
         Just output this JSON and nothing else.\n"
    )
}

pub fn extraction_prompt(judge_output: &str, field: &str) -> String {
    // The raw reply is embedded as a JSON string so stray quotes or braces cannot break the prompt.
    let quoted = serde_json::to_string(judge_output).unwrap_or_else(|_| judge_output.to_string());
    format!("Input JSON:\n{quoted}\n\nJust Output the {field} from above JSON and nothing else.\n")
}

fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else { return t };
    // drop an optional language tag on the opening fence
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Reduce an extraction reply to the bare field value.
pub fn clean_field(raw: &str, field: &str) -> String {
    let text = strip_fences(raw);
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        match value {
            serde_json::Value::Object(map) => {
                if let Some(serde_json::Value::String(s)) = map.get(field) { return s.trim().to_string(); }
            }
            serde_json::Value::String(s) => return s.trim().to_string(),
            _ => {}
        }
    }
    let mut t = text.trim();
    for prefix in [format!("\"{field}\":"), format!("{field}:"), format!("{field} =")] {
        if let Some(rest) = t.strip_prefix(prefix.as_str()) {
            t = rest.trim();
            break;
        }
    }
    t.trim_end_matches(',').trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').trim().to_string()
}

/// Exact label match, else a unique case-insensitive one.
fn match_label<'a>(label: &str, candidates: &'a [AnswerCandidate]) -> Option<&'a AnswerCandidate> {
    if let Some(c) = candidates.iter().find(|c| c.source == label) { return Some(c); }
    let mut folded = candidates.iter().filter(|c| c.source.eq_ignore_ascii_case(label));
    match (folded.next(), folded.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

fn normalize_ws(text: &str) -> String { text.split_whitespace().collect::<Vec<_>>().join(" ") }

fn dedupe(query_id: &str, candidates: &[AnswerCandidate]) -> Vec<AnswerCandidate> {
    let mut out: Vec<AnswerCandidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if out.iter().any(|o| o.source == c.source) {
            tracing::warn!(query_id, source = %c.source, "duplicate candidate source, keeping the first");
            continue;
        }
        out.push(c.clone());
    }
    out
}

pub async fn select_best(query_id: &str, question: &str, candidates: &[AnswerCandidate], judge: &dyn Completion) -> Result<ConsensusResult> {
    let candidates = dedupe(query_id, candidates);
    if candidates.is_empty() {
        return Err(FuseError::extraction(query_id, "no candidates"));
    }

    let verdict = judge.complete(&selection_prompt(question, &candidates)).await?;
    let label_prompt = extraction_prompt(&verdict, "best_model");
    let answer_prompt = extraction_prompt(&verdict, "best_answer");
    let (raw_label, raw_answer) = futures::try_join!(judge.complete(&label_prompt), judge.complete(&answer_prompt))?;

    let label = clean_field(&raw_label, "best_model");
    let extracted_answer = clean_field(&raw_answer, "best_answer");
    if extracted_answer.is_empty() {
        return Err(FuseError::extraction(query_id, "judge returned an empty answer"));
    }
    let winner = match_label(&label, &candidates)
        .ok_or_else(|| FuseError::extraction(query_id, format!("label {label:?} matches no candidate")))?;

    if normalize_ws(&extracted_answer) != normalize_ws(&winner.text) {
        tracing::warn!(query_id, source = %winner.source, "extracted answer differs from candidate text, keeping candidate text");
    }
    tracing::debug!(query_id, source = %winner.source, "consensus selected");
    Ok(ConsensusResult {
        query_id: query_id.to_string(),
        question: question.to_string(),
        source: winner.source.clone(),
        answer: winner.text.clone(),
    })
}

/// Judge every question in order. A failing query is recorded and the batch moves on.
pub async fn select_best_batch(judge: &dyn Completion, questions: &[ConsensusQuestion]) -> ConsensusBatch {
    let mut batch = ConsensusBatch::default();
    for q in questions {
        match select_best(&q.query_id, &q.question, &q.candidates, judge).await {
            Ok(result) => batch.results.push(result),
            Err(e) => {
                tracing::warn!(query_id = %q.query_id, error = %e, "consensus failed");
                batch.failures.push(ConsensusFailure { query_id: q.query_id.clone(), error: e.to_string() });
            }
        }
    }
    tracing::info!(selected = batch.results.len(), failed = batch.failures.len(), "consensus batch complete");
    batch
}

/// Group per-source answer files into per-query candidate sets, ordered by query ID.
/// The question text comes from the first source that answered the query.
pub fn group_candidates(sources: &[(String, Vec<AnswerRecord>)]) -> Vec<ConsensusQuestion> {
    let mut grouped: BTreeMap<QueryId, ConsensusQuestion> = BTreeMap::new();
    for (label, records) in sources {
        for r in records {
            let entry = grouped.entry(r.query_id.clone()).or_insert_with(|| ConsensusQuestion {
                query_id: r.query_id.clone(),
                question: r.input.clone(),
                candidates: Vec::new(),
            });
            entry.candidates.push(AnswerCandidate::new(label.clone(), r.response.clone()));
        }
    }
    grouped.into_values().collect()
}

/// Load an answer file; its label is the file stem.
pub fn load_answer_file(path: &Path) -> Result<(String, Vec<AnswerRecord>)> {
    let label = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| FuseError::Config(format!("{}: no file name", path.display())))?;
    let records: Vec<AnswerRecord> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    Ok((label, records))
}
