//! Corpus and query-set ingestion.
//!
//! Collections are JSON arrays (or JSONL streams) of `{ "wikipedia_id", "text": [...] }` records.
//! Paragraphs are joined and sanitized down to ASCII alphanumerics and single spaces before they
//! reach the index, so every downstream scorer sees the same text.

use crate::error::Result;
use crate::{DocumentId, QueryId};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

lazy_static! {
    static ref NON_ALNUM: Regex = Regex::new(r"[^a-zA-Z0-9\s]").expect("valid regex");
    static ref SPACES: Regex = Regex::new(r"\s+").expect("valid regex");
}

/// Document text keyed by ID. Ordered so that builds and scans are reproducible.
pub type Corpus = BTreeMap<DocumentId, String>;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IdRepr {
    Str(String),
    Int(i64),
}

impl From<IdRepr> for String {
    fn from(id: IdRepr) -> Self {
        match id {
            IdRepr::Str(s) => s,
            IdRepr::Int(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CollectionDoc {
    wikipedia_id: IdRepr,
    #[serde(default)]
    text: Vec<String>,
}

/// Keep ASCII alphanumerics and whitespace, collapse whitespace runs and trim.
pub fn sanitize_text(text: &str) -> String {
    let kept = NON_ALNUM.replace_all(text, "");
    SPACES.replace_all(&kept, " ").trim().to_string()
}

fn read_collection(path: &Path) -> Result<Vec<CollectionDoc>> {
    let reader = BufReader::new(File::open(path)?);
    if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        let mut docs = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() { continue; }
            docs.push(serde_json::from_str(&line)?);
        }
        return Ok(docs);
    }
    Ok(serde_json::from_reader(reader)?)
}

/// Documents of one collection file, in file order.
pub type Collection = Vec<(DocumentId, String)>;

/// Read one collection file keeping record order. Repeated IDs are kept; callers decide.
pub fn read_documents(path: &Path) -> Result<Collection> {
    Ok(read_collection(path)?
        .into_iter()
        .map(|doc| (doc.wikipedia_id.into(), sanitize_text(&doc.text.join(" "))))
        .collect())
}

/// Insert unless the ID is already present. Returns whether the document was added.
fn insert_new(corpus: &mut Corpus, id: DocumentId, text: String, origin: &Path) -> bool {
    match corpus.entry(id) {
        Entry::Vacant(slot) => {
            slot.insert(text);
            true
        }
        Entry::Occupied(slot) => {
            tracing::warn!(doc_id = %slot.key(), path = %origin.display(), "duplicate document id, keeping first");
            false
        }
    }
}

/// Load one collection file. The first record with a given ID wins.
pub fn load_collection(path: &Path) -> Result<Corpus> {
    let mut corpus = Corpus::new();
    for (id, text) in read_documents(path)? {
        insert_new(&mut corpus, id, text, path);
    }
    tracing::info!(path = %path.display(), num_docs = corpus.len(), "loaded collection");
    Ok(corpus)
}

/// Add documents from `additional`, in order, that `main` does not already hold, at most
/// `limit` of them. Returns the number of documents added.
pub fn merge_documents(main: &mut Corpus, additional: Collection, limit: usize) -> usize {
    let mut added = 0usize;
    for (id, text) in additional {
        if added >= limit { break; }
        if main.contains_key(&id) { continue; }
        main.insert(id, text);
        added += 1;
    }
    tracing::info!(added, limit, total = main.len(), "merged additional documents");
    added
}

/// Every `.json` / `.jsonl` file under `dir`, sorted for a stable build order.
pub fn collect_collection_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file())
        .filter(|p| matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")))
        .collect();
    files.sort();
    files
}

/// Load a file or every collection under a directory into one corpus. Files are read in path
/// order and an ID already loaded is never replaced.
pub fn load_corpus(input: &Path) -> Result<Corpus> {
    if !input.is_dir() { return load_collection(input); }
    let mut corpus = Corpus::new();
    for file in collect_collection_files(input) {
        let mut added = 0usize;
        for (id, text) in read_documents(&file)? {
            if insert_new(&mut corpus, id, text, &file) { added += 1; }
        }
        tracing::info!(path = %file.display(), added, "loaded collection");
    }
    Ok(corpus)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    #[serde(default)]
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl QueryRecord {
    /// The rewritten query when requested and present, otherwise the original question.
    pub fn text(&self, use_modified: bool) -> &str {
        match (&self.modified_query, use_modified) {
            (Some(m), true) if !m.trim().is_empty() => m,
            _ => &self.input,
        }
    }

    /// First gold answer string, when the dataset carries one.
    pub fn gold_answer(&self) -> Option<String> {
        match self.output.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map.values().next().map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            serde_json::Value::Array(items) => items.first().map(|v| v.to_string()),
            _ => None,
        }
    }
}

pub type QuerySet = BTreeMap<QueryId, QueryRecord>;

pub fn load_queries(path: &Path) -> Result<QuerySet> {
    let queries: QuerySet = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    tracing::info!(path = %path.display(), num_queries = queries.len(), "loaded queries");
    Ok(queries)
}
