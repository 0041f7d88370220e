//! Ranking artifacts exchanged between retrieval sources and the fusion step.
//!
//! Every artifact is a JSON array of single-key records keyed by query ID:
//! a source writes `{qid: [doc, ...]}`, a merged artifact holds `{qid: [[doc, ...], ...]}`,
//! and fused output is again `{qid: [doc, ...]}`. Shapes are validated here, at ingestion;
//! entries that are not ranked lists are skipped with a warning instead of failing the batch.

use crate::corpus::IdRepr;
use crate::error::{FuseError, Result};
use crate::{QueryId, RankedList};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RankingEntry {
    Lists(Vec<Vec<IdRepr>>),
    List(Vec<IdRepr>),
    Malformed(serde_json::Value),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RankingRecord {
    Queries(BTreeMap<QueryId, RankingEntry>),
    Malformed(serde_json::Value),
}

/// Output record shape: one query mapped to its fused ranking.
pub type FusedRecord = BTreeMap<QueryId, RankedList>;

#[derive(Debug, Default)]
pub struct MergedRankings {
    pub per_query: BTreeMap<QueryId, Vec<RankedList>>,
    pub skipped: Vec<FuseError>,
}

impl MergedRankings {
    fn skip(&mut self, query_id: &str, reason: impl Into<String>) {
        let err = FuseError::MalformedFusionInput { query_id: query_id.to_string(), reason: reason.into() };
        tracing::warn!(error = %err, "skipping fusion input entry");
        self.skipped.push(err);
    }

    /// Fold one artifact's records in. Source and merged shapes may be mixed freely.
    pub fn absorb(&mut self, records: Vec<RankingRecord>) {
        for record in records {
            let entries = match record {
                RankingRecord::Queries(entries) => entries,
                RankingRecord::Malformed(value) => {
                    self.skip("<unknown>", format!("record is not an object: {value}"));
                    continue;
                }
            };
            for (qid, entry) in entries {
                match entry {
                    RankingEntry::List(ids) => {
                        self.per_query.entry(qid).or_default().push(ids.into_iter().map(String::from).collect());
                    }
                    RankingEntry::Lists(lists) => {
                        let slot = self.per_query.entry(qid).or_default();
                        slot.extend(lists.into_iter().map(|l| l.into_iter().map(String::from).collect::<RankedList>()));
                    }
                    RankingEntry::Malformed(value) => self.skip(&qid, format!("expected a ranked list, got {value}")),
                }
            }
        }
    }
}

pub fn parse_records(json: &str) -> Result<Vec<RankingRecord>> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_records(path: &Path) -> Result<Vec<RankingRecord>> {
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}

/// Merge several source artifacts by query ID, one ranked list per source per query.
pub fn merge_source_files<P: AsRef<Path>>(paths: &[P]) -> Result<MergedRankings> {
    let mut merged = MergedRankings::default();
    for path in paths {
        let records = load_records(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), records = records.len(), "merging ranking artifact");
        merged.absorb(records);
    }
    Ok(merged)
}

pub fn to_records(fused: &BTreeMap<QueryId, RankedList>) -> Vec<FusedRecord> {
    fused
        .iter()
        .map(|(qid, ids)| BTreeMap::from([(qid.clone(), ids.clone())]))
        .collect()
}

/// First-ranked document for `query_id`, from fused or single-source records.
pub fn top_document(records: &[FusedRecord], query_id: &str) -> Option<String> {
    records.iter().find_map(|r| r.get(query_id)).and_then(|ids| ids.first().cloned())
}

pub fn load_fused(path: &Path) -> Result<Vec<FusedRecord>> {
    let mut merged = MergedRankings::default();
    merged.absorb(load_records(path)?);
    // A fused artifact carries exactly one list per query; keep the first.
    let fused = merged
        .per_query
        .into_iter()
        .filter_map(|(qid, mut lists)| (!lists.is_empty()).then(|| (qid, lists.swap_remove(0))))
        .collect();
    Ok(to_records(&fused))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() { std::fs::create_dir_all(dir)?; }
    }
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, value)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
