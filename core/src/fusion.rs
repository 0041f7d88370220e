//! Reciprocal Rank Fusion.
//!
//! `score(doc) = sum over lists containing doc of 1 / (rank + k)`, rank 1-based. Sources are
//! symmetric: sparse, dense, vision and encyclopedia rankings all enter as plain ranked lists.

use crate::{DocumentId, QueryId, RankedList};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

pub const DEFAULT_K: u32 = 60;
pub const DEFAULT_TOP_N: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RrfConfig {
    pub k: u32,
    pub top_n: usize,
}

impl Default for RrfConfig {
    fn default() -> Self { Self { k: DEFAULT_K, top_n: DEFAULT_TOP_N } }
}

/// Fuse ranked lists into `(doc, score)` pairs, best first, at most `top_n` long.
///
/// Equal scores keep first-seen order (list order, then rank). A document repeated inside one
/// list only counts at its first rank.
pub fn fuse<L: AsRef<[DocumentId]>>(lists: &[L], k: u32, top_n: usize) -> Vec<(DocumentId, f64)> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut fused: Vec<(DocumentId, f64)> = Vec::new();

    for list in lists {
        let mut seen_in_list: HashSet<&str> = HashSet::new();
        for (pos, doc) in list.as_ref().iter().enumerate() {
            if !seen_in_list.insert(doc.as_str()) {
                tracing::debug!(%doc, "duplicate document within one ranked list ignored");
                continue;
            }
            let contribution = 1.0 / ((pos + 1) as f64 + k as f64);
            match slots.get(doc.as_str()) {
                Some(&slot) => fused[slot].1 += contribution,
                None => {
                    slots.insert(doc.as_str(), fused.len());
                    fused.push((doc.clone(), contribution));
                }
            }
        }
    }

    // stable: ties stay in first-seen order
    fused.sort_by(|a, b| b.1.total_cmp(&a.1));
    fused.truncate(top_n);
    fused
}

pub fn fuse_with(lists: &[RankedList], cfg: &RrfConfig) -> Vec<(DocumentId, f64)> {
    fuse(lists, cfg.k, cfg.top_n)
}

/// Document IDs only, for downstream consumers that do not need scores.
pub fn fuse_ids<L: AsRef<[DocumentId]>>(lists: &[L], k: u32, top_n: usize) -> RankedList {
    fuse(lists, k, top_n).into_iter().map(|(id, _)| id).collect()
}

/// Independent fusion per query. Queries never interact; a query with no lists fuses to an
/// empty ranking.
pub fn fuse_batch(per_query: &BTreeMap<QueryId, Vec<RankedList>>, cfg: &RrfConfig) -> BTreeMap<QueryId, RankedList> {
    per_query
        .iter()
        .map(|(qid, lists)| (qid.clone(), fuse_ids(lists, cfg.k, cfg.top_n)))
        .collect()
}
