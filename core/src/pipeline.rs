//! Per-query retrieval fan-out and fusion.
//!
//! Sources run in parallel and share nothing mutable. Fusion waits for every source; a source
//! that errors or times out is recorded as absent so the fused scores can be read knowing which
//! sources contributed.

use crate::corpus::Corpus;
use crate::dense::{DenseIndex, Embedder};
use crate::error::{FuseError, Result};
use crate::fusion::{fuse, RrfConfig};
use crate::lexical::{tfidf_score_candidates, Bm25, Bm25Params};
use crate::{sparse, DocumentId, InvertedIndex, RankedList};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait RetrievalSource: Send + Sync {
    fn name(&self) -> &str;
    async fn retrieve(&self, query: &str, top_n: usize) -> Result<RankedList>;
}

/// Lexical scoring method behind a [`SparseSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseMethod {
    /// Summed raw term frequency.
    Tf,
    Bm25,
    TfIdf,
}

impl SparseMethod {
    pub const ALL: [SparseMethod; 3] = [SparseMethod::Tf, SparseMethod::Bm25, SparseMethod::TfIdf];

    pub fn name(self) -> &'static str {
        match self {
            Self::Tf => "tf",
            Self::Bm25 => "bm25",
            Self::TfIdf => "tfidf",
        }
    }
}

impl FromStr for SparseMethod {
    type Err = FuseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FuseError::Config(format!("unknown sparse method {s:?} (expected tf, bm25 or tfidf)")))
    }
}

/// Lexical source over the shared presence index and corpus.
pub struct SparseSource {
    method: SparseMethod,
    index: Arc<InvertedIndex>,
    corpus: Arc<Corpus>,
    bm25: Option<Bm25>,
}

impl SparseSource {
    pub fn new(method: SparseMethod, index: Arc<InvertedIndex>, corpus: Arc<Corpus>) -> Self {
        let bm25 = (method == SparseMethod::Bm25).then(|| Bm25::new(&corpus, Bm25Params::default()));
        Self { method, index, corpus, bm25 }
    }
}

#[async_trait]
impl RetrievalSource for SparseSource {
    fn name(&self) -> &str { self.method.name() }

    async fn retrieve(&self, query: &str, top_n: usize) -> Result<RankedList> {
        let ranking = match (self.method, &self.bm25) {
            (SparseMethod::Tf, _) => sparse::score(query, &self.index, &self.corpus, top_n),
            (SparseMethod::Bm25, Some(bm25)) => ids(bm25.score_candidates(query, &self.index, &self.corpus, top_n)),
            (SparseMethod::Bm25, None) => return Err(FuseError::Config("bm25 source built without statistics".into())),
            (SparseMethod::TfIdf, _) => ids(tfidf_score_candidates(query, &self.index, &self.corpus, top_n)),
        };
        Ok(ranking)
    }
}

fn ids(scored: Vec<(DocumentId, f64)>) -> RankedList {
    scored.into_iter().map(|(id, _)| id).collect()
}

/// Embedding similarity source. The same shape serves text and rendered-page (vision) vectors.
pub struct DenseSource {
    name: String,
    embedder: Arc<dyn Embedder>,
    index: Arc<DenseIndex>,
}

impl DenseSource {
    pub fn new(name: impl Into<String>, embedder: Arc<dyn Embedder>, index: Arc<DenseIndex>) -> Self {
        Self { name: name.into(), embedder, index }
    }
}

#[async_trait]
impl RetrievalSource for DenseSource {
    fn name(&self) -> &str { &self.name }

    async fn retrieve(&self, query: &str, top_n: usize) -> Result<RankedList> {
        let vector = self.embedder.embed(query).await?;
        self.index.rank(&vector, top_n)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Ranked { source: String, ranking: RankedList },
    Absent { source: String, reason: String },
}

impl SourceOutcome {
    pub fn source(&self) -> &str {
        match self {
            Self::Ranked { source, .. } | Self::Absent { source, .. } => source,
        }
    }
}

/// Run every source for `query` and wait for all of them.
pub async fn retrieve_all(sources: &[Arc<dyn RetrievalSource>], query: &str, top_n: usize, per_source: Duration) -> Vec<SourceOutcome> {
    let calls = sources.iter().map(|s| async move {
        let source = s.name().to_string();
        let outcome = match tokio::time::timeout(per_source, s.retrieve(query, top_n)).await {
            Ok(result) => result,
            Err(_) => Err(FuseError::Timeout { service: source.clone(), elapsed: per_source }),
        };
        match outcome {
            Ok(ranking) => {
                if ranking.is_empty() { tracing::debug!(%source, query, "source returned no candidates"); }
                SourceOutcome::Ranked { source, ranking }
            }
            Err(e) => {
                tracing::warn!(%source, query, error = %e, "retrieval source absent");
                SourceOutcome::Absent { source, reason: e.to_string() }
            }
        }
    });
    join_all(calls).await
}

#[derive(Debug, Clone, Serialize)]
pub struct FusedRanking {
    pub ranking: Vec<(DocumentId, f64)>,
    pub contributing: Vec<String>,
    pub absent: Vec<String>,
}

pub fn fuse_outcomes(outcomes: &[SourceOutcome], cfg: &RrfConfig) -> FusedRanking {
    let mut lists: Vec<&[DocumentId]> = Vec::new();
    let mut contributing = Vec::new();
    let mut absent = Vec::new();
    for o in outcomes {
        match o {
            SourceOutcome::Ranked { source, ranking } => {
                lists.push(ranking);
                contributing.push(source.clone());
            }
            SourceOutcome::Absent { source, .. } => absent.push(source.clone()),
        }
    }
    FusedRanking { ranking: fuse(&lists, cfg.k, cfg.top_n), contributing, absent }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, Vec<&'static str>);

    #[async_trait]
    impl RetrievalSource for Fixed {
        fn name(&self) -> &str { self.0 }
        async fn retrieve(&self, _query: &str, top_n: usize) -> Result<RankedList> {
            Ok(self.1.iter().take(top_n).map(|s| s.to_string()).collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl RetrievalSource for Broken {
        fn name(&self) -> &str { "broken" }
        async fn retrieve(&self, _query: &str, _top_n: usize) -> Result<RankedList> {
            Err(FuseError::external("broken", "unreachable"))
        }
    }

    struct Stalled;

    #[async_trait]
    impl RetrievalSource for Stalled {
        fn name(&self) -> &str { "stalled" }
        async fn retrieve(&self, _query: &str, _top_n: usize) -> Result<RankedList> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    struct Axis;

    #[async_trait]
    impl Embedder for Axis {
        fn name(&self) -> &str { "axis" }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.contains("cat") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failures_and_timeouts_are_recorded_as_absent() {
        let sources: Vec<Arc<dyn RetrievalSource>> = vec![
            Arc::new(Fixed("a", vec!["d1", "d2"])),
            Arc::new(Broken),
            Arc::new(Stalled),
            Arc::new(Fixed("b", vec![])),
        ];
        let outcomes = retrieve_all(&sources, "q", 10, Duration::from_secs(5)).await;
        assert_eq!(outcomes.len(), 4);
        let fused = fuse_outcomes(&outcomes, &RrfConfig::default());
        assert_eq!(fused.contributing, vec!["a", "b"]);
        assert_eq!(fused.absent, vec!["broken", "stalled"]);
        assert_eq!(fused.ranking.len(), 2);
    }

    #[tokio::test]
    async fn sparse_and_dense_sources_fuse() {
        let corpus: Corpus = [("d1", "cat dog"), ("d2", "cat cat fish"), ("d3", "bird")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let index = Arc::new(InvertedIndex::build(&corpus));
        let mut dense = DenseIndex::new();
        dense.insert("d1", vec![1.0, 0.0]).unwrap();
        dense.insert("d3", vec![0.0, 1.0]).unwrap();
        let sources: Vec<Arc<dyn RetrievalSource>> = vec![
            Arc::new(SparseSource::new(SparseMethod::Tf, index, Arc::new(corpus))),
            Arc::new(DenseSource::new("dense", Arc::new(Axis), Arc::new(dense))),
        ];
        let outcomes = retrieve_all(&sources, "cat", 10, Duration::from_secs(5)).await;
        let fused = fuse_outcomes(&outcomes, &RrfConfig::default());
        let ids: Vec<&str> = fused.ranking.iter().map(|(d, _)| d.as_str()).collect();
        // d1: sparse rank 2 + dense rank 1 beats d2: sparse rank 1 only
        assert_eq!(ids, vec!["d1", "d2", "d3"]);
        assert!(fused.absent.is_empty());
    }

    struct Wide;

    #[async_trait]
    impl Embedder for Wide {
        fn name(&self) -> &str { "wide" }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> { Ok(vec![1.0, 0.0, 0.0]) }
    }

    #[tokio::test]
    async fn every_sparse_method_ranks_and_mismatched_dense_is_absent() {
        let corpus: Arc<Corpus> = Arc::new(
            [("d1", "cat dog"), ("d2", "cat cat fish"), ("d3", "bird")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        let index = Arc::new(InvertedIndex::build(&corpus));
        let mut dense = DenseIndex::new();
        dense.insert("d1", vec![1.0, 0.0]).unwrap();
        dense.insert("d2", vec![0.0, 1.0]).unwrap();

        let mut sources: Vec<Arc<dyn RetrievalSource>> = SparseMethod::ALL
            .into_iter()
            .map(|m| Arc::new(SparseSource::new(m, index.clone(), corpus.clone())) as Arc<dyn RetrievalSource>)
            .collect();
        sources.push(Arc::new(DenseSource::new("dense", Arc::new(Wide), Arc::new(dense))));

        let outcomes = retrieve_all(&sources, "cat fish", 10, Duration::from_secs(5)).await;
        let fused = fuse_outcomes(&outcomes, &RrfConfig::default());
        assert_eq!(fused.contributing, vec!["tf", "bm25", "tfidf"]);
        assert_eq!(fused.absent, vec!["dense"]);
        assert!(matches!(&outcomes[3], SourceOutcome::Absent { reason, .. } if reason.contains("dimension")));
        assert_eq!(fused.ranking[0].0, "d2");
    }

    #[test]
    fn sparse_methods_parse_by_name() {
        assert_eq!("BM25".parse::<SparseMethod>().unwrap(), SparseMethod::Bm25);
        assert_eq!(" tfidf ".parse::<SparseMethod>().unwrap(), SparseMethod::TfIdf);
        assert!(matches!("lsi".parse::<SparseMethod>(), Err(FuseError::Config(_))));
    }
}
