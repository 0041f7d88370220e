//! Query -> parallel sources -> join -> RRF, for a whole query file.

use anyhow::{Context, Result};
use fuseqa_core::corpus::{Corpus, QuerySet};
use fuseqa_core::dense::{DenseIndex, Embedder, HttpEmbedder};
use fuseqa_core::fusion::RrfConfig;
use fuseqa_core::persist::{get_or_build, IndexPaths};
use fuseqa_core::pipeline::{fuse_outcomes, retrieve_all, DenseSource, RetrievalSource, SourceOutcome, SparseMethod, SparseSource};
use fuseqa_core::rankings::FusedRecord;
use fuseqa_core::retry::RetryPolicy;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct Plan {
    pub index_dir: PathBuf,
    pub methods: Vec<SparseMethod>,
    /// `(source name, vectors file)`; all dense sources share one embedder.
    pub dense: Vec<(String, PathBuf)>,
    pub embed_url: String,
    pub embed_model: String,
    pub top_n: usize,
    pub k: u32,
    pub per_source: Duration,
    pub policy: RetryPolicy,
    pub concurrency: usize,
}

#[derive(Debug, Serialize)]
pub struct QueryReport {
    pub query_id: String,
    pub contributing: Vec<String>,
    pub absent: Vec<SourceOutcome>,
}

pub struct RetrievalRun {
    pub fused: Vec<FusedRecord>,
    pub reports: Vec<QueryReport>,
}

/// Build the index if needed, assemble every configured source and run all queries.
pub async fn run(plan: &Plan, corpus: Corpus, queries: &QuerySet, modified: bool) -> Result<RetrievalRun> {
    let corpus = Arc::new(corpus);
    let index = {
        let paths = IndexPaths::new(&plan.index_dir);
        let corpus = corpus.clone();
        // index load/build is blocking disk work
        tokio::task::spawn_blocking(move || get_or_build(&paths, &corpus)).await??
    };
    let index = Arc::new(index);

    let mut methods: Vec<SparseMethod> = Vec::new();
    for m in &plan.methods {
        if !methods.contains(m) { methods.push(*m); }
    }
    let mut sources: Vec<Arc<dyn RetrievalSource>> = methods
        .into_iter()
        .map(|m| Arc::new(SparseSource::new(m, index.clone(), corpus.clone())) as Arc<dyn RetrievalSource>)
        .collect();

    if !plan.dense.is_empty() {
        let embedder: Arc<dyn Embedder> =
            Arc::new(HttpEmbedder::new(plan.embed_url.clone(), plan.embed_model.clone()).with_policy(plan.policy.clone()));
        for (name, path) in &plan.dense {
            let vectors = DenseIndex::load(path).with_context(|| format!("dense source {name}"))?;
            sources.push(Arc::new(DenseSource::new(name.clone(), embedder.clone(), Arc::new(vectors))));
        }
    }
    if sources.is_empty() { anyhow::bail!("no retrieval sources configured"); }

    let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
    tracing::info!(sources = ?names, queries = queries.len(), "running retrieval");
    Ok(run_sources(&sources, queries, modified, plan.top_n, &RrfConfig { k: plan.k, top_n: plan.top_n }, plan.per_source, plan.concurrency).await)
}

/// Every source for every query; a source that fails for a query is reported absent for it.
pub async fn run_sources(
    sources: &[Arc<dyn RetrievalSource>],
    queries: &QuerySet,
    modified: bool,
    top_n: usize,
    rrf: &RrfConfig,
    per_source: Duration,
    concurrency: usize,
) -> RetrievalRun {
    let per_query: Vec<(String, Vec<SourceOutcome>)> = stream::iter(queries.iter())
        .map(|(qid, q)| async move {
            let outcomes = retrieve_all(sources, q.text(modified), top_n, per_source).await;
            (qid.clone(), outcomes)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut run = RetrievalRun { fused: Vec::with_capacity(per_query.len()), reports: Vec::with_capacity(per_query.len()) };
    for (qid, outcomes) in per_query {
        let fused = fuse_outcomes(&outcomes, rrf);
        let ranking: Vec<String> = fused.ranking.into_iter().map(|(id, _)| id).collect();
        run.fused.push(BTreeMap::from([(qid.clone(), ranking)]));
        run.reports.push(QueryReport {
            query_id: qid,
            contributing: fused.contributing,
            absent: outcomes.into_iter().filter(|o| matches!(o, SourceOutcome::Absent { .. })).collect(),
        });
    }
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fuseqa_core::corpus::QueryRecord;
    use fuseqa_core::rankings::top_document;
    use fuseqa_core::{FuseError, RankedList};

    fn corpus() -> Corpus {
        [("d1", "cat dog"), ("d2", "cat cat fish"), ("d3", "bird")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn queries() -> QuerySet {
        let mut q = QuerySet::new();
        for (id, text) in [("q1", "cat fish"), ("q2", "bird")] {
            q.insert(id.to_string(), QueryRecord { input: text.to_string(), modified_query: None, output: None });
        }
        q
    }

    fn plan(index_dir: PathBuf) -> Plan {
        Plan {
            index_dir,
            methods: vec![SparseMethod::Tf, SparseMethod::Bm25, SparseMethod::TfIdf, SparseMethod::Bm25],
            dense: Vec::new(),
            embed_url: "http://localhost:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            top_n: 10,
            k: 60,
            per_source: Duration::from_secs(5),
            policy: RetryPolicy::no_retry(),
            concurrency: 2,
        }
    }

    struct Down;

    #[async_trait]
    impl RetrievalSource for Down {
        fn name(&self) -> &str { "down" }
        async fn retrieve(&self, _query: &str, _top_n: usize) -> fuseqa_core::Result<RankedList> {
            Err(FuseError::external("down", "connection refused"))
        }
    }

    #[tokio::test]
    async fn fuses_every_lexical_source_per_query() {
        let dir = tempfile::tempdir().unwrap();
        let run = run(&plan(dir.path().join("idx")), corpus(), &queries(), false).await.unwrap();
        assert_eq!(top_document(&run.fused, "q1").as_deref(), Some("d2"));
        assert_eq!(top_document(&run.fused, "q2").as_deref(), Some("d3"));
        assert_eq!(run.reports[0].contributing, vec!["tf", "bm25", "tfidf"]);
        assert!(run.reports.iter().all(|r| r.absent.is_empty()));
    }

    #[tokio::test]
    async fn failing_source_is_reported_absent() {
        let corpus = Arc::new(corpus());
        let index = Arc::new(fuseqa_core::InvertedIndex::build(&corpus));
        let sources: Vec<Arc<dyn RetrievalSource>> =
            vec![Arc::new(SparseSource::new(SparseMethod::Tf, index, corpus)), Arc::new(Down)];
        let run = run_sources(&sources, &queries(), false, 10, &RrfConfig::default(), Duration::from_secs(5), 1).await;
        assert_eq!(run.fused.len(), 2);
        for report in &run.reports {
            assert_eq!(report.contributing, vec!["tf"]);
            assert_eq!(report.absent.len(), 1);
            assert_eq!(report.absent[0].source(), "down");
        }
        let json = serde_json::to_value(&run.reports[0]).unwrap();
        assert_eq!(json["absent"][0]["status"], "absent");
    }

    #[tokio::test]
    async fn missing_vectors_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = plan(dir.path().join("idx"));
        p.dense.push(("text".to_string(), dir.path().join("missing.json")));
        assert!(run(&p, corpus(), &queries(), false).await.is_err());
    }
}
