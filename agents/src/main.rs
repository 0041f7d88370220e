use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use fuseqa_core::answer::{extract_keywords, generate_answer, generate_article, truncate_chars, AnswerRecord, MAX_CONTEXT_CHARS};
use fuseqa_core::config::ApiConfig;
use fuseqa_core::consensus::{group_candidates, load_answer_file, select_best_batch};
use fuseqa_core::corpus::{load_corpus, load_queries, merge_documents, read_documents, Corpus, QueryRecord, QuerySet};
use fuseqa_core::dense::DEFAULT_EMBED_URL;
use fuseqa_core::llm::{ChatClient, Completion, Resilient};
use fuseqa_core::pipeline::SparseMethod;
use fuseqa_core::rankings::{load_fused, top_document, write_json, FusedRecord};
use fuseqa_core::retry::RetryPolicy;
use fuseqa_core::rewrite::rewrite_query;
use fuseqa_core::wiki::{relaxed_lookup, Search, WikiClient};
use fuseqa_core::FuseError;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

mod retrieve;

#[derive(Parser)]
#[command(name = "agents")]
#[command(about = "Multi-source retrieval, query rewriting, answer generation and answer consensus")]
struct Cli {
    #[command(flatten)]
    llm: LlmArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LlmArgs {
    /// JSON file with the completion service key (TOGETHER_AI)
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,
    /// Override the completion model
    #[arg(long, global = true, env = "LLM_MODEL")]
    model: Option<String>,
    /// Per-call timeout in seconds for external services and retrieval sources
    #[arg(long, global = true, default_value_t = 60)]
    timeout_secs: u64,
    /// Attempts per external call before the query is marked failed
    #[arg(long, global = true, default_value_t = 3)]
    max_attempts: u32,
    /// Queries processed concurrently
    #[arg(long, global = true, default_value_t = 4)]
    concurrency: usize,
}

#[derive(Args)]
struct CorpusArgs {
    /// Collection file or directory
    #[arg(long)]
    input: PathBuf,
    /// Additional collection merged in without overwriting existing IDs
    #[arg(long)]
    extra: Option<PathBuf>,
    #[arg(long, default_value_t = 2000)]
    extra_limit: usize,
}

impl CorpusArgs {
    fn load(&self) -> Result<Corpus> {
        let mut corpus = load_corpus(&self.input)?;
        if let Some(extra) = &self.extra {
            merge_documents(&mut corpus, read_documents(extra)?, self.extra_limit);
        }
        if corpus.is_empty() { bail!("no documents found under {}", self.input.display()); }
        Ok(corpus)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Rank documents per query with every configured source and fuse the rankings
    Retrieve {
        /// Index directory (built on first use)
        #[arg(long)]
        index: PathBuf,
        #[command(flatten)]
        corpus: CorpusArgs,
        #[arg(long)]
        queries: PathBuf,
        #[arg(long, default_value_t = false)]
        modified: bool,
        /// Lexical sources to run
        #[arg(long, value_delimiter = ',', default_value = "tf,bm25,tfidf")]
        methods: Vec<SparseMethod>,
        /// Dense source as name=vectors.json; repeat for several
        #[arg(long = "dense", value_parser = parse_named_path)]
        dense: Vec<(String, PathBuf)>,
        #[arg(long, env = "EMBED_URL", default_value = DEFAULT_EMBED_URL)]
        embed_url: String,
        #[arg(long, env = "EMBED_MODEL", default_value = "nomic-embed-text")]
        embed_model: String,
        /// Documents kept per source and in the fused ranking
        #[arg(long, default_value_t = 100)]
        top_n: usize,
        #[arg(long, default_value_t = 60)]
        k: u32,
        /// Fused rankings, one record per query
        #[arg(long)]
        output: PathBuf,
        /// Contributing and absent sources per query
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Rewrite each question into a search query, filling modified_query
    Rewrite {
        #[arg(long)]
        queries: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Answer each query from a model-written background article
    Article {
        #[arg(long)]
        queries: PathBuf,
        #[arg(long, default_value_t = false)]
        modified: bool,
        #[arg(long)]
        output: PathBuf,
    },
    /// Answer each query from its encyclopedia article, relaxing the lookup as needed
    Wiki {
        #[arg(long)]
        queries: PathBuf,
        #[arg(long, default_value_t = false)]
        modified: bool,
        /// Look up model-extracted keywords instead of the question text
        #[arg(long, default_value_t = false)]
        keywords: bool,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(long, default_value = "fuseqa-agents/0.1 (+https://example.com/bot)")]
        user_agent: String,
        #[arg(long)]
        output: PathBuf,
    },
    /// Answer each query from the top document of a fused ranking
    Answer {
        #[arg(long)]
        rankings: PathBuf,
        #[command(flatten)]
        corpus: CorpusArgs,
        #[arg(long)]
        queries: PathBuf,
        #[arg(long, default_value_t = false)]
        modified: bool,
        #[arg(long)]
        output: PathBuf,
    },
    /// Pick the best answer per query across several answer files
    Consensus {
        #[arg(long, num_args = 1.., required = true)]
        responses: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
        /// Where to write per-query failures; logged only when omitted
        #[arg(long)]
        failures: Option<PathBuf>,
    },
}

fn parse_named_path(s: &str) -> std::result::Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected name=path, got {s:?}")),
    }
}

impl LlmArgs {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy { max_attempts: self.max_attempts, ..RetryPolicy::default() }.with_timeout(Duration::from_secs(self.timeout_secs))
    }

    fn client(&self) -> Result<Resilient<ChatClient>> {
        let cfg = ApiConfig::load(Some(&self.config))?;
        let mut client = ChatClient::from_config(&cfg)?;
        if let Some(model) = &self.model { client = client.with_model(model.clone()); }
        Ok(Resilient::new(client, self.policy()))
    }

    fn concurrency(&self) -> usize { self.concurrency.max(1) }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Retrieve { index, corpus, queries, modified, methods, dense, embed_url, embed_model, top_n, k, output, report } => {
            let plan = retrieve::Plan {
                index_dir: index.clone(),
                methods: methods.clone(),
                dense: dense.clone(),
                embed_url: embed_url.clone(),
                embed_model: embed_model.clone(),
                top_n: *top_n,
                k: *k,
                per_source: Duration::from_secs(cli.llm.timeout_secs),
                policy: cli.llm.policy(),
                concurrency: cli.llm.concurrency(),
            };
            let corpus = corpus.load()?;
            let queries = load_queries(queries)?;
            let run = retrieve::run(&plan, corpus, &queries, *modified).await?;
            write_json(output, &run.fused)?;
            if let Some(path) = report { write_json(path, &run.reports)?; }
            let degraded = run.reports.iter().filter(|r| !r.absent.is_empty()).count();
            tracing::info!(queries = run.fused.len(), degraded, output = %output.display(), "wrote fused rankings");
            Ok(())
        }
        Commands::Rewrite { queries, output } => {
            let llm = cli.llm.client()?;
            let queries = load_queries(queries)?;
            let rewritten: Vec<(String, QueryRecord, bool)> = stream::iter(queries.iter())
                .map(|(qid, q)| {
                    let llm = &llm;
                    async move {
                        match rewrite_query(llm, &q.input).await {
                            Ok(m) => (qid.clone(), QueryRecord { modified_query: Some(m), ..q.clone() }, true),
                            Err(e) => {
                                tracing::warn!(%qid, error = %e, "rewrite failed, keeping record unchanged");
                                (qid.clone(), q.clone(), false)
                            }
                        }
                    }
                })
                .buffered(cli.llm.concurrency())
                .collect()
                .await;
            let failed = rewritten.iter().filter(|(_, _, ok)| !ok).count();
            let out: QuerySet = rewritten.into_iter().map(|(qid, q, _)| (qid, q)).collect();
            write_json(output, &out)?;
            tracing::info!(queries = out.len(), failed, output = %output.display(), "wrote rewritten queries");
            if failed == out.len() && failed > 0 { bail!("every rewrite failed"); }
            Ok(())
        }
        Commands::Article { queries, modified, output } => {
            let llm = cli.llm.client()?;
            let queries = load_queries(queries)?;
            let results: Vec<Result<AnswerRecord>> = stream::iter(queries.iter())
                .map(|(qid, q)| article_answer(&llm, qid, q, *modified))
                .buffered(cli.llm.concurrency())
                .collect()
                .await;
            write_answers(output, results)
        }
        Commands::Wiki { queries, modified, keywords, language, user_agent, output } => {
            let llm = cli.llm.client()?;
            let search = WikiClient::new(language, user_agent)?;
            let queries = load_queries(queries)?;
            let policy = cli.llm.policy();
            let results: Vec<Result<AnswerRecord>> = stream::iter(queries.iter())
                .map(|(qid, q)| wiki_answer(&llm, &search, &policy, qid, q, *modified, *keywords))
                .buffered(cli.llm.concurrency())
                .collect()
                .await;
            write_answers(output, results)
        }
        Commands::Answer { rankings, corpus, queries, modified, output } => {
            let llm = cli.llm.client()?;
            let corpus = corpus.load()?;
            let fused = load_fused(rankings)?;
            let queries = load_queries(queries)?;
            let results: Vec<Result<AnswerRecord>> = stream::iter(queries.iter())
                .map(|(qid, q)| ranked_answer(&llm, &fused, &corpus, qid, q, *modified))
                .buffered(cli.llm.concurrency())
                .collect()
                .await;
            write_answers(output, results)
        }
        Commands::Consensus { responses, output, failures } => {
            let llm = cli.llm.client()?;
            let sources = responses.iter().map(|p| load_answer_file(p)).collect::<fuseqa_core::Result<Vec<_>>>()?;
            let questions = group_candidates(&sources);
            tracing::info!(sources = sources.len(), queries = questions.len(), "judging candidates");
            let batch = select_best_batch(&llm, &questions).await;
            write_json(output, &batch.results)?;
            if let Some(path) = failures { write_json(path, &batch.failures)?; }
            if batch.results.is_empty() && !batch.failures.is_empty() {
                bail!("consensus failed for all {} queries", batch.failures.len());
            }
            Ok(())
        }
    }
}

/// Answer from the top fused document, keeping the (truncated) text it was given.
async fn ranked_answer(
    llm: &dyn Completion,
    fused: &[FusedRecord],
    corpus: &Corpus,
    qid: &str,
    q: &QueryRecord,
    modified: bool,
) -> Result<AnswerRecord> {
    let question = q.text(modified);
    let top = top_document(fused, qid);
    let context = top.as_ref().and_then(|id| corpus.get(id)).map(|text| truncate_chars(text, MAX_CONTEXT_CHARS));
    if top.is_some() && context.is_none() { tracing::warn!(qid, "top document missing from corpus"); }
    let response = generate_answer(llm, question, context).await?;
    Ok(AnswerRecord {
        query_id: qid.to_string(),
        input: question.to_string(),
        response,
        top_document_id: top,
        context: context.map(str::to_string),
        gold_answer: q.gold_answer(),
    })
}

async fn article_answer(llm: &dyn Completion, qid: &str, q: &QueryRecord, modified: bool) -> Result<AnswerRecord> {
    let question = q.text(modified);
    let article = generate_article(llm, question).await?;
    let context = truncate_chars(&article, MAX_CONTEXT_CHARS);
    let response = generate_answer(llm, question, Some(context)).await?;
    Ok(AnswerRecord {
        query_id: qid.to_string(),
        input: question.to_string(),
        response,
        top_document_id: None,
        context: (!context.is_empty()).then(|| context.to_string()),
        gold_answer: q.gold_answer(),
    })
}

async fn wiki_answer(
    llm: &dyn Completion,
    search: &dyn Search,
    policy: &RetryPolicy,
    qid: &str,
    q: &QueryRecord,
    modified: bool,
    keywords: bool,
) -> Result<AnswerRecord> {
    let question = q.text(modified);
    let lookup = if keywords { extract_keywords(llm, question).await? } else { question.to_string() };
    let context = match relaxed_lookup(search, &lookup, policy).await {
        Ok(article) => Some(truncate_chars(&article.summary, MAX_CONTEXT_CHARS).to_string()),
        Err(FuseError::RelaxationExhausted(_)) => {
            tracing::info!(qid, lookup = %lookup, "no article found, answering zero-shot");
            None
        }
        Err(e) => return Err(anyhow!("{qid}: {e}")),
    };
    let response = generate_answer(llm, question, context.as_deref()).await?;
    Ok(AnswerRecord {
        query_id: qid.to_string(),
        input: question.to_string(),
        response,
        top_document_id: None,
        context,
        gold_answer: q.gold_answer(),
    })
}

/// Write successes and keep going past per-query failures.
fn write_answers(output: &Path, results: Vec<Result<AnswerRecord>>) -> Result<()> {
    let mut records = Vec::with_capacity(results.len());
    let mut failed = 0usize;
    for r in results {
        match r {
            Ok(rec) => records.push(rec),
            Err(e) => {
                failed += 1;
                tracing::warn!(error = %e, "query failed");
            }
        }
    }
    write_json(output, &records)?;
    tracing::info!(answered = records.len(), failed, output = %output.display(), "wrote answers");
    if records.is_empty() && failed > 0 { bail!("every query failed"); }
    Ok(())
}
