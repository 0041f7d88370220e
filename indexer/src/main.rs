use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use fuseqa_core::corpus::{load_corpus, load_queries, merge_documents, read_documents, Corpus};
use fuseqa_core::fusion::{fuse_batch, RrfConfig};
use fuseqa_core::persist::{get_or_build, invalidate, IndexPaths};
use fuseqa_core::rankings::{merge_source_files, to_records, write_json, FusedRecord};
use fuseqa_core::sparse;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build the term index, produce sparse rankings and fuse ranking artifacts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or reuse) the index for a collection file or directory
    Build {
        /// Input path (file or directory of .json/.jsonl collections)
        #[arg(long)]
        input: PathBuf,
        /// Additional collection merged in without overwriting existing IDs
        #[arg(long)]
        extra: Option<PathBuf>,
        /// Maximum number of documents taken from --extra
        #[arg(long, default_value_t = 2000)]
        extra_limit: usize,
        /// Output index directory
        #[arg(long)]
        output: PathBuf,
        /// Discard an existing index and rebuild
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Rank documents for every query with the term-frequency scorer
    Retrieve {
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        extra: Option<PathBuf>,
        #[arg(long, default_value_t = 2000)]
        extra_limit: usize,
        /// Query file: { query_id: { "input": ..., "modified_query": ... } }
        #[arg(long)]
        queries: PathBuf,
        /// Use the rewritten query text when present
        #[arg(long, default_value_t = false)]
        modified: bool,
        #[arg(long, default_value_t = 100)]
        top_n: usize,
        #[arg(long)]
        output: PathBuf,
    },
    /// Merge ranking artifacts by query and fuse them with RRF
    Fuse {
        #[arg(long, num_args = 1.., required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long, default_value_t = 60)]
        k: u32,
        #[arg(long, default_value_t = 100)]
        top_n: usize,
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, extra, extra_limit, output, force } => {
            let corpus = assemble_corpus(&input, extra.as_deref(), extra_limit)?;
            let paths = IndexPaths::new(&output);
            if force { invalidate(&paths)?; }
            let index = get_or_build(&paths, &corpus)?;
            tracing::info!(output = %output.display(), num_docs = index.num_docs, num_terms = index.num_terms(), "index ready");
            Ok(())
        }
        Commands::Retrieve { index, input, extra, extra_limit, queries, modified, top_n, output } => {
            let corpus = assemble_corpus(&input, extra.as_deref(), extra_limit)?;
            let index = get_or_build(&IndexPaths::new(&index), &corpus)?;
            let queries = load_queries(&queries)?;
            let mut records: Vec<FusedRecord> = Vec::with_capacity(queries.len());
            for (qid, q) in &queries {
                let ranking = sparse::score(q.text(modified), &index, &corpus, top_n);
                if ranking.is_empty() { tracing::debug!(%qid, "no candidates"); }
                records.push(BTreeMap::from([(qid.clone(), ranking)]));
            }
            write_json(&output, &records)?;
            tracing::info!(queries = records.len(), output = %output.display(), "wrote sparse rankings");
            Ok(())
        }
        Commands::Fuse { inputs, k, top_n, output } => {
            let merged = merge_source_files(&inputs)?;
            if merged.per_query.is_empty() { bail!("no usable rankings in {} input file(s)", inputs.len()); }
            let fused = fuse_batch(&merged.per_query, &RrfConfig { k, top_n });
            write_json(&output, &to_records(&fused))?;
            tracing::info!(queries = fused.len(), skipped = merged.skipped.len(), output = %output.display(), "wrote fused rankings");
            Ok(())
        }
    }
}

fn assemble_corpus(input: &Path, extra: Option<&Path>, extra_limit: usize) -> Result<Corpus> {
    let mut corpus = load_corpus(input)?;
    if let Some(extra) = extra {
        merge_documents(&mut corpus, read_documents(extra)?, extra_limit);
    }
    if corpus.is_empty() { bail!("no documents found under {}", input.display()); }
    Ok(corpus)
}
