use anyhow::Result;
use axum::Router;
use clap::Parser;
use server::{build_app, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Index directory path (built on first start when absent)
    #[arg(long, default_value = "./index")]
    index: PathBuf,
    /// Collection file or directory the index is built from
    #[arg(long)]
    corpus: PathBuf,
    /// Additional collection merged in without overwriting existing IDs
    #[arg(long)]
    extra: Option<PathBuf>,
    #[arg(long, default_value_t = 2000)]
    extra_limit: usize,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = ServerConfig {
        index_dir: args.index,
        corpus: args.corpus,
        extra: args.extra,
        extra_limit: args.extra_limit,
        admin_token: std::env::var("ADMIN_TOKEN").ok(),
    };
    // index load/build is blocking disk work
    let app: Router = tokio::task::spawn_blocking(move || build_app(config)).await??;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
