use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::{HeaderMap, StatusCode}, routing::{get, post}, Json, Router};
use fuseqa_core::corpus::{load_corpus, merge_documents, read_documents, Corpus, IdRepr};
use fuseqa_core::fusion::{fuse, fuse_batch, RrfConfig, DEFAULT_K, DEFAULT_TOP_N};
use fuseqa_core::persist::{get_or_build, invalidate, IndexPaths};
use fuseqa_core::rankings::{to_records, FusedRecord, MergedRankings, RankingRecord};
use fuseqa_core::{sparse, InvertedIndex, RankedList};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub index_dir: PathBuf,
    pub corpus: PathBuf,
    pub extra: Option<PathBuf>,
    pub extra_limit: usize,
    /// Required in `X-ADMIN-TOKEN` for admin endpoints; admin is disabled when unset.
    pub admin_token: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_ms: u128,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: u32,
    pub snippet: Option<String>,
}

#[derive(Deserialize)]
pub struct FuseRequest {
    /// Document IDs may be strings or integers, as in ranking artifacts.
    pub lists: Vec<Vec<IdRepr>>,
    pub k: Option<u32>,
    pub top_n: Option<usize>,
}

#[derive(Serialize)]
pub struct FuseResponse {
    pub results: Vec<FusedHit>,
}

#[derive(Serialize)]
pub struct FusedHit {
    pub doc_id: String,
    pub score: f64,
}

#[derive(Deserialize)]
pub struct BatchFuseRequest {
    pub records: Vec<RankingRecord>,
    pub k: Option<u32>,
    pub top_n: Option<usize>,
}

#[derive(Serialize)]
pub struct BatchFuseResponse {
    pub results: Vec<FusedRecord>,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub index_paths: IndexPaths,
    pub index: Arc<RwLock<Arc<InvertedIndex>>>,
    pub corpus: Arc<Corpus>,
    pub admin_token: Option<String>,
}

impl AppState {
    fn current_index(&self) -> Arc<InvertedIndex> { self.index.read().clone() }
}

fn rrf_config(k: Option<u32>, top_n: Option<usize>) -> RrfConfig {
    RrfConfig { k: k.unwrap_or(DEFAULT_K), top_n: top_n.unwrap_or(DEFAULT_TOP_N) }
}

pub fn build_app(config: ServerConfig) -> Result<Router> {
    let mut corpus = load_corpus(&config.corpus)?;
    if let Some(extra) = &config.extra {
        merge_documents(&mut corpus, read_documents(extra)?, config.extra_limit);
    }
    let index_paths = IndexPaths::new(&config.index_dir);
    let index = get_or_build(&index_paths, &corpus)?;
    let app_state = AppState {
        index_paths,
        index: Arc::new(RwLock::new(Arc::new(index))),
        corpus: Arc::new(corpus),
        admin_token: config.admin_token,
    };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/fuse", post(fuse_handler))
        .route("/fuse/batch", post(fuse_batch_handler))
        .route("/index/rebuild", post(rebuild_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let index = state.current_index();
    let scored = sparse::score_candidates(&params.q, &index, &state.corpus, usize::MAX);
    let total_hits = scored.len();
    let k = params.k.clamp(1, 100);

    let raw_terms: Vec<String> = params.q.split_whitespace().map(|s| s.to_string()).collect();
    let results = scored
        .into_iter()
        .take(k)
        .map(|(doc_id, score)| {
            let snippet = state.corpus.get(&doc_id).and_then(|text| snippet_from_text(text, &raw_terms));
            SearchHit { doc_id, score, snippet }
        })
        .collect();

    Json(SearchResponse { query: params.q, took_ms: start.elapsed().as_millis(), total_hits, results })
}

pub async fn doc_handler(State(state): State<AppState>, Path(doc_id): Path<String>) -> (StatusCode, Json<serde_json::Value>) {
    match state.corpus.get(&doc_id) {
        Some(text) => (StatusCode::OK, Json(serde_json::json!({ "doc_id": doc_id, "text": text }))),
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" }))),
    }
}

pub async fn fuse_handler(Json(req): Json<FuseRequest>) -> Json<FuseResponse> {
    let cfg = rrf_config(req.k, req.top_n);
    let lists: Vec<RankedList> = req.lists.into_iter().map(|l| l.into_iter().map(String::from).collect()).collect();
    let results = fuse(&lists, cfg.k, cfg.top_n)
        .into_iter()
        .map(|(doc_id, score)| FusedHit { doc_id, score })
        .collect();
    Json(FuseResponse { results })
}

pub async fn fuse_batch_handler(Json(req): Json<BatchFuseRequest>) -> Json<BatchFuseResponse> {
    let mut merged = MergedRankings::default();
    merged.absorb(req.records);
    let fused = fuse_batch(&merged.per_query, &rrf_config(req.k, req.top_n));
    Json(BatchFuseResponse { results: to_records(&fused), skipped: merged.skipped.len() })
}

async fn rebuild_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let paths = state.index_paths.clone();
    let corpus = state.corpus.clone();
    let rebuilt = tokio::task::spawn_blocking(move || {
        invalidate(&paths)?;
        get_or_build(&paths, &corpus)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let body = serde_json::json!({ "num_docs": rebuilt.num_docs, "num_terms": rebuilt.num_terms() });
    *state.index.write() = Arc::new(rebuilt);
    tracing::info!(%body, "index rebuilt");
    Ok(Json(body))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}

fn snippet_from_text(text: &str, raw_terms: &[String]) -> Option<String> {
    if text.is_empty() { return None; }
    // first case-insensitive match of any raw term, as a char offset
    let lower: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();
    let lower: String = lower.into_iter().collect();
    let first_byte = raw_terms
        .iter()
        .filter(|t| !t.trim().is_empty())
        .find_map(|t| lower.find(&t.to_lowercase()));
    let chars: Vec<char> = text.chars().collect();
    let snippet: String = match first_byte {
        // lowercasing may change byte lengths; fall back to the head of the text
        Some(idx) if lower.len() == text.len() => {
            let center = text[..idx].chars().count();
            let start = center.saturating_sub(100);
            let end = (center + 200).min(chars.len());
            chars[start..end].iter().collect()
        }
        _ => chars.iter().take(200).collect(),
    };
    Some(highlight_terms(&snippet, raw_terms))
}

fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    let mut s = snippet.to_string();
    for t in terms {
        if t.trim().is_empty() { continue; }
        let Ok(pat) = regex::RegexBuilder::new(&regex::escape(t)).case_insensitive(true).build() else { continue };
        s = pat.replace_all(&s, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).to_string();
    }
    s
}
