//! Exact-title encyclopedia lookups, wrapped in query relaxation.

use crate::error::{FuseError, Result};
use crate::relax::with_relaxation_async;
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub summary: String,
    pub url: Option<String>,
}

/// Exact-match search. A miss is `Ok(None)`, never an error.
#[async_trait]
pub trait Search: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<Option<Article>>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    query: Option<ApiQuery>,
}

#[derive(Debug, Deserialize)]
struct ApiQuery {
    #[serde(default)]
    pages: Vec<ApiPage>,
}

#[derive(Debug, Deserialize)]
struct ApiPage {
    #[serde(default)]
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    fullurl: Option<String>,
}

fn first_article(resp: ApiResponse) -> Option<Article> {
    let page = resp.query?.pages.into_iter().next()?;
    if page.missing || page.invalid { return None; }
    let summary = page.extract.unwrap_or_default();
    if summary.trim().is_empty() { return None; }
    Some(Article { title: page.title, summary, url: page.fullurl })
}

/// MediaWiki `action=query` client for one language edition.
pub struct WikiClient {
    endpoint: Url,
    client: reqwest::Client,
}

impl WikiClient {
    pub fn new(language: &str, user_agent: &str) -> Result<Self> {
        let endpoint = Url::parse(&format!("https://{language}.wikipedia.org/w/api.php"))
            .map_err(|e| FuseError::Config(format!("bad wiki language {language:?}: {e}")))?;
        Self::with_endpoint(endpoint, user_agent)
    }

    pub fn with_endpoint(endpoint: Url, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| FuseError::Config(e.to_string()))?;
        Ok(Self { endpoint, client })
    }

    fn page_url(&self, title: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("action", "query")
            .append_pair("format", "json")
            .append_pair("formatversion", "2")
            .append_pair("prop", "extracts|info")
            .append_pair("inprop", "url")
            .append_pair("exintro", "1")
            .append_pair("explaintext", "1")
            .append_pair("redirects", "1")
            .append_pair("titles", title);
        url
    }
}

#[async_trait]
impl Search for WikiClient {
    async fn lookup(&self, query: &str) -> Result<Option<Article>> {
        let resp = self
            .client
            .get(self.page_url(query))
            .send()
            .await
            .map_err(|e| FuseError::external("wiki", e))?;
        if !resp.status().is_success() {
            return Err(FuseError::external("wiki", resp.status()));
        }
        let body: ApiResponse = resp.json().await.map_err(|e| FuseError::external("wiki", e))?;
        let found = first_article(body);
        if found.is_none() { tracing::debug!(query, "no exact match"); }
        Ok(found)
    }
}

/// Relaxed lookup: each attempt is retried per `policy`; when every prefix misses the result is
/// [`FuseError::RelaxationExhausted`] so callers can pick their own fallback.
pub async fn relaxed_lookup(search: &dyn Search, query: &str, policy: &RetryPolicy) -> Result<Article> {
    let found = with_relaxation_async(query, |q| async move {
        with_retry("wiki", policy, || search.lookup(&q)).await
    })
    .await?;
    found.ok_or_else(|| FuseError::RelaxationExhausted(query.to_string()))
}
