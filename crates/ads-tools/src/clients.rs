// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Collaborator interfaces consumed by the tool runtime: web search,
//! workspace vector search, and the agent-invocation callback that lets
//! `tool.agent` reach another registered adapter without a back-pointer to
//! the orchestrator.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

/// Parsed `search` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, rename = "maxResults")]
    pub max_results: Option<usize>,
    #[serde(default, rename = "includeDomains")]
    pub include_domains: Vec<String>,
    #[serde(default, rename = "excludeDomains")]
    pub exclude_domains: Vec<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

impl SearchRequest {
    pub fn plain(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// External web-search backend.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, req: &SearchRequest) -> anyhow::Result<Vec<SearchHit>>;
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub path: String,
    pub score: f32,
    pub snippet: String,
}

/// Workspace-scoped vector search backend.
#[async_trait]
pub trait VectorSearchClient: Send + Sync {
    async fn search(&self, query: &str, workspace_root: &Path) -> anyhow::Result<Vec<VectorHit>>;
}

/// Callback used by `tool.agent` to delegate to another registered adapter.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, agent_id: &str, prompt: &str) -> anyhow::Result<String>;
}

// ─── HTTP search client ──────────────────────────────────────────────────────

/// Brave-backed [`SearchClient`].  Needs an API key (`BRAVE_API_KEY` or the
/// constructor argument).
pub struct HttpSearchClient {
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSearchClient {
    pub fn new(api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("ads-server/0.9")
            .build()
            .unwrap_or_default();
        Self { api_key, client }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("BRAVE_API_KEY").ok())
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(&self, req: &SearchRequest) -> anyhow::Result<Vec<SearchHit>> {
        let Some(api_key) = &self.api_key else {
            anyhow::bail!("no search API key configured (set BRAVE_API_KEY)");
        };
        let count = req.max_results.unwrap_or(5).min(10);
        let mut url = format!(
            "https://api.search.brave.com/res/v1/web/search?q={}&count={}",
            urlencode(&req.query),
            count
        );
        if let Some(lang) = &req.lang {
            url.push_str(&format!("&search_lang={}", urlencode(lang)));
        }

        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("search API returned status {}", resp.status());
        }
        let json: serde_json::Value = resp.json().await?;
        let results = json
            .pointer("/web/results")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();

        let hits = results
            .iter()
            .map(|r| SearchHit {
                title: str_of(r, "title"),
                url: str_of(r, "url"),
                snippet: str_of(r, "description"),
            })
            .filter(|h| domain_allowed(&h.url, &req.include_domains, &req.exclude_domains))
            .take(count)
            .collect();
        Ok(hits)
    }
}

fn str_of(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .to_string()
}

fn domain_allowed(url: &str, include: &[String], exclude: &[String]) -> bool {
    let host = url
        .split("//")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("");
    if exclude.iter().any(|d| host.ends_with(d.as_str())) {
        return false;
    }
    if include.is_empty() {
        return true;
    }
    include.iter().any(|d| host.ends_with(d.as_str()))
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push_str("%20"),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

// ─── Local fallback vector search ────────────────────────────────────────────

/// Term-frequency fallback used when no real vector backend is configured.
/// Scores workspace files by query-term hits and returns the best lines.
pub struct KeywordVectorSearch {
    pub max_hits: usize,
}

impl Default for KeywordVectorSearch {
    fn default() -> Self {
        Self { max_hits: 5 }
    }
}

#[async_trait]
impl VectorSearchClient for KeywordVectorSearch {
    async fn search(&self, query: &str, workspace_root: &Path) -> anyhow::Result<Vec<VectorHit>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| t.len() > 2)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<VectorHit> = Vec::new();
        for entry in walkdir::WalkDir::new(workspace_root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git" && e.file_name() != "target")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let Ok(meta) = entry.metadata() else { continue };
            if meta.len() > 1024 * 1024 {
                continue;
            }
            let Ok(content) = std::fs::read(entry.path()) else {
                continue;
            };
            if content.iter().take(4096).any(|b| *b == 0) {
                continue;
            }
            let text = String::from_utf8_lossy(&content).to_lowercase();
            let hits: usize = terms.iter().map(|t| text.matches(t.as_str()).count()).sum();
            if hits == 0 {
                continue;
            }
            let snippet = String::from_utf8_lossy(&content)
                .lines()
                .find(|l| {
                    let lower = l.to_lowercase();
                    terms.iter().any(|t| lower.contains(t.as_str()))
                })
                .unwrap_or_default()
                .trim()
                .chars()
                .take(120)
                .collect();
            scored.push(VectorHit {
                path: entry
                    .path()
                    .strip_prefix(workspace_root)
                    .unwrap_or(entry.path())
                    .display()
                    .to_string(),
                score: hits as f32 / (1.0 + (meta.len() as f32).ln()),
                snippet,
            });
        }
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(self.max_hits);
        Ok(scored)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
