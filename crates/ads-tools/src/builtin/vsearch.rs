// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `tool.vsearch` — semantic search over the workspace via the vector
//! search collaborator.  Payload is a free-text query.

use std::sync::Arc;

use crate::clients::VectorSearchClient;
use crate::runtime::{BlockTool, ToolContext};
use crate::ToolError;

pub struct VsearchTool {
    pub client: Arc<dyn VectorSearchClient>,
}

#[async_trait::async_trait]
impl BlockTool for VsearchTool {
    fn name(&self) -> &str {
        "vsearch"
    }

    fn parallelizable(&self) -> bool {
        true
    }

    async fn execute(&self, payload: &str, ctx: &ToolContext) -> Result<String, ToolError> {
        let query = payload.trim();
        if query.is_empty() {
            return Err(ToolError::Failed("vsearch payload is empty".into()));
        }
        let hits = self
            .client
            .search(query, &ctx.base_dir)
            .await
            .map_err(|e| ToolError::Failed(format!("vector search error: {e}")))?;

        if hits.is_empty() {
            return Ok(format!("(no semantic matches for {query:?})"));
        }
        let mut out = String::new();
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format!(
                "{}. {} (score {:.2})\n   {}\n",
                i + 1,
                hit.path,
                hit.score,
                hit.snippet
            ));
        }
        Ok(out.trim_end().to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use ads_config::ToolLimits;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::clients::VectorHit;
    use crate::policy::ToolPolicy;

    struct FixedClient(Vec<VectorHit>);

    #[async_trait]
    impl VectorSearchClient for FixedClient {
        async fn search(&self, _query: &str, _root: &Path) -> anyhow::Result<Vec<VectorHit>> {
            Ok(self.0.clone())
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            base_dir: PathBuf::from("/ws"),
            policy: Arc::new(ToolPolicy::new(
                ToolLimits::default(),
                vec![PathBuf::from("/ws")],
            )),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn hits_are_listed_with_scores() {
        let tool = VsearchTool {
            client: Arc::new(FixedClient(vec![VectorHit {
                path: "src/queue.rs".into(),
                score: 0.91,
                snippet: "scheduler tick".into(),
            }])),
        };
        let out = tool.execute("where is the scheduler", &ctx()).await.unwrap();
        assert!(out.contains("src/queue.rs"));
        assert!(out.contains("0.91"));
    }

    #[tokio::test]
    async fn empty_query_is_failed() {
        let tool = VsearchTool {
            client: Arc::new(FixedClient(vec![])),
        };
        assert!(matches!(
            tool.execute("  \n", &ctx()).await.unwrap_err(),
            ToolError::Failed(_)
        ));
    }

    #[tokio::test]
    async fn no_hits_is_a_friendly_message() {
        let tool = VsearchTool {
            client: Arc::new(FixedClient(vec![])),
        };
        let out = tool.execute("anything", &ctx()).await.unwrap();
        assert!(out.contains("no semantic matches"));
    }
}
