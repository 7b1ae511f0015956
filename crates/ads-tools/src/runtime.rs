// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The tool runtime: extracts tool blocks from assistant text, executes
//! them under policy, and returns both substitution views of the text.
//!
//! Execution discipline (see the crate docs): contiguous runs of
//! parallelizable tools are executed concurrently with `join_all`; other
//! tools serialize in source order.  Tool failures become inline warning
//! lines; only cancellation aborts the whole pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::blocks::{parse_blocks, replace_blocks, Block, BlockKind};
use crate::policy::ToolPolicy;
use crate::ToolError;

/// Characters of payload/output shown to the hooks.
const PREVIEW_CHARS: usize = 160;

/// Execution context handed to every tool.
#[derive(Clone)]
pub struct ToolContext {
    /// Directory relative paths resolve against (the session cwd).
    pub base_dir: PathBuf,
    pub policy: Arc<ToolPolicy>,
    pub cancel: CancellationToken,
}

/// A tool executable from an embedded block.
#[async_trait::async_trait]
pub trait BlockTool: Send + Sync {
    fn name(&self) -> &str;

    /// Read-only tools return `true` and may run batched with their
    /// contiguous neighbours.
    fn parallelizable(&self) -> bool {
        false
    }

    async fn execute(&self, payload: &str, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Observer hooks fired around each invocation.
pub trait ToolHooks: Send + Sync {
    fn on_invoke(&self, name: &str, input_preview: &str);
    fn on_result(&self, name: &str, input_preview: &str, output_preview: &str);
}

/// Record of one executed block.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub payload: String,
    pub output: String,
    pub ok: bool,
}

/// Both substitution views of a processed assistant message.
#[derive(Debug, Clone)]
pub struct ProcessedText {
    /// Source text with each tool block replaced by its output.
    pub replaced_text: String,
    /// Source text with all tool blocks removed.
    pub stripped_text: String,
    pub invocations: Vec<ToolInvocation>,
}

pub struct ToolRuntime {
    tools: HashMap<String, Arc<dyn BlockTool>>,
    policy: Arc<ToolPolicy>,
    hooks: Option<Arc<dyn ToolHooks>>,
}

impl ToolRuntime {
    pub fn new(policy: Arc<ToolPolicy>) -> Self {
        Self {
            tools: HashMap::new(),
            policy,
            hooks: None,
        }
    }

    /// Runtime with the full built-in tool set, wired to the given
    /// collaborators.  Enable flags come from the policy's limits.
    pub fn with_builtins(
        policy: Arc<ToolPolicy>,
        search: Arc<dyn crate::clients::SearchClient>,
        vsearch: Arc<dyn crate::clients::VectorSearchClient>,
        invoker: Arc<dyn crate::clients::AgentInvoker>,
    ) -> Self {
        let limits = policy.limits.clone();
        let mut rt = Self::new(policy);
        rt.register(crate::builtin::ReadTool {
            enabled: limits.file_tools_enabled,
        });
        rt.register(crate::builtin::WriteTool {
            enabled: limits.file_tools_enabled,
        });
        rt.register(crate::builtin::GrepTool {
            enabled: limits.file_tools_enabled,
        });
        rt.register(crate::builtin::FindTool {
            enabled: limits.file_tools_enabled,
        });
        rt.register(crate::builtin::ExecTool {
            enabled: limits.exec_enabled,
        });
        rt.register(crate::builtin::ApplyPatchTool {
            enabled: limits.apply_patch_enabled,
        });
        rt.register(crate::builtin::SearchTool { client: search });
        rt.register(crate::builtin::VsearchTool { client: vsearch });
        rt.register(crate::builtin::AgentTool { invoker });
        rt
    }

    pub fn register(&mut self, tool: impl BlockTool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn set_hooks(&mut self, hooks: Arc<dyn ToolHooks>) {
        self.hooks = Some(hooks);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Execute every `tool.` block in `text` and substitute the outputs.
    /// `agent.` blocks are left untouched — they belong to the
    /// collaboration loop.  Fails only on cancellation.
    pub async fn process(
        &self,
        text: &str,
        base_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessedText, ToolError> {
        let blocks: Vec<Block> = parse_blocks(text)
            .into_iter()
            .filter(|b| b.kind == BlockKind::Tool)
            .collect();

        if blocks.is_empty() {
            return Ok(ProcessedText {
                replaced_text: text.to_string(),
                stripped_text: text.to_string(),
                invocations: Vec::new(),
            });
        }

        let ctx = ToolContext {
            base_dir: base_dir.to_path_buf(),
            policy: self.policy.clone(),
            cancel: cancel.clone(),
        };

        // Outputs indexed by position in `blocks` — substitution is by block
        // identity, so batch completion order is irrelevant.
        let mut outputs: Vec<Option<ToolInvocation>> = vec![None; blocks.len()];
        let mut index = 0usize;
        while index < blocks.len() {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            if self.is_parallelizable(&blocks[index]) {
                let mut end = index;
                while end < blocks.len() && self.is_parallelizable(&blocks[end]) {
                    end += 1;
                }
                let batch = &blocks[index..end];
                debug!(count = batch.len(), "executing parallel tool batch");
                let futures: Vec<_> = batch
                    .iter()
                    .map(|b| self.run_one(b, &ctx))
                    .collect();
                for (offset, result) in join_all(futures).await.into_iter().enumerate() {
                    outputs[index + offset] = Some(result?);
                }
                index = end;
            } else {
                outputs[index] = Some(self.run_one(&blocks[index], &ctx).await?);
                index += 1;
            }
        }

        let invocations: Vec<ToolInvocation> =
            outputs.into_iter().map(|o| o.expect("all blocks executed")).collect();

        let replacements: Vec<(&Block, String)> = blocks
            .iter()
            .zip(invocations.iter())
            .map(|(b, inv)| (b, inv.output.clone()))
            .collect();
        let replaced_text = replace_blocks(text, &replacements);

        let empties: Vec<(&Block, String)> =
            blocks.iter().map(|b| (b, String::new())).collect();
        let stripped_text = replace_blocks(text, &empties);

        Ok(ProcessedText {
            replaced_text,
            stripped_text,
            invocations,
        })
    }

    fn is_parallelizable(&self, block: &Block) -> bool {
        self.tools
            .get(&block.name)
            .map(|t| t.parallelizable())
            .unwrap_or(false)
    }

    /// Run one block.  Tool errors are folded into a warning line; only
    /// cancellation propagates as `Err`.
    async fn run_one(&self, block: &Block, ctx: &ToolContext) -> Result<ToolInvocation, ToolError> {
        let input_preview = preview(&block.payload);
        if let Some(hooks) = &self.hooks {
            hooks.on_invoke(&block.name, &input_preview);
        }

        let result = match self.tools.get(&block.name) {
            Some(tool) => tool.execute(&block.payload, ctx).await,
            None => Err(ToolError::Failed(format!("unknown tool {:?}", block.name))),
        };

        let (output, ok) = match result {
            Ok(out) => (out, true),
            Err(ToolError::Cancelled) => return Err(ToolError::Cancelled),
            Err(e) => (format!("⚠️ {} failed: {e}", block.name), false),
        };

        if let Some(hooks) = &self.hooks {
            hooks.on_result(&block.name, &input_preview, &preview(&output));
        }

        Ok(ToolInvocation {
            name: block.name.clone(),
            payload: block.payload.clone(),
            output,
            ok,
        })
    }
}

fn preview(s: &str) -> String {
    let single_line = s.replace('\n', " ");
    let mut chars = single_line.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ads_config::ToolLimits;

    use super::*;

    struct EchoTool {
        name: &'static str,
        parallel: bool,
    }

    #[async_trait::async_trait]
    impl BlockTool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn parallelizable(&self) -> bool {
            self.parallel
        }
        async fn execute(&self, payload: &str, _ctx: &ToolContext) -> Result<String, ToolError> {
            Ok(format!("[{}:{payload}]", self.name))
        }
    }

    struct FailingTool;

    #[async_trait::async_trait]
    impl BlockTool for FailingTool {
        fn name(&self) -> &str {
            "boom"
        }
        async fn execute(&self, _payload: &str, _ctx: &ToolContext) -> Result<String, ToolError> {
            Err(ToolError::Policy("nope".into()))
        }
    }

    fn runtime() -> ToolRuntime {
        let policy = Arc::new(ToolPolicy::new(
            ToolLimits::default(),
            vec![PathBuf::from("/")],
        ));
        let mut rt = ToolRuntime::new(policy);
        rt.register(EchoTool { name: "echo", parallel: false });
        rt.register(EchoTool { name: "peek", parallel: true });
        rt.register(FailingTool);
        rt
    }

    async fn process(rt: &ToolRuntime, text: &str) -> ProcessedText {
        rt.process(text, Path::new("/"), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn text_without_blocks_passes_through() {
        let rt = runtime();
        let out = process(&rt, "plain text").await;
        assert_eq!(out.replaced_text, "plain text");
        assert_eq!(out.stripped_text, "plain text");
        assert!(out.invocations.is_empty());
    }

    #[tokio::test]
    async fn output_substitutes_block_exactly_once() {
        let rt = runtime();
        let out = process(&rt, "a <<<tool.echo\nhi\n>>> b").await;
        assert_eq!(out.replaced_text, "a [echo:hi] b");
        assert_eq!(out.stripped_text, "a  b");
        assert_eq!(out.invocations.len(), 1);
        assert!(out.invocations[0].ok);
    }

    #[tokio::test]
    async fn failure_becomes_warning_line_and_continues() {
        let rt = runtime();
        let out = process(&rt, "<<<tool.boom\nx\n>>> then <<<tool.echo\nok\n>>>").await;
        assert!(out.replaced_text.starts_with("⚠️ boom failed:"));
        assert!(out.replaced_text.contains("[echo:ok]"));
        assert!(!out.invocations[0].ok);
        assert!(out.invocations[1].ok);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_warning_not_an_abort() {
        let rt = runtime();
        let out = process(&rt, "<<<tool.nosuch\nx\n>>>").await;
        assert!(out.replaced_text.contains("unknown tool"));
    }

    #[tokio::test]
    async fn agent_blocks_are_left_alone() {
        let rt = runtime();
        let text = "<<<agent.claude\ndo it\n>>> tail";
        let out = process(&rt, text).await;
        assert_eq!(out.replaced_text, text);
        assert_eq!(out.stripped_text, text);
    }

    #[tokio::test]
    async fn parallel_batch_preserves_substitution_positions() {
        let rt = runtime();
        let out = process(
            &rt,
            "<<<tool.peek\n1\n>>> mid <<<tool.peek\n2\n>>> end <<<tool.echo\n3\n>>>",
        )
        .await;
        assert_eq!(out.replaced_text, "[peek:1] mid [peek:2] end [echo:3]");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_processing() {
        let rt = runtime();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = rt
            .process("<<<tool.echo\nx\n>>>", Path::new("/"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }

    #[tokio::test]
    async fn hooks_fire_around_each_invocation() {
        struct Recorder(Mutex<Vec<String>>);
        impl ToolHooks for Recorder {
            fn on_invoke(&self, name: &str, _input: &str) {
                self.0.lock().unwrap().push(format!("invoke:{name}"));
            }
            fn on_result(&self, name: &str, _input: &str, _output: &str) {
                self.0.lock().unwrap().push(format!("result:{name}"));
            }
        }

        let mut rt = runtime();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        rt.set_hooks(recorder.clone());
        let _ = process(&rt, "<<<tool.echo\nx\n>>>").await;
        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events, vec!["invoke:echo", "result:echo"]);
    }

    #[test]
    fn preview_truncates_and_flattens() {
        let p = preview(&format!("line1\nline2 {}", "x".repeat(300)));
        assert!(p.len() <= PREVIEW_CHARS * 4 + 4);
        assert!(!p.contains('\n'));
        assert!(p.ends_with('…'));
    }
}
