// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Parser for `<<<tool.<name>` / `<<<agent.<id>` blocks embedded in
//! assistant text, and the substitution helpers that rebuild the text from
//! per-block replacements.
//!
//! Substitution is by block identity (byte span), not by search-and-replace,
//! so identical blocks appearing twice are each replaced exactly once and
//! reassembly is deterministic regardless of execution order.

/// Which namespace a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// `<<<tool.<name>` — executed by the tool runtime.
    Tool,
    /// `<<<agent.<id>` — a delegation directive for the collaboration loop.
    Agent,
}

/// One parsed block with its exact byte span in the source text.
#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    /// Lower-cased block name (`read`, `exec`, `claude`…).
    pub name: String,
    /// Payload between the name line and the terminator, without the
    /// surrounding newlines.
    pub payload: String,
    /// Byte offset of `<<<` in the source text.
    pub start: usize,
    /// The exact source substring, delimiters included.
    pub raw: String,
}

const OPEN: &str = "<<<";
const CLOSE: &str = "\n>>>";

/// Extract all well-formed blocks, in source order.  Malformed candidates
/// (missing name, missing terminator) are left untouched in the text.
pub fn parse_blocks(text: &str) -> Vec<Block> {
    let mut out = Vec::new();
    let mut cursor = 0usize;

    while let Some(rel) = text[cursor..].find(OPEN) {
        let start = cursor + rel;
        let after_open = start + OPEN.len();

        let Some((kind, name_start)) = match_kind(&text[after_open..]) else {
            cursor = after_open;
            continue;
        };
        let name_abs = after_open + name_start;

        // Name runs to the first newline; it must be non-empty and match
        // [a-z0-9_-]+ after lower-casing.
        let Some(name_end_rel) = text[name_abs..].find('\n') else {
            cursor = after_open;
            continue;
        };
        let name = text[name_abs..name_abs + name_end_rel].trim().to_lowercase();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            cursor = after_open;
            continue;
        }

        let payload_start = name_abs + name_end_rel + 1;
        let Some(close_rel) = text[payload_start..].find(CLOSE) else {
            cursor = after_open;
            continue;
        };
        let payload_end = payload_start + close_rel;
        let end = payload_end + CLOSE.len();

        out.push(Block {
            kind,
            name,
            payload: text[payload_start..payload_end].to_string(),
            start,
            raw: text[start..end].to_string(),
        });
        cursor = end;
    }
    out
}

fn match_kind(s: &str) -> Option<(BlockKind, usize)> {
    if let Some(rest) = s.strip_prefix("tool.") {
        let _ = rest;
        return Some((BlockKind::Tool, "tool.".len()));
    }
    if let Some(rest) = s.strip_prefix("agent.") {
        let _ = rest;
        return Some((BlockKind::Agent, "agent.".len()));
    }
    None
}

/// Rebuild `text` with each block's span replaced by its paired string.
/// Blocks must come from `parse_blocks(text)` (spans are trusted).
pub fn replace_blocks(text: &str, replacements: &[(&Block, String)]) -> String {
    let mut sorted: Vec<&(&Block, String)> = replacements.iter().collect();
    sorted.sort_by_key(|(b, _)| b.start);

    let mut out = String::with_capacity(text.len());
    let mut last = 0usize;
    for (block, replacement) in sorted {
        out.push_str(&text[last..block.start]);
        out.push_str(replacement);
        last = block.start + block.raw.len();
    }
    out.push_str(&text[last..]);
    out
}

/// Remove the given blocks entirely, preserving all surrounding text
/// byte-for-byte.
pub fn strip_blocks(text: &str, blocks: &[&Block]) -> String {
    let pairs: Vec<(&Block, String)> = blocks.iter().map(|b| (*b, String::new())).collect();
    replace_blocks(text, &pairs)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_tool_block() {
        let text = "prefix <<<tool.read\n{\"path\":\"x.txt\"}\n>>> suffix";
        let blocks = parse_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Tool);
        assert_eq!(blocks[0].name, "read");
        assert_eq!(blocks[0].payload, "{\"path\":\"x.txt\"}");
        assert_eq!(blocks[0].raw, "<<<tool.read\n{\"path\":\"x.txt\"}\n>>>");
    }

    #[test]
    fn parses_agent_block() {
        let text = "<<<agent.claude\nrewrite doc\n>>> done.";
        let blocks = parse_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Agent);
        assert_eq!(blocks[0].name, "claude");
        assert_eq!(blocks[0].payload, "rewrite doc");
    }

    #[test]
    fn name_is_lowercased() {
        let blocks = parse_blocks("<<<tool.READ\npayload\n>>>");
        assert_eq!(blocks[0].name, "read");
    }

    #[test]
    fn multiline_payload_is_preserved() {
        let blocks = parse_blocks("<<<tool.write\nline1\nline2\n>>>");
        assert_eq!(blocks[0].payload, "line1\nline2");
    }

    #[test]
    fn unterminated_block_is_ignored() {
        assert!(parse_blocks("<<<tool.read\nno terminator").is_empty());
    }

    #[test]
    fn missing_name_newline_is_ignored() {
        assert!(parse_blocks("<<<tool.read").is_empty());
    }

    #[test]
    fn bad_name_chars_are_ignored() {
        assert!(parse_blocks("<<<tool.no spaces\npayload\n>>>").is_empty());
    }

    #[test]
    fn multiple_blocks_in_source_order() {
        let text = "a <<<tool.read\np1\n>>> b <<<tool.grep\np2\n>>> c";
        let blocks = parse_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].name, "read");
        assert_eq!(blocks[1].name, "grep");
        assert!(blocks[0].start < blocks[1].start);
    }

    #[test]
    fn replacement_is_by_span_not_search() {
        // Two byte-identical blocks must each be replaced once.
        let text = "<<<tool.read\np\n>>> mid <<<tool.read\np\n>>>";
        let blocks = parse_blocks(text);
        let pairs: Vec<(&Block, String)> = vec![
            (&blocks[0], "FIRST".into()),
            (&blocks[1], "SECOND".into()),
        ];
        assert_eq!(replace_blocks(text, &pairs), "FIRST mid SECOND");
    }

    #[test]
    fn out_of_order_replacements_reassemble_deterministically() {
        let text = "a <<<tool.read\n1\n>>> b <<<tool.read\n2\n>>> c";
        let blocks = parse_blocks(text);
        let pairs: Vec<(&Block, String)> = vec![
            (&blocks[1], "TWO".into()),
            (&blocks[0], "ONE".into()),
        ];
        assert_eq!(replace_blocks(text, &pairs), "a ONE b TWO c");
    }

    #[test]
    fn strip_preserves_surrounding_whitespace() {
        // The double space between prefix and suffix must survive.
        let text = "prefix <<<tool.read\n{\"path\":\"x.txt\"}\n>>> suffix";
        let blocks = parse_blocks(text);
        let refs: Vec<&Block> = blocks.iter().collect();
        assert_eq!(strip_blocks(text, &refs), "prefix  suffix");
    }

    #[test]
    fn replacement_preserves_prefix_and_suffix_exactly() {
        let text = "prefix <<<tool.read\n{\"path\":\"x.txt\"}\n>>> suffix";
        let blocks = parse_blocks(text);
        let pairs: Vec<(&Block, String)> = vec![(&blocks[0], "OUT".into())];
        assert_eq!(replace_blocks(text, &pairs), "prefix OUT suffix");
    }

    #[test]
    fn stray_angle_brackets_do_not_confuse_parser() {
        let text = "a < b << c <<<not.a.block\nd\n>>> <<<tool.read\nok\n>>>";
        let blocks = parse_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].payload, "ok");
    }
}
