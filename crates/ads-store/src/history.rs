// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Console history: a capped per-session ring of (role, kind, text) lines.

use rusqlite::{params, Row};

use crate::types::{HistoryEntry, HistoryKind, HistoryRole, NewHistoryEntry};
use crate::{Result, Store};

/// Entries kept per (namespace, session) before the oldest are dropped.
pub const HISTORY_RING_CAP: usize = 500;

/// Text payloads longer than this are truncated at a char boundary.
pub const HISTORY_TEXT_MAX_BYTES: usize = 8 * 1024;

impl Store {
    /// Append a history line, truncating oversized text and enforcing the
    /// per-session ring cap in the same transaction.
    pub fn add_history_entry(&self, entry: NewHistoryEntry) -> Result<HistoryEntry> {
        let text = truncate_at_char_boundary(&entry.text, HISTORY_TEXT_MAX_BYTES);
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO history (namespace, session_id, role, kind, text, ts) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.namespace,
                    entry.session_id,
                    entry.role.as_str(),
                    entry.kind.map(|k| k.as_str()),
                    text,
                    entry.ts
                ],
            )?;
            let id = tx.last_insert_rowid();

            // Ring policy: drop everything older than the newest CAP rows.
            tx.execute(
                "DELETE FROM history WHERE namespace = ?1 AND session_id = ?2 AND id NOT IN \
                 (SELECT id FROM history WHERE namespace = ?1 AND session_id = ?2 \
                  ORDER BY id DESC LIMIT ?3)",
                params![entry.namespace, entry.session_id, HISTORY_RING_CAP as i64],
            )?;

            Ok(HistoryEntry {
                id,
                namespace: entry.namespace,
                session_id: entry.session_id,
                role: entry.role,
                kind: entry.kind,
                text,
                ts: entry.ts,
            })
        })
    }

    /// Read history oldest-first, up to `limit` entries (`None` = all kept).
    pub fn get_history(
        &self,
        namespace: &str,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>> {
        self.with_conn(|conn| {
            let cap = limit.unwrap_or(HISTORY_RING_CAP) as i64;
            let mut stmt = conn.prepare(
                "SELECT id, namespace, session_id, role, kind, text, ts FROM history \
                 WHERE namespace = ?1 AND session_id = ?2 \
                 ORDER BY id DESC LIMIT ?3",
            )?;
            let mut rows = stmt
                .query_map(params![namespace, session_id, cap], history_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    pub fn clear_history(&self, namespace: &str, session_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM history WHERE namespace = ?1 AND session_id = ?2",
                params![namespace, session_id],
            )?;
            Ok(n)
        })
    }

    /// Substring search across a namespace, newest first.
    pub fn search_history(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        self.with_conn(|conn| {
            let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
            let mut stmt = conn.prepare(
                "SELECT id, namespace, session_id, role, kind, text, ts FROM history \
                 WHERE namespace = ?1 AND text LIKE ?2 ESCAPE '\\' \
                 ORDER BY id DESC LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![namespace, pattern, limit as i64], history_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let role: String = row.get(3)?;
    let kind: Option<String> = row.get(4)?;
    let conv = |e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    };
    Ok(HistoryEntry {
        id: row.get(0)?,
        namespace: row.get(1)?,
        session_id: row.get(2)?,
        role: HistoryRole::parse(&role).map_err(conv)?,
        kind: kind
            .as_deref()
            .map(HistoryKind::parse)
            .transpose()
            .map_err(conv)?,
        text: row.get(5)?,
        ts: row.get(6)?,
    })
}

fn truncate_at_char_boundary(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
