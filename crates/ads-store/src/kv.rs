// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Namespaced key/value state — cwd store, migration markers, thread-id
//! cache and pending prompts all live here.

use rusqlite::{params, OptionalExtension};

use crate::{Result, Store};

impl Store {
    pub fn kv_get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM kv_state WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |r| r.get(0),
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn kv_set(&self, namespace: &str, key: &str, value: &str, now: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_state (namespace, key, value, updated_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(namespace, key) DO UPDATE SET value = ?3, updated_at = ?4",
                params![namespace, key, value, now],
            )?;
            Ok(())
        })
    }

    pub fn kv_delete(&self, namespace: &str, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM kv_state WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )?;
            Ok(n == 1)
        })
    }

    /// All keys in a namespace with their values.
    pub fn kv_list(&self, namespace: &str) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM kv_state WHERE namespace = ?1 ORDER BY key ASC",
            )?;
            let out = stmt
                .query_map([namespace], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(out)
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
