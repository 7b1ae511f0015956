// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! One-time absorption of the legacy JSON state files.
//!
//! Earlier releases kept the per-session working directory in
//! `.ads/web-cwd.json` and console history in `.ads/web-history.json`.
//! On first open those files are imported into the store; a marker row in
//! the `migrations` KV namespace guarantees at-most-once behavior even if
//! the files are left on disk.

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::types::{HistoryKind, HistoryRole, NewHistoryEntry};
use crate::{Result, Store};

const MIGRATIONS_NS: &str = "migrations";
const CWD_MARKER: &str = "web-cwd-json";
const HISTORY_MARKER: &str = "web-history-json";

/// Namespace imported history is filed under.
const HISTORY_NS: &str = "web";

#[derive(Debug, Deserialize)]
struct LegacyHistoryItem {
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
    role: String,
    #[serde(default)]
    kind: Option<String>,
    text: String,
    #[serde(default)]
    ts: i64,
}

impl Store {
    /// Import both legacy files if present and not yet absorbed.
    pub fn import_legacy_state(&self, cwd_json: &Path, history_json: &Path, now: i64) -> Result<()> {
        self.import_legacy_cwd(cwd_json, now)?;
        self.import_legacy_history(history_json, now)?;
        Ok(())
    }

    fn import_legacy_cwd(&self, path: &Path, now: i64) -> Result<()> {
        if self.kv_get(MIGRATIONS_NS, CWD_MARKER)?.is_some() {
            return Ok(());
        }
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<std::collections::HashMap<String, String>>(&raw) {
                    Ok(map) => {
                        for (session, cwd) in &map {
                            self.kv_set("cwd", session, cwd, now)?;
                        }
                        info!(entries = map.len(), "imported legacy cwd store");
                    }
                    Err(e) => warn!("skipping malformed {}: {e}", path.display()),
                },
                Err(e) => warn!("cannot read {}: {e}", path.display()),
            }
        }
        self.kv_set(MIGRATIONS_NS, CWD_MARKER, "done", now)
    }

    fn import_legacy_history(&self, path: &Path, now: i64) -> Result<()> {
        if self.kv_get(MIGRATIONS_NS, HISTORY_MARKER)?.is_some() {
            return Ok(());
        }
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<Vec<LegacyHistoryItem>>(&raw) {
                    Ok(items) => {
                        let mut imported = 0usize;
                        for item in items {
                            let Ok(role) = HistoryRole::parse(&item.role) else {
                                continue;
                            };
                            let kind = item
                                .kind
                                .as_deref()
                                .and_then(|k| HistoryKind::parse(k).ok());
                            self.add_history_entry(NewHistoryEntry {
                                namespace: HISTORY_NS.to_string(),
                                session_id: item
                                    .session_id
                                    .unwrap_or_else(|| "default".to_string()),
                                role,
                                kind,
                                text: item.text,
                                ts: if item.ts > 0 { item.ts } else { now },
                            })?;
                            imported += 1;
                        }
                        info!(entries = imported, "imported legacy history");
                    }
                    Err(e) => warn!("skipping malformed {}: {e}", path.display()),
                },
                Err(e) => warn!("cannot read {}: {e}", path.display()),
            }
        }
        self.kv_set(MIGRATIONS_NS, HISTORY_MARKER, "done", now)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[test]
    fn cwd_import_runs_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let cwd_path = dir.path().join("web-cwd.json");
        let hist_path = dir.path().join("web-history.json");
        std::fs::write(&cwd_path, r#"{"sess-1": "/ws/a"}"#).unwrap();

        let s = Store::open_in_memory().unwrap();
        s.import_legacy_state(&cwd_path, &hist_path, 1).unwrap();
        assert_eq!(s.kv_get("cwd", "sess-1").unwrap().as_deref(), Some("/ws/a"));

        // Change the file; a second import must be a no-op.
        std::fs::write(&cwd_path, r#"{"sess-1": "/ws/CHANGED"}"#).unwrap();
        s.import_legacy_state(&cwd_path, &hist_path, 2).unwrap();
        assert_eq!(s.kv_get("cwd", "sess-1").unwrap().as_deref(), Some("/ws/a"));
    }

    #[test]
    fn history_import_preserves_order_and_roles() {
        let dir = tempfile::tempdir().unwrap();
        let cwd_path = dir.path().join("web-cwd.json");
        let hist_path = dir.path().join("web-history.json");
        std::fs::write(
            &hist_path,
            r#"[
                {"sessionId": "s1", "role": "user", "text": "hello", "ts": 10},
                {"sessionId": "s1", "role": "ai", "text": "hi there", "ts": 11},
                {"sessionId": "s1", "role": "status", "kind": "command", "text": "/pwd", "ts": 12}
            ]"#,
        )
        .unwrap();

        let s = Store::open_in_memory().unwrap();
        s.import_legacy_state(&cwd_path, &hist_path, 1).unwrap();
        let got = s.get_history("web", "s1", None).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].text, "hello");
        assert_eq!(got[1].role, HistoryRole::Ai);
        assert_eq!(got[2].kind, Some(HistoryKind::Command));
    }

    #[test]
    fn missing_files_still_set_markers() {
        let dir = tempfile::tempdir().unwrap();
        let s = Store::open_in_memory().unwrap();
        s.import_legacy_state(
            &dir.path().join("web-cwd.json"),
            &dir.path().join("web-history.json"),
            1,
        )
        .unwrap();
        assert!(s.kv_get("migrations", "web-cwd-json").unwrap().is_some());
        assert!(s.kv_get("migrations", "web-history-json").unwrap().is_some());
    }

    #[test]
    fn malformed_json_is_skipped_but_marked() {
        let dir = tempfile::tempdir().unwrap();
        let cwd_path = dir.path().join("web-cwd.json");
        std::fs::write(&cwd_path, "not json at all").unwrap();
        let s = Store::open_in_memory().unwrap();
        s.import_legacy_state(&cwd_path, &dir.path().join("none.json"), 1).unwrap();
        assert!(s.kv_get("migrations", "web-cwd-json").unwrap().is_some());
        assert!(s.kv_list("cwd").unwrap().is_empty());
    }

    #[test]
    fn unknown_roles_are_dropped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let hist_path = dir.path().join("web-history.json");
        std::fs::write(
            &hist_path,
            r#"[{"role": "martian", "text": "??", "ts": 1},
               {"role": "user", "text": "ok", "ts": 2}]"#,
        )
        .unwrap();
        let s = Store::open_in_memory().unwrap();
        s.import_legacy_state(&dir.path().join("none.json"), &hist_path, 1).unwrap();
        let got = s.get_history("web", "default", None).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].text, "ok");
    }
}
