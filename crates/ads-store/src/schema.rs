// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use rusqlite::Connection;

use crate::Result;

/// Ordered schema migrations.  The `migrations` table records which versions
/// have been applied, so reopening an existing database only runs the delta.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id                  TEXT PRIMARY KEY,
        title               TEXT NOT NULL,
        prompt              TEXT NOT NULL,
        model               TEXT,
        model_params        TEXT,
        status              TEXT NOT NULL,
        priority            INTEGER NOT NULL DEFAULT 0,
        queue_order         INTEGER NOT NULL,
        created_at          INTEGER NOT NULL,
        queued_at           INTEGER,
        started_at          INTEGER,
        completed_at        INTEGER,
        prompt_injected_at  INTEGER,
        archived_at         INTEGER,
        parent_id           TEXT,
        thread_id           TEXT,
        result              TEXT,
        error               TEXT,
        retry_count         INTEGER NOT NULL DEFAULT 0,
        max_retries         INTEGER NOT NULL DEFAULT 0,
        created_by          TEXT,
        inherit_context     INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
    CREATE INDEX IF NOT EXISTS idx_tasks_pending_order
        ON tasks(status, queue_order, created_at, id);
    CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id);

    CREATE TABLE IF NOT EXISTS plan_steps (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id      TEXT NOT NULL REFERENCES tasks(id),
        step_number  INTEGER NOT NULL CHECK (step_number >= 1),
        title        TEXT NOT NULL,
        description  TEXT,
        status       TEXT NOT NULL DEFAULT 'pending',
        started_at   INTEGER,
        completed_at INTEGER,
        UNIQUE (task_id, step_number)
    );

    CREATE TABLE IF NOT EXISTS task_messages (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id       TEXT NOT NULL REFERENCES tasks(id),
        plan_step_id  INTEGER REFERENCES plan_steps(id),
        role          TEXT NOT NULL,
        content       TEXT NOT NULL,
        message_type  TEXT,
        model_used    TEXT,
        created_at    INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_task_messages_task ON task_messages(task_id);

    CREATE TABLE IF NOT EXISTS task_contexts (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id       TEXT NOT NULL REFERENCES tasks(id),
        context_type  TEXT NOT NULL,
        content       TEXT NOT NULL,
        created_at    INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_task_contexts_task ON task_contexts(task_id);

    CREATE TABLE IF NOT EXISTS conversations (
        id                  TEXT PRIMARY KEY,
        task_id             TEXT,
        title               TEXT,
        total_tokens        INTEGER NOT NULL DEFAULT 0 CHECK (total_tokens >= 0),
        last_model          TEXT,
        model_response_ids  TEXT NOT NULL DEFAULT '{}',
        status              TEXT NOT NULL DEFAULT 'active',
        created_at          INTEGER NOT NULL,
        updated_at          INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS conversation_messages (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id  TEXT NOT NULL REFERENCES conversations(id),
        task_id          TEXT,
        role             TEXT NOT NULL,
        content          TEXT NOT NULL,
        created_at       INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_conv_messages_conv
        ON conversation_messages(conversation_id);

    CREATE TABLE IF NOT EXISTS history (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        namespace   TEXT NOT NULL,
        session_id  TEXT NOT NULL,
        role        TEXT NOT NULL,
        kind        TEXT,
        text        TEXT NOT NULL,
        ts          INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_history_session ON history(namespace, session_id, id);

    CREATE TABLE IF NOT EXISTS kv_state (
        namespace   TEXT NOT NULL,
        key         TEXT NOT NULL,
        value       TEXT NOT NULL,
        updated_at  INTEGER NOT NULL,
        PRIMARY KEY (namespace, key)
    );
    "#,
)];

/// Apply every migration whose version is not yet recorded.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  INTEGER NOT NULL
        );
        "#,
    )?;

    for (version, sql) in MIGRATIONS {
        let applied: bool = conn
            .prepare("SELECT 1 FROM migrations WHERE version = ?1")?
            .exists([version])?;
        if applied {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, chrono::Utc::now().timestamp_millis()],
        )?;
        tracing::debug!(version, "applied schema migration");
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_record_their_version() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n as usize, MIGRATIONS.len());
    }

    #[test]
    fn running_twice_applies_nothing_new() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n as usize, MIGRATIONS.len());
    }

    #[test]
    fn core_tables_exist_after_migration() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        for table in [
            "tasks",
            "plan_steps",
            "task_messages",
            "task_contexts",
            "conversations",
            "conversation_messages",
            "history",
            "kv_state",
        ] {
            let exists: bool = conn
                .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1")
                .unwrap()
                .exists([table])
                .unwrap();
            assert!(exists, "missing table {table}");
        }
    }
}
