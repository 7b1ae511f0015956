// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Conversation threads and their messages.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension, Row};

use crate::types::{Conversation, ConversationMessage, ConversationStatus, MessageRole};
use crate::{Result, Store, StoreError};

const CONV_COLUMNS: &str =
    "id, task_id, title, total_tokens, last_model, model_response_ids, status, \
     created_at, updated_at";

impl Store {
    /// Create a conversation if it does not exist yet; returns the stored row
    /// either way.  Conversation ids are caller-chosen (`conv-<taskId>` or an
    /// inherited thread id).
    pub fn ensure_conversation(
        &self,
        id: &str,
        task_id: Option<&str>,
        title: Option<&str>,
        now: i64,
    ) -> Result<Conversation> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO conversations (id, task_id, title, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?4) \
                 ON CONFLICT(id) DO UPDATE SET \
                     task_id = COALESCE(?2, task_id), \
                     title = COALESCE(?3, title), \
                     updated_at = ?4",
                params![id, task_id, title, now],
            )?;
            tx.query_row(
                &format!("SELECT {CONV_COLUMNS} FROM conversations WHERE id = ?1"),
                [id],
                conversation_from_row,
            )
            .map_err(Into::into)
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {CONV_COLUMNS} FROM conversations WHERE id = ?1"),
                [id],
                conversation_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Accumulate token usage and remember the model that produced it.
    pub fn add_conversation_tokens(
        &self,
        id: &str,
        tokens: i64,
        model: Option<&str>,
        now: i64,
    ) -> Result<()> {
        if tokens < 0 {
            return Err(StoreError::Validation("token delta must be non-negative".into()));
        }
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET total_tokens = total_tokens + ?2, \
                 last_model = COALESCE(?3, last_model), updated_at = ?4 WHERE id = ?1",
                params![id, tokens, model, now],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
    }

    /// Record the provider response id for one agent on this conversation.
    /// The map is read-modify-written inside a transaction.
    pub fn record_model_response_id(
        &self,
        id: &str,
        agent_id: &str,
        response_id: &str,
        now: i64,
    ) -> Result<()> {
        self.with_tx(|tx| {
            let raw: Option<String> = tx
                .query_row(
                    "SELECT model_response_ids FROM conversations WHERE id = ?1",
                    [id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(raw) = raw else {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            };
            let mut map: HashMap<String, String> =
                serde_json::from_str(&raw).unwrap_or_default();
            map.insert(agent_id.to_string(), response_id.to_string());
            let encoded = serde_json::to_string(&map)
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            tx.execute(
                "UPDATE conversations SET model_response_ids = ?2, updated_at = ?3 \
                 WHERE id = ?1",
                params![id, encoded, now],
            )?;
            Ok(())
        })
    }

    pub fn archive_conversation(&self, id: &str, now: i64) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET status = 'archived', updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
    }

    pub fn add_conversation_message(
        &self,
        conversation_id: &str,
        task_id: Option<&str>,
        role: MessageRole,
        content: &str,
        now: i64,
    ) -> Result<ConversationMessage> {
        if content.is_empty() {
            return Err(StoreError::Validation("message content must not be empty".into()));
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversation_messages \
                 (conversation_id, task_id, role, content, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![conversation_id, task_id, role.as_str(), content, now],
            )?;
            Ok(ConversationMessage {
                id: conn.last_insert_rowid(),
                conversation_id: conversation_id.to_string(),
                task_id: task_id.map(str::to_string),
                role,
                content: content.to_string(),
                created_at: now,
            })
        })
    }

    pub fn list_conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ConversationMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, task_id, role, content, created_at \
                 FROM conversation_messages WHERE conversation_id = ?1 ORDER BY id ASC",
            )?;
            let out = stmt
                .query_map([conversation_id], conv_message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(out)
        })
    }
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(6)?;
    let response_ids: String = row.get(5)?;
    Ok(Conversation {
        id: row.get(0)?,
        task_id: row.get(1)?,
        title: row.get(2)?,
        total_tokens: row.get(3)?,
        last_model: row.get(4)?,
        model_response_ids: serde_json::from_str(&response_ids).unwrap_or_default(),
        status: ConversationStatus::parse(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn conv_message_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationMessage> {
    let role: String = row.get(3)?;
    Ok(ConversationMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        task_id: row.get(2)?,
        role: MessageRole::parse(&role).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
