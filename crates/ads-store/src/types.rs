// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Task lifecycle state.
///
/// `queued → pending → planning → running → {completed, failed, cancelled}`.
/// `paused` is a transient freeze reachable from pending or running only by
/// explicit command.  Terminal states are write-locked except through retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Pending,
    Planning,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Pending => "pending",
            TaskStatus::Planning => "planning",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "pending" => Ok(TaskStatus::Pending),
            "planning" => Ok(TaskStatus::Planning),
            "running" => Ok(TaskStatus::Running),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(StoreError::Storage(format!("unknown task status {other:?}"))),
        }
    }

    /// Planning or running — at most one such task exists per workspace.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Planning | TaskStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Legal direct transitions.  Retry is handled separately.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Pending)
                | (Pending, Planning)
                | (Pending, Paused)
                | (Pending, Cancelled)
                | (Planning, Running)
                | (Planning, Failed)
                | (Planning, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Paused)
                | (Paused, Pending)
        )
    }
}

/// A durable unit of queued work.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub prompt: String,
    pub model: Option<String>,
    /// Opaque key/value model parameters.
    pub model_params: Option<serde_json::Value>,
    pub status: TaskStatus,
    pub priority: i64,
    pub queue_order: i64,
    pub created_at: i64,
    pub queued_at: Option<i64>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Write-once timestamp of the moment the prompt was handed to an agent.
    pub prompt_injected_at: Option<i64>,
    pub archived_at: Option<i64>,
    pub parent_id: Option<String>,
    pub thread_id: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    pub created_by: Option<String>,
    pub inherit_context: bool,
}

/// Input for [`crate::Store::create_task`].
#[derive(Debug, Clone)]
pub struct CreateTask {
    pub title: Option<String>,
    pub prompt: String,
    pub model: Option<String>,
    pub model_params: Option<serde_json::Value>,
    pub priority: i64,
    pub max_retries: i64,
    pub parent_id: Option<String>,
    pub created_by: Option<String>,
    pub inherit_context: bool,
}

impl CreateTask {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            title: None,
            prompt: prompt.into(),
            model: None,
            model_params: None,
            priority: 0,
            max_retries: 0,
            parent_id: None,
            created_by: None,
            inherit_context: false,
        }
    }
}

/// Admission state for a newly created task.
#[derive(Debug, Clone, Copy)]
pub enum Admission {
    /// Immediately eligible for claiming.
    Pending,
    /// Deferred; promoted via `dequeue_next_queued_task`.
    Queued { queued_at: i64 },
}

/// Direction for [`crate::Store::move_pending_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

/// Plan-step state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
            StepStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            "skipped" => Ok(StepStatus::Skipped),
            "failed" => Ok(StepStatus::Failed),
            other => Err(StoreError::Storage(format!("unknown step status {other:?}"))),
        }
    }
}

/// One step of a task's plan.  Replanning deletes and reinserts the set.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub id: i64,
    pub task_id: String,
    pub step_number: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: StepStatus,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Input for plan replacement.
#[derive(Debug, Clone)]
pub struct NewPlanStep {
    pub step_number: i64,
    pub title: String,
    pub description: Option<String>,
}

/// Message author role for task/conversation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(StoreError::Storage(format!("unknown role {other:?}"))),
        }
    }
}

/// A message attached to a task, optionally to one of its plan steps.
#[derive(Debug, Clone)]
pub struct TaskMessage {
    pub id: i64,
    pub task_id: String,
    pub plan_step_id: Option<i64>,
    pub role: MessageRole,
    pub content: String,
    pub message_type: Option<String>,
    pub model_used: Option<String>,
    pub created_at: i64,
}

/// Input for [`crate::Store::add_task_message`].
#[derive(Debug, Clone)]
pub struct NewTaskMessage {
    pub task_id: String,
    pub plan_step_id: Option<i64>,
    pub role: MessageRole,
    pub content: String,
    pub message_type: Option<String>,
    pub model_used: Option<String>,
}

/// Append-only context attached to a task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub id: i64,
    pub task_id: String,
    pub context_type: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "archived" => Ok(ConversationStatus::Archived),
            other => Err(StoreError::Storage(format!(
                "unknown conversation status {other:?}"
            ))),
        }
    }
}

/// A durable conversation thread, optionally bound to a task.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub task_id: Option<String>,
    pub title: Option<String>,
    pub total_tokens: i64,
    pub last_model: Option<String>,
    /// agent id → opaque provider response id.
    pub model_response_ids: HashMap<String, String>,
    pub status: ConversationStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub id: i64,
    pub conversation_id: String,
    pub task_id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    pub created_at: i64,
}

/// History speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Ai,
    Status,
}

impl HistoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryRole::User => "user",
            HistoryRole::Ai => "ai",
            HistoryRole::Status => "status",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "user" => Ok(HistoryRole::User),
            "ai" => Ok(HistoryRole::Ai),
            "status" => Ok(HistoryRole::Status),
            other => Err(StoreError::Storage(format!(
                "unknown history role {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Command,
    Error,
    Status,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Command => "command",
            HistoryKind::Error => "error",
            HistoryKind::Status => "status",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "command" => Ok(HistoryKind::Command),
            "error" => Ok(HistoryKind::Error),
            "status" => Ok(HistoryKind::Status),
            other => Err(StoreError::Storage(format!(
                "unknown history kind {other:?}"
            ))),
        }
    }
}

/// One console history line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub namespace: String,
    pub session_id: String,
    pub role: HistoryRole,
    pub kind: Option<HistoryKind>,
    pub text: String,
    pub ts: i64,
}

#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub namespace: String,
    pub session_id: String,
    pub role: HistoryRole,
    pub kind: Option<HistoryKind>,
    pub text: String,
    pub ts: i64,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            TaskStatus::Queued,
            TaskStatus::Pending,
            TaskStatus::Planning,
            TaskStatus::Running,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn active_means_planning_or_running() {
        assert!(TaskStatus::Planning.is_active());
        assert!(TaskStatus::Running.is_active());
        assert!(!TaskStatus::Pending.is_active());
        assert!(!TaskStatus::Completed.is_active());
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        for s in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            assert!(!s.can_transition_to(TaskStatus::Running));
            assert!(!s.can_transition_to(TaskStatus::Pending));
        }
    }

    #[test]
    fn pending_reaches_planning_not_running() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Planning));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn paused_only_from_pending_or_running() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Paused));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Paused));
        assert!(!TaskStatus::Planning.can_transition_to(TaskStatus::Paused));
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Paused));
    }
}
