// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use ads_agent::{CommandReport, PlanItem};
use ads_store::TaskStatus;

/// One event on the parallel task stream, labelled with its task id.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task_id: String,
    pub kind: TaskEventKind,
}

#[derive(Debug, Clone)]
pub enum TaskEventKind {
    /// Incremental assistant text from the task's agent.
    Delta { text: String, step: bool },
    Command(CommandReport),
    Plan { items: Vec<PlanItem> },
    Patch { diff: String, files: Vec<String> },
    /// Lifecycle transition.
    Status { status: TaskStatus },
    Completed { result: String },
    Failed { error: String },
}

impl TaskEvent {
    pub fn status(task_id: &str, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind: TaskEventKind::Status { status },
        }
    }
}
