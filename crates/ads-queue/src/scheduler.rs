// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ads_agent::{
    AdapterError, AgentInput, EventPhase, Orchestrator, PlanItem, SendOptions,
};
use ads_store::{
    MessageRole, NewPlanStep, NewTaskMessage, Store, Task, TaskStatus,
};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{TaskEvent, TaskEventKind};

/// Archived completed tasks older than this are purged opportunistically.
pub const DEFAULT_PURGE_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Rows deleted per purge batch.
pub const DEFAULT_PURGE_BATCH: usize = 20;

struct SchedulerInner {
    store: Arc<Store>,
    orchestrator: Arc<Orchestrator>,
    event_tx: broadcast::Sender<TaskEvent>,
    /// Queue admission gate: ticks only claim while the queue is running.
    active: AtomicBool,
    /// Cancellation tokens for in-flight tasks.
    running: Mutex<HashMap<String, CancellationToken>>,
    /// Directory attachment storage keys resolve against for GC.
    attachments_dir: Option<PathBuf>,
    purge_retention_ms: i64,
}

/// The per-workspace scheduler.  Cheap to clone.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn new(store: Arc<Store>, orchestrator: Arc<Orchestrator>) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                orchestrator,
                event_tx,
                active: AtomicBool::new(false),
                running: Mutex::new(HashMap::new()),
                attachments_dir: None,
                purge_retention_ms: DEFAULT_PURGE_RETENTION_MS,
            }),
        }
    }

    pub fn with_attachments_dir(self, dir: PathBuf) -> Self {
        // Builder-style: only callable before the scheduler is shared.
        let inner = Arc::try_unwrap(self.inner)
            .unwrap_or_else(|arc| SchedulerInner {
                store: arc.store.clone(),
                orchestrator: arc.orchestrator.clone(),
                event_tx: arc.event_tx.clone(),
                active: AtomicBool::new(arc.active.load(Ordering::SeqCst)),
                running: Mutex::new(HashMap::new()),
                attachments_dir: arc.attachments_dir.clone(),
                purge_retention_ms: arc.purge_retention_ms,
            });
        Self {
            inner: Arc::new(SchedulerInner {
                attachments_dir: Some(dir),
                ..inner
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Start consuming the queue and run the first tick.
    pub async fn start(&self) {
        self.inner.active.store(true, Ordering::SeqCst);
        info!("task queue started");
        self.tick().await;
    }

    /// Stop claiming new tasks.  In-flight tasks keep running.
    pub fn stop(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        info!("task queue stopped");
    }

    /// Called when a task is created; claims it immediately when the queue
    /// is active and idle.
    pub async fn notify_task_created(&self) {
        if self.is_active() {
            self.tick().await;
        }
    }

    /// Cancel a running (or planning) task.  Returns `false` when the task
    /// is not in flight.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.inner.running.lock().expect("running lock").get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// One scheduler tick: claim and launch the next pending task unless a
    /// task is already planning/running.
    pub async fn tick(&self) {
        if !self.is_active() {
            return;
        }
        let now = now_ms();

        match self.inner.store.active_task() {
            Ok(Some(active)) => {
                debug!(task = %active.id, "tick skipped, task in flight");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                error!("tick: cannot inspect active task: {e}");
                return;
            }
        }

        let claimed = match self.inner.store.claim_next_pending_task(now) {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                error!("tick: claim failed: {e}");
                return;
            }
        };

        info!(task = %claimed.id, title = %claimed.title, "task claimed");
        self.emit(TaskEvent::status(&claimed.id, TaskStatus::Planning));

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_task(claimed).await;
            // Completion is itself a tick trigger.
            scheduler.tick_boxed().await;
        });
    }

    /// Boxed indirection for the recursive tick-after-completion call above;
    /// without it rustc cannot prove `tick`'s future is `Send` (the
    /// recursive call makes the auto-trait check cyclic).
    fn tick_boxed(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(self.tick())
    }

    async fn run_task(&self, task: Task) {
        let inner = &self.inner;
        let token = CancellationToken::new();
        inner
            .running
            .lock()
            .expect("running lock")
            .insert(task.id.clone(), token.clone());

        let outcome = self.drive_task(&task, token).await;

        inner.running.lock().expect("running lock").remove(&task.id);

        match outcome {
            Ok(result_text) => {
                let now = now_ms();
                let _ = inner.store.add_task_message(
                    NewTaskMessage {
                        task_id: task.id.clone(),
                        plan_step_id: None,
                        role: MessageRole::Assistant,
                        content: if result_text.is_empty() {
                            "(empty response)".to_string()
                        } else {
                            result_text.clone()
                        },
                        message_type: Some("result".into()),
                        model_used: task.model.clone(),
                    },
                    now,
                );
                match inner.store.complete_task(&task.id, &result_text, now) {
                    Ok(completed) => {
                        info!(task = %task.id, "task completed");
                        self.persist_conversation(&completed, &result_text, now);
                        self.emit(TaskEvent {
                            task_id: task.id.clone(),
                            kind: TaskEventKind::Completed {
                                result: result_text,
                            },
                        });
                    }
                    Err(e) => error!(task = %task.id, "cannot persist completion: {e}"),
                }
                self.purge_archived();
            }
            Err(AdapterError::Cancelled) => {
                let now = now_ms();
                if let Err(e) = inner.store.cancel_task(&task.id, now) {
                    error!(task = %task.id, "cannot persist cancellation: {e}");
                }
                info!(task = %task.id, "task cancelled");
                self.emit(TaskEvent::status(&task.id, TaskStatus::Cancelled));
            }
            Err(e) => {
                let now = now_ms();
                let message = e.to_string();
                if let Err(e) = inner.store.fail_task(&task.id, &message, now) {
                    error!(task = %task.id, "cannot persist failure: {e}");
                }
                warn!(task = %task.id, "task failed: {message}");
                self.emit(TaskEvent {
                    task_id: task.id.clone(),
                    kind: TaskEventKind::Failed {
                        error: message.clone(),
                    },
                });

                // Retry policy: immediately re-enqueue a fresh pending copy
                // while the budget lasts.
                if task.retry_count < task.max_retries {
                    match inner.store.create_retry_copy(&task, now) {
                        Ok(copy) => {
                            info!(task = %task.id, retry = %copy.id, "retry enqueued");
                            self.emit(TaskEvent::status(&copy.id, TaskStatus::Pending));
                        }
                        Err(e) => error!(task = %task.id, "cannot enqueue retry: {e}"),
                    }
                }
            }
        }
    }

    /// Move the claimed task through running, stream its events, and return
    /// the final assistant text.
    async fn drive_task(
        &self,
        task: &Task,
        token: CancellationToken,
    ) -> Result<String, AdapterError> {
        let inner = &self.inner;
        let now = now_ms();

        let input_text = if task.inherit_context {
            match inner.store.list_task_contexts(&task.id) {
                Ok(contexts) if !contexts.is_empty() => {
                    let mut prefix = String::from("## Session context\n");
                    for ctx in &contexts {
                        prefix.push_str(&format!("[{}] {}\n", ctx.context_type, ctx.content));
                    }
                    format!("{prefix}\n{}", task.prompt)
                }
                _ => task.prompt.clone(),
            }
        } else {
            task.prompt.clone()
        };

        // Write-once stamp; a retried copy gets its own stamp.
        let _ = inner.store.mark_prompt_injected(&task.id, now);
        let _ = inner.store.add_task_message(
            NewTaskMessage {
                task_id: task.id.clone(),
                plan_step_id: None,
                role: MessageRole::User,
                content: input_text.clone(),
                message_type: Some("prompt".into()),
                model_used: None,
            },
            now,
        );

        inner
            .store
            .set_task_status(&task.id, TaskStatus::Running, now)
            .map_err(|e| AdapterError::Failed(e.to_string()))?;
        self.emit(TaskEvent::status(&task.id, TaskStatus::Running));

        let options = SendOptions {
            model: task.model.clone(),
            model_params: task.model_params.clone(),
            thread_id: task.thread_id.clone(),
            cancel: token,
            ..Default::default()
        };

        let mut stream = inner
            .orchestrator
            .send(AgentInput::Text(input_text), options)
            .await?;

        let mut accumulated = String::new();
        while let Some(item) = stream.next().await {
            let event = item?;
            match event.phase {
                EventPhase::Delta { text, step } => {
                    if !step {
                        accumulated.push_str(&text);
                    }
                    self.emit(TaskEvent {
                        task_id: task.id.clone(),
                        kind: TaskEventKind::Delta { text, step },
                    });
                }
                EventPhase::Command(report) => {
                    self.emit(TaskEvent {
                        task_id: task.id.clone(),
                        kind: TaskEventKind::Command(report),
                    });
                }
                EventPhase::Plan { items } => {
                    self.persist_plan(&task.id, &items);
                    self.emit(TaskEvent {
                        task_id: task.id.clone(),
                        kind: TaskEventKind::Plan { items },
                    });
                }
                EventPhase::Patch { diff, files } => {
                    self.emit(TaskEvent {
                        task_id: task.id.clone(),
                        kind: TaskEventKind::Patch { diff, files },
                    });
                }
                EventPhase::Error { message } => {
                    warn!(task = %task.id, "agent error event: {message}");
                }
                EventPhase::Done { text, thread_id } => {
                    if let Some(thread) = thread_id {
                        let _ = inner.store.set_task_thread(&task.id, &thread);
                    }
                    return Ok(if text.is_empty() { accumulated } else { text });
                }
            }
        }
        Ok(accumulated)
    }

    /// Mirror the finished exchange into the task's conversation thread.
    /// The conversation id inherits the agent thread when one exists, and
    /// the thread id doubles as the provider response id for that agent.
    fn persist_conversation(&self, task: &Task, result_text: &str, now: i64) {
        let store = &self.inner.store;
        let conversation_id = task
            .thread_id
            .clone()
            .unwrap_or_else(|| format!("conv-{}", task.id));
        if let Err(e) =
            store.ensure_conversation(&conversation_id, Some(&task.id), Some(&task.title), now)
        {
            warn!(task = %task.id, "cannot ensure conversation: {e}");
            return;
        }
        let _ = store.add_conversation_message(
            &conversation_id,
            Some(&task.id),
            MessageRole::User,
            &task.prompt,
            now,
        );
        if !result_text.is_empty() {
            let _ = store.add_conversation_message(
                &conversation_id,
                Some(&task.id),
                MessageRole::Assistant,
                result_text,
                now,
            );
        }
        if let Some(thread) = &task.thread_id {
            let agent = self.inner.orchestrator.active_agent_id();
            let _ = store.record_model_response_id(&conversation_id, &agent, thread, now);
        }
    }

    /// Replace the task's plan with the latest snapshot from the agent.
    fn persist_plan(&self, task_id: &str, items: &[PlanItem]) {
        let steps: Vec<NewPlanStep> = items
            .iter()
            .enumerate()
            .map(|(i, item)| NewPlanStep {
                step_number: (i + 1) as i64,
                title: item.title.clone(),
                description: None,
            })
            .collect();
        if let Err(e) = self.inner.store.replace_plan(task_id, &steps) {
            warn!(task = %task_id, "cannot persist plan snapshot: {e}");
        }
    }

    /// Opportunistic cleanup of old archived completed tasks.  Attachment
    /// keys returned by the store are unlinked from the attachments dir.
    fn purge_archived(&self) {
        let cutoff = now_ms() - self.inner.purge_retention_ms;
        match self
            .inner
            .store
            .purge_archived_completed_tasks_batch(cutoff, DEFAULT_PURGE_BATCH)
        {
            Ok(keys) if !keys.is_empty() => {
                debug!(count = keys.len(), "purged archived tasks");
                if let Some(dir) = &self.inner.attachments_dir {
                    for key in keys {
                        let _ = std::fs::remove_file(dir.join(key));
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!("purge failed: {e}"),
        }
    }

    fn emit(&self, event: TaskEvent) {
        let _ = self.inner.event_tx.send(event);
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use ads_agent::{Adapter, AdapterEvent, ScriptedAdapter};
    use ads_store::{Admission, CreateTask};

    use super::*;

    fn orchestrator(adapters: Vec<Arc<dyn Adapter>>) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(adapters, Path::new("/tmp")).unwrap())
    }

    fn scheduler_with(adapter: ScriptedAdapter) -> (TaskScheduler, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let sched = TaskScheduler::new(store.clone(), orchestrator(vec![Arc::new(adapter)]));
        (sched, store)
    }

    async fn wait_for_status(store: &Store, id: &str, status: TaskStatus) {
        for _ in 0..200 {
            if store.get_task(id).unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "task {id} never reached {:?} (is {:?})",
            status,
            store.get_task(id).unwrap().status
        );
    }

    #[tokio::test]
    async fn started_queue_runs_pending_task_to_completion() {
        let (sched, store) = scheduler_with(ScriptedAdapter::always("codex", "task done"));
        let task = store
            .create_task(CreateTask::new("do the thing"), 1, Admission::Pending)
            .unwrap();

        sched.start().await;
        wait_for_status(&store, &task.id, TaskStatus::Completed).await;

        let done = store.get_task(&task.id).unwrap();
        assert_eq!(done.result.as_deref(), Some("task done"));
        assert!(done.prompt_injected_at.is_some());

        let messages = store.list_task_messages(&task.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "task done");
    }

    #[tokio::test]
    async fn inactive_queue_never_claims() {
        let (sched, store) = scheduler_with(ScriptedAdapter::always("codex", "x"));
        let task = store
            .create_task(CreateTask::new("wait"), 1, Admission::Pending)
            .unwrap();
        sched.tick().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get_task(&task.id).unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn tasks_run_in_queue_order_one_at_a_time() {
        let (sched, store) = scheduler_with(ScriptedAdapter::always("codex", "ok"));
        let t1 = store
            .create_task(CreateTask::new("first"), 1, Admission::Pending)
            .unwrap();
        let t2 = store
            .create_task(CreateTask::new("second"), 2, Admission::Pending)
            .unwrap();

        sched.start().await;
        wait_for_status(&store, &t1.id, TaskStatus::Completed).await;
        wait_for_status(&store, &t2.id, TaskStatus::Completed).await;

        let a = store.get_task(&t1.id).unwrap();
        let b = store.get_task(&t2.id).unwrap();
        assert!(
            a.completed_at.unwrap() <= b.started_at.unwrap(),
            "second task must not start before the first finishes"
        );
    }

    #[tokio::test]
    async fn reordered_queue_is_claimed_in_new_order() {
        // Spec scenario 4, driven through the scheduler.
        let (sched, store) = scheduler_with(ScriptedAdapter::always("codex", "ok"));
        let t1 = store.create_task(CreateTask::new("t1"), 1, Admission::Pending).unwrap();
        let t2 = store.create_task(CreateTask::new("t2"), 2, Admission::Pending).unwrap();
        let t3 = store.create_task(CreateTask::new("t3"), 3, Admission::Pending).unwrap();
        store
            .reorder_pending_tasks(&[t3.id.clone(), t1.id.clone()])
            .unwrap();

        sched.start().await;
        for id in [&t1.id, &t2.id, &t3.id] {
            wait_for_status(&store, id, TaskStatus::Completed).await;
        }

        let started = |id: &str| store.get_task(id).unwrap().started_at.unwrap();
        assert!(started(&t3.id) <= started(&t1.id));
        assert!(started(&t1.id) <= started(&t2.id));
    }

    #[tokio::test]
    async fn failure_without_retries_stays_failed() {
        struct Erroring;
        #[async_trait::async_trait]
        impl Adapter for Erroring {
            fn id(&self) -> &str {
                "codex"
            }
            fn name(&self) -> &str {
                "Codex"
            }
            async fn status(&self) -> ads_agent::AdapterStatus {
                ads_agent::AdapterStatus::ready()
            }
            async fn resume_thread(&self, _t: &str) -> Result<(), AdapterError> {
                Ok(())
            }
            async fn send(
                &self,
                _input: AgentInput,
                _options: SendOptions,
            ) -> Result<ads_agent::EventStream, AdapterError> {
                Err(AdapterError::Failed("backend exploded".into()))
            }
        }

        let store = Arc::new(Store::open_in_memory().unwrap());
        let sched = TaskScheduler::new(store.clone(), orchestrator(vec![Arc::new(Erroring)]));
        let task = store
            .create_task(CreateTask::new("doomed"), 1, Admission::Pending)
            .unwrap();

        sched.start().await;
        wait_for_status(&store, &task.id, TaskStatus::Failed).await;
        let failed = store.get_task(&task.id).unwrap();
        assert!(failed.error.as_deref().unwrap().contains("backend exploded"));
        // No retry budget → no copy.
        assert_eq!(store.list_tasks(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_with_retry_budget_enqueues_copy() {
        struct FailOnce {
            calls: std::sync::atomic::AtomicUsize,
        }
        #[async_trait::async_trait]
        impl Adapter for FailOnce {
            fn id(&self) -> &str {
                "codex"
            }
            fn name(&self) -> &str {
                "Codex"
            }
            async fn status(&self) -> ads_agent::AdapterStatus {
                ads_agent::AdapterStatus::ready()
            }
            async fn resume_thread(&self, _t: &str) -> Result<(), AdapterError> {
                Ok(())
            }
            async fn send(
                &self,
                _input: AgentInput,
                _options: SendOptions,
            ) -> Result<ads_agent::EventStream, AdapterError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AdapterError::Failed("flaky".into()))
                } else {
                    let events = vec![Ok(AdapterEvent::done("recovered", None))];
                    Ok(Box::pin(futures::stream::iter(events)))
                }
            }
        }

        let store = Arc::new(Store::open_in_memory().unwrap());
        let sched = TaskScheduler::new(
            store.clone(),
            orchestrator(vec![Arc::new(FailOnce {
                calls: std::sync::atomic::AtomicUsize::new(0),
            })]),
        );
        let mut input = CreateTask::new("flaky work");
        input.max_retries = 2;
        let task = store.create_task(input, 1, Admission::Pending).unwrap();

        sched.start().await;
        wait_for_status(&store, &task.id, TaskStatus::Failed).await;

        // The retry copy completes on the second adapter call.
        for _ in 0..200 {
            let all = store.list_tasks(None).unwrap();
            if let Some(copy) = all.iter().find(|t| t.parent_id.as_deref() == Some(task.id.as_str()))
            {
                if copy.status == TaskStatus::Completed {
                    assert_eq!(copy.retry_count, 1);
                    assert_eq!(copy.prompt, "flaky work");
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("retry copy never completed");
    }

    #[tokio::test]
    async fn cancel_transitions_task_to_cancelled() {
        let slow = ScriptedAdapter::always("codex", "slow answer")
            .with_event_delay(Duration::from_secs(5));
        let (sched, store) = scheduler_with(slow);
        let task = store
            .create_task(CreateTask::new("long job"), 1, Admission::Pending)
            .unwrap();

        sched.start().await;
        wait_for_status(&store, &task.id, TaskStatus::Running).await;
        assert!(sched.cancel(&task.id));
        wait_for_status(&store, &task.id, TaskStatus::Cancelled).await;
        assert!(store.get_task(&task.id).unwrap().completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_false() {
        let (sched, _store) = scheduler_with(ScriptedAdapter::always("codex", "x"));
        assert!(!sched.cancel("task-ghost"));
    }

    #[tokio::test]
    async fn events_carry_task_id_and_deltas() {
        let adapter = ScriptedAdapter::new(
            "codex",
            vec![vec![
                AdapterEvent::delta("working"),
                AdapterEvent::done("working", None),
            ]],
        );
        let (sched, store) = scheduler_with(adapter);
        let task = store
            .create_task(CreateTask::new("emit events"), 1, Admission::Pending)
            .unwrap();
        let mut rx = sched.subscribe();

        sched.start().await;
        wait_for_status(&store, &task.id, TaskStatus::Completed).await;

        let mut saw_delta = false;
        let mut saw_completed = false;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.task_id, task.id);
            match event.kind {
                TaskEventKind::Delta { ref text, .. } if text == "working" => saw_delta = true,
                TaskEventKind::Completed { .. } => saw_completed = true,
                _ => {}
            }
        }
        assert!(saw_delta, "delta event missing");
        assert!(saw_completed, "completed event missing");
    }

    #[tokio::test]
    async fn completion_mirrors_exchange_into_conversation() {
        let adapter = ScriptedAdapter::new(
            "codex",
            vec![vec![AdapterEvent::done("answer", Some("thread-7".into()))]],
        );
        let (sched, store) = scheduler_with(adapter);
        let task = store
            .create_task(CreateTask::new("talk to me"), 1, Admission::Pending)
            .unwrap();

        sched.start().await;
        wait_for_status(&store, &task.id, TaskStatus::Completed).await;

        // Conversation inherits the adapter thread id.
        let conv = store.get_conversation("thread-7").unwrap().unwrap();
        assert_eq!(conv.task_id.as_deref(), Some(task.id.as_str()));
        let messages = store.list_conversation_messages("thread-7").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].content, "answer");
        assert_eq!(conv.model_response_ids.get("codex").unwrap(), "thread-7");
    }

    #[tokio::test]
    async fn plan_events_are_persisted_as_steps() {
        let adapter = ScriptedAdapter::new(
            "codex",
            vec![vec![
                AdapterEvent {
                    phase: EventPhase::Plan {
                        items: vec![
                            PlanItem { title: "read code".into(), status: "pending".into() },
                            PlanItem { title: "write fix".into(), status: "pending".into() },
                        ],
                    },
                    raw: None,
                },
                AdapterEvent::done("planned", None),
            ]],
        );
        let (sched, store) = scheduler_with(adapter);
        let task = store
            .create_task(CreateTask::new("plan work"), 1, Admission::Pending)
            .unwrap();

        sched.start().await;
        wait_for_status(&store, &task.id, TaskStatus::Completed).await;

        let steps = store.list_plan_steps(&task.id).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].title, "read code");
        assert_eq!(steps[1].step_number, 2);
    }
}
