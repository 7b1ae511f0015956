// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-connection WebSocket handling.
//!
//! One writer task owns the socket's send half, so outbound frames keep
//! their send order regardless of which task produced them.  Prompts obey
//! the single-writer discipline: while a turn is streaming, further
//! prompts park in the session's FIFO and drain as the turn completes.
//! Interrupts bypass the queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ads_agent::{AgentInput, EventPhase, InputPart, SendOptions};
use ads_core::{derive_user_id, PendingPrompt, QueuedPrompt, SessionRuntime};
use ads_queue::TaskEventKind;
use ads_store::{HistoryKind, HistoryRole, NewHistoryEntry};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use base64::Engine;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{token_accepted, ClientHello};
use crate::error::{GatewayError, CLOSE_AUTH, CLOSE_CAPACITY, CLOSE_IDLE};
use crate::frames::{
    parse_frame, validate_image, HistoryItem, ImagePayload, Inbound, Outbound, PlanItemView,
};
use crate::server::GatewayState;

/// History namespace for the web console.
const HISTORY_NS: &str = "web";

/// Message sent to the socket writer task.
enum OutMsg {
    Frame(Outbound),
    Close(u16, &'static str),
}

type OutTx = mpsc::Sender<OutMsg>;

pub(crate) async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, hello: ClientHello) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Authentication before anything else.
    if !token_accepted(state.config.web.token.as_deref(), hello.token.as_deref()) {
        warn!("client rejected: bad token");
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_AUTH,
                reason: "authentication rejected".into(),
            })))
            .await;
        return;
    }

    // Concurrent client cap.
    let Some(_client_slot) = state.try_acquire_client() else {
        warn!("client rejected: capacity");
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_CAPACITY,
                reason: "too many clients".into(),
            })))
            .await;
        return;
    };

    let session_id = hello.session_id.clone().unwrap_or_else(|| "default".to_string());
    let user_id = derive_user_id(hello.token.as_deref().unwrap_or_default(), &session_id);
    info!(user = %user_id, session = %session_id, "client connected");

    // Writer task: single owner of the socket's send half.
    let (out_tx, mut out_rx) = mpsc::channel::<OutMsg>(256);
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            match msg {
                OutMsg::Frame(frame) => {
                    if ws_tx.send(Message::Text(frame.to_json())).await.is_err() {
                        break;
                    }
                }
                OutMsg::Close(code, reason) => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Session runtime (restores stored cwd and thread).
    let cwd = state
        .sessions
        .user_cwd(&user_id)
        .filter(|dir| state.policy.ensure_allowed(dir).is_ok())
        .unwrap_or_else(|| state.config.paths.root.clone());
    let mut runtime = match state.sessions.get_or_create(&user_id, &cwd, true).await {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = out_tx
                .send(OutMsg::Frame(Outbound::Error {
                    message: format!("session setup failed: {e}"),
                }))
                .await;
            let _ = out_tx.send(OutMsg::Close(1011, "session setup failed")).await;
            let _ = writer.await;
            return;
        }
    };

    // Ends every per-connection helper task when the socket goes away, so
    // the writer's channel actually closes and the client slot frees up.
    let conn = CancellationToken::new();

    // Bootstrap: welcome snapshot and stored history.
    send_frame(&out_tx, Outbound::Welcome {
        workspace: state.workspace_snapshot(&runtime).await,
    })
    .await;
    send_history(&state, &out_tx, &session_id).await;

    spawn_turn_forwarder(&runtime, out_tx.clone(), conn.clone());
    spawn_task_forwarder(&state, out_tx.clone(), conn.clone());

    // Idle close (0 disables).
    let last_activity = Arc::new(std::sync::Mutex::new(Instant::now()));
    if state.config.web.idle_minutes > 0 {
        let limit = Duration::from_secs(state.config.web.idle_minutes * 60);
        let last = last_activity.clone();
        let idle_tx = out_tx.clone();
        let idle_conn = conn.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = idle_conn.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(15)) => {}
                }
                let idle_for = last.lock().expect("idle lock").elapsed();
                if idle_for >= limit {
                    let _ = idle_tx.send(OutMsg::Close(CLOSE_IDLE, "idle timeout")).await;
                    break;
                }
            }
        });
    }

    // Reconnect replay: restore the unacknowledged prompt into the queue.
    if let Ok(Some(pending)) = state.sessions.pending_prompt(HISTORY_NS, &session_id) {
        info!(user = %user_id, "replaying pending prompt");
        dispatch_prompt(
            &state,
            &runtime,
            &out_tx,
            &user_id,
            &session_id,
            QueuedPrompt {
                client_id: pending.client_id,
                input: AgentInput::Text(pending.text),
            },
        );
    }

    // Main receive loop.
    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                debug!(user = %user_id, "socket error: {e}");
                break;
            }
        };
        *last_activity.lock().expect("idle lock") = Instant::now();

        match message {
            Message::Text(raw) => match parse_frame(&raw) {
                Ok(Inbound::Prompt { text, images, client_id }) => {
                    match build_prompt(&state, text, images, client_id) {
                        Ok(prompt) => {
                            record_history(&state, &session_id, HistoryRole::User, None,
                                &prompt.input.text());
                            send_frame(&out_tx, Outbound::Ack {
                                id: prompt.client_id.clone(),
                            })
                            .await;
                            let _ = state.sessions.set_pending_prompt(
                                HISTORY_NS,
                                &session_id,
                                &PendingPrompt {
                                    client_id: prompt.client_id.clone(),
                                    text: prompt.input.text(),
                                },
                            );
                            dispatch_prompt(
                                &state, &runtime, &out_tx, &user_id, &session_id, prompt,
                            );
                        }
                        Err(e) => {
                            send_frame(&out_tx, Outbound::Error { message: e.to_string() }).await;
                        }
                    }
                }
                Ok(Inbound::Command { line }) => {
                    match handle_command(&state, &runtime, &out_tx, &user_id, &session_id, &line)
                        .await
                    {
                        CommandAction::Done => {}
                        CommandAction::ResetSession => {
                            if let Ok(fresh) =
                                reset_session(&state, &user_id, &session_id).await
                            {
                                runtime = fresh;
                                spawn_turn_forwarder(&runtime, out_tx.clone(), conn.clone());
                            }
                        }
                    }
                }
                Ok(Inbound::Interrupt) => {
                    // Interrupts always dispatch immediately; the aborted
                    // turn emits its own terminal result frame.
                    if !runtime.interrupt() {
                        send_frame(&out_tx, Outbound::Error {
                            message: "nothing to interrupt".into(),
                        })
                        .await;
                    }
                }
                Ok(Inbound::ClearHistory) => {
                    if let Ok(fresh) = reset_session(&state, &user_id, &session_id).await {
                        runtime = fresh;
                        spawn_turn_forwarder(&runtime, out_tx.clone(), conn.clone());
                        send_frame(&out_tx, Outbound::Result {
                            ok: true,
                            output: "history cleared".into(),
                        })
                        .await;
                    }
                }
                Err(e) => {
                    send_frame(&out_tx, Outbound::Error { message: e.to_string() }).await;
                }
            },
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
            Message::Binary(_) => {
                send_frame(&out_tx, Outbound::Error {
                    message: "binary frames are not supported".into(),
                })
                .await;
            }
        }
    }

    conn.cancel();
    drop(out_tx);
    let _ = writer.await;
    info!(user = %user_id, "client disconnected");
}

enum CommandAction {
    Done,
    ResetSession,
}

// ─── Prompt pipeline ─────────────────────────────────────────────────────────

/// Validate and persist image attachments, producing the adapter input.
fn build_prompt(
    state: &GatewayState,
    text: String,
    images: Vec<ImagePayload>,
    client_id: Option<String>,
) -> Result<QueuedPrompt, GatewayError> {
    if images.is_empty() {
        return Ok(QueuedPrompt {
            client_id,
            input: AgentInput::Text(text),
        });
    }

    let dir = state.config.paths.temp_images_dir();
    std::fs::create_dir_all(&dir)
        .map_err(|e| GatewayError::Internal(format!("temp dir: {e}")))?;

    let mut parts = Vec::with_capacity(images.len() + 1);
    if !text.is_empty() {
        parts.push(InputPart::Text { text });
    }
    let mut written: Vec<PathBuf> = Vec::new();
    for image in &images {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(&image.data) {
            Ok(bytes) => bytes,
            Err(e) => {
                cleanup_files(&written);
                return Err(GatewayError::Validation(format!(
                    "image {:?} is not valid base64: {e}",
                    image.name
                )));
            }
        };
        if let Err(e) = validate_image(image, bytes.len()) {
            cleanup_files(&written);
            return Err(e);
        }
        let extension = image
            .mime
            .rsplit('/')
            .next()
            .unwrap_or("bin")
            .replace('+', ".");
        let path = dir.join(format!("{}.{extension}", uuid::Uuid::new_v4()));
        if let Err(e) = std::fs::write(&path, &bytes) {
            cleanup_files(&written);
            return Err(GatewayError::Internal(format!("store image: {e}")));
        }
        written.push(path.clone());
        parts.push(InputPart::LocalImage { path });
    }

    Ok(QueuedPrompt {
        client_id,
        input: AgentInput::Parts(parts),
    })
}

/// Start the prompt turn now, or park it behind the running one.
fn dispatch_prompt(
    state: &Arc<GatewayState>,
    runtime: &Arc<SessionRuntime>,
    out_tx: &OutTx,
    user_id: &str,
    session_id: &str,
    prompt: QueuedPrompt,
) {
    match runtime.begin_turn() {
        Some(token) => {
            let state = state.clone();
            let runtime = runtime.clone();
            let out_tx = out_tx.clone();
            let user_id = user_id.to_string();
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                run_turns(state, runtime, out_tx, user_id, session_id, prompt, token).await;
            });
        }
        None => {
            debug!(user = %user_id, queued = runtime.queued_len() + 1, "prompt queued");
            runtime.queue_prompt(prompt);
        }
    }
}

/// Run the given prompt and then drain the session FIFO.
async fn run_turns(
    state: Arc<GatewayState>,
    runtime: Arc<SessionRuntime>,
    out_tx: OutTx,
    user_id: String,
    session_id: String,
    first: QueuedPrompt,
    first_token: CancellationToken,
) {
    let mut prompt = first;
    let mut token = first_token;

    loop {
        runtime.log("INFO", &format!("turn started: {}", preview(&prompt.input.text())));
        let options = SendOptions {
            cancel: token.clone(),
            ..Default::default()
        };
        let outcome = state
            .engine
            .run_turn(&runtime.orchestrator, &state.tools, prompt.input.clone(), options)
            .await;

        match outcome {
            Ok(turn) => {
                record_history(&state, &session_id, HistoryRole::Ai, None, &turn.stripped_text);
                if let Some(thread) = &turn.thread_id {
                    let agent = runtime.orchestrator.active_agent_id();
                    let _ = state.sessions.save_thread_id(&user_id, thread, &agent);
                }
                for delegation in &turn.delegations {
                    runtime.log(
                        "INFO",
                        &format!("delegated to {}: {}", delegation.agent_id,
                            preview(&delegation.prompt)),
                    );
                }
                send_frame(&out_tx, Outbound::Result {
                    ok: true,
                    output: turn.replaced_text,
                })
                .await;
            }
            Err(ads_agent::AdapterError::Cancelled) => {
                runtime.log("WARN", "turn interrupted");
                record_history(
                    &state,
                    &session_id,
                    HistoryRole::Status,
                    Some(HistoryKind::Status),
                    "interrupted",
                );
                send_frame(&out_tx, Outbound::Result {
                    ok: false,
                    output: "interrupted, output may be partial".into(),
                })
                .await;
            }
            Err(e) => {
                runtime.log("ERROR", &format!("turn failed: {e}"));
                record_history(
                    &state,
                    &session_id,
                    HistoryRole::Status,
                    Some(HistoryKind::Error),
                    &e.to_string(),
                );
                send_frame(&out_tx, Outbound::Error { message: e.to_string() }).await;
            }
        }

        let _ = state.sessions.clear_pending_prompt(HISTORY_NS, &session_id);
        cleanup_files(
            &prompt
                .input
                .image_paths()
                .into_iter()
                .cloned()
                .collect::<Vec<_>>(),
        );

        // Drain the FIFO without releasing the turn slot.
        match runtime.dequeue_prompt() {
            Some(next) => {
                prompt = next;
                token = runtime.rotate_turn();
            }
            None => {
                runtime.end_turn();
                break;
            }
        }
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn handle_command(
    state: &Arc<GatewayState>,
    runtime: &Arc<SessionRuntime>,
    out_tx: &OutTx,
    user_id: &str,
    session_id: &str,
    line: &str,
) -> CommandAction {
    record_history(state, session_id, HistoryRole::User, Some(HistoryKind::Command), line);

    if !state.review.allows(line) {
        send_frame(out_tx, Outbound::Result {
            ok: false,
            output: "a review is in progress; only the safe command set is available".into(),
        })
        .await;
        return CommandAction::Done;
    }

    let verb = line.split_whitespace().next().unwrap_or(line);
    match verb {
        "/cd" => {
            let target = line.strip_prefix("/cd").unwrap_or_default().trim();
            if target.is_empty() {
                send_frame(out_tx, Outbound::Result {
                    ok: false,
                    output: "usage: /cd <path>".into(),
                })
                .await;
                return CommandAction::Done;
            }
            let base = runtime.orchestrator.working_directory();
            match state.policy.resolve_path(&base, target) {
                Ok(resolved) => {
                    if !resolved.is_dir() {
                        send_frame(out_tx, Outbound::Result {
                            ok: false,
                            output: format!("not a directory: {}", resolved.display()),
                        })
                        .await;
                        return CommandAction::Done;
                    }
                    let _ = state.sessions.set_user_cwd(user_id, &resolved);
                    send_frame(out_tx, Outbound::Workspace {
                        workspace: state.workspace_snapshot(runtime).await,
                    })
                    .await;
                    send_frame(out_tx, Outbound::Result {
                        ok: true,
                        output: format!("cwd: {}", resolved.display()),
                    })
                    .await;
                }
                Err(e) => {
                    send_frame(out_tx, Outbound::Result {
                        ok: false,
                        output: e.to_string(),
                    })
                    .await;
                }
            }
        }
        "/pwd" => {
            send_frame(out_tx, Outbound::Result {
                ok: true,
                output: runtime.orchestrator.working_directory().display().to_string(),
            })
            .await;
        }
        "/search" => {
            let query = line.strip_prefix("/search").unwrap_or_default().trim();
            if query.is_empty() {
                send_frame(out_tx, Outbound::Result {
                    ok: false,
                    output: "usage: /search <query>".into(),
                })
                .await;
                return CommandAction::Done;
            }
            let output = match state.store.search_history(HISTORY_NS, query, 20) {
                Ok(hits) if hits.is_empty() => format!("(no history matches {query:?})"),
                Ok(hits) => hits
                    .iter()
                    .map(|h| format!("[{}] {}", h.role.as_str(), h.text))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("history search failed: {e}"),
            };
            send_frame(out_tx, Outbound::Result { ok: true, output }).await;
        }
        "/agent" => {
            let target = line.strip_prefix("/agent").unwrap_or_default().trim();
            if target.is_empty() {
                let status = runtime.orchestrator.status().await;
                let listing = status
                    .iter()
                    .map(|s| {
                        format!(
                            "{}{} — {}{}",
                            if s.active { "* " } else { "  " },
                            s.id,
                            if s.ready { "ready" } else { "unavailable" },
                            s.error.as_deref().map(|e| format!(" ({e})")).unwrap_or_default()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                send_frame(out_tx, Outbound::Result { ok: true, output: listing }).await;
            } else {
                match state.sessions.switch_agent(user_id, target) {
                    Ok(()) => {
                        send_frame(out_tx, Outbound::Workspace {
                            workspace: state.workspace_snapshot(runtime).await,
                        })
                        .await;
                        send_frame(out_tx, Outbound::Result {
                            ok: true,
                            output: format!("active agent: {target}"),
                        })
                        .await;
                    }
                    Err(e) => {
                        send_frame(out_tx, Outbound::Result {
                            ok: false,
                            output: e.to_string(),
                        })
                        .await;
                    }
                }
            }
        }
        "/clear_history" => return CommandAction::ResetSession,
        verb if verb.starts_with("/task.") || verb == "/queue.run" || verb == "/queue.stop" => {
            let output = handle_task_command(state, line).await;
            send_frame(out_tx, Outbound::Result {
                ok: output.ok,
                output: output.output,
            })
            .await;
        }
        _ => {
            // Everything else goes to the workspace command table.
            let is_review = {
                let canonical = verb.strip_prefix('/').unwrap_or(verb);
                let canonical = canonical.strip_prefix("ads.").unwrap_or(canonical);
                canonical == "review" && !line.contains("--show")
            };
            if is_review {
                state.review.lock();
            }
            let workspace = state
                .config
                .command_workspace
                .clone()
                .unwrap_or_else(|| state.config.paths.root.clone());
            let output = state.router.dispatch(line, &workspace).await;
            if is_review {
                state.review.unlock();
            }
            if !output.ok {
                record_history(
                    state,
                    session_id,
                    HistoryRole::Status,
                    Some(HistoryKind::Error),
                    &output.output,
                );
            }
            send_frame(out_tx, Outbound::Result {
                ok: output.ok,
                output: output.output,
            })
            .await;
        }
    }
    CommandAction::Done
}

/// Task-queue console commands (`/task.*`, `/queue.*`).
async fn handle_task_command(state: &Arc<GatewayState>, line: &str) -> crate::commands::CommandOutput {
    use crate::commands::CommandOutput;

    let now = chrono::Utc::now().timestamp_millis();
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default();
    let rest: Vec<&str> = words.collect();

    match verb {
        "/queue.run" => {
            state.scheduler.start().await;
            CommandOutput::ok("task queue running")
        }
        "/queue.stop" => {
            state.scheduler.stop();
            CommandOutput::ok("task queue stopped")
        }
        "/task.add" => {
            let prompt = rest.join(" ");
            if prompt.trim().is_empty() {
                return CommandOutput::err("usage: /task.add <prompt>");
            }
            match state.store.create_task(
                ads_store::CreateTask::new(prompt),
                now,
                ads_store::Admission::Pending,
            ) {
                Ok(task) => {
                    state.scheduler.notify_task_created().await;
                    CommandOutput::ok(format!("created {} — {}", task.id, task.title))
                }
                Err(e) => CommandOutput::err(e.to_string()),
            }
        }
        "/task.list" => match state.store.list_tasks(None) {
            Ok(tasks) if tasks.is_empty() => CommandOutput::ok("(no tasks)"),
            Ok(tasks) => CommandOutput::ok(
                tasks
                    .iter()
                    .map(|t| format!("[{}] {} — {}", t.status.as_str(), t.id, t.title))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Err(e) => CommandOutput::err(e.to_string()),
        },
        "/task.cancel" => match rest.first() {
            Some(id) => {
                if state.scheduler.cancel(id) {
                    CommandOutput::ok(format!("cancelling {id}"))
                } else {
                    match state.store.cancel_task(id, now) {
                        Ok(_) => CommandOutput::ok(format!("cancelled {id}")),
                        Err(e) => CommandOutput::err(e.to_string()),
                    }
                }
            }
            None => CommandOutput::err("usage: /task.cancel <id>"),
        },
        "/task.retry" => match rest.first() {
            Some(id) => match state.store.retry_task(id, now) {
                Ok(task) => {
                    state.scheduler.notify_task_created().await;
                    CommandOutput::ok(format!("retrying {} (attempt {})", task.id, task.retry_count))
                }
                Err(e) => CommandOutput::err(e.to_string()),
            },
            None => CommandOutput::err("usage: /task.retry <id>"),
        },
        "/task.move" => match (rest.first(), rest.get(1)) {
            (Some(id), Some(&"up")) => move_task(state, id, ads_store::MoveDirection::Up),
            (Some(id), Some(&"down")) => move_task(state, id, ads_store::MoveDirection::Down),
            _ => CommandOutput::err("usage: /task.move <id> up|down"),
        },
        "/task.pause" => match rest.first() {
            Some(id) => match state.store.set_task_status(id, ads_store::TaskStatus::Paused, now) {
                Ok(_) => CommandOutput::ok(format!("paused {id}")),
                Err(e) => CommandOutput::err(e.to_string()),
            },
            None => CommandOutput::err("usage: /task.pause <id>"),
        },
        "/task.resume" => match rest.first() {
            Some(id) => match state.store.set_task_status(id, ads_store::TaskStatus::Pending, now) {
                Ok(_) => {
                    state.scheduler.notify_task_created().await;
                    CommandOutput::ok(format!("resumed {id}"))
                }
                Err(e) => CommandOutput::err(e.to_string()),
            },
            None => CommandOutput::err("usage: /task.resume <id>"),
        },
        "/task.archive" => match rest.first() {
            Some(id) => match state.store.archive_task(id, now) {
                Ok(_) => CommandOutput::ok(format!("archived {id}")),
                Err(e) => CommandOutput::err(e.to_string()),
            },
            None => CommandOutput::err("usage: /task.archive <id>"),
        },
        other => CommandOutput::err(format!("Unknown command: {other}")),
    }
}

fn move_task(
    state: &GatewayState,
    id: &str,
    direction: ads_store::MoveDirection,
) -> crate::commands::CommandOutput {
    use crate::commands::CommandOutput;
    match state.store.move_pending_task(id, direction) {
        Ok(true) => CommandOutput::ok(format!("moved {id}")),
        Ok(false) => CommandOutput::ok(format!("{id} is already at the boundary")),
        Err(e) => CommandOutput::err(e.to_string()),
    }
}

// ─── Event forwarders ────────────────────────────────────────────────────────

/// Mirror the session's turn event stream to the client.
fn spawn_turn_forwarder(runtime: &Arc<SessionRuntime>, out_tx: OutTx, conn: CancellationToken) {
    let mut events = runtime.orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = conn.cancelled() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(envelope) => {
                    let frame = match envelope.event.phase {
                        EventPhase::Delta { text, step: false } => {
                            Some(Outbound::Delta { text, task_id: None })
                        }
                        EventPhase::Delta { text, step: true } => {
                            Some(Outbound::Explored { text })
                        }
                        EventPhase::Command(report) => Some(Outbound::Command {
                            id: report.id,
                            line: report.line,
                            status: report.status,
                            exit_code: report.exit_code,
                            output: report.output,
                            task_id: None,
                        }),
                        EventPhase::Plan { items } => Some(Outbound::Plan {
                            items: items
                                .into_iter()
                                .map(|i| PlanItemView { title: i.title, status: i.status })
                                .collect(),
                            task_id: None,
                        }),
                        EventPhase::Patch { diff, files } => {
                            Some(Outbound::Patch { diff, files, task_id: None })
                        }
                        EventPhase::Error { message } => Some(Outbound::Error { message }),
                        EventPhase::Done { .. } => None,
                    };
                    if let Some(frame) = frame {
                        if out_tx.send(OutMsg::Frame(frame)).await.is_err() {
                            break;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("turn event stream lagged by {n}");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Mirror the scheduler's parallel task event stream, labelled by task id.
fn spawn_task_forwarder(state: &Arc<GatewayState>, out_tx: OutTx, conn: CancellationToken) {
    let mut events = state.scheduler.subscribe();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = conn.cancelled() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(event) => {
                    let task_id = Some(event.task_id.clone());
                    let frame = match event.kind {
                        TaskEventKind::Delta { text, step: false } => {
                            Some(Outbound::Delta { text, task_id })
                        }
                        TaskEventKind::Delta { step: true, .. } => None,
                        TaskEventKind::Command(report) => Some(Outbound::Command {
                            id: report.id,
                            line: report.line,
                            status: report.status,
                            exit_code: report.exit_code,
                            output: report.output,
                            task_id,
                        }),
                        TaskEventKind::Plan { items } => Some(Outbound::Plan {
                            items: items
                                .into_iter()
                                .map(|i| PlanItemView { title: i.title, status: i.status })
                                .collect(),
                            task_id,
                        }),
                        TaskEventKind::Patch { diff, files } => {
                            Some(Outbound::Patch { diff, files, task_id })
                        }
                        TaskEventKind::Status { .. } => None,
                        TaskEventKind::Completed { result } => Some(Outbound::Result {
                            ok: true,
                            output: format!("task {} completed: {result}", event.task_id),
                        }),
                        TaskEventKind::Failed { error } => Some(Outbound::Result {
                            ok: false,
                            output: format!("task {} failed: {error}", event.task_id),
                        }),
                    };
                    if let Some(frame) = frame {
                        if out_tx.send(OutMsg::Frame(frame)).await.is_err() {
                            break;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("task event stream lagged by {n}");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn reset_session(
    state: &Arc<GatewayState>,
    user_id: &str,
    session_id: &str,
) -> anyhow::Result<Arc<SessionRuntime>> {
    let _ = state.store.clear_history(HISTORY_NS, session_id);
    let _ = state.sessions.clear_pending_prompt(HISTORY_NS, session_id);
    state.sessions.reset(user_id)?;
    state
        .sessions
        .get_or_create(user_id, &state.config.paths.root, false)
        .await
}

async fn send_history(state: &Arc<GatewayState>, out_tx: &OutTx, session_id: &str) {
    match state.store.get_history(HISTORY_NS, session_id, None) {
        Ok(entries) if !entries.is_empty() => {
            let items = entries
                .into_iter()
                .map(|e| HistoryItem {
                    role: e.role.as_str().to_string(),
                    kind: e.kind.map(|k| k.as_str().to_string()),
                    text: e.text,
                    ts: e.ts,
                })
                .collect();
            send_frame(out_tx, Outbound::History { items }).await;
        }
        Ok(_) => {}
        Err(e) => warn!("cannot load history: {e}"),
    }
}

fn record_history(
    state: &GatewayState,
    session_id: &str,
    role: HistoryRole,
    kind: Option<HistoryKind>,
    text: &str,
) {
    if text.is_empty() {
        return;
    }
    let entry = NewHistoryEntry {
        namespace: HISTORY_NS.to_string(),
        session_id: session_id.to_string(),
        role,
        kind,
        text: text.to_string(),
        ts: chrono::Utc::now().timestamp_millis(),
    };
    if let Err(e) = state.store.add_history_entry(entry) {
        warn!("cannot record history: {e}");
    }
}

async fn send_frame(out_tx: &OutTx, frame: Outbound) {
    let _ = out_tx.send(OutMsg::Frame(frame)).await;
}

fn cleanup_files(paths: &[PathBuf]) {
    for path in paths {
        let _ = std::fs::remove_file(path);
    }
}

fn preview(s: &str) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(80).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
