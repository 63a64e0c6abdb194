//! HTTP front door: accepts text or audio tasks and hands them to the agent
//! loop. The loop itself stays unaware of this layer.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent_engine::engine::TaskRunner;
use crate::agent_engine::state::{Task, TaskResult};
use crate::asr::AsrClient;
use crate::config::AppConfig;
use crate::device::channel::DeviceLease;
use crate::errors::DroidPilotResult;
use crate::llm::registry::ProviderRegistry;

const TASK_BODY_LIMIT: usize = 1024 * 1024;
const ASR_BODY_LIMIT: usize = 10 * 1024 * 1024;

pub struct AppState {
    pub config: AppConfig,
    pub registry: ProviderRegistry,
    pub lease: DeviceLease,
    pub asr: AsrClient,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/task", post(post_task).get(get_task_query))
        .route("/task/{task}", get(get_task_path))
        .route(
            "/asr",
            post(post_asr).layer(DefaultBodyLimit::max(ASR_BODY_LIMIT)),
        )
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(TASK_BODY_LIMIT))
        .with_state(state)
}

/// Runs one task against the exclusively checked-out device. A second task
/// arriving while the device is busy queues on the lease.
pub async fn run_task(state: &AppState, task_text: &str) -> DroidPilotResult<TaskResult> {
    let checkout = state.lease.checkout().await;
    let (provider, call_cfg) = state.registry.active_call()?;
    let task = Task::new(
        task_text,
        state.config.agent.lang,
        state.config.agent.max_steps,
    );
    let runner = TaskRunner::new(
        checkout.channel(),
        provider,
        call_cfg,
        state.config.agent.clone(),
    );
    Ok(runner.run(&task).await)
}

// ── Handlers ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TaskRequest {
    task: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsrRequest {
    audio_url: Option<String>,
    audio_base64: Option<String>,
    audio_format: Option<String>,
}

async fn post_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TaskRequest>,
) -> (StatusCode, Json<Value>) {
    match req.task.filter(|t| !t.trim().is_empty()) {
        Some(task) => {
            tracing::info!(task = %task, "task received via POST");
            run_and_respond(&state, &task).await
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing \"task\" field in request" })),
        ),
    }
}

async fn get_task_query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    match params.get("task").filter(|t| !t.trim().is_empty()) {
        Some(task) => {
            tracing::info!(task = %task, "task received via GET");
            run_and_respond(&state, task).await
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Missing task parameter. Please provide task in query string or path."
            })),
        ),
    }
}

async fn get_task_path(
    State(state): State<Arc<AppState>>,
    Path(task): Path<String>,
) -> (StatusCode, Json<Value>) {
    tracing::info!(task = %task, "task received via GET path");
    run_and_respond(&state, &task).await
}

async fn post_asr(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AsrRequest>,
) -> (StatusCode, Json<Value>) {
    let transcribed = if let Some(url) = req.audio_url.filter(|u| !u.trim().is_empty()) {
        tracing::info!(url = %url, "ASR request with audio URL");
        state.asr.transcribe_url(&url).await
    } else if let Some(b64) = req.audio_base64.filter(|b| !b.trim().is_empty()) {
        tracing::info!("ASR request with base64 audio");
        let format = req.audio_format.as_deref().unwrap_or("wav");
        state.asr.transcribe_base64(&b64, format).await
    } else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing audio_url or audio_base64 field" })),
        );
    };

    let text = match transcribed {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "transcription failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "ASR transcription failed", "details": e.to_string() })),
            );
        }
    };
    tracing::info!(text = %text, "transcription complete, running task");

    match run_task(&state, &text).await {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "transcribed_text": text,
                "agent_result": agent_result_body(&result),
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "task execution errored");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error", "details": e.to_string() })),
            )
        }
    }
}

async fn run_and_respond(state: &Arc<AppState>, task_text: &str) -> (StatusCode, Json<Value>) {
    match run_task(state, task_text).await {
        Ok(result) if result.success => (StatusCode::OK, Json(success_body(&result))),
        Ok(result) => (StatusCode::INTERNAL_SERVER_ERROR, Json(failure_body(&result))),
        Err(e) => {
            tracing::error!(error = %e, "task execution errored");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error", "details": e.to_string() })),
            )
        }
    }
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Endpoint not found" })),
    )
}

// ── Response envelopes (kept stable for existing callers) ────────────────────

fn success_body(result: &TaskResult) -> Value {
    json!({
        "result": "Task executed successfully",
        "details": result.summary,
        "turns": result.turns,
    })
}

fn failure_body(result: &TaskResult) -> Value {
    json!({
        "error": "Task execution failed",
        "details": result.summary,
        "reason": result.reason,
        "turns": result.turns,
    })
}

fn agent_result_body(result: &TaskResult) -> Value {
    json!({
        "success": result.success,
        "message": result.summary,
        "turns": result.turns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::StopReason;

    fn result(success: bool) -> TaskResult {
        TaskResult {
            success,
            reason: if success { StopReason::Finished } else { StopReason::Exhausted },
            summary: "opened the calculator".into(),
            turns: Vec::new(),
        }
    }

    #[test]
    fn test_envelopes_match_existing_contract() {
        let ok = success_body(&result(true));
        assert_eq!(ok["result"], "Task executed successfully");
        assert_eq!(ok["details"], "opened the calculator");

        let err = failure_body(&result(false));
        assert_eq!(err["error"], "Task execution failed");
        assert_eq!(err["reason"], "exhausted");

        let agent = agent_result_body(&result(true));
        assert_eq!(agent["success"], true);
        assert_eq!(agent["message"], "opened the calculator");
    }
}
