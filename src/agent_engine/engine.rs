use std::sync::Arc;

use tokio::sync::watch;

use crate::agent_engine::history::{History, SessionTranscript};
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::state::{Action, DispatchOutcome, StopReason, Task, TaskResult, Turn};
use crate::codec;
use crate::config::AgentConfig;
use crate::device::channel::{DeviceChannel, Screenshot};
use crate::errors::{DroidPilotResult, ModelError};
use crate::executor::dispatcher;
use crate::llm::provider::ModelProvider;
use crate::llm::types::{CallConfig, ChatMessage, ModelTurn};
use crate::prompts;

/// Drives one task to a terminal outcome. Strictly sequential: step N's
/// action is dispatched and settled before step N+1's screenshot is taken,
/// so no action is ever issued against a stale frame.
pub struct TaskRunner {
    channel: Arc<dyn DeviceChannel>,
    provider: Arc<dyn ModelProvider>,
    call_cfg: CallConfig,
    cfg: AgentConfig,
    cancel: Option<watch::Receiver<bool>>,
}

impl TaskRunner {
    pub fn new(
        channel: Arc<dyn DeviceChannel>,
        provider: Arc<dyn ModelProvider>,
        call_cfg: CallConfig,
        cfg: AgentConfig,
    ) -> Self {
        Self {
            channel,
            provider,
            call_cfg,
            cfg,
            cancel: None,
        }
    }

    /// Cancellation is observed at the top of a turn, never mid-dispatch.
    pub fn with_cancellation(mut self, rx: watch::Receiver<bool>) -> Self {
        self.cancel = Some(rx);
        self
    }

    pub async fn run(&self, task: &Task) -> TaskResult {
        let transcript = SessionTranscript::new();
        tracing::info!(
            session = %transcript.session_id,
            task = %task.instruction,
            lang = task.lang.as_code(),
            max_steps = task.max_steps,
            device = %self.channel.name(),
            provider = %self.provider.name(),
            "task started"
        );

        let mut history = History::new();
        let mut ctrl = LoopController::new(task.max_steps, &self.cfg);

        loop {
            if self.cancelled() {
                return self.finish(
                    &transcript,
                    false,
                    StopReason::Cancelled,
                    "cancelled by caller".into(),
                    history,
                );
            }
            if ctrl.budget_exhausted(history.len() as u32) {
                return self.finish(
                    &transcript,
                    false,
                    StopReason::Exhausted,
                    format!("step budget of {} reached without finish", task.max_steps),
                    history,
                );
            }
            if ctrl.over_deadline() {
                return self.finish(
                    &transcript,
                    false,
                    StopReason::Exhausted,
                    "wall-clock budget reached without finish".into(),
                    history,
                );
            }

            // ── 1. Fresh screenshot, one retry before escalating ──────────
            let shot = match self.capture_with_retry().await {
                Ok(s) => s,
                Err(e) => {
                    return self.finish(
                        &transcript,
                        false,
                        StopReason::DeviceFailure,
                        format!("screenshot capture failed: {e}"),
                        history,
                    );
                }
            };
            let bounds = shot.bounds();
            let seq = history.len() as u32 + 1;

            // ── 2–4. Model call + decode; decode failures re-prompt within
            //         the same turn slot ─────────────────────────────────────
            let mut decode_feedback: Option<String> = None;
            let (raw, decoded) = loop {
                let messages = self.build_messages(task, &history, &shot, decode_feedback.as_deref());
                let model_turn = match self.complete_with_retry(&messages).await {
                    Ok(t) => t,
                    Err(e) => {
                        return self.finish(
                            &transcript,
                            false,
                            StopReason::ModelFailure,
                            format!("model backend failed: {e}"),
                            history,
                        );
                    }
                };
                if !model_turn.reasoning.is_empty() {
                    tracing::debug!(seq, reasoning = %model_turn.reasoning, "model reasoning");
                }

                match codec::decode(task.lang, bounds, &model_turn.content) {
                    Ok(action) => {
                        ctrl.reset_decode_failures();
                        break (model_turn.content, Ok(action));
                    }
                    Err(err) => {
                        let failures = ctrl.record_decode_failure();
                        tracing::warn!(seq, failures, error = %err, "undecodable model response");
                        if ctrl.decode_failures_exceeded() {
                            break (model_turn.content, Err(err));
                        }
                        decode_feedback = Some(err.to_string());
                    }
                }
            };

            let action = match decoded {
                Ok(action) => action,
                Err(err) => {
                    self.push_turn(
                        &transcript,
                        &mut history,
                        Turn {
                            seq,
                            screen: bounds,
                            raw_response: raw,
                            action: None,
                            decode_error: Some(err.to_string()),
                            outcome: None,
                            timestamp: chrono::Utc::now(),
                        },
                    );
                    return self.finish(
                        &transcript,
                        false,
                        StopReason::DecodeFailures,
                        format!("model kept producing undecodable responses: {err}"),
                        history,
                    );
                }
            };

            tracing::info!(seq, action = %codec::encode(&action), "action decoded");

            // ── 5. Duplicate guard ────────────────────────────────────────
            let repeats = ctrl.observe(&action);
            if ctrl.is_stuck() {
                self.push_turn(
                    &transcript,
                    &mut history,
                    Turn {
                        seq,
                        screen: bounds,
                        raw_response: raw,
                        action: Some(action.clone()),
                        decode_error: None,
                        outcome: None,
                        timestamp: chrono::Utc::now(),
                    },
                );
                return self.finish(
                    &transcript,
                    false,
                    StopReason::Stuck,
                    format!("stuck: {} repeated {repeats} turns in a row", codec::encode(&action)),
                    history,
                );
            }

            // ── 6. Terminal actions end the loop without touching the
            //        device ───────────────────────────────────────────────
            if let Action::Finish { summary } = &action {
                let summary = summary.clone();
                self.push_turn(
                    &transcript,
                    &mut history,
                    Turn {
                        seq,
                        screen: bounds,
                        raw_response: raw,
                        action: Some(action),
                        decode_error: None,
                        outcome: None,
                        timestamp: chrono::Utc::now(),
                    },
                );
                return self.finish(&transcript, true, StopReason::Finished, summary, history);
            }
            if let Action::Abort { reason } = &action {
                let reason = reason.clone();
                self.push_turn(
                    &transcript,
                    &mut history,
                    Turn {
                        seq,
                        screen: bounds,
                        raw_response: raw,
                        action: Some(action),
                        decode_error: None,
                        outcome: None,
                        timestamp: chrono::Utc::now(),
                    },
                );
                return self.finish(&transcript, false, StopReason::ModelAbort, reason, history);
            }

            // ── 7. Dispatch and record ────────────────────────────────────
            match dispatcher::dispatch(self.channel.as_ref(), &action, self.cfg.verify_after_tap)
                .await
            {
                Ok(outcome) => {
                    tracing::info!(seq, detail = %outcome.detail, "action dispatched");
                    self.push_turn(
                        &transcript,
                        &mut history,
                        Turn {
                            seq,
                            screen: bounds,
                            raw_response: raw,
                            action: Some(action),
                            decode_error: None,
                            outcome: Some(outcome),
                            timestamp: chrono::Utc::now(),
                        },
                    );
                }
                Err(e) => {
                    let detail = e.to_string();
                    self.push_turn(
                        &transcript,
                        &mut history,
                        Turn {
                            seq,
                            screen: bounds,
                            raw_response: raw,
                            action: Some(action),
                            decode_error: None,
                            outcome: Some(DispatchOutcome {
                                success: false,
                                detail: detail.clone(),
                                verified: None,
                            }),
                            timestamp: chrono::Utc::now(),
                        },
                    );
                    return self.finish(
                        &transcript,
                        false,
                        StopReason::DeviceFailure,
                        format!("device dispatch failed: {detail}"),
                        history,
                    );
                }
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    async fn capture_with_retry(&self) -> DroidPilotResult<Screenshot> {
        match self.channel.screenshot().await {
            Ok(shot) => Ok(shot),
            Err(first) => {
                tracing::warn!(error = %first, "screenshot failed, retrying once");
                self.channel.screenshot().await
            }
        }
    }

    async fn complete_with_retry(&self, messages: &[ChatMessage]) -> Result<ModelTurn, ModelError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.provider.complete(messages.to_vec(), &self.call_cfg).await {
                Ok(turn) => return Ok(turn),
                Err(e) if e.is_retryable() && attempt < self.cfg.model_attempts => {
                    let delay = self.cfg.retry_base_ms.saturating_mul(1 << (attempt - 1));
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay,
                        "model call failed, backing off"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn build_messages(
        &self,
        task: &Task,
        history: &History,
        shot: &Screenshot,
        decode_feedback: Option<&str>,
    ) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(prompts::system_prompt(task.lang)),
            ChatMessage::user_with_image(
                shot.data_uri(),
                prompts::user_prompt(
                    task,
                    shot.bounds(),
                    history,
                    self.cfg.history_window,
                    decode_feedback,
                ),
            ),
        ]
    }

    fn push_turn(&self, transcript: &SessionTranscript, history: &mut History, turn: Turn) {
        if let Err(e) = transcript.append(&turn) {
            tracing::warn!(error = %e, "transcript flush failed");
        }
        history.push(turn);
    }

    fn finish(
        &self,
        transcript: &SessionTranscript,
        success: bool,
        reason: StopReason,
        summary: String,
        history: History,
    ) -> TaskResult {
        tracing::info!(
            session = %transcript.session_id,
            success,
            reason = ?reason,
            turns = history.len(),
            summary = %summary,
            "task ended"
        );
        TaskResult {
            success,
            reason,
            summary,
            turns: history.into_turns(),
        }
    }
}
