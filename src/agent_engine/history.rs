use std::io::Write;

use crate::agent_engine::state::Turn;
use crate::errors::DroidPilotResult;

/// Append-only record of all turns for one task. The sole state threaded
/// between loop iterations.
#[derive(Debug, Default)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The trailing `k` turns that remain prompt-visible.
    pub fn window(&self, k: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(k);
        &self.turns[start..]
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

/// On-disk JSONL transcript of one session, for post-hoc inspection. Written
/// once per turn and never read back.
pub struct SessionTranscript {
    pub session_id: String,
    file_path: std::path::PathBuf,
}

impl SessionTranscript {
    pub fn new() -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let dir = data_dir_or_cwd();
        let file_path = dir.join(format!("session_{session_id}.jsonl"));
        Self { session_id, file_path }
    }

    pub fn append(&self, turn: &Turn) -> DroidPilotResult<()> {
        let line = serde_json::to_string(turn)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{line}")?;
        tracing::debug!(path = %self.file_path.display(), seq = turn.seq, "turn flushed");
        Ok(())
    }
}

impl Default for SessionTranscript {
    fn default() -> Self {
        Self::new()
    }
}

/// `~/.local/share/droidpilot/sessions` (or the platform equivalent),
/// falling back to the current working directory.
fn data_dir_or_cwd() -> std::path::PathBuf {
    if let Some(base) = dirs::data_dir() {
        let d = base.join("droidpilot").join("sessions");
        let _ = std::fs::create_dir_all(&d);
        return d;
    }
    std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::{Action, ScreenBounds};

    fn turn(seq: u32) -> Turn {
        Turn {
            seq,
            screen: ScreenBounds { width: 100, height: 100 },
            raw_response: String::new(),
            action: Some(Action::Wait { duration_ms: 1 }),
            decode_error: None,
            outcome: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_window_takes_trailing_turns() {
        let mut history = History::new();
        for i in 1..=5 {
            history.push(turn(i));
        }
        let window = history.window(2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].seq, 4);
        assert_eq!(window[1].seq, 5);
        // A window wider than the history is just the history.
        assert_eq!(history.window(50).len(), 5);
    }
}
