use serde::{Deserialize, Serialize};

/// Prompt locale. Also selects which keyword aliases the codec accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lang {
    En,
    #[default]
    Cn,
}

impl Lang {
    pub fn from_code(code: &str) -> Self {
        match code {
            "en" => Lang::En,
            _ => Lang::Cn,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Cn => "cn",
        }
    }
}

/// One natural-language automation request. Immutable once the loop starts;
/// step accounting lives in the loop, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub instruction: String,
    pub lang: Lang,
    pub max_steps: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Task {
    pub fn new(instruction: impl Into<String>, lang: Lang, max_steps: u32) -> Self {
        Self {
            instruction: instruction.into(),
            lang,
            max_steps,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Screen dimensions reported by the latest screenshot. Coordinates are
/// valid only while they fall inside these bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenBounds {
    pub width: u32,
    pub height: u32,
}

impl ScreenBounds {
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as u64) < self.width as u64 && (y as u64) < self.height as u64
    }
}

/// A typed, bounds-validated device operation or loop-terminating signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Tap { x: u32, y: u32 },
    Swipe { x1: u32, y1: u32, x2: u32, y2: u32, duration_ms: u32 },
    LongPress { x: u32, y: u32 },
    TypeText { text: String },
    KeyEvent { code: u32 },
    Wait { duration_ms: u32 },
    Finish { summary: String },
    Abort { reason: String },
}

impl Action {
    /// Finish/Abort end the loop without touching the device.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Finish { .. } | Action::Abort { .. })
    }
}

/// What came back from dispatching one action to the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub detail: String,
    /// Set only when post-action verification ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

/// One loop iteration's audit record. Appended to the history regardless of
/// how the turn ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub seq: u32,
    pub screen: ScreenBounds,
    pub raw_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DispatchOutcome>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model signalled completion.
    Finished,
    /// Step or wall-clock budget ran out. Not an error.
    Exhausted,
    /// Repeated-action guard tripped.
    Stuck,
    /// Too many consecutive undecodable model responses.
    DecodeFailures,
    /// Model backend unusable after retries, or auth rejected.
    ModelFailure,
    /// A device primitive failed; device state can no longer be trusted.
    DeviceFailure,
    /// The model itself reported failure.
    ModelAbort,
    /// Caller cancelled between turns.
    Cancelled,
}

/// Final outcome handed back to the caller. The full turn history rides
/// along for post-hoc diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub reason: StopReason,
    pub summary: String,
    pub turns: Vec<Turn>,
}
