//! Locale-specific prompt templates and per-turn prompt assembly.

use crate::agent_engine::history::History;
use crate::agent_engine::state::{Lang, ScreenBounds, Task};
use crate::codec;

pub const SYSTEM_PROMPT_EN: &str = "\
You are DroidPilot, a phone automation agent in control of one Android device.

Each turn you receive a screenshot of the current screen. Reply with exactly
one action:
- tap(x, y)
- swipe(x1, y1, x2, y2, duration_ms)
- long_press(x, y)
- type(\"text\")
- key(keycode)  — or home() / back()
- wait(milliseconds)
- finish(\"summary\") once the task is complete
- abort(\"reason\") if the task cannot be completed

Rules:
- Coordinates are pixels inside the reported screen size.
- One action per reply; put any reasoning on the lines above the action.
- Act only on what is visible in the current screenshot.";

pub const SYSTEM_PROMPT_CN: &str = "\
你是 DroidPilot，一个控制安卓手机的自动化代理。

每一轮你会收到当前屏幕的截图。每次只回复一个操作：
- tap(x, y) 或 点击(x, y)
- swipe(x1, y1, x2, y2, 毫秒) 或 滑动(…)
- long_press(x, y) 或 长按(x, y)
- type(\"文本\") 或 输入(\"文本\")
- key(按键码)，或 home() / back()
- wait(毫秒) 或 等待(毫秒)
- 任务完成时回复 finish(\"总结\") 或 完成(\"总结\")
- 无法完成时回复 abort(\"原因\") 或 失败(\"原因\")

规则：
- 坐标为屏幕内的像素值，不要超出屏幕尺寸。
- 每次回复只包含一个操作，推理写在操作行之前。
- 只根据当前截图中可见的内容行动。";

pub fn system_prompt(lang: Lang) -> &'static str {
    match lang {
        Lang::En => SYSTEM_PROMPT_EN,
        Lang::Cn => SYSTEM_PROMPT_CN,
    }
}

/// Renders the text half of the per-turn user message: instruction, screen
/// size, and a bounded trailing window of prior turns. Older turns are
/// summarized by an omission marker, never silently dropped.
pub fn user_prompt(
    task: &Task,
    bounds: ScreenBounds,
    history: &History,
    window: usize,
    decode_feedback: Option<&str>,
) -> String {
    let mut out = String::new();
    match task.lang {
        Lang::En => {
            out.push_str(&format!("Task: {}\n", task.instruction));
            out.push_str(&format!("Screen: {}x{} px\n", bounds.width, bounds.height));
        }
        Lang::Cn => {
            out.push_str(&format!("任务：{}\n", task.instruction));
            out.push_str(&format!("屏幕尺寸：{}x{} 像素\n", bounds.width, bounds.height));
        }
    }

    if !history.is_empty() {
        let omitted = history.len().saturating_sub(window);
        match task.lang {
            Lang::En => out.push_str("Previous steps:\n"),
            Lang::Cn => out.push_str("此前的操作：\n"),
        }
        if omitted > 0 {
            match task.lang {
                Lang::En => out.push_str(&format!("  (earlier {omitted} steps omitted)\n")),
                Lang::Cn => out.push_str(&format!("  （省略了更早的 {omitted} 步）\n")),
            }
        }
        for turn in history.window(window) {
            let line = match (&turn.action, &turn.decode_error) {
                (Some(action), _) => codec::encode(action),
                (None, Some(err)) => format!("<undecodable: {err}>"),
                (None, None) => "<no action>".to_string(),
            };
            let status = match &turn.outcome {
                Some(o) if o.success => "ok",
                Some(_) => "failed",
                None => "-",
            };
            out.push_str(&format!("  {}. {} -> {}\n", turn.seq, line, status));
        }
    }

    if let Some(err) = decode_feedback {
        match task.lang {
            Lang::En => out.push_str(&format!(
                "\nYour previous reply could not be parsed ({err}). \
                 Reply again with exactly one action line.\n"
            )),
            Lang::Cn => out.push_str(&format!(
                "\n你上一条回复无法解析（{err}）。请重新回复，只包含一个操作行。\n"
            )),
        }
    }

    match task.lang {
        Lang::En => out.push_str("\nNext action:"),
        Lang::Cn => out.push_str("\n下一步操作："),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::{Action, DispatchOutcome, Turn};

    fn turn(seq: u32, action: Action) -> Turn {
        Turn {
            seq,
            screen: ScreenBounds { width: 1080, height: 2400 },
            raw_response: codec::encode(&action),
            action: Some(action),
            decode_error: None,
            outcome: Some(DispatchOutcome {
                success: true,
                detail: String::new(),
                verified: None,
            }),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_window_bounds_prompt_size() {
        let task = Task::new("open settings", Lang::En, 50);
        let mut history = History::new();
        for i in 1..=10 {
            history.push(turn(i, Action::Tap { x: 10, y: i }));
        }
        let prompt = user_prompt(
            &task,
            ScreenBounds { width: 1080, height: 2400 },
            &history,
            4,
            None,
        );
        assert!(prompt.contains("(earlier 6 steps omitted)"));
        assert!(prompt.contains("7. tap(10, 7)"));
        assert!(!prompt.contains("6. tap(10, 6)"));
    }

    #[test]
    fn test_decode_feedback_included() {
        let task = Task::new("打开计算器", Lang::Cn, 10);
        let prompt = user_prompt(
            &task,
            ScreenBounds { width: 1080, height: 2400 },
            &History::new(),
            4,
            Some("unknown action keyword: frobnicate"),
        );
        assert!(prompt.contains("无法解析"));
        assert!(prompt.contains("frobnicate"));
    }
}
