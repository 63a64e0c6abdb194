//! Parses free-form model responses into typed [`Action`] values and renders
//! actions back into their canonical text form.
//!
//! The model is not required to use one canonical format. Three response
//! shapes are accepted, all observed in the wild:
//!
//! 1. call lines — `tap(540, 1200)`, `长按(100, 200)`
//! 2. keyword-argument style — `do(action="Tap", element=[540, 1200])`
//! 3. a bare JSON object — `{"action": "swipe", "x1": …}`, optionally inside
//!    a ```json fence
//!
//! New formats go here, never into the agent loop.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::agent_engine::state::{Action, Lang, ScreenBounds};

pub const KEYCODE_HOME: u32 = 3;
pub const KEYCODE_BACK: u32 = 4;
pub const KEYCODE_ENTER: u32 = 66;
pub const KEYCODE_DELETE: u32 = 67;
pub const KEYCODE_MENU: u32 = 82;
pub const KEYCODE_POWER: u32 = 26;
pub const KEYCODE_VOLUME_UP: u32 = 24;
pub const KEYCODE_VOLUME_DOWN: u32 = 25;

const DEFAULT_SWIPE_MS: u32 = 300;
const DEFAULT_WAIT_MS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty model response")]
    Empty,

    #[error("unknown action keyword: {0}")]
    UnknownAction(String),

    #[error("malformed arguments: {0}")]
    MalformedArgs(String),

    #[error("coordinates out of bounds: ({x}, {y})")]
    OutOfBounds { x: i64, y: i64 },
}

/// Action keyword, before its arguments are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Tap,
    Swipe,
    LongPress,
    Type,
    Key,
    Home,
    Back,
    Wait,
    Finish,
    Abort,
}

/// Decode a raw model response into an action. Coordinates are validated
/// against `bounds` here, so out-of-range values are a decode rejection and
/// never reach the device.
pub fn decode(lang: Lang, bounds: ScreenBounds, raw: &str) -> Result<Action, DecodeError> {
    let text = strip_fences(raw.trim());
    if text.trim().is_empty() {
        return Err(DecodeError::Empty);
    }

    if let Some(obj) = extract_json_object(&text) {
        if obj.get("action").and_then(|v| v.as_str()).is_some() {
            return decode_json(lang, bounds, &obj);
        }
    }

    let mut first_unknown: Option<String> = None;

    // Full-line calls first: the canonical form is one call per line and may
    // carry nested parentheses inside quoted text.
    for line in text.lines() {
        let line = strip_label_prefix(line);
        if let Some(caps) = line_call_re().captures(line) {
            let name = caps[1].trim();
            let args = caps[2].to_string();
            if normalize(name) == "do" {
                return decode_do_kwargs(lang, bounds, &args);
            }
            match keyword_kind(lang, name) {
                Some(kind) => return build_action(kind, bounds, &args),
                None => first_unknown.get_or_insert_with(|| name.to_string()),
            };
        }
    }

    // Calls embedded in prose ("I will tap(540, 1200) next").
    for caps in inline_call_re().captures_iter(&text) {
        let name = caps[1].trim();
        let args = caps[2].to_string();
        if normalize(name) == "do" {
            return decode_do_kwargs(lang, bounds, &args);
        }
        match keyword_kind(lang, name) {
            Some(kind) => return build_action(kind, bounds, &args),
            None => first_unknown.get_or_insert_with(|| name.to_string()),
        };
    }

    // Bare keyword on its own line, e.g. "back" or "完成".
    for line in text.lines() {
        let token = strip_label_prefix(line).trim_end_matches(['.', '。']).trim();
        if let Some(kind) = keyword_kind(lang, token) {
            return build_action(kind, bounds, "");
        }
    }

    Err(DecodeError::UnknownAction(
        first_unknown.unwrap_or_else(|| snippet(&text)),
    ))
}

/// Render an action in canonical form. Stable: the same action always
/// renders identically, and `decode` accepts the output unchanged.
pub fn encode(action: &Action) -> String {
    match action {
        Action::Tap { x, y } => format!("tap({x}, {y})"),
        Action::Swipe { x1, y1, x2, y2, duration_ms } => {
            format!("swipe({x1}, {y1}, {x2}, {y2}, {duration_ms})")
        }
        Action::LongPress { x, y } => format!("long_press({x}, {y})"),
        Action::TypeText { text } => format!("type(\"{}\")", escape(text)),
        Action::KeyEvent { code } => format!("key({code})"),
        Action::Wait { duration_ms } => format!("wait({duration_ms})"),
        Action::Finish { summary } => format!("finish(\"{}\")", escape(summary)),
        Action::Abort { reason } => format!("abort(\"{}\")", escape(reason)),
    }
}

// ── Keyword table ────────────────────────────────────────────────────────────

fn keyword_kind(lang: Lang, name: &str) -> Option<Kind> {
    let n = normalize(name);
    let kind = match n.as_str() {
        "tap" | "click" | "touch" => Some(Kind::Tap),
        "swipe" => Some(Kind::Swipe),
        "long_press" | "longpress" => Some(Kind::LongPress),
        "type" | "type_text" | "input_text" => Some(Kind::Type),
        "key" | "key_event" | "keyevent" | "press_key" => Some(Kind::Key),
        "home" => Some(Kind::Home),
        "back" => Some(Kind::Back),
        "wait" | "sleep" => Some(Kind::Wait),
        "finish" | "finish_task" | "done" | "complete" => Some(Kind::Finish),
        "abort" | "fail" | "report_failure" => Some(Kind::Abort),
        _ => None,
    };
    if kind.is_some() {
        return kind;
    }
    if lang == Lang::Cn {
        return match n.as_str() {
            "点击" | "轻点" => Some(Kind::Tap),
            "滑动" => Some(Kind::Swipe),
            "长按" => Some(Kind::LongPress),
            "输入" => Some(Kind::Type),
            "按键" => Some(Kind::Key),
            "主页" | "主屏" => Some(Kind::Home),
            "返回" => Some(Kind::Back),
            "等待" => Some(Kind::Wait),
            "完成" => Some(Kind::Finish),
            "失败" | "中止" | "终止" => Some(Kind::Abort),
            _ => None,
        };
    }
    None
}

// ── Call-argument interpretation ─────────────────────────────────────────────

fn build_action(kind: Kind, bounds: ScreenBounds, args_str: &str) -> Result<Action, DecodeError> {
    let args = split_top_level(args_str);
    match kind {
        Kind::Tap => {
            let (x, y) = point_args(&args, args_str)?;
            let (x, y) = checked_point(bounds, x, y)?;
            Ok(Action::Tap { x, y })
        }
        Kind::LongPress => {
            let (x, y) = point_args(&args, args_str)?;
            let (x, y) = checked_point(bounds, x, y)?;
            Ok(Action::LongPress { x, y })
        }
        Kind::Swipe => {
            if args.len() < 4 {
                return Err(DecodeError::MalformedArgs(format!(
                    "swipe needs 4 coordinates, got {}",
                    args.len()
                )));
            }
            let x1 = int_arg(&args[0])?;
            let y1 = int_arg(&args[1])?;
            let x2 = int_arg(&args[2])?;
            let y2 = int_arg(&args[3])?;
            let duration_ms = match args.get(4) {
                Some(a) => duration_arg(a)?,
                None => DEFAULT_SWIPE_MS,
            };
            let (x1, y1) = checked_point(bounds, x1, y1)?;
            let (x2, y2) = checked_point(bounds, x2, y2)?;
            Ok(Action::Swipe { x1, y1, x2, y2, duration_ms })
        }
        Kind::Type => Ok(Action::TypeText { text: unquote(args_str) }),
        Kind::Key => {
            let arg = args
                .first()
                .ok_or_else(|| DecodeError::MalformedArgs("key needs a keycode".into()))?;
            Ok(Action::KeyEvent { code: key_code(arg)? })
        }
        Kind::Home => Ok(Action::KeyEvent { code: KEYCODE_HOME }),
        Kind::Back => Ok(Action::KeyEvent { code: KEYCODE_BACK }),
        Kind::Wait => {
            let duration_ms = match args.first() {
                Some(a) => duration_arg(a)?,
                None => DEFAULT_WAIT_MS,
            };
            Ok(Action::Wait { duration_ms })
        }
        Kind::Finish => Ok(Action::Finish { summary: unquote(args_str) }),
        Kind::Abort => Ok(Action::Abort { reason: unquote(args_str) }),
    }
}

/// `do(action="Tap", element=[540, 1200])` and friends.
fn decode_do_kwargs(
    lang: Lang,
    bounds: ScreenBounds,
    args_str: &str,
) -> Result<Action, DecodeError> {
    let mut kwargs: HashMap<String, String> = HashMap::new();
    for part in split_top_level(args_str) {
        if let Some((k, v)) = part.split_once('=') {
            kwargs.insert(normalize(k), v.trim().to_string());
        }
    }

    let name = kwargs
        .get("action")
        .map(|v| unquote(v))
        .ok_or_else(|| DecodeError::MalformedArgs("do() is missing action=".into()))?;
    let kind =
        keyword_kind(lang, &name).ok_or_else(|| DecodeError::UnknownAction(name.clone()))?;

    let element = kwargs
        .get("element")
        .or_else(|| kwargs.get("point"))
        .or_else(|| kwargs.get("coordinates"));

    match kind {
        Kind::Tap | Kind::LongPress => {
            let raw = element.ok_or_else(|| {
                DecodeError::MalformedArgs(format!("{name} is missing element="))
            })?;
            let (x, y) = parse_point(raw)
                .ok_or_else(|| DecodeError::MalformedArgs(format!("bad element: {raw}")))?;
            let (x, y) = checked_point(bounds, x, y)?;
            Ok(match kind {
                Kind::Tap => Action::Tap { x, y },
                _ => Action::LongPress { x, y },
            })
        }
        Kind::Swipe => {
            let duration_ms = match kwargs.get("duration").or_else(|| kwargs.get("duration_ms")) {
                Some(v) => duration_arg(v)?,
                None => DEFAULT_SWIPE_MS,
            };
            if let (Some(s), Some(e)) = (kwargs.get("start"), kwargs.get("end")) {
                let (x1, y1) = parse_point(s)
                    .ok_or_else(|| DecodeError::MalformedArgs(format!("bad start: {s}")))?;
                let (x2, y2) = parse_point(e)
                    .ok_or_else(|| DecodeError::MalformedArgs(format!("bad end: {e}")))?;
                let (x1, y1) = checked_point(bounds, x1, y1)?;
                let (x2, y2) = checked_point(bounds, x2, y2)?;
                return Ok(Action::Swipe { x1, y1, x2, y2, duration_ms });
            }
            // Directional form: the origin defaults to the screen centre.
            let origin = match element {
                Some(raw) => parse_point(raw)
                    .ok_or_else(|| DecodeError::MalformedArgs(format!("bad element: {raw}")))?,
                None => (bounds.width as i64 / 2, bounds.height as i64 / 2),
            };
            let direction = kwargs
                .get("direction")
                .map(|v| unquote(v))
                .ok_or_else(|| DecodeError::MalformedArgs("swipe is missing direction=".into()))?;
            let distance = kwargs.get("distance").map(|v| unquote(v)).unwrap_or_default();
            directional_swipe(bounds, origin, &direction, &distance, duration_ms)
        }
        Kind::Type => {
            let text = kwargs
                .get("text")
                .map(|v| unquote(v))
                .ok_or_else(|| DecodeError::MalformedArgs("type is missing text=".into()))?;
            Ok(Action::TypeText { text })
        }
        Kind::Key => {
            let raw = kwargs
                .get("key")
                .or_else(|| kwargs.get("code"))
                .ok_or_else(|| DecodeError::MalformedArgs("key is missing key=".into()))?;
            Ok(Action::KeyEvent { code: key_code(raw)? })
        }
        Kind::Home => Ok(Action::KeyEvent { code: KEYCODE_HOME }),
        Kind::Back => Ok(Action::KeyEvent { code: KEYCODE_BACK }),
        Kind::Wait => {
            let duration_ms = match kwargs.get("duration").or_else(|| kwargs.get("ms")) {
                Some(v) => duration_arg(v)?,
                None => DEFAULT_WAIT_MS,
            };
            Ok(Action::Wait { duration_ms })
        }
        Kind::Finish => Ok(Action::Finish {
            summary: kwargs
                .get("message")
                .or_else(|| kwargs.get("summary"))
                .map(|v| unquote(v))
                .unwrap_or_default(),
        }),
        Kind::Abort => Ok(Action::Abort {
            reason: kwargs
                .get("reason")
                .or_else(|| kwargs.get("message"))
                .map(|v| unquote(v))
                .unwrap_or_default(),
        }),
    }
}

fn decode_json(
    lang: Lang,
    bounds: ScreenBounds,
    obj: &serde_json::Value,
) -> Result<Action, DecodeError> {
    let name = obj["action"].as_str().unwrap_or_default();
    let kind = keyword_kind(lang, name)
        .ok_or_else(|| DecodeError::UnknownAction(name.to_string()))?;

    match kind {
        Kind::Tap | Kind::LongPress => {
            let (x, y) = json_point(obj)?;
            let (x, y) = checked_point(bounds, x, y)?;
            Ok(match kind {
                Kind::Tap => Action::Tap { x, y },
                _ => Action::LongPress { x, y },
            })
        }
        Kind::Swipe => {
            let duration_ms = json_num(obj, &["duration_ms", "duration", "ms"])
                .map(|v| v.max(0) as u32)
                .unwrap_or(DEFAULT_SWIPE_MS);
            let (x1, y1, x2, y2) = if obj.get("x1").is_some() {
                (
                    require_num(obj, "x1")?,
                    require_num(obj, "y1")?,
                    require_num(obj, "x2")?,
                    require_num(obj, "y2")?,
                )
            } else {
                let s = value_point(obj.get("start"))
                    .ok_or_else(|| DecodeError::MalformedArgs("swipe is missing start".into()))?;
                let e = value_point(obj.get("end"))
                    .ok_or_else(|| DecodeError::MalformedArgs("swipe is missing end".into()))?;
                (s.0, s.1, e.0, e.1)
            };
            let (x1, y1) = checked_point(bounds, x1, y1)?;
            let (x2, y2) = checked_point(bounds, x2, y2)?;
            Ok(Action::Swipe { x1, y1, x2, y2, duration_ms })
        }
        Kind::Type => {
            let text = obj
                .get("text")
                .or_else(|| obj.get("content"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| DecodeError::MalformedArgs("type is missing text".into()))?;
            Ok(Action::TypeText { text: text.to_string() })
        }
        Kind::Key => {
            if let Some(code) = json_num(obj, &["code", "keycode"]) {
                if code < 0 {
                    return Err(DecodeError::MalformedArgs(format!("bad keycode: {code}")));
                }
                return Ok(Action::KeyEvent { code: code as u32 });
            }
            let raw = obj
                .get("key")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DecodeError::MalformedArgs("key is missing code".into()))?;
            Ok(Action::KeyEvent { code: key_code(raw)? })
        }
        Kind::Home => Ok(Action::KeyEvent { code: KEYCODE_HOME }),
        Kind::Back => Ok(Action::KeyEvent { code: KEYCODE_BACK }),
        Kind::Wait => Ok(Action::Wait {
            duration_ms: json_num(obj, &["duration_ms", "duration", "ms"])
                .map(|v| v.max(0) as u32)
                .unwrap_or(DEFAULT_WAIT_MS),
        }),
        Kind::Finish => Ok(Action::Finish {
            summary: obj
                .get("summary")
                .or_else(|| obj.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        Kind::Abort => Ok(Action::Abort {
            reason: obj
                .get("reason")
                .or_else(|| obj.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
    }
}

// ── Shared argument helpers ──────────────────────────────────────────────────

fn checked_point(bounds: ScreenBounds, x: i64, y: i64) -> Result<(u32, u32), DecodeError> {
    if !bounds.contains(x, y) {
        return Err(DecodeError::OutOfBounds { x, y });
    }
    Ok((x as u32, y as u32))
}

fn point_args(args: &[String], args_str: &str) -> Result<(i64, i64), DecodeError> {
    if args.len() == 1 {
        if let Some(p) = parse_point(&args[0]) {
            return Ok(p);
        }
    }
    if args.len() < 2 {
        return Err(DecodeError::MalformedArgs(format!(
            "expected x, y coordinates, got: {args_str}"
        )));
    }
    Ok((int_arg(&args[0])?, int_arg(&args[1])?))
}

fn int_arg(s: &str) -> Result<i64, DecodeError> {
    parse_int(s).ok_or_else(|| DecodeError::MalformedArgs(format!("not a number: {s}")))
}

fn duration_arg(s: &str) -> Result<u32, DecodeError> {
    let t = unquote(s);
    let t = t.trim().trim_end_matches("ms").trim();
    let v = parse_int(t)
        .ok_or_else(|| DecodeError::MalformedArgs(format!("not a duration: {s}")))?;
    if v < 0 {
        return Err(DecodeError::MalformedArgs(format!("negative duration: {s}")));
    }
    Ok(v as u32)
}

fn parse_int(s: &str) -> Option<i64> {
    let t = s.trim();
    if let Ok(v) = t.parse::<i64>() {
        return Some(v);
    }
    t.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.round() as i64)
}

fn parse_point(v: &str) -> Option<(i64, i64)> {
    let t = v.trim();
    let inner = t.strip_prefix('[')?.strip_suffix(']')?;
    let parts = split_top_level(inner);
    if parts.len() == 2 && !parts[0].starts_with('[') {
        return Some((parse_int(&parts[0])?, parse_int(&parts[1])?));
    }
    // Bounding-box form [[x1, y1], [x2, y2]]: take the centre.
    if !parts.is_empty() && parts.iter().all(|p| p.starts_with('[')) {
        let pts = parts
            .iter()
            .map(|p| parse_point(p))
            .collect::<Option<Vec<_>>>()?;
        let n = pts.len() as i64;
        return Some((
            pts.iter().map(|p| p.0).sum::<i64>() / n,
            pts.iter().map(|p| p.1).sum::<i64>() / n,
        ));
    }
    None
}

fn json_point(obj: &serde_json::Value) -> Result<(i64, i64), DecodeError> {
    if obj.get("x").is_some() || obj.get("y").is_some() {
        return Ok((require_num(obj, "x")?, require_num(obj, "y")?));
    }
    value_point(
        obj.get("element")
            .or_else(|| obj.get("point"))
            .or_else(|| obj.get("coordinates")),
    )
    .ok_or_else(|| DecodeError::MalformedArgs("missing x, y coordinates".into()))
}

fn value_point(v: Option<&serde_json::Value>) -> Option<(i64, i64)> {
    let arr = v?.as_array()?;
    if arr.len() == 2 && !arr[0].is_array() {
        return Some((value_num(&arr[0])?, value_num(&arr[1])?));
    }
    if !arr.is_empty() && arr.iter().all(|e| e.is_array()) {
        let pts = arr
            .iter()
            .map(|e| {
                let p = e.as_array()?;
                Some((value_num(p.first()?)?, value_num(p.get(1)?)?))
            })
            .collect::<Option<Vec<_>>>()?;
        let n = pts.len() as i64;
        return Some((
            pts.iter().map(|p| p.0).sum::<i64>() / n,
            pts.iter().map(|p| p.1).sum::<i64>() / n,
        ));
    }
    None
}

fn value_num(v: &serde_json::Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64))
}

fn json_num(obj: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(value_num))
}

fn require_num(obj: &serde_json::Value, key: &str) -> Result<i64, DecodeError> {
    obj.get(key)
        .and_then(value_num)
        .ok_or_else(|| DecodeError::MalformedArgs(format!("missing or bad field: {key}")))
}

fn key_code(raw: &str) -> Result<u32, DecodeError> {
    let t = unquote(raw);
    let n = normalize(&t);
    let named = match n.as_str() {
        "home" => Some(KEYCODE_HOME),
        "back" => Some(KEYCODE_BACK),
        "enter" => Some(KEYCODE_ENTER),
        "delete" | "del" => Some(KEYCODE_DELETE),
        "menu" => Some(KEYCODE_MENU),
        "power" => Some(KEYCODE_POWER),
        "volume_up" => Some(KEYCODE_VOLUME_UP),
        "volume_down" => Some(KEYCODE_VOLUME_DOWN),
        _ => None,
    };
    if let Some(code) = named {
        return Ok(code);
    }
    match parse_int(&t) {
        Some(v) if v >= 0 => Ok(v as u32),
        _ => Err(DecodeError::MalformedArgs(format!("unknown key: {raw}"))),
    }
}

fn directional_swipe(
    bounds: ScreenBounds,
    origin: (i64, i64),
    direction: &str,
    distance: &str,
    duration_ms: u32,
) -> Result<Action, DecodeError> {
    let frac = match normalize(distance).as_str() {
        "short" => 0.15,
        "long" => 0.5,
        _ => 0.3,
    };
    let (dx, dy) = match normalize(direction).as_str() {
        "up" | "上" => (0.0, -(bounds.height as f64) * frac),
        "down" | "下" => (0.0, bounds.height as f64 * frac),
        "left" | "左" => (-(bounds.width as f64) * frac, 0.0),
        "right" | "右" => (bounds.width as f64 * frac, 0.0),
        other => {
            return Err(DecodeError::MalformedArgs(format!(
                "unknown swipe direction: {other}"
            )))
        }
    };
    let (x1, y1) = checked_point(bounds, origin.0, origin.1)?;
    let clamp = |v: f64, max: u32| -> u32 { v.round().clamp(0.0, max.saturating_sub(1) as f64) as u32 };
    let x2 = clamp(x1 as f64 + dx, bounds.width);
    let y2 = clamp(y1 as f64 + dy, bounds.height);
    Ok(Action::Swipe { x1, y1, x2, y2, duration_ms })
}

// ── Text plumbing ────────────────────────────────────────────────────────────

fn line_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*([\p{Han}A-Za-z_][\p{Han}A-Za-z0-9_ ]*?)\s*\((.*)\)\s*[.。]?\s*$")
            .expect("valid regex")
    })
}

fn inline_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([\p{Han}A-Za-z_][\p{Han}A-Za-z0-9_]*)\s*\(([^()]*)\)").expect("valid regex")
    })
}

/// Splits at top-level commas, leaving quoted strings and bracketed lists
/// intact.
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for ch in s.chars() {
        if let Some(q) = quote {
            cur.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                cur.push(ch);
            }
            '[' | '(' => {
                depth += 1;
                cur.push(ch);
            }
            ']' | ')' => {
                depth -= 1;
                cur.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(cur.trim().to_string());
                cur.clear();
            }
            _ => cur.push(ch),
        }
    }
    if !cur.trim().is_empty() {
        parts.push(cur.trim().to_string());
    }
    parts
}

fn unquote(s: &str) -> String {
    let t = s.trim();
    let chars: Vec<char> = t.chars().collect();
    if chars.len() >= 2 {
        let (first, last) = (chars[0], chars[chars.len() - 1]);
        if (first == '"' || first == '\'') && last == first {
            let inner: String = chars[1..chars.len() - 1].iter().collect();
            let mut out = String::with_capacity(inner.len());
            let mut esc = false;
            for ch in inner.chars() {
                if esc {
                    out.push(ch);
                    esc = false;
                } else if ch == '\\' {
                    esc = true;
                } else {
                    out.push(ch);
                }
            }
            return out;
        }
    }
    t.to_string()
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn normalize(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

fn strip_label_prefix(line: &str) -> &str {
    let t = line.trim();
    for label in ["Action:", "action:", "操作:", "操作：", "动作:", "动作："] {
        if let Some(rest) = t.strip_prefix(label) {
            return rest.trim();
        }
    }
    t
}

fn strip_fences(text: &str) -> String {
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }
    text.to_string()
}

fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    if last <= first {
        return None;
    }
    serde_json::from_str(&text[first..=last]).ok().filter(|v: &serde_json::Value| v.is_object())
}

fn snippet(text: &str) -> String {
    let t = text.trim();
    let cut: String = t.chars().take(48).collect();
    if cut.len() < t.len() {
        format!("{cut}…")
    } else {
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> ScreenBounds {
        ScreenBounds { width: 1080, height: 2400 }
    }

    #[test]
    fn test_roundtrip_canonical() {
        let actions = vec![
            Action::Tap { x: 540, y: 1200 },
            Action::Swipe { x1: 100, y1: 200, x2: 300, y2: 400, duration_ms: 300 },
            Action::LongPress { x: 10, y: 20 },
            Action::TypeText { text: "hello, \"world\"".into() },
            Action::KeyEvent { code: 3 },
            Action::Wait { duration_ms: 500 },
            Action::Finish { summary: "opened the app".into() },
            Action::Abort { reason: "target not found".into() },
        ];
        for a in actions {
            let rendered = encode(&a);
            let decoded = decode(Lang::En, bounds(), &rendered)
                .unwrap_or_else(|e| panic!("decode({rendered}) failed: {e}"));
            assert_eq!(decoded, a, "roundtrip for {rendered}");
        }
    }

    #[test]
    fn test_encode_is_stable() {
        let a = Action::Swipe { x1: 1, y1: 2, x2: 3, y2: 4, duration_ms: 300 };
        assert_eq!(encode(&a), encode(&a));
        assert_eq!(encode(&a), "swipe(1, 2, 3, 4, 300)");
    }

    #[test]
    fn test_call_embedded_in_prose() {
        let raw = "The calculator icon is near the bottom. I will tap(540, 1200) to open it.";
        assert_eq!(
            decode(Lang::En, bounds(), raw).unwrap(),
            Action::Tap { x: 540, y: 1200 }
        );
    }

    #[test]
    fn test_action_label_prefix() {
        let raw = "Thought: the icon is visible.\nAction: tap(540, 1200)";
        assert_eq!(
            decode(Lang::En, bounds(), raw).unwrap(),
            Action::Tap { x: 540, y: 1200 }
        );
    }

    #[test]
    fn test_do_kwargs_tap() {
        let raw = r#"do(action="Tap", element=[540, 1200])"#;
        assert_eq!(
            decode(Lang::En, bounds(), raw).unwrap(),
            Action::Tap { x: 540, y: 1200 }
        );
    }

    #[test]
    fn test_do_kwargs_bbox_centre() {
        let raw = r#"do(action="Long Press", element=[[500, 1100], [580, 1300]])"#;
        assert_eq!(
            decode(Lang::En, bounds(), raw).unwrap(),
            Action::LongPress { x: 540, y: 1200 }
        );
    }

    #[test]
    fn test_do_kwargs_directional_swipe() {
        let raw = r#"do(action="Swipe", direction="up", distance="medium")"#;
        let a = decode(Lang::En, bounds(), raw).unwrap();
        match a {
            Action::Swipe { x1, y1, y2, .. } => {
                assert_eq!(x1, 540);
                assert_eq!(y1, 1200);
                assert!(y2 < y1, "upward swipe must decrease y");
            }
            other => panic!("expected swipe, got {other:?}"),
        }
    }

    #[test]
    fn test_json_shape() {
        let raw = r#"{"action": "swipe", "x1": 100, "y1": 200, "x2": 300, "y2": 400, "duration": 250}"#;
        assert_eq!(
            decode(Lang::En, bounds(), raw).unwrap(),
            Action::Swipe { x1: 100, y1: 200, x2: 300, y2: 400, duration_ms: 250 }
        );
    }

    #[test]
    fn test_json_in_fence() {
        let raw = "```json\n{\"action\": \"type\", \"text\": \"42\"}\n```";
        assert_eq!(
            decode(Lang::En, bounds(), raw).unwrap(),
            Action::TypeText { text: "42".into() }
        );
    }

    #[test]
    fn test_cn_keywords() {
        assert_eq!(
            decode(Lang::Cn, bounds(), "点击(540, 1200)").unwrap(),
            Action::Tap { x: 540, y: 1200 }
        );
        assert_eq!(
            decode(Lang::Cn, bounds(), "输入(\"你好\")").unwrap(),
            Action::TypeText { text: "你好".into() }
        );
        assert_eq!(
            decode(Lang::Cn, bounds(), "操作：完成(\"已打开计算器\")").unwrap(),
            Action::Finish { summary: "已打开计算器".into() }
        );
        // Chinese aliases are a cn-locale affordance only.
        assert!(matches!(
            decode(Lang::En, bounds(), "点击(540, 1200)"),
            Err(DecodeError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_home_back_aliases() {
        assert_eq!(
            decode(Lang::En, bounds(), "home()").unwrap(),
            Action::KeyEvent { code: KEYCODE_HOME }
        );
        assert_eq!(
            decode(Lang::En, bounds(), "back").unwrap(),
            Action::KeyEvent { code: KEYCODE_BACK }
        );
        assert_eq!(
            decode(Lang::En, bounds(), "key(enter)").unwrap(),
            Action::KeyEvent { code: KEYCODE_ENTER }
        );
    }

    #[test]
    fn test_out_of_bounds_rejected_at_decode() {
        assert_eq!(
            decode(Lang::En, bounds(), "tap(5000, 1200)"),
            Err(DecodeError::OutOfBounds { x: 5000, y: 1200 })
        );
        assert_eq!(
            decode(Lang::En, bounds(), "swipe(100, 200, 100, 9999)"),
            Err(DecodeError::OutOfBounds { x: 100, y: 9999 })
        );
        assert_eq!(
            decode(Lang::En, bounds(), "tap(-1, 5)"),
            Err(DecodeError::OutOfBounds { x: -1, y: 5 })
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(decode(Lang::En, bounds(), ""), Err(DecodeError::Empty));
        assert_eq!(decode(Lang::En, bounds(), "   \n\t"), Err(DecodeError::Empty));
    }

    #[test]
    fn test_known_bad_corpus_never_panics() {
        let corpus = [
            "tap()",
            "tap(abc, def)",
            "swipe(1, 2)",
            "frobnicate(1, 2)",
            r#"do(action="Teleport", element=[1, 2])"#,
            r#"do(element=[1, 2])"#,
            r#"{"action": "tap"}"#,
            r#"{"action": "warp", "x": 1, "y": 2}"#,
            "I could not decide what to do next.",
            "key(upsidedown)",
            "wait(-5)",
            "```json\n{broken\n```",
        ];
        for raw in corpus {
            let err = decode(Lang::En, bounds(), raw)
                .expect_err(&format!("expected decode error for: {raw}"));
            match err {
                DecodeError::UnknownAction(_)
                | DecodeError::MalformedArgs(_)
                | DecodeError::OutOfBounds { .. }
                | DecodeError::Empty => {}
            }
        }
    }

    #[test]
    fn test_float_coordinates_rounded() {
        assert_eq!(
            decode(Lang::En, bounds(), "tap(540.4, 1199.6)").unwrap(),
            Action::Tap { x: 540, y: 1200 }
        );
    }

    #[test]
    fn test_wait_ms_suffix() {
        assert_eq!(
            decode(Lang::En, bounds(), "wait(500ms)").unwrap(),
            Action::Wait { duration_ms: 500 }
        );
    }

    #[test]
    fn test_swipe_default_duration() {
        assert_eq!(
            decode(Lang::En, bounds(), "swipe(100, 200, 300, 400)").unwrap(),
            Action::Swipe { x1: 100, y1: 200, x2: 300, y2: 400, duration_ms: 300 }
        );
    }
}
