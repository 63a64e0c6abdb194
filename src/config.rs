use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::agent_engine::state::Lang;
use crate::errors::DroidPilotResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub asr: AsrConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_active_provider")]
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert("local".to_string(), ProviderEntry::default());
        Self {
            active_provider: default_active_provider(),
            providers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// "dashscope" selects the DashScope envelope; absent means
    /// OpenAI-compatible.
    pub adapter: Option<String>,
    /// Optional API key stored in config.toml (falls back to the
    /// DROIDPILOT_<ID>_API_KEY env var).
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ProviderEntry {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/v1/chat/completions".to_string(),
            model: "autoglm-phone-9b".to_string(),
            temperature: default_temperature(),
            adapter: None,
            api_key: Some("EMPTY".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub lang: Lang,
    /// How many trailing turns stay prompt-visible. The full history is
    /// always kept for the returned audit trail.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Consecutive identical actions that count as stuck.
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: u32,
    /// Consecutive undecodable model responses before aborting.
    #[serde(default = "default_max_decode_failures")]
    pub max_decode_failures: u32,
    /// Attempts per model call, counting the first.
    #[serde(default = "default_model_attempts")]
    pub model_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Hard wall-clock budget for one task.
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
    /// Re-capture after every tap to confirm it landed.
    #[serde(default)]
    pub verify_after_tap: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            lang: Lang::default(),
            history_window: default_history_window(),
            stuck_threshold: default_stuck_threshold(),
            max_decode_failures: default_max_decode_failures(),
            model_attempts: default_model_attempts(),
            retry_base_ms: default_retry_base_ms(),
            max_duration_secs: None,
            verify_after_tap: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_adb_path")]
    pub adb_path: String,
    /// Required only when more than one device is attached.
    #[serde(default)]
    pub serial: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            serial: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    #[serde(default = "default_asr_api_base")]
    pub api_base: String,
    #[serde(default = "default_asr_model")]
    pub model: String,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            api_base: default_asr_api_base(),
            model: default_asr_model(),
        }
    }
}

fn default_active_provider() -> String {
    "local".to_string()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_steps() -> u32 {
    100
}

fn default_history_window() -> usize {
    8
}

fn default_stuck_threshold() -> u32 {
    3
}

fn default_max_decode_failures() -> u32 {
    3
}

fn default_model_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_adb_path() -> String {
    "adb".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_asr_api_base() -> String {
    "https://dashscope.aliyuncs.com".to_string()
}

fn default_asr_model() -> String {
    "paraformer-v2".to_string()
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Some(candidate);
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let candidate = cwd.join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in working directory");
            return Some(candidate);
        }
    }

    None
}

/// Loads config.toml from next to the executable or the working directory,
/// falling back to built-in defaults, then applies env-var overrides.
pub fn load_config() -> DroidPilotResult<AppConfig> {
    let mut config = match resolve_config_path() {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let config: AppConfig = toml::from_str(&content)?;
            tracing::info!(path = %path.display(), provider = %config.model.active_provider, "config loaded");
            config
        }
        None => {
            tracing::info!("no config.toml found, using defaults");
            AppConfig::default()
        }
    };

    if config.model.providers.is_empty() {
        config
            .model
            .providers
            .insert(config.model.active_provider.clone(), ProviderEntry::default());
    }

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Env overrides carried over from the original deployment surface.
fn apply_env_overrides(config: &mut AppConfig) {
    let active = config.model.active_provider.clone();
    if let Some(entry) = config.model.providers.get_mut(&active) {
        if let Ok(base) = std::env::var("PHONE_AGENT_BASE_URL") {
            entry.api_base = base;
        }
        if let Ok(model) = std::env::var("PHONE_AGENT_MODEL") {
            entry.model = model;
        }
        if let Ok(key) = std::env::var("PHONE_AGENT_API_KEY") {
            entry.api_key = Some(key);
        }
    }
    if let Ok(steps) = std::env::var("PHONE_AGENT_MAX_STEPS") {
        match steps.parse() {
            Ok(v) => config.agent.max_steps = v,
            Err(_) => tracing::warn!(value = %steps, "ignoring bad PHONE_AGENT_MAX_STEPS"),
        }
    }
    if let Ok(lang) = std::env::var("PHONE_AGENT_LANG") {
        config.agent.lang = Lang::from_code(&lang);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").expect("empty config parses");
        assert_eq!(config.agent.max_steps, 100);
        assert_eq!(config.agent.lang, Lang::Cn);
        assert_eq!(config.agent.stuck_threshold, 3);
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.device.adb_path, "adb");
    }

    #[test]
    fn test_full_config_parses() {
        let raw = r#"
            [model]
            active_provider = "qwen"

            [model.providers.qwen]
            api_base = "https://dashscope.aliyuncs.com/api/v1/services/aigc/multimodal-generation/generation"
            model = "qwen-vl-max"
            adapter = "dashscope"
            temperature = 0.2

            [agent]
            max_steps = 25
            lang = "en"
            history_window = 4
            verify_after_tap = true

            [device]
            adb_path = "/usr/bin/adb"
            serial = "emulator-5554"

            [http]
            host = "0.0.0.0"
            port = 9000
        "#;
        let config: AppConfig = toml::from_str(raw).expect("config parses");
        assert_eq!(config.model.active_provider, "qwen");
        let entry = &config.model.providers["qwen"];
        assert_eq!(entry.adapter.as_deref(), Some("dashscope"));
        assert_eq!(entry.temperature, 0.2);
        assert_eq!(config.agent.max_steps, 25);
        assert_eq!(config.agent.lang, Lang::En);
        assert!(config.agent.verify_after_tap);
        assert_eq!(config.device.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(config.http.port, 9000);
    }
}
