use async_trait::async_trait;
use base64::Engine as _;
use image::GenericImageView;
use tokio::process::Command;

use crate::config::DeviceConfig;
use crate::device::channel::{DeviceChannel, Screenshot};
use crate::errors::{DroidPilotError, DroidPilotResult};

/// ADB-backed device channel. One instance corresponds to one connected
/// device (`-s <serial>` when more than one is attached).
pub struct AdbChannel {
    adb_path: String,
    serial: Option<String>,
    label: String,
}

impl AdbChannel {
    pub fn new(config: &DeviceConfig) -> Self {
        let label = config
            .serial
            .clone()
            .unwrap_or_else(|| "default".to_string());
        Self {
            adb_path: config.adb_path.clone(),
            serial: config.serial.clone(),
            label,
        }
    }

    async fn run(&self, args: &[&str]) -> DroidPilotResult<Vec<u8>> {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args);

        let output = cmd.output().await.map_err(|e| {
            DroidPilotError::Device(format!("failed to spawn {}: {e}", self.adb_path))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DroidPilotError::Device(format!(
                "adb {} failed ({}): {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl DeviceChannel for AdbChannel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn screenshot(&self) -> DroidPilotResult<Screenshot> {
        let png = self.run(&["exec-out", "screencap", "-p"]).await?;
        let decoded = image::load_from_memory(&png)
            .map_err(|e| DroidPilotError::Device(format!("unreadable screencap output: {e}")))?;
        let (width, height) = decoded.dimensions();
        tracing::debug!(width, height, bytes = png.len(), "screenshot captured");
        Ok(Screenshot {
            png,
            width,
            height,
            captured_at: chrono::Utc::now(),
        })
    }

    async fn tap(&self, x: u32, y: u32) -> DroidPilotResult<()> {
        let (xs, ys) = (x.to_string(), y.to_string());
        self.run(&["shell", "input", "tap", &xs, &ys]).await?;
        Ok(())
    }

    async fn swipe(
        &self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration_ms: u32,
    ) -> DroidPilotResult<()> {
        let args: Vec<String> = vec![
            x1.to_string(),
            y1.to_string(),
            x2.to_string(),
            y2.to_string(),
            duration_ms.to_string(),
        ];
        self.run(&[
            "shell", "input", "swipe", &args[0], &args[1], &args[2], &args[3], &args[4],
        ])
        .await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> DroidPilotResult<()> {
        if is_plain_ascii(text) {
            let escaped = text.replace(' ', "%s");
            self.run(&["shell", "input", "text", &escaped]).await?;
            return Ok(());
        }
        // Non-ASCII input goes through the ADBKeyBoard IME broadcast; the
        // stock `input text` command cannot deliver it.
        let encoded = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
        self.run(&[
            "shell", "am", "broadcast", "-a", "ADB_INPUT_B64", "--es", "msg", &encoded,
        ])
        .await?;
        Ok(())
    }

    async fn key_event(&self, code: u32) -> DroidPilotResult<()> {
        let code = code.to_string();
        self.run(&["shell", "input", "keyevent", &code]).await?;
        Ok(())
    }
}

/// Characters `input text` delivers reliably without shell-quoting hazards.
fn is_plain_ascii(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_ascii_alphanumeric() || " .,:/@_+-=".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ascii_detection() {
        assert!(is_plain_ascii("hello world 123"));
        assert!(is_plain_ascii("user@example.com"));
        assert!(!is_plain_ascii("你好"));
        assert!(!is_plain_ascii("a;rm -rf"));
        assert!(!is_plain_ascii("quote\"inside"));
    }
}
