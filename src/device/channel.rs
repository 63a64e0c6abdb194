use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use tokio::sync::{Mutex, MutexGuard};

use crate::agent_engine::state::ScreenBounds;
use crate::errors::DroidPilotResult;

/// One captured frame plus the dimensions every coordinate is validated
/// against.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl Screenshot {
    pub fn bounds(&self) -> ScreenBounds {
        ScreenBounds { width: self.width, height: self.height }
    }

    pub fn data_uri(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.png)
        )
    }
}

/// Point-to-point control connection to one device. Primitives map 1:1 onto
/// the transport's input facilities; any failure means the device state can
/// no longer be trusted.
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn screenshot(&self) -> DroidPilotResult<Screenshot>;

    async fn tap(&self, x: u32, y: u32) -> DroidPilotResult<()>;

    async fn swipe(
        &self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration_ms: u32,
    ) -> DroidPilotResult<()>;

    async fn type_text(&self, text: &str) -> DroidPilotResult<()>;

    async fn key_event(&self, code: u32) -> DroidPilotResult<()>;
}

/// Single-owner checkout of the device connection. A task holds the checkout
/// for its whole lifetime; a second task queues here instead of interleaving
/// primitive calls on the same device.
pub struct DeviceLease {
    channel: Arc<dyn DeviceChannel>,
    lock: Mutex<()>,
}

impl DeviceLease {
    pub fn new(channel: Arc<dyn DeviceChannel>) -> Self {
        Self { channel, lock: Mutex::new(()) }
    }

    pub async fn checkout(&self) -> DeviceCheckout<'_> {
        let guard = self.lock.lock().await;
        tracing::debug!(device = %self.channel.name(), "device checked out");
        DeviceCheckout { channel: self.channel.clone(), _guard: guard }
    }

    /// Non-blocking variant; `None` while another task owns the device.
    pub fn try_checkout(&self) -> Option<DeviceCheckout<'_>> {
        let guard = self.lock.try_lock().ok()?;
        Some(DeviceCheckout { channel: self.channel.clone(), _guard: guard })
    }
}

pub struct DeviceCheckout<'a> {
    channel: Arc<dyn DeviceChannel>,
    _guard: MutexGuard<'a, ()>,
}

impl DeviceCheckout<'_> {
    pub fn channel(&self) -> Arc<dyn DeviceChannel> {
        self.channel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullChannel;

    #[async_trait]
    impl DeviceChannel for NullChannel {
        fn name(&self) -> &str {
            "null"
        }

        async fn screenshot(&self) -> DroidPilotResult<Screenshot> {
            Ok(Screenshot {
                png: Vec::new(),
                width: 1080,
                height: 2400,
                captured_at: chrono::Utc::now(),
            })
        }

        async fn tap(&self, _x: u32, _y: u32) -> DroidPilotResult<()> {
            Ok(())
        }

        async fn swipe(
            &self,
            _x1: u32,
            _y1: u32,
            _x2: u32,
            _y2: u32,
            _duration_ms: u32,
        ) -> DroidPilotResult<()> {
            Ok(())
        }

        async fn type_text(&self, _text: &str) -> DroidPilotResult<()> {
            Ok(())
        }

        async fn key_event(&self, _code: u32) -> DroidPilotResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lease_is_exclusive() {
        let lease = DeviceLease::new(Arc::new(NullChannel));
        let first = lease.checkout().await;
        assert!(lease.try_checkout().is_none(), "second checkout must not interleave");
        drop(first);
        assert!(lease.try_checkout().is_some());
    }
}
