use crate::agent_engine::state::{Action, DispatchOutcome};
use crate::device::channel::DeviceChannel;
use crate::errors::DroidPilotResult;

/// How long the press is held to register as a long-press. The channel has
/// no dedicated primitive; a zero-distance swipe is the decomposition.
const LONG_PRESS_MS: u32 = 800;

/// Maps one action onto device primitives. No retries here — retry policy is
/// owned by the agent loop so it stays in one place.
pub async fn dispatch(
    channel: &dyn DeviceChannel,
    action: &Action,
    verify_after_tap: bool,
) -> DroidPilotResult<DispatchOutcome> {
    match action {
        Action::Tap { x, y } => {
            channel.tap(*x, *y).await?;
            let verified = if verify_after_tap {
                // Post-action capture: confirms the channel survived the tap
                // and gives the next turn a settled frame.
                channel.screenshot().await?;
                Some(true)
            } else {
                None
            };
            Ok(DispatchOutcome {
                success: true,
                detail: format!("Tapped ({x}, {y})"),
                verified,
            })
        }
        Action::Swipe { x1, y1, x2, y2, duration_ms } => {
            channel.swipe(*x1, *y1, *x2, *y2, *duration_ms).await?;
            Ok(DispatchOutcome {
                success: true,
                detail: format!("Swiped ({x1}, {y1}) -> ({x2}, {y2}) in {duration_ms}ms"),
                verified: None,
            })
        }
        Action::LongPress { x, y } => {
            channel.swipe(*x, *y, *x, *y, LONG_PRESS_MS).await?;
            Ok(DispatchOutcome {
                success: true,
                detail: format!("Long-pressed ({x}, {y})"),
                verified: None,
            })
        }
        Action::TypeText { text } => {
            channel.type_text(text).await?;
            Ok(DispatchOutcome {
                success: true,
                detail: format!("Typed: {text}"),
                verified: None,
            })
        }
        Action::KeyEvent { code } => {
            channel.key_event(*code).await?;
            Ok(DispatchOutcome {
                success: true,
                detail: format!("Key event {code}"),
                verified: None,
            })
        }
        Action::Wait { duration_ms } => {
            tokio::time::sleep(std::time::Duration::from_millis(*duration_ms as u64)).await;
            Ok(DispatchOutcome {
                success: true,
                detail: format!("Waited {duration_ms}ms"),
                verified: None,
            })
        }
        // Terminal actions are resolved by the loop before dispatch.
        Action::Finish { .. } | Action::Abort { .. } => Ok(DispatchOutcome {
            success: true,
            detail: "terminal action; no device call".to_string(),
            verified: None,
        }),
    }
}
