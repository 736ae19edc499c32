//! The alert sink seam between the daemon and a notification service.

use async_trait::async_trait;
use tracing::warn;

/// Caption attached to the alert snapshot.
pub const SNAPSHOT_CAPTION: &str = "Motion detected!";

/// Sent once the daemon is up.
pub const STARTUP_MESSAGE: &str = "Motion alert is now active on your Pi camera.";

/// Destination for motion alerts.
///
/// Calls are fire-and-forget: implementations log delivery failures and
/// never return them, so a slow or broken service cannot stall the frame
/// loop's callers.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Plain text status message.
    async fn announce(&self, text: &str);

    /// A motion episode opened; `snapshot` is the triggering JPEG.
    async fn alert_open(&self, snapshot: Vec<u8>);

    /// A motion episode closed and was encoded to MP4.
    async fn alert_close(&self, video: Vec<u8>, frame_count: usize);

    /// A closed episode could not be turned into a clip.
    async fn alert_failed(&self, reason: &str);
}

/// Used when no notification credentials are configured.
#[derive(Debug, Default, Clone)]
pub struct DisabledSink;

const NOT_CONFIGURED: &str = "Telegram not configured. Set TELEGRAM_TOKEN and TELEGRAM_CHAT_ID.";

#[async_trait]
impl AlertSink for DisabledSink {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn announce(&self, _text: &str) {}

    async fn alert_open(&self, snapshot: Vec<u8>) {
        warn!(snapshot_bytes = snapshot.len(), "{}", NOT_CONFIGURED);
    }

    async fn alert_close(&self, video: Vec<u8>, frame_count: usize) {
        warn!(
            video_bytes = video.len(),
            frames = frame_count,
            "{}",
            NOT_CONFIGURED
        );
    }

    async fn alert_failed(&self, reason: &str) {
        warn!(reason, "{}", NOT_CONFIGURED);
    }
}
