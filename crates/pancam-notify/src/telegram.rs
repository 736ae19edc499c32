//! Telegram Bot API client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::error::{NotifyError, NotifyResult};
use crate::sink::{AlertSink, SNAPSHOT_CAPTION};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram credentials and HTTP tuning.
#[derive(Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
    /// Overridable for tests.
    pub api_base: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl TelegramConfig {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            chat_id: chat_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            // Video uploads from a Pi over Wi-Fi can take a while.
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends alerts to one Telegram chat.
#[derive(Debug, Clone)]
pub struct TelegramSink {
    http: Client,
    config: TelegramConfig,
}

impl TelegramSink {
    pub fn new(config: TelegramConfig) -> NotifyResult<Self> {
        if config.token.is_empty() || config.chat_id.is_empty() {
            return Err(NotifyError::not_configured(
                "TELEGRAM_TOKEN and TELEGRAM_CHAT_ID must both be set",
            ));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("pancam-notify/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, config })
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.token,
            method
        )
    }

    pub async fn send_message(&self, text: &str) -> NotifyResult<()> {
        let response = self
            .http
            .post(self.endpoint("sendMessage"))
            .form(&[("chat_id", self.config.chat_id.as_str()), ("text", text)])
            .send()
            .await?;
        Self::check("sendMessage", response).await
    }

    pub async fn send_photo(&self, jpeg: Vec<u8>, caption: &str) -> NotifyResult<()> {
        let photo = Part::bytes(jpeg)
            .file_name("snapshot.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("caption", caption.to_string())
            .part("photo", photo);
        self.upload("sendPhoto", form).await
    }

    pub async fn send_video(&self, mp4: Vec<u8>, caption: &str) -> NotifyResult<()> {
        let video = Part::bytes(mp4)
            .file_name("motion.mp4")
            .mime_str("video/mp4")?;
        let form = Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("caption", caption.to_string())
            .text("supports_streaming", "true")
            .part("video", video);
        self.upload("sendVideo", form).await
    }

    async fn upload(&self, method: &str, form: Form) -> NotifyResult<()> {
        let response = self
            .http
            .post(self.endpoint(method))
            .multipart(form)
            .send()
            .await?;
        Self::check(method, response).await
    }

    async fn check(method: &str, response: Response) -> NotifyResult<()> {
        let status = response.status();
        let body = response.text().await?;
        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(api) if status.is_success() && api.ok => {
                debug!(method, "Telegram request succeeded");
                Ok(())
            }
            Some(api) => Err(NotifyError::api(
                status.as_u16(),
                api.description.unwrap_or(body),
            )),
            None => Err(NotifyError::api(status.as_u16(), body)),
        }
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn announce(&self, text: &str) {
        if let Err(e) = self.send_message(text).await {
            warn!(error = %e, "Failed to send Telegram message");
        }
    }

    async fn alert_open(&self, snapshot: Vec<u8>) {
        let Err(e) = self.send_photo(snapshot, SNAPSHOT_CAPTION).await else {
            return;
        };
        warn!(error = %e, "Snapshot upload failed, falling back to text");
        if let Err(e) = self.send_message(SNAPSHOT_CAPTION).await {
            error!(error = %e, "Failed to deliver motion alert");
        }
    }

    async fn alert_close(&self, video: Vec<u8>, frame_count: usize) {
        let caption = format!("Motion clip ({frame_count} frames)");
        if let Err(e) = self.send_video(video, &caption).await {
            error!(error = %e, frames = frame_count, "Failed to upload motion clip");
        }
    }

    async fn alert_failed(&self, reason: &str) {
        let text = format!("Motion recorded but the clip could not be saved: {reason}");
        if let Err(e) = self.send_message(&text).await {
            error!(error = %e, "Failed to send clip failure notice");
        }
    }
}
