//! Alert delivery for the pan camera.
//!
//! [`AlertSink`] is the seam the daemon talks to. [`TelegramSink`] posts to
//! the Telegram Bot API; [`DisabledSink`] only logs.

pub mod error;
pub mod sink;
pub mod telegram;

pub use error::{NotifyError, NotifyResult};
pub use sink::{AlertSink, DisabledSink, SNAPSHOT_CAPTION, STARTUP_MESSAGE};
pub use telegram::{TelegramConfig, TelegramSink, DEFAULT_API_BASE};
