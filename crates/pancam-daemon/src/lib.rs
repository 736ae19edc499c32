//! Pan camera daemon.
//!
//! This crate provides:
//! - Environment configuration for every pipeline knob
//! - The MJPEG-over-HTTP frame source
//! - Actuator adapters (protocol lines, PCA9685 servo daemon)
//! - Per-frame pipeline wiring detection to control
//! - Episode workers for clip encoding and delivery
//! - Graceful shutdown

pub mod actuator;
pub mod config;
pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod runner;
pub mod stream;

pub use config::DaemonConfig;
pub use emitter::Emitter;
pub use error::{DaemonError, DaemonResult};
pub use runner::Runner;
