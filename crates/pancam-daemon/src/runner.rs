//! The frame loop.
//!
//! One task pulls frames, runs the pipeline and applies its decisions.
//! Stream loss resets temporal state and reconnects forever; shutdown is
//! observed between frames.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pancam_models::Record;
use pancam_notify::{AlertSink, DisabledSink, TelegramSink, STARTUP_MESSAGE};
use pancam_vision::{check_ffmpeg, ClipEncoder, Frame};
use reqwest::Client;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::actuator::{Actuator, LineActuator, ServoDaemonActuator};
use crate::config::{ActuatorConfig, DaemonConfig, NotifyConfig};
use crate::dispatcher::EpisodeDispatcher;
use crate::emitter::Emitter;
use crate::error::{DaemonError, DaemonResult};
use crate::metrics;
use crate::pipeline::Pipeline;
use crate::stream::{next_frame_within, open_stream, stream_client, wait_for_stream};

/// Why a stream session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Lost,
}

pub struct Runner {
    config: DaemonConfig,
    emitter: Emitter,
    client: Client,
    pipeline: Pipeline,
    actuator: Option<Box<dyn Actuator>>,
    sink: Arc<dyn AlertSink>,
    dispatcher: EpisodeDispatcher,
    started: Instant,
    last_frame_at: Option<Instant>,
    ready: bool,
}

fn build_sink(notify: &NotifyConfig) -> DaemonResult<Arc<dyn AlertSink>> {
    match &notify.telegram {
        Some(telegram) => Ok(Arc::new(TelegramSink::new(telegram.clone())?)),
        None => {
            warn!("Telegram not configured, alerts will only be logged");
            Ok(Arc::new(DisabledSink))
        }
    }
}

async fn build_actuator(
    config: &DaemonConfig,
    emitter: &Emitter,
) -> DaemonResult<Box<dyn Actuator>> {
    match &config.actuator {
        ActuatorConfig::Line => Ok(Box::new(LineActuator::new(emitter.clone()))),
        ActuatorConfig::ServoDaemon {
            program,
            args,
            channel,
        } => {
            let servo =
                ServoDaemonActuator::spawn(program, args, *channel, config.steering.initial_angle)
                    .await
                    .map_err(|e| DaemonError::config(e.to_string()))?;
            Ok(Box::new(servo))
        }
    }
}

impl Runner {
    /// Build every component. Errors here are startup failures.
    pub async fn new(config: DaemonConfig, emitter: Emitter) -> DaemonResult<Self> {
        let pipeline = Pipeline::new(&config)?;
        let actuator = if config.mode.steers() {
            Some(build_actuator(&config, &emitter).await?)
        } else {
            None
        };
        let sink = build_sink(&config.notify)?;
        if config.mode.alerts() {
            if let Err(e) = check_ffmpeg() {
                warn!(error = %e, "Motion clips will not be encoded");
            }
        }
        let encoder = ClipEncoder::new(config.clip.clone());
        let dispatcher = EpisodeDispatcher::new(encoder, Arc::clone(&sink));
        let client = stream_client(&config.source)?;

        Ok(Self {
            config,
            emitter,
            client,
            pipeline,
            actuator,
            sink,
            dispatcher,
            started: Instant::now(),
            last_frame_at: None,
            ready: false,
        })
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> DaemonResult<()> {
        info!(
            mode = %self.config.mode,
            url = %self.config.source.url,
            actuator = self.actuator.as_ref().map_or("none", |a| a.name()),
            sink = self.sink.name(),
            "Starting frame loop"
        );
        wait_for_stream(&self.client, &self.config.source).await?;

        if self.config.mode.alerts() && self.config.notify.announce {
            self.sink.announce(STARTUP_MESSAGE).await;
        }

        loop {
            match self.session(&mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost => {
                    metrics::record_reconnect();
                    self.close_episode(true);
                    let backoff = self.config.source.reconnect_backoff;
                    info!(backoff_s = backoff.as_secs_f64(), "Reconnecting to stream");
                    tokio::select! {
                        _ = wait_shutdown(&mut shutdown) => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn session(&mut self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let mut reader = match open_stream(&self.client, &self.config.source).await {
            Ok(reader) => reader,
            Err(e) => {
                warn!(error = %e, "Failed to open stream");
                return SessionEnd::Lost;
            }
        };
        let read_timeout = self.config.source.read_timeout;

        loop {
            if *shutdown.borrow() {
                return SessionEnd::Shutdown;
            }
            let next = tokio::select! {
                _ = wait_shutdown(shutdown) => return SessionEnd::Shutdown,
                next = next_frame_within(&mut reader, read_timeout) => next,
            };
            match next {
                Ok(Some(jpeg)) => self.handle_frame(jpeg).await,
                Ok(None) => {
                    warn!("Stream ended");
                    return SessionEnd::Lost;
                }
                Err(e) => {
                    warn!(error = %e, "Stream lost");
                    return SessionEnd::Lost;
                }
            }
        }
    }

    async fn handle_frame(&mut self, jpeg: Vec<u8>) {
        let arrived = Instant::now();
        let min_interval = Duration::from_secs_f64(1.0 / self.config.source.max_fps);
        if self
            .last_frame_at
            .is_some_and(|at| arrived.duration_since(at) < min_interval)
        {
            metrics::record_frame_dropped("rate");
            return;
        }

        let frame = match Frame::decode(jpeg) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Skipping undecodable frame");
                metrics::record_decode_error();
                return;
            }
        };
        self.last_frame_at = Some(arrived);
        metrics::record_frame();

        if !self.ready {
            self.ready = true;
            let (width, height) = frame.size();
            info!(width, height, "First frame decoded");
            self.emitter.emit(&Record::Ready);
        }

        let now = self.started.elapsed().as_secs_f64();
        let report = self.pipeline.process(&frame, now);
        self.emitter.emit_all(&report.records);

        if let (Some(command), Some(actuator)) = (report.command, self.actuator.as_mut()) {
            if let Err(e) = actuator.apply(command).await {
                warn!(actuator = actuator.name(), error = %e, "Failed to apply steering command");
            }
        }
        if let Some(snapshot) = report.alert {
            self.dispatcher.notify_open(snapshot);
        }
        if let Some(episode) = report.closed {
            self.dispatcher.dispatch(episode);
        }
        self.dispatcher.reap();
    }

    /// Finalize an open episode and hand it off. With `reset`, temporal
    /// pipeline state is cleared as well.
    fn close_episode(&mut self, reset: bool) {
        let now = self.started.elapsed().as_secs_f64();
        let was_active = self.pipeline.events().is_some_and(|e| e.is_active());
        let episode = if reset {
            self.pipeline.reset(now)
        } else {
            self.pipeline.finalize(now)
        };
        if was_active {
            self.emitter.emit(&Record::Quiet);
        }
        if let Some(episode) = episode {
            self.dispatcher.dispatch(episode);
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down");
        self.close_episode(false);
        self.dispatcher.drain(self.config.shutdown_timeout).await;
        if let Some(actuator) = self.actuator.as_mut() {
            if let Err(e) = actuator.shutdown().await {
                warn!(actuator = actuator.name(), error = %e, "Actuator shutdown failed");
            }
        }
        info!("Shutdown complete");
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::Captured;
    use image::{codecs::jpeg::JpegEncoder, ColorType};
    use pancam_models::{OperatingMode, ProtocolFormat};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jpeg() -> Vec<u8> {
        let raw = vec![40u8; 64 * 48];
        let mut out = Vec::new();
        JpegEncoder::new(&mut out)
            .encode(&raw, 64, 48, ColorType::L8)
            .unwrap();
        out
    }

    fn mjpeg_body(frames: usize) -> Vec<u8> {
        let mut body = Vec::new();
        for _ in 0..frames {
            body.extend(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend(jpeg());
            body.extend(b"\r\n");
        }
        body
    }

    fn config(url: String) -> DaemonConfig {
        let mut config = DaemonConfig::defaults_for(OperatingMode::Track);
        config.source.url = url;
        config.source.startup_attempts = 2;
        config.source.startup_backoff = Duration::from_millis(10);
        config.source.reconnect_backoff = Duration::from_millis(50);
        config.shutdown_timeout = Some(Duration::from_secs(1));
        config.notify.announce = false;
        config
    }

    #[tokio::test]
    async fn test_ready_is_sent_once_across_reconnects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(mjpeg_body(3)))
            .mount(&server)
            .await;

        let captured = Captured::default();
        let runner = Runner::new(
            config(format!("{}/camera/stream", server.uri())),
            captured.emitter(ProtocolFormat::Text),
        )
        .await
        .unwrap();

        let (tx, rx) = watch::channel(false);
        let (result, _) = tokio::join!(runner.run(rx), async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            tx.send(true).unwrap();
        });
        result.unwrap();

        let lines = captured.lines();
        assert_eq!(lines.first().map(String::as_str), Some("READY"));
        assert_eq!(lines.iter().filter(|l| *l == "READY").count(), 1);
        assert!(lines.iter().skip(1).all(|l| l == "LOST"));
    }

    #[tokio::test]
    async fn test_unreachable_stream_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let captured = Captured::default();
        let runner = Runner::new(
            config(format!("{}/camera/stream", server.uri())),
            captured.emitter(ProtocolFormat::Text),
        )
        .await
        .unwrap();
        let (_tx, rx) = watch::channel(false);
        let err = runner.run(rx).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(captured.lines().is_empty());
    }
}
