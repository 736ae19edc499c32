//! Actuator adapters for steering commands.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use pancam_models::{Record, SteerCommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::emitter::Emitter;
use crate::error::{DaemonError, DaemonResult};

/// Servo travel accepted by the PCA9685 daemon.
pub const ANGLE_MIN: f64 = 0.0;
pub const ANGLE_MAX: f64 = 270.0;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives relative steering commands.
#[async_trait]
pub trait Actuator: Send {
    fn name(&self) -> &'static str;

    async fn apply(&mut self, command: SteerCommand) -> DaemonResult<()>;

    /// Release the hardware. Called once at shutdown.
    async fn shutdown(&mut self) -> DaemonResult<()> {
        Ok(())
    }
}

/// Reports commands as `MOVE <d>` protocol records; a host process owns
/// the servo.
pub struct LineActuator {
    emitter: Emitter,
}

impl LineActuator {
    pub fn new(emitter: Emitter) -> Self {
        Self { emitter }
    }
}

#[async_trait]
impl Actuator for LineActuator {
    fn name(&self) -> &'static str {
        "line"
    }

    async fn apply(&mut self, command: SteerCommand) -> DaemonResult<()> {
        self.emitter.emit(&Record::Move(command.delta_degrees));
        Ok(())
    }
}

/// Parsed `OK channel=.. angle=.. pulse=..` reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoReadback {
    pub channel: u8,
    pub angle: f64,
    pub pulse: u32,
}

impl ServoReadback {
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix("OK ")?;
        let mut channel = None;
        let mut angle = None;
        let mut pulse = None;
        for field in rest.split_whitespace() {
            match field.split_once('=') {
                Some(("channel", v)) => channel = v.parse().ok(),
                Some(("angle", v)) => angle = v.parse().ok(),
                Some(("pulse", v)) => pulse = v.parse().ok(),
                _ => {}
            }
        }
        Some(Self {
            channel: channel?,
            angle: angle?,
            pulse: pulse?,
        })
    }
}

/// Drives the PCA9685 servo daemon over its line protocol.
///
/// The daemon speaks absolute angles, so relative commands are accumulated
/// here. Positive deltas increase the angle.
pub struct ServoDaemonActuator<W, R> {
    writer: W,
    reader: R,
    channel: u8,
    angle: f64,
    last_readback: Option<ServoReadback>,
    child: Option<Child>,
}

impl ServoDaemonActuator<ChildStdin, BufReader<ChildStdout>> {
    /// Start the servo daemon and wait for its `READY` line.
    pub async fn spawn(
        program: &str,
        args: &[String],
        channel: u8,
        initial_angle: f64,
    ) -> DaemonResult<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DaemonError::actuator(format!("failed to start {program}: {e}")))?;

        let writer = child
            .stdin
            .take()
            .ok_or_else(|| DaemonError::actuator("servo daemon stdin unavailable"))?;
        let reader = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| DaemonError::actuator("servo daemon stdout unavailable"))?;

        let mut actuator = Self::from_io(writer, reader, channel, initial_angle);
        actuator.child = Some(child);
        actuator.wait_ready().await?;
        actuator.center().await?;
        info!(program, channel, angle = actuator.angle, "Servo daemon ready");
        Ok(actuator)
    }
}

impl<W, R> ServoDaemonActuator<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncBufRead + Unpin + Send,
{
    pub fn from_io(writer: W, reader: R, channel: u8, initial_angle: f64) -> Self {
        Self {
            writer,
            reader,
            channel,
            angle: initial_angle.clamp(ANGLE_MIN, ANGLE_MAX),
            last_readback: None,
            child: None,
        }
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Pulse width reported by the last successful move.
    pub fn last_pulse(&self) -> Option<u32> {
        self.last_readback.map(|r| r.pulse)
    }

    async fn read_reply(&mut self) -> DaemonResult<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(REPLY_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .map_err(|_| DaemonError::actuator("servo daemon did not reply"))??;
        if read == 0 {
            return Err(DaemonError::actuator("servo daemon closed its output"));
        }
        Ok(line.trim().to_string())
    }

    async fn send(&mut self, line: &str) -> DaemonResult<String> {
        self.writer.write_all(format!("{line}\n").as_bytes()).await?;
        self.writer.flush().await?;
        self.read_reply().await
    }

    pub async fn wait_ready(&mut self) -> DaemonResult<()> {
        let reply = self.read_reply().await?;
        if reply == "READY" {
            Ok(())
        } else {
            Err(DaemonError::actuator(format!("servo daemon failed to start: {reply}")))
        }
    }

    /// Move to an absolute angle, clamped to the servo's travel.
    pub async fn set_angle(&mut self, angle: f64) -> DaemonResult<ServoReadback> {
        let target = angle.clamp(ANGLE_MIN, ANGLE_MAX);
        let reply = self.send(&format!("SET {} {:.1}", self.channel, target)).await?;
        let readback = ServoReadback::parse(&reply)
            .ok_or_else(|| DaemonError::actuator(format!("servo daemon: {reply}")))?;
        self.angle = target;
        self.last_readback = Some(readback);
        debug!(angle = target, pulse = readback.pulse, "Servo moved");
        Ok(readback)
    }

    async fn center(&mut self) -> DaemonResult<()> {
        self.set_angle(self.angle).await.map(|_| ())
    }
}

#[async_trait]
impl<W, R> Actuator for ServoDaemonActuator<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncBufRead + Unpin + Send,
{
    fn name(&self) -> &'static str {
        "servo"
    }

    async fn apply(&mut self, command: SteerCommand) -> DaemonResult<()> {
        let target = self.angle + command.delta_degrees as f64;
        self.set_angle(target).await.map(|_| ())
    }

    async fn shutdown(&mut self) -> DaemonResult<()> {
        let off = self.send(&format!("OFF {}", self.channel)).await;
        if let Err(e) = &off {
            warn!(error = %e, "Failed to relax servo");
        }
        match self.send("QUIT").await {
            Ok(reply) if reply == "BYE" => {}
            Ok(reply) => warn!(reply = %reply, "Unexpected servo daemon reply to QUIT"),
            Err(e) => warn!(error = %e, "Servo daemon did not acknowledge QUIT"),
        }
        if let Some(mut child) = self.child.take() {
            if tokio::time::timeout(REPLY_TIMEOUT, child.wait()).await.is_err() {
                child.kill().await?;
            }
        }
        off.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::Captured;
    use pancam_models::ProtocolFormat;
    use tokio_test::io::Builder;

    #[test]
    fn test_parse_readback() {
        let r = ServoReadback::parse("OK channel=0 angle=130.0 pulse=276").unwrap();
        assert_eq!(r.channel, 0);
        assert_eq!(r.angle, 130.0);
        assert_eq!(r.pulse, 276);
        assert!(ServoReadback::parse("ERR unknown command: FOO").is_none());
        assert!(ServoReadback::parse("OK channel=0 off").is_none());
    }

    #[tokio::test]
    async fn test_line_actuator_reports_move() {
        let captured = Captured::default();
        let mut actuator = LineActuator::new(captured.emitter(ProtocolFormat::Json));
        actuator.apply(SteerCommand::new(-4)).await.unwrap();
        assert_eq!(captured.lines(), vec![r#"{"move":-4}"#]);
    }

    #[tokio::test]
    async fn test_servo_accumulates_relative_moves() {
        let writer = Builder::new()
            .write(b"SET 0 130.0\n")
            .write(b"SET 0 140.0\n")
            .build();
        let reader = Builder::new()
            .read(b"OK channel=0 angle=130.0 pulse=270\n")
            .read(b"OK channel=0 angle=140.0 pulse=280\n")
            .build();
        let mut servo = ServoDaemonActuator::from_io(writer, BufReader::new(reader), 0, 135.0);

        servo.apply(SteerCommand::new(-5)).await.unwrap();
        servo.apply(SteerCommand::new(10)).await.unwrap();
        assert_eq!(servo.angle(), 140.0);
        assert_eq!(servo.last_pulse(), Some(280));
    }

    #[tokio::test]
    async fn test_servo_clamps_to_travel() {
        let writer = Builder::new().write(b"SET 1 270.0\n").build();
        let reader = Builder::new()
            .read(b"OK channel=1 angle=270.0 pulse=460\n")
            .build();
        let mut servo = ServoDaemonActuator::from_io(writer, BufReader::new(reader), 1, 265.0);
        servo.apply(SteerCommand::new(20)).await.unwrap();
        assert_eq!(servo.angle(), 270.0);
    }

    #[tokio::test]
    async fn test_servo_error_keeps_angle() {
        let writer = Builder::new().write(b"SET 0 120.0\n").build();
        let reader = Builder::new().read(b"ERR i2c write failed\n").build();
        let mut servo = ServoDaemonActuator::from_io(writer, BufReader::new(reader), 0, 135.0);

        let err = servo.apply(SteerCommand::new(-15)).await.unwrap_err();
        assert!(err.to_string().contains("i2c write failed"));
        assert_eq!(servo.angle(), 135.0);
    }

    #[tokio::test]
    async fn test_wait_ready_rejects_init_error() {
        let reader = Builder::new().read(b"ERROR init: no I2C bus\n").build();
        let writer = Builder::new().build();
        let mut servo = ServoDaemonActuator::from_io(writer, BufReader::new(reader), 0, 135.0);
        assert!(servo.wait_ready().await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_relaxes_and_quits() {
        let writer = Builder::new().write(b"OFF 0\n").write(b"QUIT\n").build();
        let reader = Builder::new()
            .read(b"OK channel=0 off\n")
            .read(b"BYE\n")
            .build();
        let mut servo = ServoDaemonActuator::from_io(writer, BufReader::new(reader), 0, 135.0);
        servo.shutdown().await.unwrap();
    }
}
