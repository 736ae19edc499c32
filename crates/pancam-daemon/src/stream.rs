//! MJPEG-over-HTTP frame source.
//!
//! A `multipart/x-mixed-replace` body is treated as a plain byte stream and
//! cut into JPEGs on the SOI/EOI markers; part headers and boundaries fall
//! between frames and are skipped.

use std::collections::VecDeque;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::{DaemonError, DaemonResult};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

fn find_marker(buf: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|i| i + from)
}

/// Incremental JPEG splitter with a bounded buffer.
#[derive(Debug)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
    max_frame_bytes: usize,
    /// Where the EOI search resumes. Bytes before it hold no EOI.
    scan_from: usize,
}

impl MjpegSplitter {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(64 * 1024),
            max_frame_bytes,
            scan_from: 0,
        }
    }

    /// Bytes held while waiting for the end of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed a chunk and return the complete frames it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buf, SOI, 0) else {
                // Keep a trailing 0xFF that may begin the next SOI.
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let drop_to = self.buf.len() - keep;
                self.buf.drain(..drop_to);
                self.scan_from = 0;
                break;
            };
            match find_marker(&self.buf, EOI, (start + 2).max(self.scan_from)) {
                Some(end) => {
                    frames.push(self.buf[start..end + 2].to_vec());
                    self.buf.drain(..end + 2);
                    self.scan_from = 0;
                }
                None => {
                    self.buf.drain(..start);
                    // The last byte may be the first half of an EOI.
                    self.scan_from = self.buf.len().saturating_sub(1).max(2);
                    if self.buf.len() > self.max_frame_bytes {
                        warn!(
                            buffered = self.buf.len(),
                            limit = self.max_frame_bytes,
                            "JPEG exceeds frame limit, discarding"
                        );
                        self.buf.clear();
                        self.scan_from = 0;
                    }
                    break;
                }
            }
        }
        frames
    }
}

/// Pull-based frame reader over a chunk stream.
pub struct MjpegReader<S> {
    chunks: S,
    splitter: MjpegSplitter,
    pending: VecDeque<Vec<u8>>,
}

impl<S, B, E> MjpegReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    pub fn new(chunks: S, max_frame_bytes: usize) -> Self {
        Self {
            chunks,
            splitter: MjpegSplitter::new(max_frame_bytes),
            pending: VecDeque::new(),
        }
    }

    /// Next complete JPEG, `None` when the body ends.
    pub async fn next_frame(&mut self) -> Option<Result<Vec<u8>, E>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            match self.chunks.next().await? {
                Ok(chunk) => self.pending.extend(self.splitter.push(chunk.as_ref())),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// HTTP client for the stream, without a total timeout so the body can run
/// indefinitely.
pub fn stream_client(config: &SourceConfig) -> DaemonResult<Client> {
    Client::builder()
        .connect_timeout(config.probe_timeout)
        .user_agent(concat!("pancam-daemon/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(DaemonError::from)
}

/// Probe the stream until it answers, up to `startup_attempts` times.
pub async fn wait_for_stream(client: &Client, config: &SourceConfig) -> DaemonResult<()> {
    for attempt in 1..=config.startup_attempts {
        let probe = client
            .get(&config.url)
            .timeout(config.probe_timeout)
            .send()
            .await;
        match probe {
            Ok(response) if response.status().is_success() => {
                info!(url = %config.url, attempt, "MJPEG stream reachable");
                return Ok(());
            }
            Ok(response) => {
                debug!(attempt, status = %response.status(), "Stream probe rejected")
            }
            Err(e) => debug!(attempt, error = %e, "Stream probe failed"),
        }
        if attempt < config.startup_attempts {
            tokio::time::sleep(config.startup_backoff).await;
        }
    }
    Err(DaemonError::stream_unavailable(format!(
        "could not connect to MJPEG stream at {}",
        config.url
    )))
}

/// Open the stream body.
pub async fn open_stream(
    client: &Client,
    config: &SourceConfig,
) -> DaemonResult<MjpegReader<impl Stream<Item = reqwest::Result<impl AsRef<[u8]>>> + Unpin>> {
    let response = client.get(&config.url).send().await?.error_for_status()?;
    debug!(
        content_type = ?response.headers().get(reqwest::header::CONTENT_TYPE),
        "MJPEG stream opened"
    );
    Ok(MjpegReader::new(
        Box::pin(response.bytes_stream()),
        config.max_frame_bytes,
    ))
}

/// Wait for the next frame, failing when none arrives within `timeout`.
pub async fn next_frame_within<S, B>(
    reader: &mut MjpegReader<S>,
    timeout: Duration,
) -> DaemonResult<Option<Vec<u8>>>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    match tokio::time::timeout(timeout, reader.next_frame()).await {
        Err(_) => Err(DaemonError::stream_lost(format!(
            "no frame for {}s",
            timeout.as_secs_f64()
        ))),
        Ok(None) => Ok(None),
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(Some(Ok(frame))) => Ok(Some(frame)),
    }
}
