//! One-shot face finder: grab a frame, print one JSON target record.

use std::time::Duration;

use anyhow::Context;
use pancam_daemon::pipeline::{build_face_strategies, find_target};
use pancam_daemon::stream::{next_frame_within, open_stream, stream_client};
use pancam_daemon::{logging, DaemonConfig};
use pancam_models::{ProtocolFormat, Record};
use pancam_vision::Frame;

const GRAB_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();
    logging::init();

    match snapshot().await {
        Ok(record) => println!("{record}"),
        Err(e) => {
            let error = Record::Error(format!("{e:#}"));
            if let Some(line) = error.render(ProtocolFormat::Json) {
                println!("{line}");
            }
            std::process::exit(1);
        }
    }
}

async fn snapshot() -> anyhow::Result<String> {
    let config = DaemonConfig::from_env()?;
    let mut strategies = build_face_strategies(&config.face)?;

    let client = stream_client(&config.source)?;
    let mut reader = open_stream(&client, &config.source)
        .await
        .with_context(|| format!("could not open {}", config.source.url))?;
    let jpeg = next_frame_within(&mut reader, GRAB_TIMEOUT)
        .await?
        .context("stream ended before a frame arrived")?;
    let frame = Frame::decode(jpeg).context("could not decode frame")?;

    let (width, height) = frame.size();
    let target = find_target(&mut strategies, &frame, None, config.face.min_score);
    Record::TargetObservation {
        target,
        width,
        height,
    }
    .render(ProtocolFormat::Json)
    .context("target record has no JSON form")
}
