//! Line protocol written to stdout, one record per line.
//!
//! Two encodings share the same records:
//!
//! ```text
//! READY | MOVE <int> | LOST | MOTION | QUIET | ERROR <msg>
//! {"ready":true} | {"move":-4} | {"active":true,"cx":..} | {"found":true,..} | {"error":..}
//! ```
//!
//! Not every record exists in both encodings. Per-frame observations only
//! appear in JSON, while `LOST` only appears in text.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{ModelError, ModelResult};
use crate::{round_to, Detection};

/// Wire encoding of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for ProtocolFormat {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        match s.to_lowercase().as_str() {
            "text" | "line" => Ok(ProtocolFormat::Text),
            "json" | "jsonl" => Ok(ProtocolFormat::Json),
            _ => Err(ModelError::UnknownProtocol(s.to_string())),
        }
    }
}

/// A single protocol record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Sent once, after the first frame decodes.
    Ready,
    /// Relative steering command in degrees.
    Move(i32),
    /// No target on this tick.
    Lost,
    /// Motion controller went quiet → active.
    Motion,
    /// Motion controller went active → quiet.
    Quiet,
    /// Per-frame motion observation.
    MotionObservation(Option<Detection>),
    /// Per-frame face/cat observation with the full frame size.
    TargetObservation {
        target: Option<Detection>,
        width: u32,
        height: u32,
    },
    Error(String),
}

#[derive(Serialize)]
struct ReadyRecord {
    ready: bool,
}

#[derive(Serialize)]
struct MoveRecord {
    #[serde(rename = "move")]
    delta: i32,
}

#[derive(Serialize)]
struct EventRecord {
    event: &'static str,
}

#[derive(Serialize)]
struct ErrorRecord<'a> {
    error: &'a str,
}

#[derive(Serialize)]
struct MotionRecord {
    active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cx: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    area: Option<u64>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum TargetRecord {
    Found {
        found: bool,
        cx: f64,
        cy: f64,
        bx: f64,
        by: f64,
        bw: f64,
        bh: f64,
        label: &'static str,
        score: f64,
        w: u32,
        h: u32,
    },
    Missing {
        found: bool,
        label: &'static str,
    },
}

impl TargetRecord {
    fn from_detection(target: Option<&Detection>, w: u32, h: u32) -> Self {
        match target {
            Some(det) => TargetRecord::Found {
                found: true,
                cx: round_to(det.center.0, 4),
                cy: round_to(det.center.1, 4),
                bx: round_to(det.bbox.x, 4),
                by: round_to(det.bbox.y, 4),
                bw: round_to(det.bbox.width, 4),
                bh: round_to(det.bbox.height, 4),
                label: det.label.as_str(),
                score: round_to(det.score, 3),
                w,
                h,
            },
            None => TargetRecord::Missing {
                found: false,
                label: "none",
            },
        }
    }
}

impl Record {
    /// Encode the record, or `None` when it has no form in `format`.
    pub fn render(&self, format: ProtocolFormat) -> Option<String> {
        match format {
            ProtocolFormat::Text => self.render_text(),
            ProtocolFormat::Json => self.render_json(),
        }
    }

    fn render_text(&self) -> Option<String> {
        match self {
            Record::Ready => Some("READY".to_string()),
            Record::Move(delta) => Some(format!("MOVE {delta}")),
            Record::Lost => Some("LOST".to_string()),
            Record::Motion => Some("MOTION".to_string()),
            Record::Quiet => Some("QUIET".to_string()),
            Record::Error(msg) => Some(format!("ERROR {}", single_line(msg))),
            Record::MotionObservation(_) | Record::TargetObservation { .. } => None,
        }
    }

    fn render_json(&self) -> Option<String> {
        let encoded = match self {
            Record::Ready => serde_json::to_string(&ReadyRecord { ready: true }),
            Record::Move(delta) => serde_json::to_string(&MoveRecord { delta: *delta }),
            Record::Lost => return None,
            Record::Motion => serde_json::to_string(&EventRecord { event: "motion" }),
            Record::Quiet => serde_json::to_string(&EventRecord { event: "quiet" }),
            Record::Error(msg) => serde_json::to_string(&ErrorRecord { error: msg }),
            Record::MotionObservation(det) => serde_json::to_string(&MotionRecord {
                active: det.is_some(),
                cx: det.as_ref().map(|d| round_to(d.center.0, 4)),
                cy: det.as_ref().map(|d| round_to(d.center.1, 4)),
                area: det
                    .as_ref()
                    .map(|d| d.area.unwrap_or_default().max(0.0) as u64),
            }),
            Record::TargetObservation {
                target,
                width,
                height,
            } => serde_json::to_string(&TargetRecord::from_detection(
                target.as_ref(),
                *width,
                *height,
            )),
        };
        encoded.ok()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render_text() {
            Some(line) => f.write_str(&line),
            None => write!(f, "{self:?}"),
        }
    }
}

fn single_line(msg: &str) -> String {
    msg.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Label, NormalizedRect};

    fn face() -> Detection {
        Detection::new(
            (0.512_345, 0.4),
            NormalizedRect::new(0.4, 0.3, 0.2, 0.2),
            0.912_34,
            Label::Face,
        )
    }

    #[test]
    fn test_text_tokens() {
        assert_eq!(Record::Ready.render(ProtocolFormat::Text).unwrap(), "READY");
        assert_eq!(Record::Move(-4).render(ProtocolFormat::Text).unwrap(), "MOVE -4");
        assert_eq!(Record::Lost.render(ProtocolFormat::Text).unwrap(), "LOST");
        assert_eq!(
            Record::Error("bad\nthing".into()).render(ProtocolFormat::Text).unwrap(),
            "ERROR bad thing"
        );
        assert!(Record::MotionObservation(None).render(ProtocolFormat::Text).is_none());
    }

    #[test]
    fn test_json_motion_records() {
        let det = Detection::new(
            (0.25, 0.75),
            NormalizedRect::new(0.2, 0.7, 0.1, 0.1),
            1.0,
            Label::Motion,
        )
        .with_area(3120.5);
        let active = Record::MotionObservation(Some(det)).render(ProtocolFormat::Json).unwrap();
        assert_eq!(active, r#"{"active":true,"cx":0.25,"cy":0.75,"area":3120}"#);

        let quiet = Record::MotionObservation(None).render(ProtocolFormat::Json).unwrap();
        assert_eq!(quiet, r#"{"active":false}"#);
        assert!(Record::Lost.render(ProtocolFormat::Json).is_none());
    }

    #[test]
    fn test_json_target_records() {
        let found = Record::TargetObservation {
            target: Some(face()),
            width: 640,
            height: 480,
        }
        .render(ProtocolFormat::Json)
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&found).unwrap();
        assert_eq!(value["found"], true);
        assert_eq!(value["cx"], 0.5123);
        assert_eq!(value["score"], 0.912);
        assert_eq!(value["label"], "face");
        assert_eq!(value["w"], 640);

        let missing = Record::TargetObservation {
            target: None,
            width: 640,
            height: 480,
        }
        .render(ProtocolFormat::Json)
        .unwrap();
        assert_eq!(missing, r#"{"found":false,"label":"none"}"#);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("json".parse::<ProtocolFormat>().unwrap(), ProtocolFormat::Json);
        assert_eq!("TEXT".parse::<ProtocolFormat>().unwrap(), ProtocolFormat::Text);
        assert!("xml".parse::<ProtocolFormat>().is_err());
    }
}
