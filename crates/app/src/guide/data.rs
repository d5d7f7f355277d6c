//! Shared structs passed between the capture loop, sessions, and the wire.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use video_ingest::Frame;

use crate::guide::state::Mode;

/// One object found in a frame, after confidence filtering and labelling.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
    /// `[x_min, y_min, x_max, y_max]` in frame pixels.
    pub bbox: [i32; 4],
    pub class_id: i64,
}

impl Detection {
    pub fn area(&self) -> i64 {
        bbox_area(&self.bbox)
    }

    pub fn center_x(&self) -> f64 {
        (f64::from(self.bbox[0]) + f64::from(self.bbox[2])) / 2.0
    }
}

pub fn bbox_area(bbox: &[i32; 4]) -> i64 {
    let width = i64::from(bbox[2]) - i64::from(bbox[0]);
    let height = i64::from(bbox[3]) - i64::from(bbox[1]);
    width.max(0) * height.max(0)
}

/// A fully processed capture cycle ready for broadcast.
#[derive(Debug)]
pub struct FrameSlot {
    /// Monotonic sequence number assigned by the frame queue.
    pub seq: u64,
    /// Base64 of the encoded JPEG.
    pub image: Arc<str>,
    pub detections: Arc<[Detection]>,
    /// Unannotated frame kept for text extraction.
    pub raw: Arc<Frame>,
}

/// Client → server message.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Command { command: Command },
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed inbound message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    Scan,
    Guide,
    Select,
    Read,
}

/// Server → client message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Tts { text: String },
    Frame(FrameMessage),
    OcrResult { text: String },
}

impl Outbound {
    pub fn tts(text: impl Into<String>) -> Self {
        Outbound::Tts { text: text.into() }
    }

    /// Wire tag, handy for logs and assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Tts { .. } => "tts",
            Outbound::Frame(_) => "frame",
            Outbound::OcrResult { .. } => "ocr_result",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameMessage {
    pub image: Arc<str>,
    pub detections: Arc<[Detection]>,
    pub mode: Mode,
    pub active_object: Option<String>,
    pub active_bbox: Option<[i32; 4]>,
    pub fps: f64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn inbound_commands_parse_from_tagged_json() {
        let parsed = Inbound::parse(r#"{"type":"command","command":"SELECT"}"#).expect("parse");
        assert_eq!(
            parsed,
            Inbound::Command {
                command: Command::Select
            }
        );
        assert!(Inbound::parse(r#"{"type":"command","command":"JUMP"}"#).is_err());
        assert!(Inbound::parse("not json").is_err());
    }

    #[test]
    fn frame_message_serializes_with_type_tag() {
        let detections: Arc<[Detection]> = vec![Detection {
            label: "bottle".into(),
            confidence: 0.5,
            bbox: [1, 2, 3, 4],
            class_id: 3,
        }]
        .into();
        let message = Outbound::Frame(FrameMessage {
            image: Arc::from("abc"),
            detections,
            mode: Mode::Guide,
            active_object: Some("bottle".into()),
            active_bbox: Some([1, 2, 3, 4]),
            fps: 12.5,
        });
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(
            value,
            json!({
                "type": "frame",
                "image": "abc",
                "detections": [{"class": "bottle", "confidence": 0.5, "bbox": [1, 2, 3, 4], "class_id": 3}],
                "mode": "GUIDE",
                "active_object": "bottle",
                "active_bbox": [1, 2, 3, 4],
                "fps": 12.5
            })
        );
    }

    #[test]
    fn tts_and_ocr_results_serialize_flat() {
        let tts = serde_json::to_value(Outbound::tts("Scan mode")).expect("serialize");
        assert_eq!(tts, json!({"type": "tts", "text": "Scan mode"}));
        let ocr = serde_json::to_value(Outbound::OcrResult {
            text: "Aspirin".into(),
        })
        .expect("serialize");
        assert_eq!(ocr, json!({"type": "ocr_result", "text": "Aspirin"}));
    }

    #[test]
    fn inverted_boxes_have_zero_area() {
        assert_eq!(bbox_area(&[10, 10, 30, 20]), 200);
        assert_eq!(bbox_area(&[30, 10, 10, 20]), 0);
    }
}
