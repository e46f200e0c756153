//! Inbound frame classification.
//!
//! Frames are JSON objects tagged by a `type` field. [`Frame::parse`] keeps
//! the full payload (subscribers of the `Message` category see everything)
//! and classifies it into a [`FrameBody`] so dispatch can `match` instead of
//! probing fields.
//!
//! Valid JSON that carries no `type`, or an unrecognized one, becomes
//! [`FrameBody::Other`]. A recognized `type` whose fields have the wrong
//! shape is logged and also falls back to `Other`, except `job_complete`:
//! its fields are read leniently and a wrongly typed one counts as absent.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Liveness probe type tag.
pub const PING: &str = "ping";
/// Liveness acknowledgement type tag.
pub const PONG: &str = "pong";
/// A script finished generating for a collection.
pub const SCRIPT_GENERATED: &str = "script_generated";
/// Progress update for a job.
pub const JOB_STATUS: &str = "job_status";
/// A job finished and its artifacts are ready.
pub const JOB_COMPLETE: &str = "job_complete";
/// Progress update for a collection.
pub const COLLECTION_STATUS: &str = "collection_status";

const KNOWN_TYPES: &[&str] = &[
    PING,
    PONG,
    SCRIPT_GENERATED,
    JOB_STATUS,
    JOB_COMPLETE,
    COLLECTION_STATUS,
];

/// Classified frame content, keyed by the `type` tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameBody {
    /// Liveness probe from the remote side; answered with `pong`.
    Ping,
    /// Answer to one of our probes.
    Pong,
    /// Script generation finished for a collection.
    ScriptGenerated {
        /// Identifier of the generated script.
        script_id: Option<String>,
    },
    /// Job progress update.
    JobStatus {
        /// Backend status label (e.g. `PROCESSING`, `READY`).
        status: Option<String>,
    },
    /// Job finished.
    JobComplete(JobComplete),
    /// Collection progress update.
    CollectionStatus {
        /// Backend status label.
        status: Option<String>,
        /// Percent complete, when reported.
        progress: Option<f64>,
    },
    /// Anything else. The raw payload is still on the [`Frame`].
    #[serde(skip)]
    Other,
}

/// Fields carried by a `job_complete` frame.
///
/// Every field is optional and a value of the wrong JSON type reads as
/// `None`, so one bad artifact field never hides the completion itself.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobComplete {
    /// Job the frame refers to. Required for the `JobComplete` category.
    #[serde(default, deserialize_with = "lenient_string")]
    pub job_id: Option<String>,
    /// Final script text.
    #[serde(default, deserialize_with = "lenient_string")]
    pub script_text: Option<String>,
    /// Narration audio location.
    #[serde(default, deserialize_with = "lenient_string")]
    pub audio_url: Option<String>,
    /// Generated image locations; `null` and absent both mean none.
    /// Non-string entries are dropped.
    #[serde(default, deserialize_with = "lenient_strings")]
    pub image_urls: Option<Vec<String>>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    })
}

impl JobComplete {
    /// Image urls, treating a missing list as empty.
    #[must_use]
    pub fn image_urls(&self) -> &[String] {
        self.image_urls.as_deref().unwrap_or_default()
    }
}

/// One parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    body: FrameBody,
    raw: Value,
}

impl Frame {
    /// Parse a text payload.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if `text` is not valid JSON. Unknown or
    /// malformed-but-valid frames are not errors.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(raw))
    }

    /// Classify an already-decoded JSON value.
    #[must_use]
    pub fn from_value(raw: Value) -> Self {
        let body = match raw.get("type").and_then(Value::as_str) {
            Some(kind) if KNOWN_TYPES.contains(&kind) => {
                FrameBody::deserialize(&raw).unwrap_or_else(|e| {
                    log::warn!("[Frame] Malformed '{}' frame: {}", kind, e);
                    FrameBody::Other
                })
            }
            _ => FrameBody::Other,
        };
        Self { body, raw }
    }

    /// The classified content.
    #[must_use]
    pub fn body(&self) -> &FrameBody {
        &self.body
    }

    /// The full JSON payload as received.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.raw
    }

    /// The raw `type` tag, if the payload has a string one.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.raw.get("type").and_then(Value::as_str)
    }

    /// Whether this frame is a liveness probe from the remote side.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        matches!(self.body, FrameBody::Ping)
    }
}

/// Outbound keepalive probe.
#[must_use]
pub fn probe() -> String {
    serde_json::json!({ "type": PING }).to_string()
}

/// Outbound acknowledgement of a remote probe.
#[must_use]
pub fn acknowledgement() -> String {
    serde_json::json!({ "type": PONG }).to_string()
}
