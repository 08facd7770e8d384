//! Message Types
//!
//! Defines the wire-level data model shared by the ingestion and
//! broadcast sides: telemetry records as workers send them, the stamped
//! form relayed to dashboards, and orchestrator-originated status
//! notices.
//!
//! Telemetry frames keep the exact shape the worker sent plus a
//! server-side `timestamp`; status frames carry a `type` discriminator
//! so dashboards can tell the two apart without probing keys.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One telemetry line as a worker sends it, before stamping.
///
/// Workers report `{"lang": ..., "algo": ..., "duration": ...}` with
/// `duration` in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryRecord {
    pub lang: String,
    pub algo: String,
    pub duration: f64,
}

impl TelemetryRecord {
    /// Parse one ingestion line.
    ///
    /// Malformed input is an ordinary error value; the caller logs and
    /// discards the line without closing the connection.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Attach the server-side receipt time (unix epoch seconds).
    ///
    /// This is the only place a timestamp is ever added; the resulting
    /// message is immutable.
    pub fn stamp(self, timestamp: f64) -> TelemetryMessage {
        TelemetryMessage {
            lang: self.lang,
            algo: self.algo,
            duration: self.duration,
            timestamp,
        }
    }
}

/// A telemetry record after the server stamped it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub lang: String,
    pub algo: String,
    pub duration: f64,
    /// Receipt time at the ingestion server, unix epoch seconds.
    pub timestamp: f64,
}

/// Severity of an orchestrator status notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Error,
}

fn status_tag() -> String {
    "status".to_string()
}

/// Operational notice originating inside the orchestrator itself, e.g.
/// a worker launch failure. Never produced by workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(rename = "type", default = "status_tag")]
    tag: String,
    pub level: StatusLevel,
    pub message: String,
}

impl StatusMessage {
    pub fn new(level: StatusLevel, message: impl Into<String>) -> Self {
        Self {
            tag: status_tag(),
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Error, message)
    }
}

/// Everything the hub can fan out to subscribers.
///
/// Serialization is untagged: a telemetry frame is the stamped record
/// itself, a status frame brings its own `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BroadcastMessage {
    Telemetry(TelemetryMessage),
    Status(StatusMessage),
}

impl From<TelemetryMessage> for BroadcastMessage {
    fn from(message: TelemetryMessage) -> Self {
        BroadcastMessage::Telemetry(message)
    }
}

impl From<StatusMessage> for BroadcastMessage {
    fn from(message: StatusMessage) -> Self {
        BroadcastMessage::Status(message)
    }
}

/// Current wall clock as unix epoch seconds.
pub fn unix_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
