use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output channel of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stdout,
    Stderr,
}

/// One line of process output, as observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub channel: Channel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogLine {
    pub fn new(channel: Channel, text: impl Into<String>) -> Self {
        Self {
            channel,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Decoded terminal value of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultEnvelope {
    Success(serde_json::Value),
    Error { message: String },
}

impl ResultEnvelope {
    pub fn is_success(&self) -> bool {
        matches!(self, ResultEnvelope::Success(_))
    }

    /// JSON form: the value itself, or `{ "error": true, "message": ... }`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ResultEnvelope::Success(value) => value.clone(),
            ResultEnvelope::Error { message } => {
                serde_json::json!({ "error": true, "message": message })
            }
        }
    }
}

/// Caller-facing streaming event.
///
/// Any number of `log` events is followed by exactly one `result` or
/// `error` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum InvocationEvent {
    Log {
        stream: Channel,
        message: String,
        /// Capture time, Unix milliseconds.
        timestamp: i64,
    },
    Result {
        success: bool,
        result: serde_json::Value,
        /// Milliseconds from launch to process exit.
        duration: u64,
    },
    Error {
        error: String,
    },
}

impl InvocationEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvocationEvent::Log { .. })
    }
}

impl From<LogLine> for InvocationEvent {
    fn from(line: LogLine) -> Self {
        InvocationEvent::Log {
            stream: line.channel,
            message: line.text,
            timestamp: line.timestamp.timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_kind_tag() {
        let log = InvocationEvent::Log {
            stream: Channel::Stderr,
            message: "warn".into(),
            timestamp: 1_700_000_000_000,
        };
        assert_eq!(
            serde_json::to_value(&log).unwrap(),
            serde_json::json!({
                "event": "log",
                "data": { "stream": "stderr", "message": "warn", "timestamp": 1_700_000_000_000i64 }
            })
        );

        let result = InvocationEvent::Result {
            success: true,
            result: serde_json::json!({ "sum": 5 }),
            duration: 12,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({
                "event": "result",
                "data": { "success": true, "result": { "sum": 5 }, "duration": 12 }
            })
        );

        let error = InvocationEvent::Error { error: "boom".into() };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            serde_json::json!({ "event": "error", "data": { "error": "boom" } })
        );
        assert!(error.is_terminal());
        assert!(!log.is_terminal());
    }

    #[test]
    fn error_envelope_json_shape() {
        let envelope = ResultEnvelope::Error {
            message: "boom".into(),
        };
        assert_eq!(
            envelope.to_json(),
            serde_json::json!({ "error": true, "message": "boom" })
        );
        assert!(!envelope.is_success());
    }
}
