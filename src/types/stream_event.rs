use serde::Deserialize;
use serde_json::Value;

/// Coarse state of the assistant while a turn streams.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnStatus {
    /// The assistant is composing a reply.
    #[default]
    Thinking,
    /// The assistant finished its reply.
    Complete,
    /// The caller cancelled the turn.
    Interrupted,
    /// Any other state the server reports.
    Other(String),
}

impl TurnStatus {
    /// Parse the server's state string.
    pub fn from_state(state: &str) -> Self {
        match state {
            "thinking" => TurnStatus::Thinking,
            "complete" => TurnStatus::Complete,
            other => TurnStatus::Other(other.to_string()),
        }
    }

    /// Returns true once the reply is finished.
    pub fn is_complete(&self) -> bool {
        matches!(self, TurnStatus::Complete)
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnStatus::Thinking => f.write_str("thinking"),
            TurnStatus::Complete => f.write_str("complete"),
            TurnStatus::Interrupted => f.write_str("interrupted"),
            TurnStatus::Other(state) => f.write_str(state),
        }
    }
}

/// One decoded event of an assistant reply stream.
///
/// Each `data:` line of the stream decodes to exactly one event.  Lines that
/// cannot be understood decode to [`StreamEvent::Malformed`] so that callers
/// can observe them; they never end the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The assistant's coarse state changed.
    Status {
        /// The new state.
        state: TurnStatus,
        /// Optional human-readable description.
        message: Option<String>,
    },

    /// An incremental fragment of reply text.
    Chunk(String),

    /// The server reported a failure for this turn.
    Error(String),

    /// The reply is about to begin.
    Start,

    /// The reply has ended.
    End,

    /// A `data:` line that could not be decoded.
    Malformed {
        /// The offending payload.
        line: String,
        /// Why it was rejected.
        reason: String,
    },
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl StreamEvent {
    /// Decode the JSON payload that follows `data: `.
    pub fn from_data(payload: &str) -> Self {
        let wire = match serde_json::from_str::<WireEvent>(payload) {
            Ok(wire) => wire,
            Err(err) => return Self::malformed(payload, err.to_string()),
        };
        match wire.kind.as_str() {
            "status" => match wire.data {
                Value::String(state) => StreamEvent::Status {
                    state: TurnStatus::from_state(&state),
                    message: None,
                },
                Value::Object(ref fields) => match fields.get("state").and_then(Value::as_str) {
                    Some(state) => StreamEvent::Status {
                        state: TurnStatus::from_state(state),
                        message: fields
                            .get("message")
                            .and_then(Value::as_str)
                            .map(String::from),
                    },
                    None => Self::malformed(payload, "status event without a state"),
                },
                _ => Self::malformed(payload, "status event without a state"),
            },
            "chunk" => match wire.data {
                Value::String(text) => StreamEvent::Chunk(text),
                _ => Self::malformed(payload, "chunk event without text"),
            },
            "error" => match wire.data {
                Value::String(message) => StreamEvent::Error(message),
                Value::Null => StreamEvent::Error("unknown error".to_string()),
                other => StreamEvent::Error(other.to_string()),
            },
            "start" => StreamEvent::Start,
            "end" => StreamEvent::End,
            other => Self::malformed(payload, format!("unknown event type: {other}")),
        }
    }

    fn malformed(line: &str, reason: impl Into<String>) -> Self {
        StreamEvent::Malformed {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true for [`StreamEvent::Malformed`].
    pub fn is_malformed(&self) -> bool {
        matches!(self, StreamEvent::Malformed { .. })
    }
}
