use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::CheckpointProgress;
use crate::utils::null_as_default;

/// A server-tracked tutoring conversation tied to one case study and one device.
///
/// Sessions are immutable once created; the client only ever refers to them by
/// `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Server-assigned identifier.
    pub id: i64,

    /// The case study this session works through.
    pub case_study_id: i64,

    /// The device that created the session.
    pub device_id: String,

    /// When the server created the session.
    #[serde(
        default,
        alias = "start_time",
        with = "crate::utils::time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

/// Body of `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreateParams {
    /// The case study to open a session for.
    pub case_study_id: i64,

    /// The caller's device identifier.
    pub device_id: String,
}

impl SessionCreateParams {
    /// Create new session parameters.
    pub fn new(case_study_id: i64, device_id: impl Into<String>) -> Self {
        Self {
            case_study_id,
            device_id: device_id.into(),
        }
    }
}

/// A session together with the server's checkpoint-completion judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// The session itself.
    #[serde(flatten)]
    pub session: Session,

    /// Identifiers of the checkpoints the server considers complete.
    #[serde(default, deserialize_with = "null_as_default")]
    pub completed_checkpoints: Vec<String>,
}

impl SessionState {
    /// The completed checkpoints as a set.
    pub fn progress(&self) -> CheckpointProgress {
        self.completed_checkpoints.iter().cloned().collect()
    }
}
