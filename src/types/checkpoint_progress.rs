use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The set of checkpoints the server has judged complete for a session.
///
/// Never derived locally: it is replaced wholesale from the server after each
/// assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointProgress {
    completed: BTreeSet<String>,
}

impl CheckpointProgress {
    /// An empty progress set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the checkpoint is complete.
    pub fn is_complete(&self, checkpoint_id: &str) -> bool {
        self.completed.contains(checkpoint_id)
    }

    /// Number of completed checkpoints.
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    /// Returns true if nothing is complete yet.
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Completed checkpoint identifiers in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.completed.iter().map(String::as_str)
    }
}

impl FromIterator<String> for CheckpointProgress {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            completed: iter.into_iter().collect(),
        }
    }
}
