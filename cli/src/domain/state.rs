//! Persisted run marker (`deployment.json`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::StateError;

/// Progress of a deployment through its steps, persisted after every
/// successful step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMarker {
    /// Most recently completed step.
    pub last_completed_step: Option<String>,
    /// Whether an `output` step has ever completed for this deployment.
    #[serde(default)]
    pub outputs_captured: bool,
    /// Steps of the last planned run that have not completed yet.
    #[serde(default)]
    pub pending_steps: Vec<String>,
    /// Time of the last update.
    pub updated_at: Option<DateTime<Utc>>,
    /// `user@host` of the last writer.
    #[serde(default)]
    pub author: String,
}

impl RunMarker {
    /// Parse marker bytes read from `location`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::CorruptState` if the bytes are not a valid marker.
    pub fn parse(bytes: &[u8], location: &str) -> Result<Self, StateError> {
        serde_json::from_slice(bytes).map_err(|e| StateError::CorruptState {
            location: location.to_string(),
            reason: e.to_string(),
        })
    }

    /// Serialize as pretty JSON with a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Record `step` as completed with `pending` steps still to run.
    pub fn complete(&mut self, step: &str, pending: &[String], author: &str, now: DateTime<Utc>) {
        self.last_completed_step = Some(step.to_string());
        self.pending_steps = pending.to_vec();
        self.author = author.to_string();
        self.updated_at = Some(now);
    }

    /// Record that `pending` (starting with the step that failed or was not
    /// reached) remains to be run. The last completed step is left as is.
    pub fn halt(&mut self, pending: &[String], author: &str, now: DateTime<Utc>) {
        self.pending_steps = pending.to_vec();
        self.author = author.to_string();
        self.updated_at = Some(now);
    }
}
