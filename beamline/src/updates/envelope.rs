//! The self-authenticating update envelope.

use crate::state::{JobId, TaskUpdate};
use serde::{Deserialize, Serialize};

/// One task update in transit from a producer to the consumer.
///
/// The envelope carries everything the drain side needs to validate it:
/// the job it claims to belong to, the task ordinal, and the job's update
/// key in clear (checked against the stored digest). All fields are
/// required; payloads missing any of them fail deserialization and are
/// dropped at the drain boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateEnvelope {
    pub job_id: JobId,

    pub task_id: u32,

    pub update_key: String,

    /// The partial task update to apply.
    pub update: TaskUpdate,
}

impl UpdateEnvelope {
    pub fn new(job_id: JobId, task_id: u32, update_key: impl Into<String>, update: TaskUpdate) -> Self {
        Self {
            job_id,
            task_id,
            update_key: update_key.into(),
            update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskState;
    use chrono::Utc;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = UpdateEnvelope::new(
            JobId::new("job-9"),
            4,
            "key",
            TaskUpdate::started(100, Utc::now()),
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let back: UpdateEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);
    }

    #[test]
    fn test_missing_fields_fail_to_parse() {
        let incomplete = r#"{"job_id":"job-9","task_id":4}"#;
        assert!(serde_json::from_str::<UpdateEnvelope>(incomplete).is_err());
    }

    #[test]
    fn test_wire_format_field_names() {
        let envelope = UpdateEnvelope::new(
            JobId::new("j"),
            1,
            "k",
            TaskUpdate {
                state: Some(TaskState::Running),
                ..TaskUpdate::default()
            },
        );
        let json = serde_json::to_string(&envelope).unwrap();
        for field in ["job_id", "task_id", "update_key", "update"] {
            assert!(json.contains(field), "missing field {field} in {json}");
        }
    }
}
