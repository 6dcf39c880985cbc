//! Well-known stage names, payload markers and shared enums.
//!
//! Stage names are plain strings chosen by task authors; only the three
//! names defined here carry engine semantics: every task starts at
//! [`STAGE_INIT`], and [`STAGE_COMPLETE`] / [`STAGE_FAILED`] are terminal.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Initial stage of every task. The handler registered under this name is
/// the task's entry point.
pub const STAGE_INIT: &str = "on_init";

/// Terminal stage for successful tasks.
pub const STAGE_COMPLETE: &str = "complete";

/// Terminal stage for failed tasks.
pub const STAGE_FAILED: &str = "failed";

/// Suffix appended to a stage name to select its failure branch.
pub const FAILED_STAGE_SUFFIX: &str = "_failed";

/// Payload key carrying the success/failure marker of an inbound result.
pub const STATUS_KEY: &str = "__status__";

/// Payload key carrying a failure reason.
pub const REASON_KEY: &str = "__reason__";

/// The one [`STATUS_KEY`] value treated as a failure marker. Absence of
/// the key, or any other value, means success.
pub const STATUS_ERROR: &str = "error";

/// Sentinel stored in a task's `obj_id` column when the task operates on
/// multiple objects; the member set lives in TaskObject rows.
pub const MULTI_OBJECT_ID: &str = "__multi__";

/// Returns true when `stage` is one of the two terminal stages.
pub fn is_terminal_stage(stage: &str) -> bool {
    stage == STAGE_COMPLETE || stage == STAGE_FAILED
}

/// Returns true when `payload` carries the failure marker.
pub fn is_failure_payload(payload: &Value) -> bool {
    payload
        .get(STATUS_KEY)
        .and_then(Value::as_str)
        .map(|s| s == STATUS_ERROR)
        .unwrap_or(false)
}

/// Build the canonical failure payload for `reason`.
pub fn failure_payload(reason: &str) -> Value {
    let mut payload = Map::new();
    payload.insert(
        STATUS_KEY.to_string(),
        Value::String(STATUS_ERROR.to_string()),
    );
    payload.insert(REASON_KEY.to_string(), Value::String(reason.to_string()));
    Value::Object(payload)
}

/// Extract the failure reason from a payload, if any.
pub fn payload_reason(payload: &Value) -> Option<&str> {
    payload.get(REASON_KEY).and_then(Value::as_str)
}

/// Convert a CamelCase stage identifier to the snake_case form stages are
/// registered under. Externally-triggered stage names may arrive in either
/// form; dispatch tries the exact name first and this transform second.
pub fn snake_case_stage(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Progress of a child task as seen from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskStatus {
    /// Child created, no terminal result reported yet.
    Init,
    /// Child reached `complete`.
    Succ,
    /// Child reached `failed`.
    Fail,
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtaskStatus::Init => "init",
            SubtaskStatus::Succ => "succ",
            SubtaskStatus::Fail => "fail",
        }
    }

    /// Whether this status is terminal from the parent's point of view.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubtaskStatus::Init)
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubtaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(SubtaskStatus::Init),
            "succ" => Ok(SubtaskStatus::Succ),
            "fail" => Ok(SubtaskStatus::Fail),
            other => Err(format!("unknown subtask status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn terminal_stages() {
        assert!(is_terminal_stage(STAGE_COMPLETE));
        assert!(is_terminal_stage(STAGE_FAILED));
        assert!(!is_terminal_stage(STAGE_INIT));
        assert!(!is_terminal_stage("deploy_guest"));
    }

    #[test]
    fn failure_marker_detection() {
        assert!(is_failure_payload(&failure_payload("boom")));
        assert!(!is_failure_payload(&json!({"result": "ok"})));
        assert!(!is_failure_payload(&json!({"__status__": "ok"})));
        assert_eq!(payload_reason(&failure_payload("boom")), Some("boom"));
    }

    #[test]
    fn snake_case_conversion() {
        assert_eq!(snake_case_stage("OnInit"), "on_init");
        assert_eq!(snake_case_stage("OnDeployGuestComplete"), "on_deploy_guest_complete");
        assert_eq!(snake_case_stage("already_snake"), "already_snake");
    }

    #[test]
    fn subtask_status_round_trip() {
        for status in [SubtaskStatus::Init, SubtaskStatus::Succ, SubtaskStatus::Fail] {
            assert_eq!(status.as_str().parse::<SubtaskStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<SubtaskStatus>().is_err());
    }

    fn to_camel(snake: &str) -> String {
        snake
            .split('_')
            .map(|w| {
                let mut c = w.chars();
                match c.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + c.as_str(),
                    None => String::new(),
                }
            })
            .collect()
    }

    proptest! {
        #[test]
        fn camel_form_resolves_back_to_snake(words in proptest::collection::vec("[a-z]{1,8}", 1..5)) {
            let snake = words.join("_");
            prop_assert_eq!(snake_case_stage(&to_camel(&snake)), snake);
        }
    }
}
