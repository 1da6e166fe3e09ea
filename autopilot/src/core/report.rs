//! Normalization of step completion reports.
//!
//! Agents report failure in four legacy shapes. They are translated here, once,
//! into [`StepReport`] so the step runner never re-inspects raw JSON.
//!
//! Precedence (first match wins):
//! 1. `{ "type": "error", "message": .. }`
//! 2. `{ "type": "structuredOutput", "value": { "ok": false, "error": .. } }`
//! 3. `{ "errorMessage": .. }`
//! 4. `{ "error": .. }`

use serde_json::Value;

const DEFAULT_ERROR_MESSAGE: &str = "Subagent returned an error.";
const DEFAULT_NOT_OK_MESSAGE: &str = "Subagent returned ok=false.";

/// Normalized completion report of a step's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepReport {
    Completed,
    Failed { message: String },
}

impl StepReport {
    /// Classify a completion report.
    ///
    /// An array is treated as a list of spawn reports, each carrying its output
    /// under `value`; the first report matching any failure shape decides.
    pub fn from_output(output: &Value) -> Self {
        let message = match output {
            Value::Array(reports) => reports
                .iter()
                .filter_map(|report| report.get("value"))
                .find_map(failure_message),
            other => failure_message(other),
        };
        match message {
            Some(message) => StepReport::Failed { message },
            None => StepReport::Completed,
        }
    }
}

fn failure_message(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    match object.get("type").and_then(Value::as_str) {
        Some("error") => {
            return Some(
                non_blank(object.get("message"))
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
            );
        }
        Some("structuredOutput") => {
            if let Some(inner) = object.get("value").and_then(Value::as_object)
                && inner.get("ok").and_then(Value::as_bool) == Some(false)
            {
                return Some(
                    non_blank(inner.get("error"))
                        .unwrap_or_else(|| DEFAULT_NOT_OK_MESSAGE.to_string()),
                );
            }
        }
        _ => {}
    }
    non_blank(object.get("errorMessage")).or_else(|| non_blank(object.get("error")))
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?;
    if text.trim().is_empty() {
        return None;
    }
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failed(message: &str) -> StepReport {
        StepReport::Failed {
            message: message.to_string(),
        }
    }

    #[test]
    fn error_type_uses_message() {
        let report = StepReport::from_output(&json!({"type": "error", "message": "agent crashed"}));
        assert_eq!(report, failed("agent crashed"));
    }

    #[test]
    fn error_type_without_message_uses_default() {
        let report = StepReport::from_output(&json!({"type": "error", "message": "  "}));
        assert_eq!(report, failed(DEFAULT_ERROR_MESSAGE));
    }

    #[test]
    fn structured_output_not_ok_is_failure() {
        let report = StepReport::from_output(&json!({
            "type": "structuredOutput",
            "value": {"ok": false, "error": "Validation failed for plan"}
        }));
        assert_eq!(report, failed("Validation failed for plan"));

        let report = StepReport::from_output(&json!({
            "type": "structuredOutput",
            "value": {"ok": false}
        }));
        assert_eq!(report, failed(DEFAULT_NOT_OK_MESSAGE));
    }

    #[test]
    fn structured_output_ok_is_completed() {
        let report = StepReport::from_output(&json!({
            "type": "structuredOutput",
            "value": {"ok": true, "commandPath": "commands/4-speckit.plan.md"}
        }));
        assert_eq!(report, StepReport::Completed);
    }

    #[test]
    fn error_type_takes_precedence_over_error_fields() {
        let report = StepReport::from_output(&json!({
            "type": "error",
            "message": "first",
            "errorMessage": "third",
            "error": "fourth"
        }));
        assert_eq!(report, failed("first"));
    }

    #[test]
    fn error_message_takes_precedence_over_error() {
        let report = StepReport::from_output(&json!({"errorMessage": "third", "error": "fourth"}));
        assert_eq!(report, failed("third"));

        let report = StepReport::from_output(&json!({"errorMessage": "", "error": "fourth"}));
        assert_eq!(report, failed("fourth"));
    }

    #[test]
    fn spawn_report_arrays_inspect_values_in_order() {
        let report = StepReport::from_output(&json!([
            {"agentName": "a", "value": {"type": "lastMessage"}},
            {"agentName": "b", "value": {"error": "second agent failed"}},
            {"agentName": "c", "value": {"type": "error", "message": "ignored"}}
        ]));
        assert_eq!(report, failed("second agent failed"));
    }

    #[test]
    fn non_object_outputs_are_completed() {
        assert_eq!(StepReport::from_output(&Value::Null), StepReport::Completed);
        assert_eq!(StepReport::from_output(&json!("done")), StepReport::Completed);
        assert_eq!(StepReport::from_output(&json!([])), StepReport::Completed);
    }
}
