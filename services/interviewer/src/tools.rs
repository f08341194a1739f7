//! Tool declarations exposed to the model and their handlers.
//!
//! Every handler returns the JSON payload sent back as the function
//! response; argument validation failures surface as handler errors, which
//! the session layer converts into an error payload for the model.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use gemini_live::{FunctionDeclaration, ToolRegistry};
use serde_json::{Value, json};

use crate::checklist::ChecklistStore;

fn required_str(args: &Value, key: &str) -> anyhow::Result<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("missing required argument '{key}'"))
}

fn optional_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Builds the registry of interview tools backed by the shared checklist.
pub fn registry(checklist: ChecklistStore) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let store = checklist.clone();
    registry.register(
        FunctionDeclaration {
            name: "markCriteriaSatisfied".to_string(),
            description: "Marks one checklist criterion as satisfied. Call this as soon as \
                          you are at least 70% confident, based only on on-screen evidence. \
                          Do not wait for additional criteria."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "criteriaId": {
                        "type": "string",
                        "description": "The unique ID of the satisfied checklist criterion (e.g., 'majorityElementAlgorithm')."
                    },
                    "confidence": {
                        "type": "number",
                        "description": "(0.0-1.0) how sure you are that this criterion is met, based on on-screen evidence."
                    },
                    "notes": {
                        "type": "string",
                        "description": "Notes explaining why this criterion is considered satisfied."
                    },
                    "timestamp": {
                        "type": "string",
                        "format": "date-time",
                        "description": "Optional ISO 8601 timestamp of when the criterion was observed as met."
                    }
                },
                "required": ["criteriaId"]
            }),
        },
        move |args| {
            let store = store.clone();
            async move {
                let criteria_id = required_str(&args, "criteriaId")?;
                let confidence = args.get("confidence").and_then(Value::as_f64);
                let notes = optional_str(&args, "notes");
                let timestamp = optional_str(&args, "timestamp");

                let known = store.mark_satisfied(&criteria_id, confidence, notes.clone(), timestamp.clone());
                if known {
                    tracing::info!(
                        criterion = %criteria_id,
                        confidence = ?confidence,
                        notes = ?notes,
                        satisfied = store.satisfied_count(),
                        "criterion satisfied"
                    );
                } else {
                    tracing::warn!(criterion = %criteria_id, "satisfied criterion was never announced");
                }
                Ok(json!({
                    "success": true,
                    "criteriaId": criteria_id,
                    "confidence": confidence,
                    "message": format!("Criteria '{criteria_id}' marked as satisfied"),
                }))
            }
        },
    );

    let store = checklist.clone();
    registry.register(
        FunctionDeclaration {
            name: "update_checklist_item".to_string(),
            description: "Update an interview checklist item based on the interview progress"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "itemKey": {
                        "type": "string",
                        "description": "The unique key for the checklist item (e.g., 'readProblem', 'explainApproach')."
                    },
                    "checked": {
                        "type": "boolean",
                        "description": "Whether the item should be checked (true) or unchecked (false)."
                    }
                },
                "required": ["itemKey", "checked"]
            }),
        },
        move |args| {
            let store = store.clone();
            async move {
                let item_key = required_str(&args, "itemKey")?;
                let checked = args
                    .get("checked")
                    .and_then(Value::as_bool)
                    .context("missing required argument 'checked'")?;
                store.set_checked(&item_key, checked);
                tracing::info!(item = %item_key, checked, "checklist item updated");
                Ok(json!({"success": true, "itemKey": item_key, "checked": checked}))
            }
        },
    );

    registry.register(
        FunctionDeclaration {
            name: "scheduleMeeting".to_string(),
            description: "Schedule a mock interview at a specified time".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Name of the person scheduling the meeting."},
                    "email": {"type": "string", "description": "Email address for meeting details."},
                    "date": {"type": "string", "description": "Date of the meeting (YYYY-MM-DD)."},
                    "time": {"type": "string", "description": "Time of the meeting (HH:MM AM/PM)."}
                },
                "required": ["name", "email", "date", "time"]
            }),
        },
        |args| async move {
            let name = required_str(&args, "name")?;
            let email = required_str(&args, "email")?;
            let date = required_str(&args, "date")?;
            let time = required_str(&args, "time")?;
            tracing::info!(%name, %email, %date, %time, "meeting scheduled");
            // No calendar integration; the confirmation alone closes the loop
            // with the model.
            let meeting_id = format!("meeting-{}", unix_millis());
            Ok(json!({
                "success": true,
                "meetingId": meeting_id,
                "name": name,
                "email": email,
                "date": date,
                "time": time,
                "message": format!("Successfully scheduled meeting for {name} on {date} at {time}."),
            }))
        },
    );

    let store = checklist;
    registry.register(
        FunctionDeclaration {
            name: "functionWrittenAlert".to_string(),
            description: "Triggered when the user writes a function that sums two integers \
                          and prints the result from main"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "functionName": {
                        "type": "string",
                        "description": "The name of the function the user wrote."
                    },
                    "language": {
                        "type": "string",
                        "description": "Programming language the function is written in.",
                        "enum": ["javascript", "python", "java", "c++", "other"]
                    }
                },
                "required": ["functionName", "language"]
            }),
        },
        move |args| {
            let store = store.clone();
            async move {
                let function_name = required_str(&args, "functionName")?;
                let language = required_str(&args, "language")?;
                tracing::info!(function = %function_name, %language, "function detected on screen");
                // Writing code implies the approach was explained.
                store.set_checked("explainApproach", true);
                Ok(json!({
                    "success": true,
                    "functionName": function_name,
                    "language": language,
                    "message": format!("Detected {language} function: {function_name}()"),
                }))
            }
        },
    );

    registry
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemini_live::FunctionCall;

    fn call(name: &str, args: Value) -> FunctionCall {
        FunctionCall {
            id: "t1".to_string(),
            name: name.to_string(),
            args,
        }
    }

    #[tokio::test]
    async fn mark_criteria_satisfied_updates_the_store() {
        let store = ChecklistStore::new();
        store.seed([("twoSumHashMap".to_string(), "Uses a hash map".to_string())]);
        let registry = registry(store.clone());

        let response = registry
            .dispatch(call(
                "markCriteriaSatisfied",
                json!({"criteriaId": "twoSumHashMap", "confidence": 0.9, "notes": "saw the map"}),
            ))
            .await;

        assert_eq!(response.response["success"], json!(true));
        let state = store.get("twoSumHashMap").unwrap();
        assert!(state.satisfied);
        assert_eq!(state.confidence, Some(0.9));
    }

    #[tokio::test]
    async fn missing_required_argument_becomes_error_payload() {
        let registry = registry(ChecklistStore::new());
        let response = registry
            .dispatch(call("markCriteriaSatisfied", json!({"confidence": 0.8})))
            .await;
        assert!(
            response.response["error"]
                .as_str()
                .unwrap()
                .contains("criteriaId")
        );
    }

    #[tokio::test]
    async fn update_checklist_item_toggles_state() {
        let store = ChecklistStore::new();
        let registry = registry(store.clone());

        registry
            .dispatch(call(
                "update_checklist_item",
                json!({"itemKey": "readProblem", "checked": true}),
            ))
            .await;
        assert!(store.get("readProblem").unwrap().satisfied);

        registry
            .dispatch(call(
                "update_checklist_item",
                json!({"itemKey": "readProblem", "checked": false}),
            ))
            .await;
        assert!(!store.get("readProblem").unwrap().satisfied);
    }

    #[tokio::test]
    async fn function_written_alert_implies_explained_approach() {
        let store = ChecklistStore::new();
        let registry = registry(store.clone());

        let response = registry
            .dispatch(call(
                "functionWrittenAlert",
                json!({"functionName": "sumTwo", "language": "python"}),
            ))
            .await;

        assert_eq!(response.response["success"], json!(true));
        assert!(store.get("explainApproach").unwrap().satisfied);
    }

    #[tokio::test]
    async fn schedule_meeting_returns_a_meeting_id() {
        let registry = registry(ChecklistStore::new());
        let response = registry
            .dispatch(call(
                "scheduleMeeting",
                json!({
                    "name": "Sam",
                    "email": "sam@example.com",
                    "date": "2026-09-01",
                    "time": "10:00 AM"
                }),
            ))
            .await;
        assert!(
            response.response["meetingId"]
                .as_str()
                .unwrap()
                .starts_with("meeting-")
        );
    }

    #[test]
    fn all_four_tools_are_declared() {
        let registry = registry(ChecklistStore::new());
        let names: Vec<String> = registry
            .declarations()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "functionWrittenAlert",
                "markCriteriaSatisfied",
                "scheduleMeeting",
                "update_checklist_item"
            ]
        );
    }
}
