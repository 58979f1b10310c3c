//! Turns the decision service's loosely structured reply into an [`Action`].
//!
//! Models drift from the requested schema in a few recurring ways: prose
//! around the JSON, the tool name used as the `action` tag, parameters
//! flattened into the root object, or a list of results stuffed into
//! `summary`. Each of those is handled by one pass below.

use serde_json::{Map, Value};

use crate::error::NormalizeError;
use crate::types::{Action, Record, Tool};

const TOOL_TAG: &str = "tool";
const ASK_USER_TAG: &str = "ask_user";
const FINISH_TAG: &str = "finish";
pub const DEFAULT_SUMMARY: &str = "Done.";

const TOOL_ALIASES: [&str; 2] = ["tool", "tool_name"];
const ARGUMENT_ALIASES: [&str; 3] = ["args", "params", "parameters"];
/// Root keys that never leak into the arguments map.
const RESERVED_KEYS: [&str; 11] = [
    "action",
    "tool",
    "tool_name",
    "arguments",
    "args",
    "params",
    "parameters",
    "question",
    "summary",
    "results",
    "thought",
];

/// Parse raw decision text into an action.
pub fn normalize(raw: &str) -> Result<Action, NormalizeError> {
    let fields = parse_object(raw)?;
    Ok(interpret(fields))
}

/// Locate and parse the JSON object inside `raw`.
pub fn parse_object(raw: &str) -> Result<Map<String, Value>, NormalizeError> {
    let trimmed = raw.trim();
    let candidate = if trimmed.starts_with('{') {
        trimmed
    } else {
        match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if end > start => &trimmed[start..=end],
            _ => {
                return Err(NormalizeError::NoJsonObject {
                    raw: raw.to_string(),
                });
            }
        }
    };

    let value: Value =
        serde_json::from_str(candidate).map_err(|source| NormalizeError::InvalidJson {
            raw: raw.to_string(),
            source,
        })?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(NormalizeError::NotAnObject {
            raw: raw.to_string(),
        }),
    }
}

fn interpret(mut fields: Map<String, Value>) -> Action {
    let tag = fields
        .get("action")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    // {"action":"click", ...} is an implicit tool call.
    if tag.parse::<Tool>().is_ok() {
        if tool_name(&fields).is_none() {
            fields.insert("tool".into(), Value::from(tag.clone()));
        }
        fields.insert("action".into(), Value::from(TOOL_TAG));
        return interpret_tool_call(fields, Some(tag.as_str()));
    }

    match tag.as_str() {
        TOOL_TAG => interpret_tool_call(fields, None),
        ASK_USER_TAG => interpret_ask_user(&fields),
        FINISH_TAG => interpret_finish(&fields),
        "" => Action::Unknown {
            reason: "decision has no action field".to_string(),
        },
        other => Action::Unknown {
            reason: format!("unrecognized action `{other}`"),
        },
    }
}

fn tool_name(fields: &Map<String, Value>) -> Option<String> {
    TOOL_ALIASES
        .iter()
        .filter_map(|key| fields.get(*key).and_then(Value::as_str))
        .map(|name| name.trim().to_ascii_lowercase())
        .find(|name| !name.is_empty())
}

fn interpret_tool_call(fields: Map<String, Value>, implicit: Option<&str>) -> Action {
    let name = tool_name(&fields).or_else(|| implicit.map(str::to_string));
    let arguments = collect_arguments(&fields);

    let Some(name) = name else {
        return Action::Unknown {
            reason: "tool action without tool name".to_string(),
        };
    };

    // Models sometimes route the terminal verbs through the tool channel.
    match name.as_str() {
        FINISH_TAG => return interpret_finish(&overlay(fields, arguments)),
        ASK_USER_TAG => return interpret_ask_user(&overlay(fields, arguments)),
        _ => {}
    }

    match name.parse::<Tool>() {
        Ok(tool) => Action::ToolCall { tool, arguments },
        Err(()) => Action::Unknown {
            reason: format!("unknown tool `{name}`"),
        },
    }
}

fn collect_arguments(fields: &Map<String, Value>) -> Map<String, Value> {
    let mut arguments = match fields.get("arguments") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    let aliased = ARGUMENT_ALIASES
        .iter()
        .filter_map(|key| fields.get(*key).and_then(Value::as_object));
    let flattened = fields
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()));

    for (key, value) in aliased.flatten().chain(flattened) {
        if !arguments.contains_key(key) {
            arguments.insert(key.clone(), value.clone());
        }
    }
    arguments
}

/// Root fields with argument keys filling the gaps.
fn overlay(mut fields: Map<String, Value>, arguments: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in arguments {
        fields.entry(key).or_insert(value);
    }
    fields
}

fn interpret_ask_user(fields: &Map<String, Value>) -> Action {
    match fields.get("question").and_then(Value::as_str) {
        Some(question) => Action::AskUser {
            question: question.to_string(),
        },
        None => Action::Unknown {
            reason: "ask_user without a question".to_string(),
        },
    }
}

fn interpret_finish(fields: &Map<String, Value>) -> Action {
    let mut records = fields
        .get("results")
        .and_then(as_records)
        .unwrap_or_default();

    let summary = match fields.get("summary") {
        Some(Value::String(summary)) => summary.clone(),
        Some(value @ Value::Array(items)) => match as_records(value) {
            Some(from_summary) => {
                if records.is_empty() {
                    records = from_summary;
                }
                format!("Found {} jobs.", items.len())
            }
            None => DEFAULT_SUMMARY.to_string(),
        },
        _ => DEFAULT_SUMMARY.to_string(),
    };

    Action::Finish { summary, records }
}

fn as_records(value: &Value) -> Option<Vec<Record>> {
    serde_json::from_value(value.clone()).ok()
}
