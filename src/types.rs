use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool the execution worker knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Navigate,
    Click,
    Type,
    Scroll,
    Wait,
    Observe,
    PressEnter,
}

impl Tool {
    pub const ALL: [Tool; 7] = [
        Tool::Navigate,
        Tool::Click,
        Tool::Type,
        Tool::Scroll,
        Tool::Wait,
        Tool::Observe,
        Tool::PressEnter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tool::Navigate => "navigate",
            Tool::Click => "click",
            Tool::Type => "type",
            Tool::Scroll => "scroll",
            Tool::Wait => "wait",
            Tool::Observe => "observe",
            Tool::PressEnter => "press_enter",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tool::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or(())
    }
}

/// One structured result, e.g. a job title and the company offering it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "job_title", alias = "title")]
    pub title: String,
    #[serde(rename = "company_name", alias = "company")]
    pub company: String,
}

impl Record {
    pub fn new(title: impl Into<String>, company: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            company: company.into(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} — {}", self.title, self.company)
    }
}

/// The canonical decision for one step. Exactly one variant per step.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ToolCall {
        tool: Tool,
        arguments: Map<String, Value>,
    },
    AskUser {
        question: String,
    },
    Finish {
        summary: String,
        records: Vec<Record>,
    },
    /// The decision could not be mapped to anything actionable.
    Unknown {
        reason: String,
    },
}

/// Snapshot of the page after a tool call. Only `url`, `title` and
/// `visible_text` are interpreted; everything else is passed through to the
/// decision service untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Observation(pub Map<String, Value>);

impl Observation {
    pub fn url(&self) -> &str {
        self.str_field("url")
    }

    pub fn title(&self) -> &str {
        self.str_field("title")
    }

    pub fn visible_text(&self) -> &str {
        self.str_field("visible_text")
    }

    fn str_field(&self, key: &str) -> &str {
        self.0.get(key).and_then(Value::as_str).unwrap_or_default()
    }
}

/// A command line sent to the execution worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub action: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl WorkerCommand {
    pub fn tool(tool: Tool, args: Map<String, Value>) -> Self {
        Self {
            action: tool.as_str().to_string(),
            args,
        }
    }

    pub fn exit() -> Self {
        Self {
            action: EXIT_COMMAND.to_string(),
            args: Map::new(),
        }
    }

    pub fn scroll_down() -> Self {
        let mut args = Map::new();
        args.insert("direction".into(), Value::from("down"));
        Self::tool(Tool::Scroll, args)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Ok,
    Error,
}

/// A response line from the execution worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
}

impl WorkerResponse {
    pub fn ok(observation: Observation) -> Self {
        Self {
            status: WorkerStatus::Ok,
            message: None,
            observation: Some(observation),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: WorkerStatus::Error,
            message: Some(message.into()),
            observation: None,
        }
    }
}

pub const EXIT_COMMAND: &str = "exit";
pub const MAX_STEPS_PER_TASK: usize = 15;
pub const DEFAULT_WANTED_RECORDS: usize = 3;
/// Characters of visible text that take part in the stagnation fingerprint.
pub const FINGERPRINT_TEXT_CHARS: usize = 300;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_names_round_trip_through_from_str() {
        for tool in Tool::ALL {
            assert_eq!(tool.as_str().parse::<Tool>(), Ok(tool));
        }
        assert!("finish".parse::<Tool>().is_err());
    }

    #[test]
    fn worker_response_tolerates_missing_optional_fields() {
        let resp: WorkerResponse = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert_eq!(resp.status, WorkerStatus::Ok);
        assert!(resp.observation.is_none());

        let resp: WorkerResponse =
            serde_json::from_str(r#"{"status":"ok","observation":{"url":"https://a.b","title":"T"}}"#)
                .unwrap();
        let obs = resp.observation.unwrap();
        assert_eq!(obs.url(), "https://a.b");
        assert_eq!(obs.title(), "T");
        assert_eq!(obs.visible_text(), "");
    }

    #[test]
    fn record_accepts_short_field_names() {
        let r: Record = serde_json::from_str(r#"{"title":"AI Engineer","company":"Acme"}"#).unwrap();
        assert_eq!(r, Record::new("AI Engineer", "Acme"));
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            serde_json::json!({"job_title":"AI Engineer","company_name":"Acme"})
        );
    }
}
