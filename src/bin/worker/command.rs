use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value};

use browser_task_agent::Tool;
use browser_task_agent::types::{EXIT_COMMAND, WorkerCommand};

#[derive(Debug, Clone, PartialEq)]
pub enum BrowserCommand {
    Navigate { url: String },
    Click { element_id: u64 },
    Type { element_id: u64, text: String },
    Scroll { down: bool },
    Wait { milliseconds: u64 },
    Observe,
    PressEnter,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Browser(BrowserCommand),
    Exit,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self> {
        let command: WorkerCommand = serde_json::from_str(line)?;
        if command.action == EXIT_COMMAND {
            return Ok(Request::Exit);
        }

        let tool: Tool = command
            .action
            .parse()
            .map_err(|()| anyhow!("Unknown action: {}", command.action))?;
        let args = &command.args;

        let browser = match tool {
            Tool::Navigate => BrowserCommand::Navigate {
                url: string_arg(args, "url")?,
            },
            Tool::Click => BrowserCommand::Click {
                element_id: int_arg(args, "element_id")?,
            },
            Tool::Type => BrowserCommand::Type {
                element_id: int_arg(args, "element_id")?,
                text: string_arg(args, "text")?,
            },
            Tool::Scroll => BrowserCommand::Scroll {
                down: args
                    .get("direction")
                    .and_then(Value::as_str)
                    .is_none_or(|d| !d.eq_ignore_ascii_case("up")),
            },
            Tool::Wait => BrowserCommand::Wait {
                milliseconds: int_arg(args, "milliseconds").unwrap_or(500),
            },
            Tool::Observe => BrowserCommand::Observe,
            Tool::PressEnter => BrowserCommand::PressEnter,
        };
        Ok(Request::Browser(browser))
    }
}

fn string_arg(args: &Map<String, Value>, key: &str) -> Result<String> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => bail!("missing argument `{key}`"),
    }
}

/// Models send ids both as numbers and as strings.
fn int_arg(args: &Map<String, Value>, key: &str) -> Result<u64> {
    let value = args.get(key).ok_or_else(|| anyhow!("missing argument `{key}`"))?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| anyhow!("argument `{key}` is not a non-negative integer: {value}"))
}
