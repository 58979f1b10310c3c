//! The human side of a run: progress events out, answers in.

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};

use crate::types::{Action, Record};

/// Progress reported by the control loop.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    Thinking { step: usize },
    RateLimited { wait_secs: u64 },
    Step { number: usize, action: Action },
    StepError { message: String },
    /// The page stopped changing and was scrolled to unstick it.
    SelfHeal,
    Listings { records: Vec<Record> },
    Fallback { url: String },
}

/// The operator the loop can report to and ask questions of.
#[allow(async_fn_in_trait)]
pub trait Operator {
    fn notify(&mut self, event: AgentEvent);

    async fn ask(&mut self, question: &str) -> std::io::Result<String>;
}

/// Operator on the controlling terminal.
pub struct Console {
    stdin: BufReader<Stdin>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        Self {
            stdin: BufReader::new(tokio::io::stdin()),
        }
    }

    /// Read one line; EOF reads as an empty answer.
    pub async fn read_line(&mut self, prompt: &str) -> std::io::Result<String> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let mut line = String::new();
        self.stdin.read_line(&mut line).await?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Operator for Console {
    fn notify(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Thinking { step } => println!("\n--- STEP {step} ---"),
            AgentEvent::RateLimited { wait_secs } => {
                println!("Rate limited. Waiting {wait_secs}s then retrying...")
            }
            AgentEvent::Step { action, .. } => println!("{}", describe(&action)),
            AgentEvent::StepError { message } => println!("Worker error: {message}"),
            AgentEvent::SelfHeal => println!("Page is not changing, scrolling to move on."),
            AgentEvent::Listings { records } => {
                println!("\nFound listings:");
                print_records(&records);
            }
            AgentEvent::Fallback { url } => println!("No results detected, trying {url}"),
        }
    }

    async fn ask(&mut self, question: &str) -> std::io::Result<String> {
        self.read_line(&format!("? {question}\n> ")).await
    }
}

/// One numbered line per record.
pub fn print_records(records: &[Record]) {
    for (idx, record) in records.iter().enumerate() {
        println!("{}) {record}", idx + 1);
    }
}

/// One-line trace of an action.
pub fn describe(action: &Action) -> String {
    match action {
        Action::ToolCall { tool, arguments } => format!("tool={tool} args={}", show(arguments)),
        Action::AskUser { question } => format!("ask_user question={question:?}"),
        Action::Finish { summary, records } => {
            format!("finish summary={summary:?} results={}", records.len())
        }
        Action::Unknown { reason } => format!("unknown ({reason})"),
    }
}

fn show(arguments: &Map<String, Value>) -> String {
    Value::Object(arguments.clone()).to_string()
}
