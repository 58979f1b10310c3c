use std::collections::VecDeque;
use std::time::Duration;

use serde_json::{Map, Value, json};

use browser_task_agent::brain::{DecisionRequest, DecisionService};
use browser_task_agent::face::{AgentEvent, Operator};
use browser_task_agent::hands::Worker;
use browser_task_agent::types::{WorkerCommand, WorkerResponse};
use browser_task_agent::{
    Agent, AgentConfig, AgentError, DecisionError, HaltReason, Observation, Outcome, Record,
    WorkerError,
};

/// Replays canned decisions and remembers what it was asked.
#[derive(Default)]
struct ScriptedBrain {
    replies: VecDeque<Result<String, DecisionError>>,
    seen: Vec<(String, Option<String>)>,
}

impl ScriptedBrain {
    fn new(replies: Vec<Result<String, DecisionError>>) -> Self {
        Self {
            replies: replies.into(),
            seen: Vec::new(),
        }
    }

    fn say(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
    }
}

impl DecisionService for ScriptedBrain {
    async fn decide(&mut self, request: &DecisionRequest<'_>) -> Result<String, DecisionError> {
        self.seen.push((
            request.task.to_string(),
            request.observation.map(|o| o.url().to_string()),
        ));
        self.replies
            .pop_front()
            .unwrap_or_else(|| Ok(r#"{"action":"finish","summary":"script exhausted"}"#.into()))
    }
}

/// Answers each command with the next canned response.
#[derive(Default)]
struct ScriptedWorker {
    responses: VecDeque<Result<WorkerResponse, WorkerError>>,
    commands: Vec<WorkerCommand>,
    stopped: bool,
}

impl ScriptedWorker {
    fn new(responses: Vec<Result<WorkerResponse, WorkerError>>) -> Self {
        Self {
            responses: responses.into(),
            ..Self::default()
        }
    }

    fn actions(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.action.as_str()).collect()
    }
}

impl Worker for ScriptedWorker {
    async fn send(&mut self, command: &WorkerCommand) -> Result<WorkerResponse, WorkerError> {
        self.commands.push(command.clone());
        self.responses
            .pop_front()
            .unwrap_or_else(|| Ok(WorkerResponse::error("no scripted response")))
    }

    async fn stop(&mut self) {
        self.stopped = true;
    }
}

#[derive(Default)]
struct RecordingOperator {
    answers: VecDeque<String>,
    questions: Vec<String>,
    events: Vec<AgentEvent>,
}

impl Operator for RecordingOperator {
    fn notify(&mut self, event: AgentEvent) {
        self.events.push(event);
    }

    async fn ask(&mut self, question: &str) -> std::io::Result<String> {
        self.questions.push(question.to_string());
        Ok(self.answers.pop_front().unwrap_or_default())
    }
}

fn page(url: &str, title: &str, text: &str) -> Observation {
    let mut map = Map::new();
    map.insert("url".into(), json!(url));
    map.insert("title".into(), json!(title));
    map.insert("visible_text".into(), json!(text));
    Observation(map)
}

fn ok(url: &str, text: &str) -> Result<WorkerResponse, WorkerError> {
    Ok(WorkerResponse::ok(page(url, "Page", text)))
}

fn quick_config() -> AgentConfig {
    AgentConfig {
        step_delay: Duration::ZERO,
        heal_delay: Duration::ZERO,
        rate_limit_margin: Duration::ZERO,
        rate_limit_default: Duration::ZERO,
        ..AgentConfig::default()
    }
}

type TestAgent = Agent<ScriptedBrain, ScriptedWorker, RecordingOperator>;

fn agent(brain: ScriptedBrain, worker: ScriptedWorker, config: AgentConfig) -> TestAgent {
    Agent::new(brain, worker, RecordingOperator::default(), config)
}

async fn run(agent: &mut TestAgent, task: &str) -> Result<Outcome, AgentError> {
    let mut ctx = agent.context(task);
    agent.run(&mut ctx).await
}

const RESULTS_TEXT: &str =
    "Найдено 5\nAI Engineer\nAcme Inc\nнерелевантная строка\nData Engineer\nBeta LLC";

#[tokio::test]
async fn navigates_then_finishes() {
    let brain = ScriptedBrain::say(&[
        r#"{"action":"tool","tool":"navigate","arguments":{"url":"https://hh.ru"}}"#,
        r#"{"action":"finish","summary":"Opened hh.ru successfully"}"#,
    ]);
    let worker = ScriptedWorker::new(vec![ok("https://hh.ru/", "welcome")]);
    let mut agent = agent(brain, worker, quick_config());

    let outcome = run(&mut agent, "open hh.ru").await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Finished {
            summary: "Opened hh.ru successfully".into(),
            records: vec![],
        }
    );
    assert_eq!(agent.worker.actions(), ["navigate"]);
    assert_eq!(agent.worker.commands[0].args["url"], "https://hh.ru");
    assert_eq!(agent.decision.seen[0].1, None);
    assert_eq!(agent.decision.seen[1].1.as_deref(), Some("https://hh.ru/"));
}

#[tokio::test]
async fn third_identical_click_halts_before_dispatch() {
    let click = r#"{"action":"tool","tool":"click","arguments":{"id":"x"}}"#;
    let brain = ScriptedBrain::say(&[click, click, click]);
    let worker = ScriptedWorker::new(vec![ok("https://a/1", "one"), ok("https://a/2", "two")]);
    let mut agent = agent(brain, worker, quick_config());

    let outcome = run(&mut agent, "click around").await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Halted(HaltReason::RepeatedAction {
            key: "tool:click".into()
        })
    );
    assert_eq!(agent.worker.actions(), ["click", "click"]);
}

#[tokio::test]
async fn scrolling_repeatedly_is_not_a_loop() {
    let scroll = r#"{"action":"scroll","direction":"down"}"#;
    let brain = ScriptedBrain::say(&[scroll, scroll, scroll, scroll, scroll]);
    let worker = ScriptedWorker::new(
        (0..5)
            .map(|i| ok(&format!("https://feed/{i}"), "more"))
            .collect(),
    );
    let mut agent = agent(brain, worker, quick_config());

    let outcome = run(&mut agent, "read the feed").await.unwrap();
    assert!(matches!(outcome, Outcome::Finished { .. }));
    assert_eq!(agent.worker.commands.len(), 5);
    assert_eq!(agent.worker.commands[0].args["direction"], "down");
}

#[tokio::test]
async fn stagnant_page_gets_one_corrective_scroll_without_extraction() {
    let brain = ScriptedBrain::say(&[
        r#"{"action":"tool","tool":"navigate","arguments":{"url":"https://hh.ru/search?text=ai"}}"#,
        r#"{"action":"tool","tool":"click","arguments":{"element_id":1}}"#,
        r#"{"action":"tool","tool":"type","arguments":{"element_id":2,"text":"AI"}}"#,
        r#"{"action":"finish","summary":"stopping"}"#,
    ]);
    let one_listing = "Найдено 1\nAI Engineer\nAcme Inc";
    let url = "https://hh.ru/search?text=ai";
    let worker = ScriptedWorker::new(vec![
        ok(url, one_listing),
        ok(url, one_listing),
        ok(url, one_listing),
        ok("https://hh.ru/search?text=ai&page=2", "scrolled"),
    ]);
    let mut agent = agent(brain, worker, quick_config());

    let outcome = run(&mut agent, "find AI jobs").await.unwrap();

    assert_eq!(agent.worker.actions(), ["navigate", "click", "type", "scroll"]);
    let heals = agent
        .operator
        .events
        .iter()
        .filter(|e| matches!(e, AgentEvent::SelfHeal))
        .count();
    assert_eq!(heals, 1);
    // Listings were reported once, on the first results page only.
    let listings = agent
        .operator
        .events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Listings { .. }))
        .count();
    assert_eq!(listings, 1);
    // The corrective scroll's page is what the next decision sees.
    assert_eq!(
        agent.decision.seen[3].1.as_deref(),
        Some("https://hh.ru/search?text=ai&page=2")
    );
    assert_eq!(
        outcome,
        Outcome::Finished {
            summary: "stopping".into(),
            records: vec![Record::new("AI Engineer", "Acme Inc")],
        }
    );
}

#[tokio::test]
async fn worker_error_keeps_previous_observation() {
    let brain = ScriptedBrain::say(&[
        r#"{"action":"navigate","url":"https://a.test"}"#,
        r#"{"action":"click","element_id":99}"#,
        r#"{"action":"finish","summary":"done"}"#,
    ]);
    let worker = ScriptedWorker::new(vec![
        ok("https://a.test/", "home"),
        Ok(WorkerResponse::error("Element not found")),
    ]);
    let mut agent = agent(brain, worker, quick_config());

    run(&mut agent, "task").await.unwrap();
    assert_eq!(agent.decision.seen[2].1.as_deref(), Some("https://a.test/"));
    assert!(agent.operator.events.contains(&AgentEvent::StepError {
        message: "Element not found".into()
    }));
}

#[tokio::test]
async fn operator_answer_extends_task_and_uses_a_step() {
    let brain = ScriptedBrain::say(&[
        r#"{"action":"ask_user","question":"Which city?"}"#,
        r#"{"action":"wiggle"}"#,
        r#"{"action":"finish","summary":"never reached"}"#,
    ]);
    let mut agent = agent(
        brain,
        ScriptedWorker::default(),
        AgentConfig {
            max_steps: 2,
            ..quick_config()
        },
    );
    agent.operator.answers.push_back("Moscow".into());

    let outcome = run(&mut agent, "find jobs").await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Halted(HaltReason::StepBudgetExhausted { steps: 2 })
    );
    assert_eq!(agent.operator.questions, ["Which city?"]);
    assert_eq!(agent.decision.seen[1].0, "find jobs\nUser answer: Moscow");
    assert!(agent.worker.commands.is_empty());
}

#[tokio::test]
async fn rate_limit_retries_same_step_without_spending_budget() {
    let brain = ScriptedBrain::new(vec![
        Err(DecisionError::RateLimited {
            message: "Quota exceeded".into(),
            retry_after: Some(Duration::ZERO),
        }),
        Err(DecisionError::RateLimited {
            message: "Quota exceeded".into(),
            retry_after: None,
        }),
        Ok(r#"{"action":"finish","summary":"ok"}"#.into()),
    ]);
    let mut agent = agent(
        brain,
        ScriptedWorker::default(),
        AgentConfig {
            max_steps: 1,
            ..quick_config()
        },
    );

    let outcome = run(&mut agent, "task").await.unwrap();
    assert!(matches!(outcome, Outcome::Finished { .. }));
    assert_eq!(agent.decision.seen.len(), 3);
    let thinking: Vec<_> = agent
        .operator
        .events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Thinking { step } => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(thinking, [1, 1, 1]);
}

#[tokio::test]
async fn other_decision_errors_are_fatal() {
    let brain = ScriptedBrain::new(vec![Err(DecisionError::Api {
        status: 401,
        message: "bad key".into(),
    })]);
    let mut agent = agent(brain, ScriptedWorker::default(), quick_config());

    let err = run(&mut agent, "task").await.unwrap_err();
    assert!(matches!(err, AgentError::Decision(DecisionError::Api { status: 401, .. })));
}

#[tokio::test]
async fn unparsable_decision_is_fatal() {
    let brain = ScriptedBrain::say(&["I would rather not."]);
    let mut agent = agent(brain, ScriptedWorker::default(), quick_config());

    let err = run(&mut agent, "task").await.unwrap_err();
    match err {
        AgentError::Parse(parse) => assert_eq!(parse.raw(), "I would rather not."),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn broken_worker_channel_is_fatal() {
    let brain = ScriptedBrain::say(&[r#"{"action":"observe"}"#]);
    let worker = ScriptedWorker::new(vec![Err(WorkerError::Closed)]);
    let mut agent = agent(brain, worker, quick_config());

    let err = run(&mut agent, "task").await.unwrap_err();
    assert!(matches!(err, AgentError::Worker(WorkerError::Closed)));
}

#[tokio::test]
async fn results_page_finishes_once_enough_listings_are_found() {
    let brain = ScriptedBrain::say(&[
        r#"{"action":"navigate","url":"https://hh.ru/search/vacancy?text=AI"}"#,
    ]);
    let worker = ScriptedWorker::new(vec![ok("https://hh.ru/search/vacancy?text=AI", RESULTS_TEXT)]);
    let mut agent = agent(
        brain,
        worker,
        AgentConfig {
            want_records: 2,
            ..quick_config()
        },
    );

    let outcome = run(&mut agent, "find 2 AI jobs").await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Finished {
            summary: "collected 2 listings.".into(),
            records: vec![
                Record::new("AI Engineer", "Acme Inc"),
                Record::new("Data Engineer", "Beta LLC"),
            ],
        }
    );
    assert_eq!(agent.decision.seen.len(), 1);
}

#[tokio::test]
async fn no_results_page_triggers_fallback_once() {
    let brain = ScriptedBrain::say(&[
        r#"{"action":"navigate","url":"https://hh.ru/search/vacancy?text=zzz"}"#,
        r#"{"action":"observe"}"#,
        r#"{"action":"finish","summary":"gave up"}"#,
    ]);
    let nothing = "По запросу ничего не найдено";
    let worker = ScriptedWorker::new(vec![
        ok("https://hh.ru/search/vacancy?text=zzz", nothing),
        ok("https://hh.ru/search/vacancy?text=AI&area=1", nothing),
        ok("https://hh.ru/search/vacancy?text=AI&area=1", nothing),
    ]);
    let mut config = quick_config();
    config.profile.trigger.fallback_url = Some("https://hh.ru/search/vacancy?text=AI&area=1".into());
    let mut agent = agent(brain, worker, config);

    run(&mut agent, "find jobs").await.unwrap();
    assert_eq!(agent.worker.actions(), ["navigate", "navigate", "observe"]);
    assert_eq!(
        agent.worker.commands[1].args["url"],
        Value::from("https://hh.ru/search/vacancy?text=AI&area=1")
    );
}
