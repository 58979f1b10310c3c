//! The control loop: ask for a decision, apply it, watch for loops.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::brain::{DecisionRequest, DecisionService};
use crate::error::{AgentError, AgentResult, DecisionError};
use crate::extract::ExtractionProfile;
use crate::face::{AgentEvent, Operator};
use crate::guard::{
    DEFAULT_REPEAT_LIMIT, DEFAULT_STAGNATION_LIMIT, LoopGuard, RepeatVerdict, StagnationVerdict,
};
use crate::hands::Worker;
use crate::normalize::normalize;
use crate::types::{
    Action, DEFAULT_WANTED_RECORDS, MAX_STEPS_PER_TASK, Observation, Record, Tool, WorkerCommand,
    WorkerStatus,
};

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_steps: usize,
    /// Records to collect before the run ends on its own; 0 disables harvesting.
    pub want_records: usize,
    /// Pause after every successful tool call.
    pub step_delay: Duration,
    /// Pause after a corrective scroll.
    pub heal_delay: Duration,
    /// Wait used when a rate-limited response carries no usable hint.
    pub rate_limit_default: Duration,
    /// Added on top of the service's own hint.
    pub rate_limit_margin: Duration,
    pub rate_limit_cap: Duration,
    pub repeat_limit: u32,
    pub stagnation_limit: u32,
    pub profile: ExtractionProfile,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: MAX_STEPS_PER_TASK,
            want_records: DEFAULT_WANTED_RECORDS,
            step_delay: Duration::from_secs(3),
            heal_delay: Duration::from_millis(800),
            rate_limit_default: Duration::from_secs(60),
            rate_limit_margin: Duration::from_secs(2),
            rate_limit_cap: Duration::from_secs(300),
            repeat_limit: DEFAULT_REPEAT_LIMIT,
            stagnation_limit: DEFAULT_STAGNATION_LIMIT,
            profile: ExtractionProfile::default(),
        }
    }
}

impl AgentConfig {
    /// How long to sleep before retrying a rate-limited decision.
    pub fn backoff(&self, retry_after: Option<Duration>) -> Duration {
        retry_after
            .map(|hint| hint + self.rate_limit_margin)
            .unwrap_or(self.rate_limit_default)
            .min(self.rate_limit_cap)
    }
}

/// Mutable state of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub task: String,
    /// Result of the latest successful tool call.
    pub observation: Option<Observation>,
    pub guard: LoopGuard,
    /// Best extraction so far.
    pub records: Vec<Record>,
    pub fallback_used: bool,
}

impl RunContext {
    pub fn new(task: impl Into<String>, guard: LoopGuard) -> Self {
        Self {
            task: task.into(),
            observation: None,
            guard,
            records: Vec::new(),
            fallback_used: false,
        }
    }

    pub fn append_answer(&mut self, answer: &str) {
        self.task.push_str("\nUser answer: ");
        self.task.push_str(answer.trim());
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Finished {
        summary: String,
        records: Vec<Record>,
    },
    Halted(HaltReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    RepeatedAction { key: String },
    StepBudgetExhausted { steps: usize },
}

pub struct Agent<D, W, O> {
    pub decision: D,
    pub worker: W,
    pub operator: O,
    pub config: AgentConfig,
}

impl<D, W, O> Agent<D, W, O>
where
    D: DecisionService,
    W: Worker,
    O: Operator,
{
    pub fn new(decision: D, worker: W, operator: O, config: AgentConfig) -> Self {
        Self {
            decision,
            worker,
            operator,
            config,
        }
    }

    /// A fresh context whose guard uses this agent's thresholds.
    pub fn context(&self, task: impl Into<String>) -> RunContext {
        RunContext::new(
            task,
            LoopGuard::new(self.config.repeat_limit, self.config.stagnation_limit),
        )
    }

    pub async fn run(&mut self, ctx: &mut RunContext) -> AgentResult<Outcome> {
        let mut step = 1;

        while step <= self.config.max_steps {
            self.operator.notify(AgentEvent::Thinking { step });

            let action = match self.next_action(ctx).await {
                Ok(action) => action,
                Err(AgentError::Decision(DecisionError::RateLimited {
                    message,
                    retry_after,
                })) => {
                    let wait = self.config.backoff(retry_after);
                    warn!(%message, ?wait, step, "rate limited, retrying step");
                    self.operator.notify(AgentEvent::RateLimited {
                        wait_secs: wait.as_secs(),
                    });
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Err(err) => return Err(err),
            };

            info!(step, ?action, "decision");
            self.operator.notify(AgentEvent::Step {
                number: step,
                action: action.clone(),
            });

            if let RepeatVerdict::Abort { key } = ctx.guard.check_action(&action) {
                return Ok(Outcome::Halted(HaltReason::RepeatedAction { key }));
            }

            if let Some(outcome) = self.apply(ctx, action).await? {
                return Ok(outcome);
            }
            step += 1;
        }

        warn!(steps = self.config.max_steps, "step budget exhausted");
        Ok(Outcome::Halted(HaltReason::StepBudgetExhausted {
            steps: self.config.max_steps,
        }))
    }

    async fn next_action(&mut self, ctx: &RunContext) -> AgentResult<Action> {
        let request = DecisionRequest {
            task: &ctx.task,
            observation: ctx.observation.as_ref(),
        };
        let raw = self.decision.decide(&request).await?;
        Ok(normalize(&raw)?)
    }

    async fn apply(&mut self, ctx: &mut RunContext, action: Action) -> AgentResult<Option<Outcome>> {
        match action {
            Action::ToolCall { tool, arguments } => self.run_tool(ctx, tool, arguments).await,
            Action::AskUser { question } => {
                let answer = self
                    .operator
                    .ask(&question)
                    .await
                    .map_err(AgentError::Operator)?;
                ctx.append_answer(&answer);
                Ok(None)
            }
            Action::Finish { summary, records } => {
                let records = if records.is_empty() {
                    ctx.records.clone()
                } else {
                    records
                };
                Ok(Some(Outcome::Finished { summary, records }))
            }
            Action::Unknown { reason } => {
                warn!(%reason, "unusable decision, skipping step");
                Ok(None)
            }
        }
    }

    async fn run_tool(
        &mut self,
        ctx: &mut RunContext,
        tool: Tool,
        arguments: Map<String, Value>,
    ) -> AgentResult<Option<Outcome>> {
        if !self.send_and_observe(ctx, WorkerCommand::tool(tool, arguments)).await? {
            return Ok(None);
        }

        let stagnant = match &ctx.observation {
            Some(observation) => ctx.guard.check_observation(observation),
            None => StagnationVerdict::Continue,
        };
        if stagnant == StagnationVerdict::SelfHeal {
            self.operator.notify(AgentEvent::SelfHeal);
            self.send_and_observe(ctx, WorkerCommand::scroll_down()).await?;
            tokio::time::sleep(self.config.heal_delay).await;
            return Ok(None);
        }

        if let Some(outcome) = self.harvest(ctx) {
            return Ok(Some(outcome));
        }
        self.try_fallback(ctx).await?;

        tokio::time::sleep(self.config.step_delay).await;
        Ok(None)
    }

    /// Send one command. Returns whether a new observation was stored.
    async fn send_and_observe(
        &mut self,
        ctx: &mut RunContext,
        command: WorkerCommand,
    ) -> AgentResult<bool> {
        let response = self.worker.send(&command).await?;

        match (response.status, response.observation) {
            (WorkerStatus::Ok, Some(observation)) => {
                debug!(url = observation.url(), title = observation.title(), "observation");
                ctx.observation = Some(observation);
                Ok(true)
            }
            (WorkerStatus::Ok, None) => {
                warn!(action = %command.action, "worker answered ok without an observation");
                Ok(false)
            }
            (WorkerStatus::Error, _) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "unspecified worker error".to_string());
                warn!(action = %command.action, %message, "worker reported an error");
                self.operator.notify(AgentEvent::StepError { message });
                Ok(false)
            }
        }
    }

    /// Run the extractor on a results page; finish once enough records exist.
    fn harvest(&mut self, ctx: &mut RunContext) -> Option<Outcome> {
        let want = self.config.want_records;
        let observation = ctx.observation.as_ref()?;
        if want == 0 || !self.config.profile.trigger.is_results_page(observation) {
            return None;
        }

        let records = self
            .config
            .profile
            .vocabulary
            .extract(observation.visible_text(), want);
        if records.len() > ctx.records.len() {
            ctx.records = records;
            self.operator.notify(AgentEvent::Listings {
                records: ctx.records.clone(),
            });
        } else {
            debug!(found = records.len(), want, "no new listings on this page");
        }

        (ctx.records.len() >= want).then(|| Outcome::Finished {
            summary: format!("collected {} listings.", ctx.records.len()),
            records: ctx.records.clone(),
        })
    }

    async fn try_fallback(&mut self, ctx: &mut RunContext) -> AgentResult<()> {
        if ctx.fallback_used {
            return Ok(());
        }
        let Some(observation) = ctx.observation.as_ref() else {
            return Ok(());
        };
        let Some(url) = self.config.profile.trigger.fallback_for(observation) else {
            return Ok(());
        };

        let url = url.to_string();
        ctx.fallback_used = true;
        info!(%url, "no results on page, navigating to fallback");
        self.operator.notify(AgentEvent::Fallback { url: url.clone() });

        let mut args = Map::new();
        args.insert("url".into(), Value::from(url));
        self.send_and_observe(ctx, WorkerCommand::tool(Tool::Navigate, args))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_prefers_hint_and_is_capped() {
        let config = AgentConfig::default();
        assert_eq!(config.backoff(None), Duration::from_secs(60));
        assert_eq!(
            config.backoff(Some(Duration::from_secs(10))),
            Duration::from_secs(12)
        );
        assert_eq!(
            config.backoff(Some(Duration::from_secs(3600))),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn answers_are_appended_to_task() {
        let mut ctx = RunContext::new("find jobs", LoopGuard::default());
        ctx.append_answer("Moscow\n");
        assert_eq!(ctx.task, "find jobs\nUser answer: Moscow");
    }
}
