//! Repeat and stagnation detection for the control loop.

use tracing::{debug, warn};

use crate::types::{Action, FINGERPRINT_TEXT_CHARS, Observation, Tool};

pub const DEFAULT_REPEAT_LIMIT: u32 = 2;
pub const DEFAULT_STAGNATION_LIMIT: u32 = 2;

/// What the repeat detector says about the latest action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepeatVerdict {
    Continue,
    /// The same action came back too many times in a row.
    Abort { key: String },
}

/// What the stagnation detector says about the latest observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagnationVerdict {
    Continue,
    /// The page did not change; nudge it instead of post-processing.
    SelfHeal,
}

/// Bookkeeping for one run. Never reset while the run lasts.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    repeat_limit: u32,
    stagnation_limit: u32,
    last_action_key: Option<String>,
    repeat_streak: u32,
    last_fingerprint: Option<String>,
    stagnation_streak: u32,
    scroll_seq: u64,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(DEFAULT_REPEAT_LIMIT, DEFAULT_STAGNATION_LIMIT)
    }
}

impl LoopGuard {
    pub fn new(repeat_limit: u32, stagnation_limit: u32) -> Self {
        Self {
            repeat_limit,
            stagnation_limit,
            last_action_key: None,
            repeat_streak: 0,
            last_fingerprint: None,
            stagnation_streak: 0,
            scroll_seq: 0,
        }
    }

    pub fn repeat_streak(&self) -> u32 {
        self.repeat_streak
    }

    pub fn stagnation_streak(&self) -> u32 {
        self.stagnation_streak
    }

    /// Feed the action chosen for this step.
    pub fn check_action(&mut self, action: &Action) -> RepeatVerdict {
        let key = self.action_key(action);

        if self.last_action_key.as_deref() == Some(key.as_str()) {
            self.repeat_streak += 1;
        } else {
            self.repeat_streak = 0;
        }
        debug!(key = %key, streak = self.repeat_streak, "repeat check");
        self.last_action_key = Some(key.clone());

        if self.repeat_streak >= self.repeat_limit {
            warn!(key = %key, "same action repeated, aborting run");
            RepeatVerdict::Abort { key }
        } else {
            RepeatVerdict::Continue
        }
    }

    /// Feed the observation returned by a successful tool call.
    pub fn check_observation(&mut self, observation: &Observation) -> StagnationVerdict {
        let fingerprint = fingerprint(observation);

        if self.last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            self.stagnation_streak += 1;
        } else {
            self.stagnation_streak = 0;
        }
        self.last_fingerprint = Some(fingerprint);

        if self.stagnation_streak >= self.stagnation_limit {
            warn!(streak = self.stagnation_streak, "page is not changing");
            StagnationVerdict::SelfHeal
        } else {
            StagnationVerdict::Continue
        }
    }

    fn action_key(&mut self, action: &Action) -> String {
        match action {
            // Scrolling over and over is normal; every scroll is distinct.
            Action::ToolCall {
                tool: Tool::Scroll, ..
            } => {
                self.scroll_seq += 1;
                format!("tool:scroll:{}", self.scroll_seq)
            }
            Action::ToolCall { tool, .. } => format!("tool:{tool}"),
            Action::AskUser { .. } => "ask_user".to_string(),
            Action::Finish { .. } => "finish".to_string(),
            Action::Unknown { .. } => "unknown".to_string(),
        }
    }
}

/// `url|title|<first chars of visible text>`.
pub fn fingerprint(observation: &Observation) -> String {
    let head: String = observation
        .visible_text()
        .chars()
        .take(FINGERPRINT_TEXT_CHARS)
        .collect();
    format!("{}|{}|{}", observation.url(), observation.title(), head)
}
