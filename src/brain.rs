use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::DecisionError;
use crate::types::Observation;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

pub const SYSTEM_PROMPT: &str = r#"You are an autonomous agent that operates a web browser using tools.

You are NOT a chatbot. Complete the user's task by observing the browser state,
deciding the next best action, calling exactly one tool per step, and
repeating until done.

Rules:
- Do not hardcode URLs, selectors or page structures; infer actions from the observation.
- Ask the user only if essential information is missing.
- If an action fails or does not progress the task, adapt. Do not repeat the same failing action more than twice.
- When the goal is achieved or no further progress is possible, finish.

Available tools:
- navigate(url)
- click(element_id)
- type(element_id, text)
- scroll(direction)          direction is "up" or "down"
- wait(milliseconds)
- observe()
- press_enter()

Respond with EXACTLY ONE JSON object and nothing else.

Tool call:
{"action":"tool","tool":"<tool_name>","arguments":{...}}

Ask user:
{"action":"ask_user","question":"<question>"}

Finish:
{"action":"finish","summary":"<short text>","results":[{"job_title":"...","company_name":"..."}]}
- summary MUST be a string.
- results MUST be an array of objects with job_title and company_name."#;

/// What the decision service is shown each step.
#[derive(Debug, Serialize)]
pub struct DecisionRequest<'a> {
    pub task: &'a str,
    pub observation: Option<&'a Observation>,
}

impl DecisionRequest<'_> {
    pub fn to_prompt(&self) -> String {
        let body = DecisionRequest {
            task: self.task.trim(),
            observation: self.observation,
        };
        serde_json::to_string_pretty(&body).unwrap_or_default()
    }
}

/// The oracle that picks the next action. Returns the raw model text.
#[allow(async_fn_in_trait)]
pub trait DecisionService {
    async fn decide(&mut self, request: &DecisionRequest<'_>) -> Result<String, DecisionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Provider {
    #[default]
    Gemini,
    #[value(name = "openai")]
    OpenAi,
}

/// HTTP client for a hosted LLM.
pub struct Brain {
    client: Client,
    provider: Provider,
    api_key: String,
    model: String,
}

impl Brain {
    /// Read the credential and model override for `provider` from the environment.
    pub fn from_env(provider: Provider, model: Option<String>) -> Result<Self, DecisionError> {
        let (key_var, model_var, default_model) = match provider {
            Provider::Gemini => ("GEMINI_API_KEY", "GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            Provider::OpenAi => ("OPENAI_API_KEY", "OPENAI_MODEL", DEFAULT_OPENAI_MODEL),
        };

        let api_key = std::env::var(key_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(DecisionError::MissingCredential(key_var))?;

        let model = model
            .or_else(|| std::env::var(model_var).ok())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_model.to_string());

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            provider,
            api_key,
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_gemini(&self, user_prompt: &str) -> Result<String, DecisionError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({
                "systemInstruction": {"parts": [{"text": SYSTEM_PROMPT}]},
                "contents": [{"role": "user", "parts": [{"text": user_prompt}]}],
                "generationConfig": {
                    "temperature": 0,
                    "maxOutputTokens": 800,
                    "responseMimeType": "application/json",
                },
            }))
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body: Value = response.json().await?;

        if let Some(err) = body.get("error") {
            return Err(classify_gemini_error(status, &headers, err));
        }
        if !status.is_success() {
            return Err(DecisionError::Api {
                status: status.as_u16(),
                message: body.to_string(),
            });
        }

        body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|text| text.trim().to_string())
            .ok_or_else(|| DecisionError::EmptyResponse(body.to_string()))
    }

    async fn call_openai(&self, user_prompt: &str) -> Result<String, DecisionError> {
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": user_prompt},
                ],
                "temperature": 0.2,
            }))
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body: Value = response.json().await?;

        if !status.is_success() {
            return Err(classify_openai_error(status, &headers, &body));
        }

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|text| text.trim().to_string())
            .ok_or_else(|| DecisionError::EmptyResponse(body.to_string()))
    }
}

impl DecisionService for Brain {
    async fn decide(&mut self, request: &DecisionRequest<'_>) -> Result<String, DecisionError> {
        let prompt = request.to_prompt();
        debug!(provider = ?self.provider, model = %self.model, "asking decision service");

        let text = match self.provider {
            Provider::Gemini => self.call_gemini(&prompt).await?,
            Provider::OpenAi => self.call_openai(&prompt).await?,
        };
        debug!(%text, "decision service replied");
        Ok(text)
    }
}

fn classify_gemini_error(status: StatusCode, headers: &HeaderMap, err: &Value) -> DecisionError {
    let message = err["message"].as_str().unwrap_or("unknown Gemini error").to_string();
    let code = err["status"].as_str().unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS || code == "RESOURCE_EXHAUSTED" {
        let retry_after = gemini_retry_delay(err).or_else(|| retry_after_header(headers));
        warn!(?retry_after, "Gemini rate limit");
        return DecisionError::RateLimited {
            message,
            retry_after,
        };
    }

    DecisionError::Api {
        status: status.as_u16(),
        message: format!("{message} ({code})"),
    }
}

fn classify_openai_error(status: StatusCode, headers: &HeaderMap, body: &Value) -> DecisionError {
    let message = body["error"]["message"]
        .as_str()
        .unwrap_or("unknown OpenAI error")
        .to_string();
    let code = body["error"]["code"].as_str().unwrap_or_default();

    // An exhausted balance will not recover by waiting.
    if status == StatusCode::TOO_MANY_REQUESTS && code != "insufficient_quota" {
        let retry_after = retry_after_header(headers);
        warn!(?retry_after, "OpenAI rate limit");
        return DecisionError::RateLimited {
            message,
            retry_after,
        };
    }

    DecisionError::Api {
        status: status.as_u16(),
        message,
    }
}

/// `error.details[].retryDelay` of a `google.rpc.RetryInfo` entry, e.g. `"56s"`.
fn gemini_retry_delay(err: &Value) -> Option<Duration> {
    err["details"]
        .as_array()?
        .iter()
        .filter(|detail| {
            detail["@type"]
                .as_str()
                .is_some_and(|t| t.ends_with("google.rpc.RetryInfo"))
        })
        .find_map(|detail| detail["retryDelay"].as_str().and_then(parse_seconds))
}

fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()
        .and_then(|value| parse_seconds(value.trim()))
}

/// Parses `"56"`, `"56s"` or `"56.25s"`.
pub fn parse_seconds(value: &str) -> Option<Duration> {
    let number = value.strip_suffix('s').unwrap_or(value).trim();
    let secs: f64 = number.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
