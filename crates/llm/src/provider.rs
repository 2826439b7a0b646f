//! [`CompletionService`] over an OpenAI-compatible chat completions API.
//!
//! One call sends the stage's system instruction and user content as two
//! chat messages and asks for a `json_schema` response format built from the
//! stage's output schema. Transport and status failures are mapped onto
//! [`CompletionError`] so the retry loop can classify them; this adapter does
//! not retry on its own.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{Completion, CompletionError, CompletionRequest, CompletionService, TokenUsage};
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ProviderConfig, ProviderConfigError};

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Chat completions client for Groq, OpenAI, or any compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderConfigError::Client(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The request body for `request`.
    pub fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut schema = request.schema.clone();
        if let Some(object) = schema.as_object_mut() {
            object.remove("additionalProperties");
        }
        json!({
            "model": request.model.as_str(),
            "messages": [
                { "role": "system", "content": request.system_instruction },
                { "role": "user", "content": request.content },
            ],
            "temperature": request.temperature.as_f64(),
            "max_completion_tokens": self.config.max_completion_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": format!("{}_output", request.stage.as_str()),
                    "schema": schema,
                    "strict": false,
                },
            },
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        let started = Instant::now();
        let body = self.request_body(&request);
        debug!(stage = %request.stage, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            let text = response.text().await.unwrap_or_default();
            let error = status_error(status.as_u16(), retry_after, &text);
            warn!(stage = %request.stage, status = status.as_u16(), error = %error, "Completion request failed");
            return Err(error);
        }

        let chat: ChatResponse = response.json().await.map_err(transport_error)?;
        let (payload, usage) = parse_chat_response(chat)?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            stage = %request.stage,
            latency_ms,
            input_tokens = usage.input.as_u64(),
            output_tokens = usage.output.as_u64(),
            "Completion received"
        );
        Ok(Completion {
            payload,
            usage,
            latency_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn parse_chat_response(chat: ChatResponse) -> Result<(Value, TokenUsage), CompletionError> {
    let usage = chat
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();
    let choice = chat
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::MalformedResponse("response has no choices".into()))?;
    let content = choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| CompletionError::MalformedResponse("response content is empty".into()))?;

    let payload: Value = serde_json::from_str(strip_code_fence(&content)).map_err(|e| {
        let truncated = choice.finish_reason.as_deref() == Some("length");
        CompletionError::MalformedResponse(if truncated {
            format!("response truncated at the token limit: {e}")
        } else {
            format!("response is not valid JSON: {e}")
        })
    })?;
    if !payload.is_object() {
        return Err(CompletionError::MalformedResponse(
            "response JSON is not an object".into(),
        ));
    }
    Ok((payload, usage))
}

/// Removes a surrounding Markdown code fence, if any.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn transport_error(err: reqwest::Error) -> CompletionError {
    if err.is_timeout() {
        CompletionError::Timeout
    } else if err.is_decode() {
        CompletionError::MalformedResponse(err.to_string())
    } else if err.is_builder() {
        CompletionError::Internal(err.to_string())
    } else {
        CompletionError::Connection(err.to_string())
    }
}

fn status_error(status: u16, retry_after: Option<Duration>, body: &str) -> CompletionError {
    let message = truncate(body.trim());
    match status {
        429 => CompletionError::RateLimited { retry_after },
        401 | 403 => CompletionError::Authentication(message),
        404 => CompletionError::NotFound(message),
        408 => CompletionError::Timeout,
        500..=599 => CompletionError::Server { status, message },
        _ => CompletionError::InvalidRequest(format!("status {status}: {message}")),
    }
}

/// Parses a `Retry-After` value given in (possibly fractional) seconds.
fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let secs: f64 = value?.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pipeline::{ErrorClassification, ModelName, StageName, Temperature};

    use super::*;

    fn chat(content: &str, finish_reason: &str) -> ChatResponse {
        serde_json::from_value(json!({
            "choices": [{
                "message": { "role": "assistant", "content": content },
                "finish_reason": finish_reason
            }],
            "usage": { "prompt_tokens": 812, "completion_tokens": 97, "total_tokens": 909 }
        }))
        .unwrap()
    }

    #[test]
    fn body_requests_schema_constrained_output() {
        let provider = OpenAiCompatibleProvider::new(ProviderConfig::new("k")).unwrap();
        let request = CompletionRequest {
            stage: StageName::Governance,
            system_instruction: "You are a governance analyst.".into(),
            content: "{}".into(),
            schema: json!({ "type": "object", "additionalProperties": false }),
            model: ModelName::new("llama-test").unwrap(),
            temperature: Temperature::new(0.2).unwrap(),
        };
        let body = provider.request_body(&request);

        assert_eq!(body["model"], "llama-test");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "{}");
        assert_eq!(body["max_completion_tokens"], 4096);
        let format = &body["response_format"];
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "governance_output");
        assert_eq!(format["json_schema"]["strict"], false);
        assert!(format["json_schema"]["schema"].get("additionalProperties").is_none());
    }

    #[test]
    fn content_and_usage_are_extracted() {
        let (payload, usage) = parse_chat_response(chat(r#"{"intent_type":"list"}"#, "stop")).unwrap();
        assert_eq!(payload["intent_type"], "list");
        assert_eq!(usage, TokenUsage::new(812, 97));
    }

    #[test]
    fn fenced_json_is_accepted() {
        let (payload, _) =
            parse_chat_response(chat("```json\n{\"strategy\":\"pushdown\"}\n```", "stop")).unwrap();
        assert_eq!(payload["strategy"], "pushdown");
    }

    #[test]
    fn bad_content_is_malformed_and_retryable() {
        for content in ["", "not json", "[1, 2]"] {
            let err = parse_chat_response(chat(content, "stop")).unwrap_err();
            assert!(err.is_output_defect(), "{content:?} gave {err:?}");
            assert!(err.classification().is_retryable());
        }
        let err = parse_chat_response(chat(r#"{"strategy": "push"#, "length")).unwrap_err();
        assert!(err.to_string().contains("truncated"));

        let empty: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(parse_chat_response(empty).unwrap_err().is_output_defect());
    }

    #[test]
    fn statuses_map_to_classified_errors() {
        let throttled = status_error(429, Some(Duration::from_secs(7)), "");
        assert_eq!(
            throttled.classification(),
            ErrorClassification::Retryable {
                after: Some(Duration::from_secs(7))
            }
        );
        assert!(status_error(503, None, "busy").classification().is_retryable());
        assert!(matches!(status_error(500, None, "x"), CompletionError::Server { status: 500, .. }));
        assert!(matches!(status_error(401, None, ""), CompletionError::Authentication(_)));
        assert!(matches!(status_error(403, None, ""), CompletionError::Authentication(_)));
        assert!(matches!(status_error(404, None, ""), CompletionError::NotFound(_)));
        assert!(matches!(status_error(400, None, ""), CompletionError::InvalidRequest(_)));
        assert!(matches!(status_error(422, None, ""), CompletionError::InvalidRequest(_)));
        assert_eq!(status_error(408, None, ""), CompletionError::Timeout);
        assert_eq!(
            status_error(401, None, "").classification(),
            ErrorClassification::NonRetryable
        );
    }

    #[test]
    fn retry_after_accepts_seconds_only() {
        assert_eq!(parse_retry_after(Some("3")), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(Some(" 1.5 ")), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2026 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(Some("-1")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let long = "e".repeat(2_000);
        let CompletionError::Server { message, .. } = status_error(502, None, &long) else {
            panic!("expected a server error");
        };
        assert_eq!(message.len(), MAX_ERROR_BODY + 3);
    }
}
