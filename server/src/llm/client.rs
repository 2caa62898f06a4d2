use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{rate_limiters::RateLimiters, server_config::cfg, HttpClient};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("chat api rate limited")]
    RateLimited,
    #[error("chat api timeout")]
    Timeout,
    #[error("chat api server error: {0}")]
    ServerError(String),
    #[error("chat api error: {0}")]
    Api(String),
    #[error("invalid completion: {0}")]
    InvalidResponse(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited
                | LlmError::Timeout
                | LlmError::ServerError(_)
                | LlmError::Network(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub token_usage: i64,
}

/// Chat-completions wrapper with two output modes (free text, strict JSON),
/// token-bucket admission and the shared 2s/4s/8s transient retry ladder.
pub struct LlmClient {
    http_client: HttpClient,
    rate_limiters: RateLimiters,
}

impl LlmClient {
    pub fn new(http_client: HttpClient, rate_limiters: RateLimiters) -> Self {
        LlmClient {
            http_client,
            rate_limiters,
        }
    }

    /// Strict-JSON mode. A completion that fails to parse is an error the
    /// caller must handle; there is no silent fallback.
    pub async fn send_json_prompt(
        &self,
        system: &str,
        user: &str,
    ) -> Result<(serde_json::Value, i64), LlmError> {
        let completion = self.send(system, user, true).await?;
        let value = serde_json::from_str::<serde_json::Value>(&completion.content)
            .map_err(|e| LlmError::InvalidResponse(format!("{e}: {}", completion.content)))?;

        Ok((value, completion.token_usage))
    }

    pub async fn send_text_prompt(
        &self,
        system: &str,
        user: &str,
    ) -> Result<Completion, LlmError> {
        self.send(system, user, false).await
    }

    async fn send(&self, system: &str, user: &str, json_mode: bool) -> Result<Completion, LlmError> {
        // Rough admission estimate; the real usage is reported back by the API
        let estimated_tokens = (system.len() + user.len()) / 4 + 512;
        self.rate_limiters
            .acquire_prompt_tokens(estimated_tokens)
            .await;

        let mut body = json!({
            "model": cfg.ai.model_id,
            "temperature": cfg.ai.temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let mut attempt: u32 = 0;
        loop {
            let result = self
                .http_client
                .post(&cfg.ai.endpoint)
                .bearer_auth(&cfg.ai.api_key)
                .json(&body)
                .send()
                .await;

            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    if attempt + 1 < cfg.max_node_retries {
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(LlmError::Network(e));
                }
            };

            match resp.status() {
                s if s.is_success() => {
                    let value = resp.json::<serde_json::Value>().await?;
                    return parse_completion(value, &self.rate_limiters);
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    self.rate_limiters.trigger_backoff();
                    if attempt + 1 < cfg.max_node_retries {
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(LlmError::RateLimited);
                }
                StatusCode::REQUEST_TIMEOUT => return Err(LlmError::Timeout),
                s if s.is_server_error() => {
                    if attempt + 1 < cfg.max_node_retries {
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    let text = resp.text().await.unwrap_or_default();
                    return Err(LlmError::ServerError(format!("{s}: {text}")));
                }
                s => {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(LlmError::Api(format!("{s}: {text}")));
                }
            }
        }
    }

    async fn backoff(&self, attempt: u32) {
        let delay = cfg.backoff_base_seconds * (1 << attempt);
        tokio::time::sleep(Duration::from_secs(delay)).await;
    }
}

fn parse_completion(
    value: serde_json::Value,
    rate_limiters: &RateLimiters,
) -> Result<Completion, LlmError> {
    let parsed = serde_json::from_value::<ChatApiResponseOrError>(value.clone())
        .map_err(|e| LlmError::InvalidResponse(format!("{e}: {value}")))?;

    let parsed = match parsed {
        ChatApiResponseOrError::Error(error) => {
            if error.message.contains("rate limit") {
                rate_limiters.trigger_backoff();
                return Err(LlmError::RateLimited);
            }
            return Err(LlmError::Api(error.message));
        }
        ChatApiResponseOrError::Response(parsed) => parsed,
    };

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

    Ok(Completion {
        content: choice.message.content,
        token_usage: parsed.usage.total_tokens,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: PromptUsage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiError {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_response() {
        let value = serde_json::json!({
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "{\"a\":1}" }, "finish_reason": "stop" }
            ],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        });
        let parsed = serde_json::from_value::<ChatApiResponseOrError>(value).unwrap();
        assert!(matches!(parsed, ChatApiResponseOrError::Response(_)));
    }

    #[test]
    fn test_parse_error_response() {
        let value = serde_json::json!({ "message": "Requests rate limit exceeded" });
        let parsed = serde_json::from_value::<ChatApiResponseOrError>(value).unwrap();
        assert!(matches!(parsed, ChatApiResponseOrError::Error(_)));
    }
}
