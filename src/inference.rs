use crate::config::InferenceConfig;
use crate::error::FixError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    text: String,
}

/// Text-in/text-out client for the local model server
///
/// Talks to an OpenAI-compatible `/v1/completions` endpoint. The backing
/// model is a single stateful resource that cannot serve overlapping
/// generations: this client is NOT safe for concurrent invocation.
/// Callers go through [`InferenceLane`], which serializes access.
pub struct InferenceClient {
    client: reqwest::Client,
    cfg: InferenceConfig,
}

impl InferenceClient {
    pub fn new(cfg: InferenceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            cfg,
        }
    }

    /// Submit one prompt and return the completion text
    pub async fn complete(&self, prompt: &str) -> Result<String, FixError> {
        let request = CompletionRequest {
            model: &self.cfg.model,
            prompt,
            max_tokens: self.cfg.max_tokens,
            temperature: self.cfg.temperature,
            stream: false,
        };
        let url = format!(
            "{}/v1/completions",
            self.cfg.base_url.trim_end_matches('/')
        );
        debug!("Submitting prompt of {} chars to {}", prompt.len(), url);

        let exchange = async {
            let response = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(|e| FixError::InferenceUnavailable(e.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| FixError::InferenceUnavailable(e.to_string()))?;

            if !status.is_success() {
                return Err(FixError::InferenceUnavailable(format!(
                    "server returned {}: {}",
                    status,
                    body.lines().next().unwrap_or("")
                )));
            }
            parse_completion(&body)
        };

        let timeout = tokio::time::Duration::from_secs(self.cfg.timeout_secs);
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => {
                if let Ok(text) = &result {
                    trace!("Completion: {}", text);
                }
                result
            }
            Err(_) => Err(FixError::InferenceTimeout(self.cfg.timeout_secs)),
        }
    }
}

fn parse_completion(body: &str) -> Result<String, FixError> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| FixError::InferenceUnavailable(format!("unparseable response: {}", e)))?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.text)
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(FixError::InferenceEmptyResponse);
    }
    Ok(text)
}

/// Serialized access path to the shared model
///
/// Only one generation is in flight at any time; concurrent submitters
/// queue on the lock. A caller that abandons its wait (cancellation,
/// timeout at a higher level) just drops its place in the queue; the
/// lane stays usable for the next request.
#[derive(Clone)]
pub struct InferenceLane {
    inner: Arc<Mutex<InferenceClient>>,
}

impl InferenceLane {
    pub fn new(client: InferenceClient) -> Self {
        Self {
            inner: Arc::new(Mutex::new(client)),
        }
    }

    pub async fn complete(&self, prompt: &str) -> Result<String, FixError> {
        let client = self.inner.lock().await;
        client.complete(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_text() {
        let body = r#"{"choices":[{"text":"--- a/x.c\n+++ b/x.c\n"}]}"#;
        assert!(parse_completion(body).unwrap().starts_with("--- a/x.c"));
    }

    #[test]
    fn test_parse_completion_empty_choices() {
        assert_eq!(
            parse_completion(r#"{"choices":[]}"#),
            Err(FixError::InferenceEmptyResponse)
        );
    }

    #[test]
    fn test_parse_completion_whitespace_only() {
        assert_eq!(
            parse_completion(r#"{"choices":[{"text":"  \n "}]}"#),
            Err(FixError::InferenceEmptyResponse)
        );
    }

    #[test]
    fn test_parse_completion_garbage_is_unavailable() {
        assert!(matches!(
            parse_completion("not json"),
            Err(FixError::InferenceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_lane_tolerates_abandoned_waiter() {
        let lane = InferenceLane::new(InferenceClient::new(InferenceConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout_secs: 1,
            ..Default::default()
        }));

        // drop a queued call mid-wait, then confirm the lane still serves
        let abandoned = lane.complete("first");
        drop(abandoned);
        let result = lane.complete("second").await;
        assert!(matches!(
            result,
            Err(FixError::InferenceUnavailable(_)) | Err(FixError::InferenceTimeout(_))
        ));
    }
}
