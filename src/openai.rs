use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::debug;

use crate::agent::{AgentError, ModelClient};
use crate::prompt::PromptRequest;
use crate::response::strip_code_fences;

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_base: String, // e.g. "https://api.openai.com/v1"
    pub api_key: String,  // env OPENAI_API_KEY
    pub model: String,    // e.g. "gpt-4o"
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".into()),
            temperature: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Chat-completions backed model client.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    cfg: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(cfg: OpenAiConfig) -> Result<Self, AgentError> {
        if cfg.api_key.is_empty() {
            return Err(AgentError::Model("OPENAI_API_KEY missing".into()));
        }
        let http = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| AgentError::Model(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    fn messages(request: &PromptRequest) -> Vec<Value> {
        let mut messages = vec![
            json!({ "role": "system", "content": request.system_prompt }),
            json!({ "role": "user", "content": request.test_goal }),
        ];
        if let Some(context) = &request.test_context {
            messages.push(json!({ "role": "system", "content": context }));
        }
        if let Some(shot) = &request.screenshot {
            let url = format!("data:{};base64,{}", shot.mime_type, B64.encode(&shot.data));
            messages.push(json!({
                "role": "user",
                "content": [{ "type": "image_url", "image_url": { "url": url, "detail": "high" } }]
            }));
        }
        messages.push(json!({ "role": "user", "content": request.view_hierarchy }));
        messages
    }

    fn parse_output(v: &Value) -> Result<String, AgentError> {
        // { choices: [ { message: { content } } ] }
        let content = v
            .pointer("/choices/0/message/content")
            .and_then(|x| x.as_str())
            .ok_or_else(|| AgentError::Model("openai response missing content".into()))?;
        Ok(strip_code_fences(content))
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn prompt(&self, request: &PromptRequest) -> Result<String, AgentError> {
        let url = format!("{}/chat/completions", self.cfg.api_base.trim_end_matches('/'));
        let mut body = json!({
            "model": self.cfg.model,
            "messages": Self::messages(request),
        });
        if let Some(t) = self.cfg.temperature {
            body["temperature"] = json!(t);
        }

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Model(format!("openai request failed: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::Model(format!("openai response unreadable: {e}")))?;
        if !status.is_success() {
            return Err(AgentError::Model(format!("openai returned {status}: {text}")));
        }
        let v: Value = serde_json::from_str(&text)
            .map_err(|e| AgentError::Model(format!("openai response invalid: {e}")))?;
        let reply = Self::parse_output(&v)?;
        debug!(model = %self.cfg.model, chars = reply.len(), "model replied");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Screenshot;
    use mockito::Matcher;

    fn request() -> PromptRequest {
        PromptRequest {
            system_prompt: "be a tester".into(),
            test_goal: "log in".into(),
            test_context: Some("The test has just started.".into()),
            screenshot: Some(Screenshot { mime_type: "image/png".into(), data: vec![1, 2, 3] }),
            view_hierarchy: "Button {{0, 0}, {10, 10}}".into(),
        }
    }

    fn config(base: String) -> OpenAiConfig {
        OpenAiConfig {
            api_base: base,
            api_key: "sk-test".into(),
            model: "gpt-4o".into(),
            temperature: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn requires_api_key() {
        let cfg = OpenAiConfig { api_key: String::new(), ..config("http://localhost".into()) };
        assert!(OpenAiClient::new(cfg).is_err());
    }

    #[test]
    fn messages_follow_prompt_layout() {
        let messages = OpenAiClient::messages(&request());
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "log in");
        assert_eq!(messages[2]["role"], "system");
        assert_eq!(
            messages[3]["content"][0]["image_url"]["url"],
            "data:image/png;base64,AQID"
        );
        assert_eq!(messages[4]["content"], "Button {{0, 0}, {10, 10}}");
    }

    #[tokio::test]
    async fn returns_fence_stripped_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({ "model": "gpt-4o" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{ "message": { "role": "assistant",
                        "content": "```json\n{\"description\": \"done\"}\n```" } }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = OpenAiClient::new(config(server.url())).unwrap();
        let reply = client.prompt(&request()).await.unwrap();
        assert_eq!(reply, "{\"description\": \"done\"}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("upstream down")
            .create_async()
            .await;

        let client = OpenAiClient::new(config(server.url())).unwrap();
        let err = client.prompt(&request()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "model error: openai returned 500 Internal Server Error: upstream down"
        );
    }

    #[tokio::test]
    async fn missing_content_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(config(server.url())).unwrap();
        let err = client.prompt(&request()).await.unwrap_err();
        assert!(matches!(err, AgentError::Model(_)));
    }
}
