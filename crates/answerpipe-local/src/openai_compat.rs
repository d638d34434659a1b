use answerpipe_core::{CompletionClient, CompletionRequest, CompletionResponse, Error, Result};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai";

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn base_url_from_env() -> Option<String> {
    env("ANSWERPIPE_LLM_BASE_URL")
}

/// `ANSWERPIPE_LLM_API_KEY`, falling back to the provider-native `GROQ_API_KEY`.
pub fn api_key_from_env() -> Option<String> {
    env("ANSWERPIPE_LLM_API_KEY").or_else(|| env("GROQ_API_KEY"))
}

/// Client for any `/v1/chat/completions` endpoint (Groq by default).
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Llm(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(
            base_url_from_env().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key_from_env(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint_chat_completions(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// Short provider-side reason from an error body, if it has the usual `{error:{message}}` shape.
fn provider_error_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let m = v
        .pointer("/error/message")
        .or_else(|| v.get("error"))
        .and_then(|x| x.as_str())?;
    let m: String = m.chars().take(300).collect();
    (!m.trim().is_empty()).then_some(m)
}

#[async_trait::async_trait]
impl CompletionClient for OpenAiCompatClient {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    async fn create_completion(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let mut rb = self
            .client
            .post(self.endpoint_chat_completions())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = rb
            .json(req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Llm(match provider_error_message(&body) {
                Some(m) => format!("chat.completions HTTP {status}: {m}"),
                None => format!("chat.completions HTTP {status}"),
            }));
        }

        resp.json::<CompletionResponse>()
            .await
            .map_err(|e| Error::Llm(e.to_string()))
    }
}
