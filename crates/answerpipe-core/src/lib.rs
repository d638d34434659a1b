use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Navigation timeout applied to every page render.
pub const NAVIGATION_TIMEOUT_MS: u64 = 30_000;

/// Client signature sent with every page render.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Hard cap on extracted content per source (characters).
pub const MAX_CONTENT_CHARS: usize = 5_000;

/// A cascade candidate must produce strictly more than this many characters.
pub const MIN_CANDIDATE_CHARS: usize = 100;

/// Upper bound on rendered HTML we are willing to parse (characters).
pub const MAX_RENDERED_HTML_CHARS: usize = 2_000_000;

/// Title used when a page has neither `<title>` nor `<h1>` text.
pub const UNTITLED: &str = "Untitled";

/// Title used for sources that failed to fetch or extract.
pub const ERROR_TITLE: &str = "Error";

/// Completion model used unless configured otherwise.
pub const DEFAULT_MODEL: &str = "llama3-8b-8192";

/// Sampling temperature for every completion call. Kept low so answers stay close to the sources.
pub const COMPLETION_TEMPERATURE: f64 = 0.1;

/// Upper bound on generated tokens per answer.
pub const COMPLETION_MAX_TOKENS: u64 = 2048;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The request body could not be decoded at all.
    #[error("request body: {0}")]
    Decode(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("extract failed: {0}")]
    Extract(String),
    #[error("no usable content in any source")]
    NoUsableContent,
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("browser failed: {0}")]
    Browser(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    /// True for conditions caused by the caller's input rather than by us or a provider.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidRequest(_) | Error::NoUsableContent)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl RenderRequest {
    /// Render request with the fixed user agent and navigation timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: USER_AGENT.to_string(),
            timeout_ms: NAVIGATION_TIMEOUT_MS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedPage {
    pub url: String,
    pub final_url: String,
    pub status: Option<u16>,
    pub html: String,
    pub elapsed_ms: u64,
}

/// A browser-like session shared by every URL of one request.
///
/// Each `render` call must use its own isolated context (no cookies or storage shared with
/// sibling renders), and implementations must tolerate concurrent `render` calls.
#[async_trait::async_trait]
pub trait BrowserSession: Send + Sync {
    fn name(&self) -> &'static str;
    async fn render(&self, req: &RenderRequest) -> Result<RenderedPage>;
    /// Tear down the session. Called exactly once, after every render has finished.
    async fn close(&self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait BrowserLauncher: Send + Sync {
    fn name(&self) -> &'static str;
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

/// Per-URL outcome of fetch + extract. Built once, never mutated.
///
/// A record carrying an error always has empty content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRecord {
    url: String,
    title: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SourceRecord {
    pub fn extracted(url: impl Into<String>, title: impl Into<String>, content: String) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content,
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: ERROR_TITLE.to_string(),
            content: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// Usable for grounding: no error and non-empty content.
    pub fn is_usable(&self) -> bool {
        self.error.is_none() && self.has_content()
    }

    pub fn status(&self) -> SourceStatus {
        SourceStatus {
            url: self.url.clone(),
            title: self.title.clone(),
            has_content: self.has_content(),
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub url: String,
    pub title: String,
    pub has_content: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    /// Completion choices exactly as the provider returned them.
    pub answer: Vec<serde_json::Value>,
    pub sources: Vec<SourceStatus>,
    /// RFC 3339 instant at which the request completed.
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<serde_json::Value>,
}

#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync {
    fn name(&self) -> &'static str;
    async fn create_completion(&self, req: &CompletionRequest) -> Result<CompletionResponse>;
}
