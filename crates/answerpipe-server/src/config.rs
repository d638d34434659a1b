use crate::rate_limit::{GovernorLimiter, DEFAULT_LIMIT, DEFAULT_WINDOW_S};
use answerpipe_core::{Result, DEFAULT_MODEL};
use answerpipe_local::openai_compat::{self, OpenAiCompatClient};
use answerpipe_local::pipeline::DEFAULT_MAX_PARALLEL_URLS;
use answerpipe_local::{AnswerEngine, FetchBackendKind, PipelineConfig};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Settings shared by every command that runs the pipeline.
///
/// The completion API key is read from the environment only
/// (`ANSWERPIPE_LLM_API_KEY`, else `GROQ_API_KEY`) so it never appears in argv.
#[derive(clap::Args, Debug, Clone)]
pub struct PipelineArgs {
    /// How pages are rendered. Allowed: playwright, http
    #[arg(long, env = "ANSWERPIPE_FETCH_BACKEND", default_value = "playwright")]
    pub fetch_backend: String,
    /// Maximum URLs fetched concurrently per request (1 = sequential).
    #[arg(long, env = "ANSWERPIPE_MAX_PARALLEL_URLS", default_value_t = DEFAULT_MAX_PARALLEL_URLS)]
    pub max_parallel_urls: usize,
    /// Node.js binary used to drive Playwright.
    #[arg(long, env = "ANSWERPIPE_NODE", default_value = "node")]
    pub node_bin: String,
    /// Base URL of an OpenAI-compatible chat completions API.
    #[arg(long, env = "ANSWERPIPE_LLM_BASE_URL", default_value = openai_compat::DEFAULT_BASE_URL)]
    pub llm_base_url: String,
    /// Completion model name.
    #[arg(long, env = "ANSWERPIPE_LLM_MODEL", default_value = DEFAULT_MODEL)]
    pub llm_model: String,
}

impl PipelineArgs {
    pub fn fetch_backend_kind(&self) -> Result<FetchBackendKind> {
        self.fetch_backend.parse()
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            model: self.llm_model.clone(),
            max_parallel_urls: self.max_parallel_urls.clamp(1, 32),
        }
    }

    pub fn completion_client(&self) -> Result<OpenAiCompatClient> {
        OpenAiCompatClient::new(self.llm_base_url.clone(), openai_compat::api_key_from_env())
    }

    pub fn build_engine(&self) -> Result<AnswerEngine> {
        let launcher = self.fetch_backend_kind()?.launcher(&self.node_bin);
        let completion = Arc::new(self.completion_client()?);
        if !completion.has_api_key() {
            tracing::warn!("no completion API key configured (ANSWERPIPE_LLM_API_KEY / GROQ_API_KEY)");
        }
        Ok(AnswerEngine::new(
            launcher,
            completion,
            self.pipeline_config(),
        ))
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct RateLimitArgs {
    /// Requests a client IP may burst; capacity refills evenly over the window.
    #[arg(long, env = "ANSWERPIPE_RATE_LIMIT", default_value_t = DEFAULT_LIMIT)]
    pub rate_limit: u64,
    /// Window length in seconds.
    #[arg(long, env = "ANSWERPIPE_RATE_WINDOW_S", default_value_t = DEFAULT_WINDOW_S)]
    pub rate_window_s: u64,
}

impl RateLimitArgs {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.rate_window_s.max(1))
    }

    pub fn limiter(&self) -> GovernorLimiter {
        GovernorLimiter::new(self.rate_limit, self.window())
    }
}

/// Load a dotenv file unless `ANSWERPIPE_DOTENV=0`.
///
/// `ANSWERPIPE_ENV_FILE` names an explicit file; otherwise `.env` is searched upward from
/// the working directory. Variables already set in the process are never overridden.
/// Returns the loaded path, if any.
pub fn load_dotenv() -> Option<std::path::PathBuf> {
    let disabled = matches!(
        std::env::var("ANSWERPIPE_DOTENV")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "0" | "false" | "no" | "off"
    );
    if disabled {
        return None;
    }
    match std::env::var("ANSWERPIPE_ENV_FILE") {
        Ok(p) if !p.trim().is_empty() => {
            let p = std::path::PathBuf::from(p.trim());
            dotenvy::from_path(&p).ok().map(|_| p)
        }
        _ => dotenvy::dotenv().ok(),
    }
}
