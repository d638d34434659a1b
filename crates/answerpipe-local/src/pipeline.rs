use crate::completion::complete;
use crate::context::aggregate_context;
use crate::prompt::compose_prompt;
use crate::records::build_records;
use answerpipe_core::{
    AnswerResult, BrowserLauncher, CompletionClient, Error, Result, SourceRecord, DEFAULT_MODEL,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::sync::Arc;

pub const DEFAULT_MAX_PARALLEL_URLS: usize = 3;

/// Inbound request body. Fields are optional so that absence is a validation error,
/// not a deserialization error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub urls: Option<Vec<String>>,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            question: Some(question.into()),
            urls: Some(urls),
        }
    }

    /// Question and URL list, or `InvalidRequest` if either is missing or empty.
    ///
    /// Only the empty string counts as an empty question; whitespace is passed through.
    pub fn validate(self) -> Result<(String, Vec<String>)> {
        match (self.question, self.urls) {
            (Some(q), Some(urls)) if !q.is_empty() && !urls.is_empty() => Ok((q, urls)),
            _ => Err(Error::InvalidRequest(
                "Question and URLs are required.".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model: String,
    /// Upper bound on URLs fetched at once; 1 means strictly sequential.
    pub max_parallel_urls: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_parallel_urls: DEFAULT_MAX_PARALLEL_URLS,
        }
    }
}

/// Question + URLs in, cited answer out.
///
/// Holds no per-request state: each call launches its own browser session and closes it
/// once every URL has been processed.
#[derive(Clone)]
pub struct AnswerEngine {
    launcher: Arc<dyn BrowserLauncher>,
    completion: Arc<dyn CompletionClient>,
    cfg: PipelineConfig,
}

impl AnswerEngine {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        completion: Arc<dyn CompletionClient>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            launcher,
            completion,
            cfg,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub async fn answer(&self, req: AnswerRequest) -> Result<AnswerResult> {
        let (question, urls) = req.validate()?;
        tracing::info!(
            urls = urls.len(),
            backend = self.launcher.name(),
            "answering question"
        );

        let records = self.gather_sources(&urls).await?;
        let context = aggregate_context(&records);
        if !context.has_usable_content() {
            tracing::info!(urls = urls.len(), "no source produced usable content");
            return Err(Error::NoUsableContent);
        }

        let prompt = compose_prompt(&question, &context);
        let choices = complete(self.completion.as_ref(), &self.cfg.model, &prompt).await?;
        Ok(assemble_response(choices, &records))
    }

    /// One record per URL in input order. Fails only if the browser cannot be launched.
    pub async fn gather_sources(&self, urls: &[String]) -> Result<Vec<SourceRecord>> {
        let session = self.launcher.launch().await?;
        let records = build_records(session.as_ref(), urls, self.cfg.max_parallel_urls).await;
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "browser session did not close cleanly");
        }
        let usable = records.iter().filter(|r| r.is_usable()).count();
        tracing::info!(total = records.len(), usable, "sources gathered");
        Ok(records)
    }
}

pub fn assemble_response(choices: Vec<serde_json::Value>, records: &[SourceRecord]) -> AnswerResult {
    assemble_response_at(choices, records, Utc::now())
}

/// Every record is reported, failed ones included.
pub fn assemble_response_at(
    choices: Vec<serde_json::Value>,
    records: &[SourceRecord],
    now: DateTime<Utc>,
) -> AnswerResult {
    AnswerResult {
        answer: choices,
        sources: records.iter().map(SourceRecord::status).collect(),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}
