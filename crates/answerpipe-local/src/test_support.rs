use answerpipe_core::{
    BrowserLauncher, BrowserSession, ChatRole, CompletionClient, CompletionRequest,
    CompletionResponse, Error, RenderRequest, RenderedPage, Result,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    renders: AtomicUsize,
    launches: AtomicUsize,
    closes: AtomicUsize,
}

/// In-memory browser: canned HTML or errors per URL, optional per-URL delays.
#[derive(Debug, Clone, Default)]
pub struct FakeBrowser {
    pages: HashMap<String, std::result::Result<String, String>>,
    delays: HashMap<String, Duration>,
    counters: Arc<Counters>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), Ok(html.into()));
        self
    }

    pub fn fail(mut self, url: &str, message: &str) -> Self {
        self.pages.insert(url.to_string(), Err(message.to_string()));
        self
    }

    pub fn delay(mut self, url: &str, d: Duration) -> Self {
        self.delays.insert(url.to_string(), d);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.counters.renders.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BrowserSession for FakeBrowser {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn render(&self, req: &RenderRequest) -> Result<RenderedPage> {
        let c = &self.counters;
        c.renders.fetch_add(1, Ordering::SeqCst);
        let now = c.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        c.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Yield so sibling renders get a chance to start.
        tokio::time::sleep(
            self.delays
                .get(&req.url)
                .copied()
                .unwrap_or(Duration::from_millis(5)),
        )
        .await;
        c.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.pages.get(&req.url) {
            Some(Ok(html)) => Ok(RenderedPage {
                url: req.url.clone(),
                final_url: req.url.clone(),
                status: Some(200),
                html: html.clone(),
                elapsed_ms: 0,
            }),
            Some(Err(m)) => Err(Error::Fetch(m.clone())),
            None => Err(Error::Fetch(format!("net::ERR_NAME_NOT_RESOLVED at {}", req.url))),
        }
    }

    async fn close(&self) -> Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrowserLauncher for FakeBrowser {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.clone()))
    }
}

/// Completion client that records requests and returns a fixed reply (or error).
#[derive(Debug, Clone, Default)]
pub struct FakeCompletion {
    fail_with: Option<String>,
    seen: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl FakeCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last_user_message(&self) -> Option<String> {
        let seen = self.seen.lock().unwrap();
        seen.last()?
            .messages
            .iter()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.seen.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl CompletionClient for FakeCompletion {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_completion(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        self.seen.lock().unwrap().push(req.clone());
        if let Some(m) = &self.fail_with {
            return Err(Error::Llm(m.clone()));
        }
        Ok(CompletionResponse {
            choices: vec![serde_json::json!({
                "index": 0,
                "message": { "role": "assistant", "content": "grounded answer" },
                "finish_reason": "stop"
            })],
        })
    }
}
