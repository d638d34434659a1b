use answerpipe_core::{
    BrowserLauncher, BrowserSession, Error, RenderRequest, RenderedPage, Result,
    MAX_RENDERED_HTML_CHARS,
};
use futures_util::StreamExt;
use std::time::Duration;

/// Plain-HTTP stand-in for a browser: no JavaScript, one GET per render.
///
/// Useful for static sites and environments without Node/Playwright.
#[derive(Debug, Clone, Default)]
pub struct HttpLauncher;

#[async_trait::async_trait]
impl BrowserLauncher for HttpLauncher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(HttpSession::new()?))
    }
}

#[derive(Debug, Clone)]
pub struct HttpSession {
    client: reqwest::Client,
}

impl HttpSession {
    pub fn new() -> Result<Self> {
        // No cookie store: renders never share state.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Browser(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl BrowserSession for HttpSession {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn render(&self, req: &RenderRequest) -> Result<RenderedPage> {
        let t0 = std::time::Instant::now();
        let url = reqwest::Url::parse(&req.url).map_err(|e| Error::Fetch(e.to_string()))?;
        let resp = self
            .client
            .get(url)
            .timeout(req.timeout())
            .header(reqwest::header::USER_AGENT, &req.user_agent)
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let final_url = resp.url().to_string();
        let status = resp.status().as_u16();

        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
            if bytes.len().saturating_add(chunk.len()) > MAX_RENDERED_HTML_CHARS * 4 {
                return Err(Error::Fetch(format!(
                    "response body too large (> {MAX_RENDERED_HTML_CHARS} chars)"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        let html = String::from_utf8_lossy(&bytes).to_string();
        if html.chars().count() > MAX_RENDERED_HTML_CHARS {
            return Err(Error::Fetch(format!(
                "response body too large (> {MAX_RENDERED_HTML_CHARS} chars)"
            )));
        }

        Ok(RenderedPage {
            url: req.url.clone(),
            final_url,
            status: Some(status),
            html,
            elapsed_ms: t0.elapsed().as_millis() as u64,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
