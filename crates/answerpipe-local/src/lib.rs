use answerpipe_core::{BrowserLauncher, Error};
use std::str::FromStr;
use std::sync::Arc;

pub mod completion;
pub mod context;
pub mod extract;
pub mod fetch_http;
pub mod openai_compat;
pub mod pipeline;
pub mod prompt;
pub mod records;
pub mod render_playwright;
#[cfg(test)]
mod test_support;

pub use pipeline::{AnswerEngine, AnswerRequest, PipelineConfig};

/// Which `BrowserLauncher` renders pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchBackendKind {
    /// Headless Chromium via Node + Playwright (executes JavaScript).
    Playwright,
    /// Single HTTP GET per URL (no JavaScript).
    Http,
}

impl FetchBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchBackendKind::Playwright => "playwright",
            FetchBackendKind::Http => "http",
        }
    }

    pub fn launcher(self, node_bin: &str) -> Arc<dyn BrowserLauncher> {
        match self {
            FetchBackendKind::Playwright => {
                Arc::new(render_playwright::PlaywrightLauncher::new(node_bin))
            }
            FetchBackendKind::Http => Arc::new(fetch_http::HttpLauncher),
        }
    }
}

impl FromStr for FetchBackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "playwright" | "browser" => Ok(FetchBackendKind::Playwright),
            "http" | "local" => Ok(FetchBackendKind::Http),
            other => Err(Error::NotSupported(format!(
                "unknown fetch backend {other:?} (allowed: playwright, http)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_backend_parses_known_names() {
        assert_eq!(
            "Playwright".parse::<FetchBackendKind>().unwrap(),
            FetchBackendKind::Playwright
        );
        assert_eq!(
            " http ".parse::<FetchBackendKind>().unwrap(),
            FetchBackendKind::Http
        );
        assert!(matches!(
            "firecrawl".parse::<FetchBackendKind>(),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn launcher_matches_backend() {
        assert_eq!(FetchBackendKind::Http.launcher("node").name(), "http");
        assert_eq!(
            FetchBackendKind::Playwright.launcher("node").name(),
            "playwright"
        );
    }
}
