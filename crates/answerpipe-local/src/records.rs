use crate::extract::{extract_page, ExtractedPage};
use answerpipe_core::{BrowserSession, Error, RenderRequest, Result, SourceRecord};
use futures_util::StreamExt;

async fn fetch_and_extract(session: &dyn BrowserSession, url: &str) -> Result<ExtractedPage> {
    let page = session.render(&RenderRequest::new(url)).await?;
    let html = page.html;
    // html5ever parsing is CPU-bound; keep it off the async workers.
    tokio::task::spawn_blocking(move || extract_page(&html))
        .await
        .map_err(|e| Error::Extract(format!("extract join failed: {e}")))
}

/// Fetch and extract one URL. Never fails: any error becomes a failed record.
pub async fn build_record(session: &dyn BrowserSession, url: &str) -> SourceRecord {
    match fetch_and_extract(session, url).await {
        Ok(ex) => {
            tracing::debug!(
                url,
                origin = ?ex.origin,
                chars = ex.content.chars().count(),
                "source extracted"
            );
            SourceRecord::extracted(url, ex.title, ex.content)
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "error scraping source");
            SourceRecord::failed(url, format!("Failed to scrape: {e}"))
        }
    }
}

/// One record per URL, in input order, with at most `max_parallel` URLs in flight.
pub async fn build_records(
    session: &dyn BrowserSession,
    urls: &[String],
    max_parallel: usize,
) -> Vec<SourceRecord> {
    // Collect first; a lazy `map` here leaves the future not `Send` for all lifetimes.
    let tasks: Vec<_> = urls.iter().map(|u| build_record(session, u)).collect();
    futures_util::stream::iter(tasks)
        .buffered(max_parallel.max(1))
        .collect()
        .await
}
