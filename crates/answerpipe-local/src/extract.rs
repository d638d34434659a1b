use answerpipe_core::{MAX_CONTENT_CHARS, MIN_CANDIDATE_CHARS, UNTITLED};
use serde::Serialize;

/// One step of the content cascade: a CSS selector and the length its text must exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CascadeRule {
    pub selector: &'static str,
    pub min_chars: usize,
}

const fn rule(selector: &'static str) -> CascadeRule {
    CascadeRule {
        selector,
        min_chars: MIN_CANDIDATE_CHARS,
    }
}

/// Content selectors in priority order: semantic containers, common CMS content classes,
/// then bare paragraphs. The first rule whose text is long enough wins.
pub const CONTENT_CASCADE: &[CascadeRule] = &[
    rule("article"),
    rule("main"),
    rule(".content"),
    rule(".post-content"),
    rule(".entry-content"),
    rule("p"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "selector", rename_all = "snake_case")]
pub enum ContentOrigin {
    Selector(&'static str),
    Body,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedPage {
    pub title: String,
    /// Whitespace-collapsed text, at most `MAX_CONTENT_CHARS` characters.
    pub content: String,
    pub origin: ContentOrigin,
    /// Selectors evaluated before the cascade stopped, in order.
    pub attempted: Vec<&'static str>,
    pub truncated: bool,
    pub warnings: Vec<&'static str>,
}

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_non_content_element(name: &str) -> bool {
    matches!(name, "script" | "style" | "noscript" | "template")
}

/// Concatenated descendant text, skipping script/style payloads.
fn readable_text(el: &html_scraper::ElementRef) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| is_non_content_element(e.name())))
            .unwrap_or(false);
        if !hidden {
            out.push_str(text);
        }
    }
    out
}

fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    if max_chars == 0 {
        return ("".to_string(), !s.is_empty());
    }
    let mut out = String::new();
    for (n, ch) in s.chars().enumerate() {
        if n >= max_chars {
            return (out, true);
        }
        out.push(ch);
    }
    (out, false)
}

/// Text of every element matching `selector`, joined with single spaces and collapsed.
///
/// Returns `None` when the selector is invalid or matches nothing.
fn selector_text(doc: &html_scraper::Html, selector: &str) -> Option<String> {
    let sel = html_scraper::Selector::parse(selector).ok()?;
    let parts = doc
        .select(&sel)
        .map(|el| readable_text(&el))
        .collect::<Vec<_>>();
    if parts.is_empty() {
        return None;
    }
    Some(norm_ws(&parts.join(" ")))
}

fn first_text(doc: &html_scraper::Html, selector: &str) -> Option<String> {
    let sel = html_scraper::Selector::parse(selector).ok()?;
    let el = doc.select(&sel).next()?;
    let t = norm_ws(&readable_text(&el));
    (!t.is_empty()).then_some(t)
}

/// `<title>` text, else the first `<h1>`, else `UNTITLED`.
fn page_title(doc: &html_scraper::Html) -> String {
    let from_title = html_scraper::Selector::parse("title").ok().and_then(|sel| {
        doc.select(&sel)
            .map(|el| norm_ws(&readable_text(&el)))
            .find(|t| !t.is_empty())
    });
    from_title
        .or_else(|| first_text(doc, "h1"))
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn body_text(doc: &html_scraper::Html) -> String {
    selector_text(doc, "body").unwrap_or_else(|| norm_ws(&readable_text(&doc.root_element())))
}

/// Extract a title and best-effort body text using [`CONTENT_CASCADE`].
pub fn extract_page(html: &str) -> ExtractedPage {
    extract_page_with(html, CONTENT_CASCADE)
}

/// Extract using a caller-provided cascade. Rules are evaluated in order and the first
/// whose text length exceeds its threshold is accepted; later rules are not evaluated.
/// If none is accepted, the whole `<body>` text is used.
pub fn extract_page_with(html: &str, cascade: &[CascadeRule]) -> ExtractedPage {
    let doc = html_scraper::Html::parse_document(html);
    let title = page_title(&doc);

    let mut warnings = Vec::new();
    let mut attempted = Vec::new();
    let mut accepted: Option<(&'static str, String)> = None;
    for r in cascade {
        attempted.push(r.selector);
        let Some(text) = selector_text(&doc, r.selector) else {
            continue;
        };
        if text.chars().count() > r.min_chars {
            accepted = Some((r.selector, text));
            break;
        }
    }

    let (origin, full) = match accepted {
        Some((selector, text)) => (ContentOrigin::Selector(selector), text),
        None => {
            warnings.push("body_fallback");
            (ContentOrigin::Body, body_text(&doc))
        }
    };

    let (content, truncated) = truncate_chars(&full, MAX_CONTENT_CHARS);
    if truncated {
        warnings.push("content_truncated");
    }
    if content.is_empty() {
        warnings.push("empty_extraction");
    }

    ExtractedPage {
        title,
        content,
        origin,
        attempted,
        truncated,
        warnings,
    }
}
