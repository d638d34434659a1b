use answerpipe_core::SourceRecord;

/// Grounding text built from every usable source of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedContext {
    text: String,
    sources_used: usize,
}

impl AggregatedContext {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sources_used(&self) -> usize {
        self.sources_used
    }

    pub fn has_usable_content(&self) -> bool {
        self.sources_used > 0
    }
}

pub fn format_source_block(record: &SourceRecord) -> String {
    format!(
        "Source: {} ({})\nContent: {}",
        record.title(),
        record.url(),
        record.content()
    )
}

/// Drop failed and empty records; render the rest as blank-line separated blocks.
pub fn aggregate_context(records: &[SourceRecord]) -> AggregatedContext {
    let blocks = records
        .iter()
        .filter(|r| r.is_usable())
        .map(format_source_block)
        .collect::<Vec<_>>();
    AggregatedContext {
        sources_used: blocks.len(),
        text: blocks.join("\n\n"),
    }
}
