use crate::context::AggregatedContext;
use answerpipe_core::ChatMessage;

pub const SYSTEM_PROMPT: &str = "You are a helpful AI research assistant that provides accurate, well-cited answers based on provided sources. Always be transparent about your sources and limitations.";

/// The system and user messages sent to the completion model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system.clone()),
            ChatMessage::user(self.user.clone()),
        ]
    }
}

/// Interpolate the context and question into the fixed instruction template.
///
/// The wording is load-bearing for model behavior: nothing here rewrites or shortens
/// either input.
pub fn compose_prompt(question: &str, context: &AggregatedContext) -> Prompt {
    let user = format!(
        "You are an AI research assistant. Based on the following sources, provide a comprehensive and accurate answer to the user's question. Always cite your sources and be transparent about the information you're using.

Sources:
{context}

Question: {question}

Instructions:
1. Provide a detailed, well-structured answer based on the source material
2. Include specific citations to the sources (mention the source URL or title)
3. If the sources don't contain enough information to fully answer the question, clearly state this
4. Highlight any contradictions or different perspectives found in the sources
5. Be objective and factual in your response
6. Format your response clearly with proper paragraphs

Answer:",
        context = context.text(),
    );
    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}
