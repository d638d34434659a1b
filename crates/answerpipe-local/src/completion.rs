use crate::prompt::Prompt;
use answerpipe_core::{
    CompletionClient, CompletionRequest, Error, Result, COMPLETION_MAX_TOKENS,
    COMPLETION_TEMPERATURE,
};

/// Low temperature and a fixed token ceiling: we want extractive, factual answers.
pub fn completion_request(model: &str, prompt: &Prompt) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        messages: prompt.messages(),
        temperature: COMPLETION_TEMPERATURE,
        max_tokens: COMPLETION_MAX_TOKENS,
    }
}

/// Submit the prompt and return the provider's choices verbatim.
///
/// Any failure is reported as `Error::Llm`; there is no retry.
pub async fn complete(
    client: &dyn CompletionClient,
    model: &str,
    prompt: &Prompt,
) -> Result<Vec<serde_json::Value>> {
    let req = completion_request(model, prompt);
    let resp = client.create_completion(&req).await.map_err(|e| match e {
        Error::Llm(m) => Error::Llm(m),
        other => Error::Llm(other.to_string()),
    })?;
    tracing::debug!(
        provider = client.name(),
        model,
        choices = resp.choices.len(),
        "completion received"
    );
    Ok(resp.choices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeCompletion;

    fn prompt() -> Prompt {
        Prompt {
            system: "s".to_string(),
            user: "u".to_string(),
        }
    }

    #[test]
    fn request_uses_fixed_sampling_parameters() {
        let r = completion_request("llama3-8b-8192", &prompt());
        assert_eq!(r.model, "llama3-8b-8192");
        assert_eq!(r.temperature, 0.1);
        assert_eq!(r.max_tokens, 2048);
        assert_eq!(r.messages.len(), 2);
    }

    #[tokio::test]
    async fn choices_are_returned_verbatim() {
        let c = FakeCompletion::new();
        let choices = complete(&c, "m", &prompt()).await.unwrap();
        assert_eq!(choices.len(), 1);
        assert_eq!(
            choices[0]["message"]["content"].as_str(),
            Some("grounded answer")
        );
        assert_eq!(choices[0]["finish_reason"].as_str(), Some("stop"));
    }

    #[tokio::test]
    async fn provider_failures_become_llm_errors() {
        let c = FakeCompletion::failing("HTTP 401");
        let r = complete(&c, "m", &prompt()).await;
        assert!(matches!(r, Err(Error::Llm(m)) if m == "HTTP 401"));
    }
}
