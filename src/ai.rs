use anyhow::{anyhow, Result};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
};
use async_openai::Client as OpenAIClient;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::options::GenerationOptions;
use ollama_rs::Ollama;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, warn};

use crate::environment::{get_env_non_empty, get_env_parsed};
use crate::{LlmClient, TARGET_LLM_REQUEST};

const LLM_TIMEOUT: Duration = Duration::from_secs(120);
const EMBED_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: usize = 3;

/// Text generation over either backend. Which one is used depends only on
/// configuration; callers never branch on it.
pub struct SummaryService {
    pub client: LlmClient,
    pub model: String,
    pub temperature: f32,
}

impl SummaryService {
    /// OpenAI when `OPENAI_API_KEY` is configured, local Ollama otherwise.
    pub fn from_env() -> Self {
        let temperature: f32 = get_env_parsed("LLM_TEMPERATURE", 0.2);

        if let Some(api_key) = get_env_non_empty("OPENAI_API_KEY") {
            let client =
                OpenAIClient::with_config(OpenAIConfig::new().with_api_key(api_key));
            let model =
                get_env_non_empty("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
            return SummaryService {
                client: LlmClient::OpenAI(client),
                model,
                temperature,
            };
        }

        let host = get_env_non_empty("OLLAMA_HOST").unwrap_or_else(|| "localhost".to_string());
        let port: u16 = get_env_parsed("OLLAMA_PORT", 11434u16);
        let model = get_env_non_empty("OLLAMA_MODEL").unwrap_or_else(|| "llama3".to_string());
        SummaryService {
            client: LlmClient::Ollama(Ollama::new(host, port)),
            model,
            temperature,
        }
    }

    /// Generate a completion with retries, timeouts, and exponential
    /// backoff. Returns None when every attempt failed; callers leave the
    /// row for a later pass rather than propagating the failure.
    pub async fn generate(&self, prompt: &str) -> Option<String> {
        let mut backoff = 2;

        for retry_count in 0..MAX_RETRIES {
            let response_text = match &self.client {
                LlmClient::Ollama(ollama) => {
                    let mut request =
                        GenerationRequest::new(self.model.clone(), prompt.to_string());
                    request.options =
                        Some(GenerationOptions::default().temperature(self.temperature));

                    match timeout(LLM_TIMEOUT, ollama.generate(request)).await {
                        Ok(Ok(response)) => Some(response.response),
                        Ok(Err(err)) => {
                            warn!(target: TARGET_LLM_REQUEST, "Error generating response: {}", err);
                            None
                        }
                        Err(_) => {
                            warn!(target: TARGET_LLM_REQUEST, "LLM request timed out");
                            None
                        }
                    }
                }
                LlmClient::OpenAI(client) => {
                    let request =
                        match build_chat_request(&self.model, self.temperature, prompt) {
                            Ok(request) => request,
                            Err(err) => {
                                error!(target: TARGET_LLM_REQUEST, "Failed to build chat request: {}", err);
                                return None;
                            }
                        };

                    match timeout(LLM_TIMEOUT, client.chat().create(request)).await {
                        Ok(Ok(response)) => response
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|choice| choice.message.content),
                        Ok(Err(err)) => {
                            warn!(target: TARGET_LLM_REQUEST, "Error generating response: {}", err);
                            None
                        }
                        Err(_) => {
                            warn!(target: TARGET_LLM_REQUEST, "LLM request timed out");
                            None
                        }
                    }
                }
            };

            if let Some(text) = response_text {
                if !text.trim().is_empty() {
                    debug!(target: TARGET_LLM_REQUEST, "LLM response received ({} chars)", text.len());
                    return Some(text);
                }
            }

            if retry_count < MAX_RETRIES - 1 {
                debug!(target: TARGET_LLM_REQUEST, "Backing off for {} seconds before retry", backoff);
                sleep(Duration::from_secs(backoff)).await;
                backoff *= 2; // Exponential backoff
            }
        }

        error!(target: TARGET_LLM_REQUEST, "No response generated after {} retries", MAX_RETRIES);
        None
    }
}

fn build_chat_request(
    model: &str,
    temperature: f32,
    prompt: &str,
) -> Result<CreateChatCompletionRequest> {
    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .temperature(temperature)
        .messages([ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()?
            .into()])
        .build()?;
    Ok(request)
}

/// The embedding collaborator. Failure leaves the row in needs-embedding
/// state; the claim query hands it back on a later pass.
pub struct Embedder {
    client: OpenAIClient<OpenAIConfig>,
    model: String,
}

impl Embedder {
    pub fn from_env() -> Self {
        let config = match get_env_non_empty("OPENAI_API_KEY") {
            Some(api_key) => OpenAIConfig::new().with_api_key(api_key),
            None => OpenAIConfig::new(),
        };
        let model = get_env_non_empty("EMBEDDING_MODEL")
            .unwrap_or_else(|| "text-embedding-3-small".to_string());
        Embedder {
            client: OpenAIClient::with_config(config),
            model,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut backoff = 2;

        for retry_count in 0..MAX_RETRIES {
            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.model)
                .input(text.to_string())
                .build()?;

            match timeout(EMBED_TIMEOUT, self.client.embeddings().create(request)).await {
                Ok(Ok(response)) => {
                    let embedding = response
                        .data
                        .into_iter()
                        .next()
                        .map(|d| d.embedding)
                        .unwrap_or_default();
                    if embedding.is_empty() {
                        return Err(anyhow!("embedding service returned an empty vector"));
                    }
                    return Ok(embedding);
                }
                Ok(Err(err)) => {
                    warn!(target: TARGET_LLM_REQUEST, "Embedding request failed: {}", err);
                }
                Err(_) => {
                    warn!(target: TARGET_LLM_REQUEST, "Embedding request timed out");
                }
            }

            if retry_count < MAX_RETRIES - 1 {
                sleep(Duration::from_secs(backoff)).await;
                backoff *= 2;
            }
        }

        Err(anyhow!(
            "embedding request failed after {} retries",
            MAX_RETRIES
        ))
    }
}

/// Split a generated response into headline and summary: the first line is
/// the headline, everything after it the summary. Responses without a line
/// break are all summary, and the caller falls back to the article title.
pub fn parse_title_and_summary(text: &str) -> (Option<String>, String) {
    let clean = text
        .replace("[제목]", "")
        .replace("[요약]", "")
        .trim()
        .to_string();

    match clean.find('\n') {
        Some(idx) if idx > 0 => {
            let title = clean[..idx]
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .trim_start_matches(['-', '*'])
                .trim()
                .to_string();
            let summary = clean[idx..].trim().to_string();
            if title.is_empty() {
                (None, summary)
            } else {
                (Some(title), summary)
            }
        }
        _ => (None, clean),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headline_and_summary() {
        let (title, summary) = parse_title_and_summary("금리 인하 단행\n- 한국은행 결정\n- 시장 환영");
        assert_eq!(title.as_deref(), Some("금리 인하 단행"));
        assert!(summary.starts_with("- 한국은행"));
    }

    #[test]
    fn test_parse_strips_decoration() {
        let (title, _) = parse_title_and_summary("\"금리 인하 단행\"\n본문");
        assert_eq!(title.as_deref(), Some("금리 인하 단행"));

        let (title, _) = parse_title_and_summary("[제목] 금리 인하\n[요약] 본문");
        assert_eq!(title.as_deref(), Some("금리 인하"));
    }

    #[test]
    fn test_parse_without_newline_is_all_summary() {
        let (title, summary) = parse_title_and_summary("한 줄 응답");
        assert!(title.is_none());
        assert_eq!(summary, "한 줄 응답");
    }
}
