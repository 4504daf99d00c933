//! Chat completions against a local Ollama daemon, plus prompt helpers for
//! retrieval-augmented answers.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::OllamaSettings;
use crate::http::{error_body, should_retry};
use crate::knowledge::SearchHit;

/// System prompt used for knowledge-base answers.
pub const ANSWER_SYSTEM_PROMPT: &str = "You answer questions about summit policy documents using only the supplied context chunks. Cite sources as [^n] where n is the chunk number and never invent references.";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Sampling parameters sent as Ollama `options`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate (`num_predict`).
    pub max_tokens: usize,
    /// Sequences that stop generation.
    pub stop: Vec<String>,
}

impl GenerationOptions {
    /// Options taken from the configured defaults.
    pub fn from_settings(settings: &OllamaSettings) -> Self {
        Self {
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            stop: Vec::new(),
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_settings(&OllamaSettings::default())
    }
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model.
    System,
    /// Human turn.
    User,
    /// Model turn.
    Assistant,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub content: String,
}

impl ChatMessage {
    /// A user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
        }
    }
}

/// Blocking Ollama chat client.
pub struct OllamaLlm {
    client: Client,
    base_url: String,
    model: String,
    max_retries: usize,
    retry_delay: Duration,
}

impl OllamaLlm {
    /// Builds a client for `model` served at `base_url`.
    pub fn new(base_url: &str, model: String, timeout: Duration, max_retries: usize) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "Ollama base URL must be an http(s) URL"
        );
        anyhow::ensure!(!model.trim().is_empty(), "missing Ollama chat model name");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Ollama HTTP client")?;
        tracing::info!(model = %model, "initialized Ollama chat client");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_retries: max_retries.max(1),
            retry_delay: Duration::from_secs(2),
        })
    }

    /// Builds a client for the configured chat model.
    pub fn from_settings(settings: &OllamaSettings) -> Result<Self> {
        Self::new(
            &settings.base_url,
            settings.default_model.clone(),
            settings.timeout(),
            settings.max_retries,
        )
    }

    /// Overrides the pause between attempts.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Chat model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single-turn completion.
    pub fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        options: &GenerationOptions,
    ) -> Result<String> {
        self.generate_with_context(prompt, &[], system, options)
    }

    /// Completion that replays `history` before the new user turn.
    pub fn generate_with_context(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        system: Option<&str>,
        options: &GenerationOptions,
    ) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(prompt));

        let request = ChatRequest {
            model: &self.model,
            messages: &messages,
            options: ChatOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
                stop: (!options.stop.is_empty()).then_some(options.stop.as_slice()),
            },
            stream: false,
        };
        let parsed = self.post_chat(&request)?;
        Ok(parsed.message.content)
    }

    fn post_chat(&self, request: &ChatRequest<'_>) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            tracing::debug!(%url, attempt, max = self.max_retries, "sending chat request");
            let failure = match self.client.post(&url).json(request).send() {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json().context("failed to parse Ollama chat response");
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = error_body(resp);
                    let err = anyhow::anyhow!("Ollama returned {}: {}", status, body);
                    if !should_retry(status) {
                        return Err(err);
                    }
                    err
                }
                Err(err) => anyhow::Error::new(err).context(format!("failed to call {url}")),
            };
            if attempt >= self.max_retries {
                tracing::error!(%url, attempts = attempt, "all chat attempts failed");
                return Err(failure);
            }
            tracing::warn!(error = %failure, attempt, "chat request failed; retrying");
            thread::sleep(self.retry_delay);
        }
    }

    /// True when the daemon answers `GET /api/tags`.
    pub fn check_health(&self) -> bool {
        match self.fetch_tags(HEALTH_TIMEOUT) {
            Ok(_) => {
                tracing::info!("Ollama service is healthy");
                true
            }
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "Ollama health check failed");
                false
            }
        }
    }

    /// Names of the models installed in the daemon.
    pub fn list_models(&self) -> Result<Vec<String>> {
        let tags = self.fetch_tags(Duration::from_secs(10))?;
        let models: Vec<String> = tags.models.into_iter().map(|model| model.name).collect();
        tracing::info!(?models, "available Ollama models");
        Ok(models)
    }

    fn fetch_tags(&self, timeout: Duration) -> Result<TagsResponse> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .with_context(|| format!("failed to call {url}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = error_body(resp);
            anyhow::bail!("Ollama returned {}: {}", status, body);
        }
        resp.json().context("failed to parse Ollama tags response")
    }
}

/// User prompt for a retrieval-augmented answer.
pub fn build_answer_prompt(question: &str, hits: &[SearchHit], max_words: Option<usize>) -> String {
    let mut prompt = String::new();
    prompt.push_str("Context:\n");
    prompt.push_str(&render_context(hits));
    prompt.push_str("\nQuestion:\n");
    prompt.push_str(question);
    prompt.push_str("\n\nInstructions:\n1. Give a direct answer in 1-2 sentences referencing citations.\n2. Add a short bullet list of supporting facts with citations.\n3. Say so plainly if the context does not answer the question.\n");
    if let Some(limit) = max_words {
        prompt.push_str(&format!("4. Limit the answer to roughly {limit} words.\n"));
    }
    prompt
}

/// Numbered context block, one entry per hit.
pub fn render_context(hits: &[SearchHit]) -> String {
    let mut out = String::new();
    for (rank, hit) in hits.iter().enumerate() {
        let meta = &hit.metadata;
        out.push_str(&format!(
            "[^{}] Source: {} | Chunk: {} | Sector: {} | Score: {:.4}\n{}\n---\n",
            rank + 1,
            meta.source.as_deref().unwrap_or("(unknown)"),
            meta.chunk_index
                .map(|idx| idx.to_string())
                .unwrap_or_else(|| "?".to_string()),
            meta.sector.as_deref().unwrap_or("n/a"),
            hit.score,
            hit.content.trim()
        ));
    }
    out
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    options: ChatOptions<'a>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatOptions<'a> {
    temperature: f32,
    num_predict: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::HitMetadata;

    fn hit(source: &str, index: u64, content: &str) -> SearchHit {
        SearchHit {
            id: format!("{source}-{index}"),
            score: 0.87654,
            content: content.to_string(),
            metadata: HitMetadata {
                source: Some(source.to_string()),
                chunk_index: Some(index),
                sector: Some("energy".to_string()),
                ..HitMetadata::default()
            },
        }
    }

    #[test]
    fn context_numbers_hits_in_rank_order() {
        let hits = vec![
            hit("data/raw/energy.pdf", 3, "  Solar targets.  "),
            hit("data/raw/mining.txt", 0, "Mining code."),
        ];
        let context = render_context(&hits);
        assert!(context.starts_with(
            "[^1] Source: data/raw/energy.pdf | Chunk: 3 | Sector: energy | Score: 0.8765\nSolar targets.\n---\n"
        ));
        assert!(context.contains("[^2] Source: data/raw/mining.txt | Chunk: 0"));
    }

    #[test]
    fn prompt_includes_question_and_word_limit() {
        let prompt = build_answer_prompt("What is WAPP?", &[hit("a.txt", 0, "WAPP")], Some(80));
        assert!(prompt.contains("Question:\nWhat is WAPP?"));
        assert!(prompt.contains("roughly 80 words"));
        assert!(!build_answer_prompt("q", &[], None).contains("words."));
    }

    #[test]
    fn chat_request_omits_empty_stop_list() {
        let messages = vec![ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "qwen",
            messages: &messages,
            options: ChatOptions {
                temperature: 0.5,
                num_predict: 16,
                stop: None,
            },
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "qwen",
                "messages": [{"role": "user", "content": "hi"}],
                "options": {"temperature": 0.5, "num_predict": 16},
                "stream": false
            })
        );
    }
}
