//! Ollama-backed sentiment classifier.
//!
//! Each batch goes out as one chat request with the messages numbered from 1;
//! the model answers with one JSON object per line.

use super::SentimentClassifier;
use crate::config::ClassifierConfig;
use crate::models::{Classification, SentimentLabel};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Message in the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// One line of the model's answer.
#[derive(Debug, Deserialize)]
struct LabelLine {
    index: usize,
    label: String,
    confidence: f64,
}

/// Sentiment classifier talking to a local Ollama server.
pub struct OllamaClassifier {
    config: ClassifierConfig,
    http_client: reqwest::Client,
}

impl OllamaClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        info!(
            "Initializing classifier with model {} at {}",
            config.model, config.ollama_url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Send one prompt and return the model's raw answer.
    async fn send_prompt(&self, prompt: String) -> Result<String> {
        let url = format!("{}/api/chat", self.config.ollama_url.trim_end_matches('/'));

        let request = OllamaChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Request timed out after {}s", self.config.timeout_seconds)
                } else if e.is_connect() {
                    anyhow::anyhow!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.config.ollama_url
                    )
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(chat_response.message.content)
    }
}

impl SentimentClassifier for OllamaClassifier {
    async fn classify(&self, texts: &[String]) -> Result<Vec<Classification>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let prompt = build_prompt(texts);
        let attempts = self.config.retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            debug!(
                "Classifying {} messages (attempt {}/{})",
                texts.len(),
                attempt,
                attempts
            );

            let result = self
                .send_prompt(prompt.clone())
                .await
                .and_then(|answer| parse_classifications(&answer, texts.len()));

            match result {
                Ok(labels) => return Ok(labels),
                Err(e) => {
                    warn!("Classification attempt {} failed: {:#}", attempt, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("no classification attempt was made"))
            .context(format!("giving up after {} attempts", attempts)))
    }
}

/// Number the messages from 1, one per line.
fn build_prompt(texts: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Classify the sentiment of each numbered message.\n\n");
    prompt.push_str("For each message, output one JSON object per line in this exact format:\n");
    prompt.push_str(r#"{"index": 1, "label": "positive", "confidence": 0.93}"#);
    prompt.push_str("\n\nlabel is one of positive, negative, neutral; confidence is between 0 and 1.\n");
    prompt.push_str("Only output JSON, no other text.\n\n");
    prompt.push_str("=== MESSAGES ===\n");

    for (i, text) in texts.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, text));
    }

    prompt.push_str("=== END OF MESSAGES ===\n");
    prompt
}

/// Parse the model's JSON-lines answer into exactly `expected` classifications.
///
/// Lines that are not JSON objects are skipped; a missing index is an error.
pub fn parse_classifications(response: &str, expected: usize) -> Result<Vec<Classification>> {
    let mut slots: Vec<Option<Classification>> = vec![None; expected];

    for line in response.lines() {
        let line = line.trim().trim_end_matches(',');
        if !line.starts_with('{') {
            continue;
        }

        let Ok(parsed) = serde_json::from_str::<LabelLine>(line) else {
            debug!("Skipping unparseable line: {}", line);
            continue;
        };

        if parsed.index == 0 || parsed.index > expected {
            debug!("Skipping out-of-range index {}", parsed.index);
            continue;
        }

        let label: SentimentLabel = parsed
            .label
            .parse()
            .map_err(|e: String| anyhow::anyhow!("message {}: {}", parsed.index, e))?;
        if !parsed.confidence.is_finite() {
            return Err(anyhow::anyhow!(
                "message {}: confidence is not a number",
                parsed.index
            ));
        }

        slots[parsed.index - 1] = Some(Classification::new(
            label,
            parsed.confidence.clamp(0.0, 1.0),
        ));
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.with_context(|| format!("no classification for message {}", i + 1)))
        .collect()
}

const SYSTEM_PROMPT: &str = r#"You are a sentiment classifier for chat messages.
Label every message as positive, negative or neutral with a confidence.
Output each result as a JSON object on its own line.
Only output valid JSON, no explanations or markdown."#;
