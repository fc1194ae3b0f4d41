// src/llm_extract.rs

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{FallbackBackend, FallbackConfig};
use crate::error::InterpretError;
use crate::extraction::{ExternalReceipt, FallbackExtractor};
use crate::heuristics::OcrLine;

/// The prompt template that instructs the model to extract structured receipt data.
const SYSTEM_PROMPT: &str = r#"You are a restaurant receipt extraction assistant.
Given the raw OCR lines of one receipt, return ONLY valid JSON.

The JSON must match this schema exactly:
{
  "items": [
    {
      "name": "string",
      "quantity": number or null,
      "unit_price": number or null,
      "cost": number or null
    }
  ],
  "totals": {
    "subtotal": number or null,
    "grand_total": number or null,
    "tax_total": number or null,
    "service_charge": number or null,
    "round_off": number or null (signed),
    "discount": number or null,
    "taxes": [ { "name": "string", "amount": number } ]
  }
}

Notes:
- OCR may glue columns together or misread digits. Do your best to reconstruct the rows.
- Only purchasable dishes and drinks are items. Never list totals, taxes or payment lines as items.
- Use null for fields you cannot determine.
- Return ONLY the JSON object, no markdown fences, no commentary."#;

/// Longest receipt text sent to the model, in characters.
const MAX_PROMPT_CHARS: usize = 12_000;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: String,
}

fn failed(msg: impl Into<String>) -> InterpretError {
    InterpretError::ExternalExtraction(msg.into())
}

/// Resolve the fallback config section into a concrete endpoint.
/// `Ok(None)` when the fallback is disabled.
fn resolve_endpoint(cfg: &FallbackConfig) -> Result<Option<ResolvedEndpoint>, InterpretError> {
    match cfg.backend {
        FallbackBackend::Disabled => Ok(None),
        FallbackBackend::Ollama => {
            let ep = cfg.ollama_endpoint();
            info!(url = %ep.base_url, model = %ep.model, "Using Ollama (local) fallback");
            Ok(Some(ResolvedEndpoint {
                base_url: ep.base_url,
                model: ep.model,
                api_key: "ollama".to_string(), // required by API but ignored
            }))
        }
        FallbackBackend::Remote => {
            let api_key = std::env::var("LLM_API_KEY")
                .map_err(|_| failed("LLM_API_KEY env var required for remote backend"))?;
            let ep = cfg.remote_endpoint();
            info!(url = %ep.base_url, model = %ep.model, "Using remote API fallback");
            Ok(Some(ResolvedEndpoint {
                base_url: ep.base_url,
                model: ep.model,
                api_key,
            }))
        }
    }
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches('/').trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(std::time::Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            warn!(status = %resp.status(), "Ollama server returned non-OK status");
            false
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// Receipt text for the prompt, cut at a character boundary.
fn prompt_text(lines: &[OcrLine]) -> String {
    let joined = lines
        .iter()
        .map(|l| l.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    match joined.char_indices().nth(MAX_PROMPT_CHARS) {
        Some((cut, _)) => joined[..cut].to_string(),
        None => joined,
    }
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text (e.g. thinking tokens).
fn extract_json_object(s: &str) -> Result<&str, InterpretError> {
    let start = s.find('{').ok_or_else(|| failed("no '{' found in model response"))?;
    let end = s.rfind('}').ok_or_else(|| failed("no '}' found in model response"))?;
    if end <= start {
        return Err(failed("malformed JSON in model response"));
    }
    Ok(&s[start..=end])
}

fn parse_receipt_json(content: &str) -> Result<ExternalReceipt, InterpretError> {
    // Strip markdown fences if the model added them despite instructions
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let json_str = extract_json_object(trimmed)?;
    serde_json::from_str(json_str)
        .map_err(|e| failed(format!("failed to parse model response as a receipt: {e}")))
}

/// Fallback extraction through an OpenAI-compatible chat completions endpoint.
pub struct LlmExtractor {
    client: Client,
    endpoint: ResolvedEndpoint,
    check_health: bool,
}

impl LlmExtractor {
    /// `Ok(None)` when no fallback backend is configured.
    pub fn from_config(cfg: &FallbackConfig) -> Result<Option<Self>, InterpretError> {
        Ok(resolve_endpoint(cfg)?.map(|endpoint| Self {
            client: Client::new(),
            endpoint,
            check_health: cfg.backend == FallbackBackend::Ollama,
        }))
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }
}

#[async_trait]
impl FallbackExtractor for LlmExtractor {
    async fn extract(&self, lines: &[OcrLine]) -> Result<ExternalReceipt, InterpretError> {
        if self.check_health && !check_ollama_health(&self.client, &self.endpoint.base_url).await {
            return Err(failed(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                self.endpoint.base_url
            )));
        }

        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!(
                        "Extract the receipt from the following OCR lines:\n\n{}",
                        prompt_text(lines)
                    ),
                },
            ],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| failed(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("model API error {status}: {body}")));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("unreadable model response: {e}")))?;
        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| failed("empty response from model"))?;

        let receipt = parse_receipt_json(content)?;
        info!(
            model = %self.endpoint.model,
            items = receipt.items.len(),
            grand_total = ?receipt.totals.grand_total,
            "Fallback extraction result"
        );
        Ok(receipt)
    }
}
