use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::ProviderError;
use crate::types::{CompletionResponse, FinishReason, Message, Role, TokenUsage};
use crate::util::http;

use super::LlmProvider;

/// Google Gemini API provider.
pub struct GeminiProvider {
    api_key: String,
    api_base: String,
    default_model: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, api_base: Option<String>, default_model: String) -> Self {
        let base = api_base
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        Self {
            api_key,
            api_base: base.trim_end_matches('/').to_string(),
            default_model,
        }
    }

    /// Normalize model name: strip "gemini/" prefix.
    fn normalize_model(&self, model: &str) -> String {
        model
            .strip_prefix("gemini/")
            .unwrap_or(model)
            .to_string()
    }

    /// Convert messages to Gemini format.
    fn convert_messages(
        &self,
        messages: &[Message],
    ) -> (Option<serde_json::Value>, Vec<serde_json::Value>) {
        let mut system_instruction = None;
        let mut contents = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    system_instruction = Some(json!({
                        "parts": [{"text": msg.content}]
                    }));
                }
                Role::User => {
                    contents.push(json!({
                        "role": "user",
                        "parts": [{"text": msg.content}]
                    }));
                }
                Role::Assistant => {
                    contents.push(json!({
                        "role": "model",
                        "parts": [{"text": msg.content}]
                    }));
                }
            }
        }

        (system_instruction, contents)
    }

    fn parse_response(&self, data: &serde_json::Value) -> Result<CompletionResponse, ProviderError> {
        let candidate = data
            .get("candidates")
            .and_then(|v| v.get(0))
            .ok_or_else(|| ProviderError::Parse("No candidates in response".to_string()))?;

        let finish_reason = match candidate.get("finishReason").and_then(|v| v.as_str()) {
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("RECITATION") => FinishReason::Safety,
            _ => FinishReason::Stop,
        };

        // A safety block comes back without content parts
        let text_content: String = candidate
            .get("content")
            .and_then(|v| v.get("parts"))
            .and_then(|v| v.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|v| v.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        let usage = if let Some(u) = data.get("usageMetadata") {
            TokenUsage {
                prompt_tokens: u
                    .get("promptTokenCount")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
                completion_tokens: u
                    .get("candidatesTokenCount")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
                total_tokens: u
                    .get("totalTokenCount")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
            }
        } else {
            TokenUsage::default()
        };

        Ok(CompletionResponse {
            content: if text_content.is_empty() {
                None
            } else {
                Some(text_content)
            },
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<CompletionResponse, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }

        let model_name = self.normalize_model(model);
        let url = format!("{}/models/{}:generateContent", self.api_base, model_name);

        let (system_instruction, contents) = self.convert_messages(messages);

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": temperature,
            },
        });

        if let Some(system) = system_instruction {
            body["systemInstruction"] = system;
        }

        debug!("Gemini request with model {}", model_name);

        let response = http::client()
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let data: serde_json::Value = response.json().await?;
        self.parse_response(&data)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
