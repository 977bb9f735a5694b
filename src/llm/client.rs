use crate::error::{IngestError, Result};
use crate::llm::oracle::{ClassificationOracle, PageImage};
use crate::llm::types::*;
use crate::llm::utils::parse_json_response;
use async_trait::async_trait;
use base64::Engine;
use log::{debug, warn};
use reqwest::Client;
use serde_json::Value;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub(crate) async fn generate_content(
        &self,
        system_prompt: Option<&str>,
        parts: Vec<Part>,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let payload = GenerateContentRequest {
            contents: vec![Content::user(parts)],
            system_instruction: system_prompt.map(|prompt| {
                Content::user(vec![Part::Text {
                    text: prompt.to_string(),
                }])
            }),
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                temperature: Some(0.0),
            },
        };

        debug!("Calling Gemini model {}", self.model);
        let res = self.client.post(&url).json(&payload).send().await?;
        let status = res.status();

        if !status.is_success() {
            let err_text = res.text().await?;
            warn!("Gemini API returned status {}", status);
            return Err(IngestError::OracleError(format!(
                "Gemini API Error (status {}): {}",
                status, err_text
            )));
        }

        let body: GenerateContentResponse = res.json().await?;

        let part = body
            .candidates
            .ok_or_else(|| IngestError::OracleError("No candidates returned".to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| IngestError::OracleError("Empty candidates list".to_string()))?
            .content
            .parts
            .into_iter()
            .next()
            .ok_or_else(|| IngestError::OracleError("No parts in content".to_string()))?;

        match part {
            Part::Text { text } => Ok(text),
            Part::InlineData { .. } => Err(IngestError::OracleError(
                "Model returned non-text content".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ClassificationOracle for GeminiClient {
    async fn classify_text(&self, system_prompt: &str, user_prompt: &str) -> Result<Value> {
        let text = self
            .generate_content(
                Some(system_prompt),
                vec![Part::Text {
                    text: user_prompt.to_string(),
                }],
            )
            .await?;
        parse_json_response(&text)
    }

    async fn classify_images(&self, prompt: &str, images: &[PageImage]) -> Result<Value> {
        let engine = base64::engine::general_purpose::STANDARD;
        let mut parts: Vec<Part> = images
            .iter()
            .map(|image| Part::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type.clone(),
                    data: engine.encode(&image.data),
                },
            })
            .collect();
        parts.push(Part::Text {
            text: prompt.to_string(),
        });

        let text = self.generate_content(None, parts).await?;
        parse_json_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_gemini_field_names() {
        let request = GenerateContentRequest {
            contents: vec![Content::user(vec![Part::InlineData {
                inline_data: InlineData {
                    mime_type: "image/png".to_string(),
                    data: "AAAA".to_string(),
                },
            }])],
            system_instruction: Some(Content::user(vec![Part::Text {
                text: "sys".to_string(),
            }])),
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                temperature: None,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert!(json["generationConfig"].get("temperature").is_none());
    }
}
