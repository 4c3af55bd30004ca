//! Gemini API client for classification, humanization and document analysis
//!
//! Uses a long-lived reqwest::Client for connection pooling. Classification
//! calls run at low temperature so repeated inputs classify the same way.

use base64::Engine;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::NumaError;
use crate::models::DocumentData;
use crate::Result;

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NumaError::ProviderError(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                model
            ),
        })
    }

    /// Generate a completion for a text prompt.
    pub async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        let parts = vec![Part {
            text: Some(prompt.to_string()),
            inline_data: None,
        }];
        self.send(parts, temperature).await
    }

    /// Generate a completion for a prompt plus an attached document image.
    pub async fn generate_with_document(
        &self,
        prompt: &str,
        document: &[u8],
        mime_type: &str,
    ) -> Result<String> {
        let parts = vec![
            Part {
                text: Some(prompt.to_string()),
                inline_data: None,
            },
            Part {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: mime_type.to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(document),
                }),
            },
        ];
        self.send(parts, 0.1).await
    }

    async fn send(&self, parts: Vec<Part>, temperature: f32) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(NumaError::ProviderError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                temperature,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
        };

        debug!(temperature, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                NumaError::ProviderError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(NumaError::ProviderError(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            NumaError::ProviderError(format!("Gemini parse error: {}", e))
        })?;

        let answer = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .and_then(|p| p.text.clone())
            .ok_or_else(|| NumaError::ProviderError("Empty response from Gemini".to_string()))?;

        Ok(answer)
    }
}

#[async_trait::async_trait]
impl super::Reasoning for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.generate(prompt, 0.1).await
    }
}

#[async_trait::async_trait]
impl super::DocumentAnalysis for GeminiClient {
    async fn analyze(&self, document: &[u8]) -> Result<DocumentData> {
        let prompt = r#"Analiza este comprobante y extrae los datos en JSON.

Devuelve SOLO un objeto JSON con estas claves:
- vendor: string (nombre del comercio, o null)
- date: string (fecha de la operación, formato YYYY-MM-DD, o null)
- total_amount: number (monto total del comprobante)

Sin explicaciones, sin formato markdown."#;

        let response = self
            .generate_with_document(prompt, document, "image/jpeg")
            .await?;
        parse_document_response(&response)
    }
}

/// Parse the JSON body of a document-analysis response, tolerating a
/// markdown code fence around it.
pub fn parse_document_response(response: &str) -> Result<DocumentData> {
    let cleaned = strip_code_fence(response);

    let json: serde_json::Value = serde_json::from_str(cleaned).map_err(|e| {
        NumaError::ProviderError(format!(
            "Malformed document analysis response: {} | raw={}",
            e, response
        ))
    })?;

    let total_amount = json
        .get("total_amount")
        .and_then(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .or_else(|| v.as_f64().map(|f| f.to_string()))
        })
        .and_then(|s| Decimal::from_str(&s).ok())
        .ok_or_else(|| {
            NumaError::ProviderError("Document analysis returned no total_amount".to_string())
        })?;

    let vendor = json
        .get("vendor")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let date = json
        .get("date")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

    Ok(DocumentData {
        vendor,
        date,
        total_amount,
    })
}

/// Strip a leading/trailing markdown code fence from a model response.
pub fn strip_code_fence(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some("clasifica este texto".to_string()),
                    inline_data: None,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("clasifica este texto"));
        assert!(!json.contains("inlineData"));
    }

    #[test]
    fn test_parse_document_response() {
        let raw = r#"```json
{"vendor": "La Trattoria", "date": "2024-03-09", "total_amount": 485.50}
```"#;
        let data = parse_document_response(raw).unwrap();
        assert_eq!(data.vendor.as_deref(), Some("La Trattoria"));
        assert_eq!(data.total_amount, dec!(485.50));
        assert!(data.date.is_some());
    }

    #[test]
    fn test_parse_document_response_null_vendor() {
        let raw = r#"{"vendor": null, "date": null, "total_amount": 100}"#;
        let data = parse_document_response(raw).unwrap();
        assert!(data.vendor.is_none());
        assert!(data.date.is_none());
        assert_eq!(data.total_amount, dec!(100));
    }

    #[test]
    fn test_parse_document_response_requires_amount() {
        let raw = r#"{"vendor": "Oxxo"}"#;
        assert!(parse_document_response(raw).is_err());
    }
}
