//! Google Cloud Speech-to-Text v2 client
//!
//! Targets the long-form recognizer over the regional REST endpoint. Any
//! audio container the service accepts is valid; decoding is auto-detected.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::config::SttConfig;
use crate::error::NumaError;
use crate::Result;

pub struct SpeechClient {
    client: Client,
    config: SttConfig,
    access_token: String,
}

impl SpeechClient {
    pub fn new(config: SttConfig, access_token: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| NumaError::ProviderError(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            config,
            access_token,
        })
    }

    fn recognizer_url(&self) -> String {
        format!(
            "https://{loc}-speech.googleapis.com/v2/projects/{proj}/locations/{loc}/recognizers/_:recognize",
            loc = self.config.location,
            proj = self.config.project_id,
        )
    }
}

#[async_trait::async_trait]
impl super::Transcription for SpeechClient {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String> {
        if self.access_token.is_empty() {
            return Err(NumaError::ProviderError(
                "speech access token not configured".to_string(),
            ));
        }

        let request = RecognizeRequest {
            config: RecognitionConfig {
                auto_decoding_config: AutoDetectDecodingConfig {},
                model: self.config.model.clone(),
                language_codes: vec![language.to_string()],
                features: RecognitionFeatures {
                    enable_automatic_punctuation: true,
                },
            },
            content: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                audio,
            ),
        };

        debug!(
            audio_bytes = audio.len(),
            language,
            model = %self.config.model,
            "Calling Speech-to-Text API"
        );

        let response = self
            .client
            .post(self.recognizer_url())
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Speech API request failed: {}", e);
                NumaError::ProviderError(format!("Speech API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Speech API error response: {}", error_text);
            return Err(NumaError::ProviderError(format!(
                "Speech API error: {}",
                error_text
            )));
        }

        let recognized: RecognizeResponse = response.json().await.map_err(|e| {
            NumaError::ProviderError(format!("Speech response parse error: {}", e))
        })?;

        let mut transcription = String::new();
        for result in recognized.results {
            if let Some(alternative) = result.alternatives.first() {
                transcription.push_str(&alternative.transcript);
                transcription.push(' ');
            }
        }

        Ok(transcription.trim().to_string())
    }
}

#[derive(Debug, Serialize)]
struct RecognizeRequest {
    config: RecognitionConfig,
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig {
    auto_decoding_config: AutoDetectDecodingConfig,
    model: String,
    language_codes: Vec<String>,
    features: RecognitionFeatures,
}

#[derive(Debug, Serialize)]
struct AutoDetectDecodingConfig {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionFeatures {
    enable_automatic_punctuation: bool,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<SpeechResult>,
}

#[derive(Debug, Deserialize)]
struct SpeechResult {
    #[serde(default)]
    alternatives: Vec<SpeechAlternative>,
}

#[derive(Debug, Deserialize)]
struct SpeechAlternative {
    #[serde(default)]
    transcript: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognizer_url_uses_regional_endpoint() {
        let client = SpeechClient::new(SttConfig::default(), "token".to_string()).unwrap();
        let url = client.recognizer_url();
        assert!(url.starts_with("https://us-central1-speech.googleapis.com/v2/"));
        assert!(url.contains("/recognizers/_:recognize"));
    }

    #[test]
    fn test_response_parsing_concatenates_results() {
        let raw = r#"{
            "results": [
                {"alternatives": [{"transcript": "gasté 500 pesos"}]},
                {"alternatives": [{"transcript": "en el súper"}]}
            ]
        }"#;
        let parsed: RecognizeResponse = serde_json::from_str(raw).unwrap();
        let text: Vec<&str> = parsed
            .results
            .iter()
            .filter_map(|r| r.alternatives.first())
            .map(|a| a.transcript.as_str())
            .collect();
        assert_eq!(text.join(" "), "gasté 500 pesos en el súper");
    }
}
