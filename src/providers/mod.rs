//! Provider capability contracts and deterministic fakes
//!
//! The intent motor and ledger depend on these traits, never on concrete
//! clients, so tests inject deterministic implementations.

use crate::error::NumaError;
use crate::models::DocumentData;
use crate::taxonomy::Category;
use crate::Result;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

pub mod gemini;
pub mod speech;

pub use gemini::GeminiClient;
pub use speech::SpeechClient;

/// Speech-to-text capability.
#[async_trait::async_trait]
pub trait Transcription: Send + Sync {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String>;
}

/// Text completion capability. Only normalized text ever reaches this
/// contract; audio bytes are not representable here.
#[async_trait::async_trait]
pub trait Reasoning: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Receipt / invoice analysis capability.
#[async_trait::async_trait]
pub trait DocumentAnalysis: Send + Sync {
    async fn analyze(&self, document: &[u8]) -> Result<DocumentData>;
}

/// Category classification capability used by the ledger on verification.
#[async_trait::async_trait]
pub trait AutoCategorizer: Send + Sync {
    async fn classify(&self, concept: &str, merchant: Option<&str>) -> Result<(Category, f32)>;
}

//
// ================= Retry =================
//

/// Run a provider call, retrying once with a short jittered backoff when it
/// fails with `ProviderError`. Timeouts and everything else surface
/// immediately.
pub async fn retry_once<T, F, Fut>(operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match operation().await {
        Err(NumaError::ProviderError(first)) => {
            let jitter_ms = rand::thread_rng().gen_range(50..250);
            warn!(
                error = %first,
                backoff_ms = jitter_ms,
                "Provider call failed, retrying once"
            );
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            operation().await
        }
        other => other,
    }
}

//
// ================= Deterministic Fakes =================
//

/// Transcription fake that always returns the configured text.
pub struct FixedTranscription {
    pub text: String,
}

impl FixedTranscription {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait::async_trait]
impl Transcription for FixedTranscription {
    async fn transcribe(&self, _audio: &[u8], _language: &str) -> Result<String> {
        Ok(self.text.clone())
    }
}

/// Reasoning fake that replays scripted responses in order and counts how
/// many times it was invoked. An empty script answers with an empty string.
pub struct ScriptedReasoning {
    responses: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedReasoning {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Reasoning for ScriptedReasoning {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| NumaError::ProviderError("scripted reasoning poisoned".to_string()))?;
        if responses.is_empty() {
            Ok(String::new())
        } else {
            Ok(responses.remove(0))
        }
    }
}

/// Deterministic categorizer backed by the taxonomy keyword tables. Used
/// in tests and as the offline fallback wiring.
pub struct KeywordCategorizer;

#[async_trait::async_trait]
impl AutoCategorizer for KeywordCategorizer {
    async fn classify(&self, concept: &str, merchant: Option<&str>) -> Result<(Category, f32)> {
        Ok(crate::taxonomy::hint(concept, merchant).unwrap_or((Category::fallback(), 0.0)))
    }
}

/// Document analysis fake returning a fixed extraction result.
pub struct FixedDocumentAnalysis {
    pub data: DocumentData,
}

#[async_trait::async_trait]
impl DocumentAnalysis for FixedDocumentAnalysis {
    async fn analyze(&self, _document: &[u8]) -> Result<DocumentData> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_retry_once_retries_provider_errors() {
        let attempts = AtomicUsize::new(0);
        let result: Result<u32> = retry_once(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(NumaError::ProviderError("transient".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_gives_up_after_second_failure() {
        let attempts = AtomicUsize::new(0);
        let result: Result<u32> = retry_once(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(NumaError::ProviderError("still down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(NumaError::ProviderError(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_does_not_retry_timeouts() {
        let attempts = AtomicUsize::new(0);
        let result: Result<u32> = retry_once(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(NumaError::Timeout("transcription".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(NumaError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scripted_reasoning_counts_calls() {
        let reasoning = ScriptedReasoning::new(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(reasoning.complete("x").await.unwrap(), "a");
        assert_eq!(reasoning.complete("y").await.unwrap(), "b");
        assert_eq!(reasoning.complete("z").await.unwrap(), "");
        assert_eq!(reasoning.call_count(), 3);
    }
}
