//! Financial Intent Motor (FIM)
//!
//! Stateless classifier and extractor for user utterances. Transcribes
//! audio through the speech capability, classifies text through the
//! 3-level cascade, and extracts entities. Raw audio never reaches the
//! reasoning provider; only normalized text enters classification.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::NumaConfig;
use crate::error::NumaError;
use crate::models::{DocumentData, Intent, IntentRecord, TransactionKind};
use crate::providers::{retry_once, AutoCategorizer, DocumentAnalysis, Reasoning, Transcription};
use crate::taxonomy::{self, Category};
use crate::Result;

pub mod cascade;
pub mod extract;

use cascade::{Domain, Resolution};

/// The intent motor. Holds no per-user state; every invocation is
/// self-contained.
pub struct IntentMotor {
    transcription: Arc<dyn Transcription>,
    reasoning: Arc<dyn Reasoning>,
    documents: Arc<dyn DocumentAnalysis>,
    config: NumaConfig,
}

impl IntentMotor {
    pub fn new(
        transcription: Arc<dyn Transcription>,
        reasoning: Arc<dyn Reasoning>,
        documents: Arc<dyn DocumentAnalysis>,
        config: NumaConfig,
    ) -> Self {
        Self {
            transcription,
            reasoning,
            documents,
            config,
        }
    }

    //
    // ================= Transcription =================
    //

    /// Transcribe audio bytes to trimmed text. Empty, whitespace-only and
    /// provider error markers all surface as `UnintelligibleAudio`; the
    /// caller must not fall back to sending raw audio anywhere else.
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let language = self.config.stt.language.clone();
        let text = retry_once(|| {
            let language = language.clone();
            async move { self.transcription.transcribe(audio, &language).await }
        })
        .await?;

        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("error") {
            warn!("Transcription produced no usable text");
            return Err(NumaError::UnintelligibleAudio);
        }

        debug!(transcript = %trimmed, "Transcription complete");
        Ok(trimmed.to_string())
    }

    //
    // ================= Classification =================
    //

    /// Classify an utterance into one or more intent records. The result is
    /// never empty; multi-clause utterances yield one record per clause.
    pub async fn classify(&self, text: &str) -> Result<Vec<IntentRecord>> {
        // Level 1 — validity
        if let Some(clarify) = cascade::validity_check(text) {
            return Ok(vec![clarify]);
        }

        // Level 2 — domain
        match cascade::classify_domain(text) {
            Domain::Meta => {
                let mut record = IntentRecord::new(Intent::Steer, 0.9);
                record.sub_intent = Some(crate::models::SubIntent::Meta);
                return Ok(vec![record]);
            }
            Domain::Social => {
                let mut record = IntentRecord::new(Intent::Steer, 0.9);
                record.sub_intent = Some(crate::models::SubIntent::Social);
                return Ok(vec![record]);
            }
            Domain::Financiero => {}
        }

        // Level 3 — financial resolution, clause by clause
        let clauses = cascade::split_clauses(text);
        let mut records: Vec<IntentRecord> = Vec::with_capacity(clauses.len());
        let mut inherited_kind: Option<TransactionKind> = None;

        for clause in &clauses {
            let resolution = cascade::resolve_clause(
                clause,
                inherited_kind,
                self.config.confidence_threshold,
            );

            match resolution {
                Resolution::Record(record) => {
                    if record.intent == Intent::WriteLog {
                        inherited_kind =
                            record.sub_intent.and_then(|s| s.kind()).or(inherited_kind);
                    }
                    records.push(record);
                }
                Resolution::NeedsReasoning => {
                    match self.extract_with_reasoning(clause).await {
                        Ok(extracted) if !extracted.is_empty() => {
                            if let Some(kind) = extracted
                                .last()
                                .and_then(|r| r.sub_intent)
                                .and_then(|s| s.kind())
                            {
                                inherited_kind = Some(kind);
                            }
                            records.extend(extracted);
                        }
                        Ok(_) => {
                            records.push(IntentRecord::clarify("missing_concept"));
                        }
                        Err(e) => {
                            warn!(error = %e, "Extraction fallback failed, asking user");
                            records.push(IntentRecord::clarify("missing_details"));
                        }
                    }
                }
            }
        }

        if records.is_empty() {
            records.push(IntentRecord::clarify("missing_details"));
        }

        info!(
            clause_count = clauses.len(),
            record_count = records.len(),
            "Classification complete"
        );
        Ok(records)
    }

    async fn extract_with_reasoning(&self, clause: &str) -> Result<Vec<IntentRecord>> {
        let prompt = extract::build_extraction_prompt(clause);
        let response =
            retry_once(|| async { self.reasoning.complete(&prompt).await }).await?;
        extract::parse_extraction_response(&response)
    }

    //
    // ================= Category classification =================
    //

    /// Classify (concept, merchant) into the closed taxonomy. Keyword hints
    /// answer directly; otherwise the reasoning provider is asked once and
    /// its label is coerced into the taxonomy.
    pub async fn classify_category(
        &self,
        concept: &str,
        merchant: Option<&str>,
    ) -> Result<(Category, f32)> {
        if let Some(hit) = taxonomy::hint(concept, merchant) {
            return Ok(hit);
        }

        let prompt = extract::build_category_prompt(concept, merchant);
        let response =
            retry_once(|| async { self.reasoning.complete(&prompt).await }).await?;
        extract::parse_category_response(&response)
    }

    //
    // ================= Document analysis =================
    //

    /// Extract {vendor, date, total_amount} from a receipt or invoice.
    pub async fn analyze_document(&self, document: &[u8]) -> Result<DocumentData> {
        retry_once(|| async { self.documents.analyze(document).await }).await
    }

    //
    // ================= Humanization =================
    //

    /// Rephrase a deterministic answer conversationally. Every numeric
    /// value in the output must already appear in `allowed`; a response
    /// that invents or alters a figure is discarded in favor of the
    /// deterministic template.
    pub async fn humanize(&self, question: &str, template: &str, allowed: &[Decimal]) -> String {
        let prompt = format!(
            r#"Eres Numa, un asistente financiero cálido y breve.

Pregunta del usuario: "{}"
Respuesta calculada: "{}"

Reformula la respuesta calculada en un tono natural y amable, en español.
No cambies, agregues ni quites ninguna cifra. Devuelve solo el texto."#,
            question, template
        );

        match self.reasoning.complete(&prompt).await {
            Ok(response) => {
                let response = response.trim().to_string();
                if response.is_empty() {
                    return template.to_string();
                }
                if numeric_values(&response)
                    .iter()
                    .all(|v| allowed.contains(v))
                {
                    response
                } else {
                    warn!("Humanized response altered a figure, using template");
                    template.to_string()
                }
            }
            Err(e) => {
                warn!(error = %e, "Humanization failed, using template");
                template.to_string()
            }
        }
    }
}

#[async_trait::async_trait]
impl AutoCategorizer for IntentMotor {
    async fn classify(&self, concept: &str, merchant: Option<&str>) -> Result<(Category, f32)> {
        self.classify_category(concept, merchant).await
    }
}

/// Every numeric value present in a piece of text, parsed as decimals.
/// Thousands separators are tolerated.
pub fn numeric_values(text: &str) -> Vec<Decimal> {
    let mut values = Vec::new();
    let mut current = String::new();

    for c in text.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() || ((c == '.' || c == ',') && !current.is_empty()) {
            current.push(c);
        } else if !current.is_empty() {
            let cleaned: String = current
                .trim_end_matches(['.', ','])
                .chars()
                .filter(|c| *c != ',')
                .collect();
            if let Ok(value) = Decimal::from_str(&cleaned) {
                values.push(value);
            }
            current.clear();
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubIntent;
    use crate::providers::{FixedDocumentAnalysis, FixedTranscription, ScriptedReasoning};
    use rust_decimal_macros::dec;

    fn motor_with(
        transcript: &str,
        reasoning: Arc<ScriptedReasoning>,
    ) -> IntentMotor {
        IntentMotor::new(
            Arc::new(FixedTranscription::new(transcript)),
            reasoning,
            Arc::new(FixedDocumentAnalysis {
                data: DocumentData {
                    vendor: Some("La Trattoria".to_string()),
                    date: None,
                    total_amount: dec!(485.50),
                },
            }),
            NumaConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_transcribe_rejects_empty_text() {
        let motor = motor_with("   ", Arc::new(ScriptedReasoning::empty()));
        let result = motor.transcribe(b"audio").await;
        assert!(matches!(result, Err(NumaError::UnintelligibleAudio)));
    }

    #[tokio::test]
    async fn test_transcribe_rejects_error_marker() {
        let motor = motor_with("ERROR", Arc::new(ScriptedReasoning::empty()));
        let result = motor.transcribe(b"audio").await;
        assert!(matches!(result, Err(NumaError::UnintelligibleAudio)));
    }

    #[tokio::test]
    async fn test_classify_always_returns_records() {
        let reasoning = Arc::new(ScriptedReasoning::empty());
        let motor = motor_with("", reasoning);

        for input in ["", "mmm", "hola", "gasto", "gasté 500 en el súper"] {
            let records = motor.classify(input).await.unwrap();
            assert!(!records.is_empty(), "no records for {:?}", input);
        }
    }

    #[tokio::test]
    async fn test_classify_single_expense_without_reasoning_call() {
        let reasoning = Arc::new(ScriptedReasoning::empty());
        let motor = motor_with("", reasoning.clone());

        let records = motor.classify("Gasté 500 pesos en el súper").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].intent, Intent::WriteLog);
        assert_eq!(records[0].entities.amount, Some(dec!(500)));
        assert_eq!(reasoning.call_count(), 0);
    }

    #[tokio::test]
    async fn test_classify_multi_clause_produces_two_records() {
        let reasoning = Arc::new(ScriptedReasoning::empty());
        let motor = motor_with("", reasoning);

        let records = motor.classify("Gasté 100 en luz y 200 en agua").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entities.amount, Some(dec!(100)));
        assert_eq!(records[0].entities.category, Some(Category::Servicios));
        assert_eq!(records[1].entities.amount, Some(dec!(200)));
        assert_eq!(records[1].entities.category, Some(Category::Servicios));
    }

    #[tokio::test]
    async fn test_classify_meta_is_steer() {
        let motor = motor_with("", Arc::new(ScriptedReasoning::empty()));
        let records = motor.classify("borra mis datos").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].intent, Intent::Steer);
        assert_eq!(records[0].sub_intent, Some(SubIntent::Meta));
    }

    #[tokio::test]
    async fn test_classify_reasoning_fallback_extracts() {
        let reasoning = Arc::new(ScriptedReasoning::new(vec![
            r#"[{"type": "EXPENSE", "amount": 500, "concept": "comida corrida"}]"#.to_string(),
        ]));
        let motor = motor_with("", reasoning.clone());

        let records = motor.classify("gasté 500").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].intent, Intent::WriteLog);
        assert_eq!(
            records[0].entities.concept.as_deref(),
            Some("comida corrida")
        );
        assert_eq!(reasoning.call_count(), 1);
    }

    #[tokio::test]
    async fn test_classify_reasoning_failure_becomes_clarify() {
        let reasoning = Arc::new(ScriptedReasoning::new(vec!["no json".to_string()]));
        let motor = motor_with("", reasoning);

        let records = motor.classify("gasté 500").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].intent, Intent::Clarify);
    }

    #[tokio::test]
    async fn test_classify_is_pure_on_deterministic_paths() {
        let motor = motor_with("", Arc::new(ScriptedReasoning::empty()));
        let a = motor.classify("Gasté 100 en luz y 200 en agua").await.unwrap();
        let b = motor.classify("Gasté 100 en luz y 200 en agua").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_classify_category_keyword_skips_provider() {
        let reasoning = Arc::new(ScriptedReasoning::empty());
        let motor = motor_with("", reasoning.clone());

        let (category, confidence) = motor.classify_category("la luz", None).await.unwrap();
        assert_eq!(category, Category::Servicios);
        assert!(confidence >= 0.7);
        assert_eq!(reasoning.call_count(), 0);
    }

    #[tokio::test]
    async fn test_classify_category_provider_path() {
        let reasoning = Arc::new(ScriptedReasoning::new(vec![
            r#"{"category": "Ocio", "confidence": 0.81}"#.to_string(),
        ]));
        let motor = motor_with("", reasoning.clone());

        let (category, confidence) = motor
            .classify_category("boletos del evento", None)
            .await
            .unwrap();
        assert_eq!(category, Category::Ocio);
        assert!(confidence > 0.8);
        assert_eq!(reasoning.call_count(), 1);
    }

    #[tokio::test]
    async fn test_humanize_rejects_invented_figures() {
        let reasoning = Arc::new(ScriptedReasoning::new(vec![
            "Hoy llevas gastados $999.00, ¡vas muy bien!".to_string(),
        ]));
        let motor = motor_with("", reasoning);

        let template = "Has gastado $800.00 hoy.";
        let result = motor
            .humanize("¿cuánto gasté hoy?", template, &[dec!(800), dec!(800.00)])
            .await;
        assert_eq!(result, template);
    }

    #[tokio::test]
    async fn test_humanize_accepts_faithful_rephrasing() {
        let reasoning = Arc::new(ScriptedReasoning::new(vec![
            "¡Hoy llevas $800.00 gastados!".to_string(),
        ]));
        let motor = motor_with("", reasoning);

        let result = motor
            .humanize("¿cuánto gasté hoy?", "Has gastado $800.00 hoy.", &[dec!(800)])
            .await;
        assert_eq!(result, "¡Hoy llevas $800.00 gastados!");
    }

    #[test]
    fn test_numeric_values() {
        let values = numeric_values("gastaste $1,500.50 en 2 transacciones.");
        assert_eq!(values, vec![dec!(1500.50), dec!(2)]);
    }

    #[test]
    fn test_numeric_values_decimal_equality_ignores_scale() {
        let values = numeric_values("$800.00");
        assert!(values.contains(&dec!(800)));
    }
}
