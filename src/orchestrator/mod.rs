//! Conversational orchestrator
//!
//! Receives voice or text input, drives the intent motor, dispatches one
//! handler per resolved intent and synthesizes the response envelope.
//! Within one request the pipeline is sequential so written transactions
//! keep their utterance order.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::NumaConfig;
use crate::error::NumaError;
use crate::fim::IntentMotor;
use crate::ledger::{Ledger, NewTransaction};
use crate::models::{
    DailySummary, Entities, EnvelopeType, Intent, IntentRecord, Period, ResponseEnvelope,
    SubIntent, SumResult, Transaction, TransactionFilter, TransactionKind,
};
use crate::Result;

/// Per-request deadline, inherited by every suspension point.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn start(budget_ms: u64) -> Self {
        Self {
            start: Instant::now(),
            budget: Duration::from_millis(budget_ms),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }
}

/// Bound a stage by the remaining request budget.
async fn bounded<T, F>(deadline: &Deadline, stage: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let remaining = deadline.remaining();
    if remaining.is_zero() {
        return Err(NumaError::Timeout(stage.to_string()));
    }
    match tokio::time::timeout(remaining, fut).await {
        Ok(result) => result,
        Err(_) => Err(NumaError::Timeout(stage.to_string())),
    }
}

pub struct Orchestrator {
    fim: Arc<IntentMotor>,
    ledger: Arc<Ledger>,
    config: NumaConfig,
}

impl Orchestrator {
    pub fn new(fim: Arc<IntentMotor>, ledger: Arc<Ledger>, config: NumaConfig) -> Self {
        Self {
            fim,
            ledger,
            config,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    //
    // ================= Entry points =================
    //

    /// Voice entry: transcribe, then continue as text. Unusable audio
    /// stops here; raw audio is never forwarded to the reasoning stage.
    pub async fn handle_voice(&self, owner: Uuid, audio: &[u8]) -> ResponseEnvelope {
        let deadline = Deadline::start(self.config.request_deadline_ms);

        let transcript = match bounded(&deadline, "transcription", self.fim.transcribe(audio)).await
        {
            Ok(text) => text,
            Err(NumaError::UnintelligibleAudio) => {
                return ResponseEnvelope::error(
                    "unintelligible_audio",
                    "No pude detectar voz clara en el audio. Por favor intenta de nuevo.",
                );
            }
            Err(e) => return envelope_for_error(e),
        };

        info!(owner_id = %owner, transcript = %transcript, "Voice request transcribed");
        self.dispatch(owner, &transcript, &deadline).await
    }

    pub async fn handle_text(&self, owner: Uuid, text: &str) -> ResponseEnvelope {
        let deadline = Deadline::start(self.config.request_deadline_ms);
        self.dispatch(owner, text, &deadline).await
    }

    //
    // ================= Dispatch =================
    //

    async fn dispatch(&self, owner: Uuid, text: &str, deadline: &Deadline) -> ResponseEnvelope {
        let records = match bounded(deadline, "classification", self.fim.classify(text)).await {
            Ok(records) => records,
            Err(e) => return envelope_for_error(e),
        };

        let mut written: Vec<Transaction> = Vec::new();
        let mut updated: Vec<Transaction> = Vec::new();
        let mut messages: Vec<String> = Vec::new();
        let mut failure: Option<NumaError> = None;

        for record in &records {
            match record.intent {
                Intent::WriteLog => {
                    match self.handle_write(owner, record, deadline).await {
                        Ok(transaction) => written.push(transaction),
                        // Missing entities never reach the ledger as an
                        // error response; the user is asked instead.
                        Err(NumaError::InvalidAmount(_)) | Err(NumaError::InvalidConcept(_)) => {
                            messages.push(clarify_message(record));
                        }
                        Err(e) => {
                            // Abort remaining writes, report the partial result
                            failure = Some(e);
                            break;
                        }
                    }
                }
                Intent::ReadQuery => match self.handle_read(owner, record, text, deadline).await {
                    Ok(message) => messages.push(message),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                },
                Intent::ConfirmUpdate => {
                    match self.handle_confirm_update(owner, record, deadline).await {
                        Ok(Some(transaction)) => {
                            messages.push(format!(
                                "Listo, actualicé el movimiento de {}.",
                                transaction.concept
                            ));
                            updated.push(transaction);
                        }
                        Ok(None) => messages.push(
                            "No encontré un movimiento pendiente para actualizar.".to_string(),
                        ),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                Intent::Advice | Intent::Plan => {
                    match self.handle_advice(owner, record, text, deadline).await {
                        Ok(message) => messages.push(message),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                Intent::Steer => messages.push(steer_message(record)),
                Intent::Clarify => messages.push(clarify_message(record)),
            }
        }

        self.assemble(written, updated, messages, failure)
    }

    fn assemble(
        &self,
        written: Vec<Transaction>,
        updated: Vec<Transaction>,
        messages: Vec<String>,
        failure: Option<NumaError>,
    ) -> ResponseEnvelope {
        if let Some(error) = failure {
            if written.is_empty() {
                return envelope_for_error(error);
            }
            // Partial success: report what landed plus the failure
            let mut message = narrative(&written);
            message.push_str(" No pude registrar el resto de los movimientos.");
            return ResponseEnvelope {
                envelope_type: EnvelopeType::Transaction,
                data: Some(written),
                message: Some(message),
                error_kind: Some(error.kind().to_string()),
            };
        }

        if !written.is_empty() {
            let mut message = narrative(&written);
            for extra in &messages {
                message.push(' ');
                message.push_str(extra);
            }
            let mut data = written;
            data.extend(updated);
            return ResponseEnvelope::transactions(data, message);
        }

        if !updated.is_empty() {
            return ResponseEnvelope::transactions(updated, messages.join(" "));
        }

        ResponseEnvelope::chat(if messages.is_empty() {
            "No te entendí, repítelo por favor.".to_string()
        } else {
            messages.join(" ")
        })
    }

    //
    // ================= Handlers =================
    //

    async fn handle_write(
        &self,
        owner: Uuid,
        record: &IntentRecord,
        deadline: &Deadline,
    ) -> Result<Transaction> {
        let entities = &record.entities;
        let amount = entities
            .amount
            .ok_or_else(|| NumaError::InvalidAmount("no amount extracted".to_string()))?;
        let concept = entities
            .concept
            .clone()
            .ok_or_else(|| NumaError::InvalidConcept("no concept extracted".to_string()))?;

        let new = NewTransaction {
            kind: record
                .sub_intent
                .and_then(|s| s.kind())
                .unwrap_or(TransactionKind::Expense),
            amount,
            concept,
            merchant: entities.merchant.clone(),
            category: entities.category,
            date: entities.date,
        };

        bounded(
            deadline,
            "ledger_write",
            self.ledger.create_provisional(owner, new),
        )
        .await
    }

    /// Deterministic aggregation first, then one constrained rephrasing
    /// pass. Every figure in the reply comes from the ledger.
    async fn handle_read(
        &self,
        owner: Uuid,
        record: &IntentRecord,
        question: &str,
        deadline: &Deadline,
    ) -> Result<String> {
        let filter = TransactionFilter {
            period: record.entities.period,
            category: record.entities.category,
            status: None,
            kind: None,
        };

        let sum = bounded(
            deadline,
            "ledger_read",
            self.ledger.sum_by_owner(owner, &filter),
        )
        .await?;
        let pending = bounded(
            deadline,
            "ledger_read",
            self.ledger.pending_balance(owner),
        )
        .await?;

        let template = read_template(&sum, &pending, &record.entities);
        let allowed = [
            sum.total,
            Decimal::from(sum.count),
            pending.total,
            Decimal::from(pending.count),
        ];

        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Ok(template);
        }
        Ok(tokio::time::timeout(
            remaining,
            self.fim.humanize(question, &template, &allowed),
        )
        .await
        .unwrap_or(template))
    }

    async fn handle_confirm_update(
        &self,
        owner: Uuid,
        record: &IntentRecord,
        deadline: &Deadline,
    ) -> Result<Option<Transaction>> {
        let recent = bounded(
            deadline,
            "ledger_read",
            self.ledger.recent_provisional(owner, 1),
        )
        .await?;

        let Some(target) = recent.first() else {
            return Ok(None);
        };

        let updated = bounded(
            deadline,
            "ledger_write",
            self.ledger.update_provisional_fields(
                target.id,
                owner,
                record.entities.merchant.as_deref(),
                record.entities.category,
            ),
        )
        .await?;
        Ok(Some(updated))
    }

    /// Advice and plans draw on a compact ledger context; the reasoning
    /// model repackages precomputed figures and nothing else.
    async fn handle_advice(
        &self,
        owner: Uuid,
        record: &IntentRecord,
        question: &str,
        deadline: &Deadline,
    ) -> Result<String> {
        let month = TransactionFilter::with_period(Period::ThisMonth);
        let sum = bounded(
            deadline,
            "ledger_read",
            self.ledger.sum_by_owner(owner, &month),
        )
        .await?;
        let breakdown = bounded(
            deadline,
            "ledger_read",
            self.ledger.breakdown_by_category(owner),
        )
        .await?;

        let mut allowed = vec![sum.total, Decimal::from(sum.count)];
        for entry in &breakdown {
            allowed.push(entry.total);
            allowed.push(Decimal::from(entry.count));
        }

        let template = advice_template(record.intent, &sum, &breakdown);
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Ok(template);
        }
        Ok(tokio::time::timeout(
            remaining,
            self.fim.humanize(question, &template, &allowed),
        )
        .await
        .unwrap_or(template))
    }

    //
    // ================= Verification flows =================
    //

    /// Analyze a receipt and verify the referenced transaction with it.
    pub async fn verify_document(
        &self,
        owner: Uuid,
        transaction_id: Uuid,
        document: &[u8],
    ) -> Result<Transaction> {
        let deadline = Deadline::start(self.config.request_deadline_ms);
        let data = bounded(
            &deadline,
            "document_analysis",
            self.fim.analyze_document(document),
        )
        .await?;

        bounded(
            &deadline,
            "ledger_write",
            self.ledger.verify_with_document(transaction_id, owner, &data),
        )
        .await
    }

    pub async fn manual_verify(&self, owner: Uuid, transaction_id: Uuid) -> Result<Transaction> {
        let deadline = Deadline::start(self.config.request_deadline_ms);
        bounded(
            &deadline,
            "ledger_write",
            self.ledger.verify_manual(transaction_id, owner),
        )
        .await
    }

    pub async fn list_transactions(
        &self,
        owner: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>> {
        self.ledger.list_by_owner(owner, filter).await
    }

    pub async fn daily_summary(&self, owner: Uuid, date: NaiveDate) -> Result<DailySummary> {
        self.ledger.daily_summary(owner, date).await
    }
}

//
// ================= Message synthesis =================
//

fn envelope_for_error(error: NumaError) -> ResponseEnvelope {
    warn!(error = %error, "Request failed");
    let message = match &error {
        NumaError::Timeout(_) => "La solicitud tardó demasiado, intenta de nuevo.",
        NumaError::NotProvisional(_) => "Ese movimiento ya fue verificado.",
        NumaError::TransactionNotFound => "No encontré ese movimiento.",
        NumaError::MissingMerchant => "Necesito el comercio para poder verificar el movimiento.",
        NumaError::UnknownOwner => "No encontré tu cuenta.",
        _ => "Algo salió mal procesando tu solicitud.",
    };
    ResponseEnvelope::error(error.kind(), message)
}

fn steer_message(record: &IntentRecord) -> String {
    match record.sub_intent {
        Some(SubIntent::Meta) => {
            "Eso se maneja desde la configuración de la aplicación. Aquí te ayudo con tus gastos, ingresos y deudas.".to_string()
        }
        _ => "¡Hola! Soy Numa. Cuéntame un gasto o pregúntame cuánto llevas este mes.".to_string(),
    }
}

fn clarify_message(record: &IntentRecord) -> String {
    if record.entities.reason.as_deref() == Some("unintelligible") {
        return "No te entendí, repítelo por favor.".to_string();
    }
    match record.sub_intent {
        Some(SubIntent::Income) => "¿De qué fue el ingreso y de cuánto fue?".to_string(),
        Some(SubIntent::Debt) => "¿A quién le debes y cuánto es la deuda?".to_string(),
        _ => "¿De qué fue el gasto y cuánto costó? Necesito más detalles.".to_string(),
    }
}

/// Confirmation text for freshly written movements.
fn narrative(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "No se registró ningún movimiento.".to_string();
    }

    if let [t] = transactions {
        let merchant = t.merchant.as_deref().unwrap_or("");
        return match t.kind {
            TransactionKind::Income => {
                format!("¡Súper! Registré el ingreso de {} por ${:.2}.", t.concept, t.amount)
            }
            TransactionKind::Debt => {
                format!("Entendido. Registré la deuda de {} por ${:.2}.", t.concept, t.amount)
            }
            TransactionKind::Expense => {
                let mut base = format!("Listo. Anoté {} por ${:.2}", t.concept, t.amount);
                if !merchant.is_empty() && !merchant.eq_ignore_ascii_case(&t.concept) {
                    base.push_str(&format!(" en {}.", merchant));
                } else {
                    base.push('.');
                }
                base
            }
        };
    }

    let mut parts: Vec<String> = Vec::new();
    for (kind, label) in [
        (TransactionKind::Expense, "gastos"),
        (TransactionKind::Income, "ingresos"),
        (TransactionKind::Debt, "deudas"),
    ] {
        let group: Vec<&Transaction> = transactions.iter().filter(|t| t.kind == kind).collect();
        if !group.is_empty() {
            let total: Decimal = group.iter().map(|t| t.amount).sum();
            parts.push(format!("{} {} (${:.2})", group.len(), label, total));
        }
    }

    format!("Procesado: {}.", parts.join(", "))
}

fn period_text(period: Option<Period>) -> &'static str {
    match period {
        Some(Period::Today) => " hoy",
        Some(Period::Yesterday) => " ayer",
        Some(Period::ThisWeek) => " esta semana",
        Some(Period::ThisMonth) => " este mes",
        Some(Period::Range { .. }) => " en ese periodo",
        None => "",
    }
}

/// Deterministic answer for a read query. The humanizer may rephrase it
/// but can never change these figures.
fn read_template(sum: &SumResult, pending: &SumResult, entities: &Entities) -> String {
    let mut detail = String::new();
    if let Some(category) = entities.category {
        detail.push_str(&format!(" en la categoría {}", category));
    }
    detail.push_str(period_text(entities.period));

    if sum.count == 0 && pending.count == 0 {
        return "Según mis registros, no encontré transacciones que coincidan con tu consulta."
            .to_string();
    }
    if sum.count == 0 {
        return format!(
            "No tienes transacciones validadas{}, pero tienes ${:.2} en {} transacciones pendientes de revisión.",
            detail, pending.total, pending.count
        );
    }
    if pending.count > 0 {
        return format!(
            "Tus gastos validados suman ${:.2}{}, en {} transacciones. Además, tienes ${:.2} en {} pendientes de revisión.",
            sum.total, detail, sum.count, pending.total, pending.count
        );
    }
    format!(
        "Tus gastos validados suman ${:.2}{}, en {} transacciones.",
        sum.total, detail, sum.count
    )
}

fn advice_template(
    intent: Intent,
    sum: &SumResult,
    breakdown: &[crate::models::CategoryBreakdown],
) -> String {
    let lead = if intent == Intent::Plan {
        "Para tu meta de ahorro:"
    } else {
        "Así van tus finanzas:"
    };

    if sum.count == 0 {
        return "Aún no tengo suficientes movimientos validados para aconsejarte. Registra tus gastos unos días y lo revisamos juntos.".to_string();
    }

    let mut message = format!(
        "{} este mes llevas ${:.2} en {} movimientos validados.",
        lead, sum.total, sum.count
    );
    if let Some(top) = breakdown.first() {
        message.push_str(&format!(
            " Tu mayor categoría es {} con ${:.2}; fijarle un tope semanal es un buen primer paso.",
            top.category, top.total
        ));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::{InMemoryStore, TransactionStore};
    use crate::models::DocumentData;
    use crate::providers::{
        FixedDocumentAnalysis, FixedTranscription, KeywordCategorizer, ScriptedReasoning,
    };
    use crate::taxonomy::Category;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestHarness {
        orchestrator: Orchestrator,
        reasoning: Arc<ScriptedReasoning>,
        owner: Uuid,
    }

    async fn harness_with(transcript: &str, store: Arc<dyn TransactionStore>) -> TestHarness {
        let config = NumaConfig::default();
        let reasoning = Arc::new(ScriptedReasoning::empty());
        let fim = Arc::new(IntentMotor::new(
            Arc::new(FixedTranscription::new(transcript)),
            reasoning.clone(),
            Arc::new(FixedDocumentAnalysis {
                data: DocumentData {
                    vendor: Some("La Trattoria".to_string()),
                    date: None,
                    total_amount: dec!(122.50),
                },
            }),
            config.clone(),
        ));
        let ledger = Arc::new(Ledger::new(
            store,
            Arc::new(KeywordCategorizer),
            config.confidence_threshold,
            config.ant_expense_threshold,
        ));
        let orchestrator = Orchestrator::new(fim, ledger, config);
        let owner = orchestrator
            .ledger()
            .register_user("test@numa.dev", "Test User", "digest")
            .await
            .unwrap()
            .id;
        TestHarness {
            orchestrator,
            reasoning,
            owner,
        }
    }

    async fn harness(transcript: &str) -> TestHarness {
        harness_with(transcript, Arc::new(InMemoryStore::new())).await
    }

    #[tokio::test]
    async fn test_voice_expense_creates_provisional() {
        let h = harness("Gasté 500 pesos en el súper").await;
        let envelope = h.orchestrator.handle_voice(h.owner, b"audio").await;

        assert_eq!(envelope.envelope_type, EnvelopeType::Transaction);
        let data = envelope.data.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].kind, TransactionKind::Expense);
        assert_eq!(data[0].amount, dec!(500));
        assert!(data[0].concept.contains("súper"));
        assert_eq!(data[0].status, crate::models::TransactionStatus::Provisional);
    }

    #[tokio::test]
    async fn test_voice_multi_clause_writes_both_in_order() {
        let h = harness("Gasté 100 en luz y 200 en agua").await;
        let envelope = h.orchestrator.handle_voice(h.owner, b"audio").await;

        assert_eq!(envelope.envelope_type, EnvelopeType::Transaction);
        let data = envelope.data.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].amount, dec!(100));
        assert!(data[0].concept.contains("luz"));
        assert_eq!(data[0].category, Some(Category::Servicios));
        assert_eq!(data[1].amount, dec!(200));
        assert!(data[1].concept.contains("agua"));
        assert_eq!(data[1].category, Some(Category::Servicios));

        let message = envelope.message.unwrap();
        assert!(message.contains('2'));
        assert!(message.contains("300"));
    }

    #[tokio::test]
    async fn test_bare_type_word_is_clarify_with_no_writes() {
        let h = harness("").await;
        let envelope = h.orchestrator.handle_text(h.owner, "gasto").await;

        assert_eq!(envelope.envelope_type, EnvelopeType::Chat);
        assert!(envelope.data.is_none());
        let message = envelope.message.unwrap();
        assert!(message.contains("qué fue"));
        assert!(message.contains("cuánto"));

        let rows = h
            .orchestrator
            .list_transactions(h.owner, &TransactionFilter::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_read_query_reports_exact_total() {
        let h = harness("").await;

        for (amount, concept) in [(dec!(500), "el súper"), (dec!(300), "la cena")] {
            let mut new = NewTransaction::expense(amount, concept);
            new.merchant = Some("Soriana".to_string());
            let created = h
                .orchestrator
                .ledger()
                .create_provisional(h.owner, new)
                .await
                .unwrap();
            h.orchestrator
                .ledger()
                .verify_manual(created.id, h.owner)
                .await
                .unwrap();
        }

        let envelope = h
            .orchestrator
            .handle_text(h.owner, "¿cuánto gasté hoy?")
            .await;
        assert_eq!(envelope.envelope_type, EnvelopeType::Chat);
        let message = envelope.message.unwrap();
        assert!(message.contains("800"), "message was: {}", message);
        assert!(message.contains('2'));
    }

    #[tokio::test]
    async fn test_unintelligible_audio_never_reaches_reasoning() {
        let h = harness("   ").await;
        let envelope = h.orchestrator.handle_voice(h.owner, b"").await;

        assert_eq!(envelope.envelope_type, EnvelopeType::Error);
        assert_eq!(envelope.error_kind.as_deref(), Some("unintelligible_audio"));
        assert_eq!(h.reasoning.call_count(), 0);
    }

    #[tokio::test]
    async fn test_social_chitchat_steers_without_ledger_touch() {
        let h = harness("").await;
        let envelope = h.orchestrator.handle_text(h.owner, "hola buenos días").await;

        assert_eq!(envelope.envelope_type, EnvelopeType::Chat);
        let rows = h
            .orchestrator
            .list_transactions(h.owner, &TransactionFilter::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_update_targets_recent_provisional() {
        let h = harness("").await;
        h.orchestrator
            .ledger()
            .create_provisional(h.owner, NewTransaction::expense(dec!(80), "algo"))
            .await
            .unwrap();

        let envelope = h
            .orchestrator
            .handle_text(h.owner, "fue en el Oxxo")
            .await;
        assert_eq!(envelope.envelope_type, EnvelopeType::Transaction);
        let data = envelope.data.unwrap();
        assert_eq!(data[0].merchant.as_deref(), Some("Oxxo"));
        assert_eq!(data[0].amount, dec!(80));
    }

    #[tokio::test]
    async fn test_advice_uses_precomputed_figures() {
        let h = harness("").await;
        let mut new = NewTransaction::expense(dec!(900), "la despensa");
        new.merchant = Some("Soriana".to_string());
        let created = h
            .orchestrator
            .ledger()
            .create_provisional(h.owner, new)
            .await
            .unwrap();
        h.orchestrator
            .ledger()
            .verify_manual(created.id, h.owner)
            .await
            .unwrap();

        let envelope = h
            .orchestrator
            .handle_text(h.owner, "quiero ahorrar para un viaje")
            .await;
        assert_eq!(envelope.envelope_type, EnvelopeType::Chat);
        let message = envelope.message.unwrap();
        assert!(message.contains("900"), "message was: {}", message);
    }

    #[tokio::test]
    async fn test_zero_deadline_times_out() {
        let mut h = harness("gasté 100 en luz").await;
        h.orchestrator.config.request_deadline_ms = 0;

        let envelope = h.orchestrator.handle_text(h.owner, "gasté 100 en luz").await;
        assert_eq!(envelope.envelope_type, EnvelopeType::Error);
        assert_eq!(envelope.error_kind.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_document_verification_flow() {
        let h = harness("").await;
        let created = h
            .orchestrator
            .ledger()
            .create_provisional(h.owner, NewTransaction::expense(dec!(120), "la cena"))
            .await
            .unwrap();

        let verified = h
            .orchestrator
            .verify_document(h.owner, created.id, b"receipt-bytes")
            .await
            .unwrap();
        assert_eq!(verified.amount, dec!(122.50));
        assert_eq!(verified.merchant.as_deref(), Some("La Trattoria"));
        assert_eq!(
            verified.status,
            crate::models::TransactionStatus::Verified
        );
    }

    #[tokio::test]
    async fn test_cross_tenant_manual_verify_is_not_found() {
        let h = harness("").await;
        let other = h
            .orchestrator
            .ledger()
            .register_user("other@numa.dev", "Other", "digest")
            .await
            .unwrap()
            .id;
        let created = h
            .orchestrator
            .ledger()
            .create_provisional(h.owner, NewTransaction::expense(dec!(10), "algo"))
            .await
            .unwrap();

        let cross = h.orchestrator.manual_verify(other, created.id).await;
        assert!(matches!(cross, Err(NumaError::TransactionNotFound)));
    }

    //
    // ================= Partial-failure ordering =================
    //

    /// Store wrapper that starts failing inserts after a set count.
    struct FailingAfterStore {
        inner: InMemoryStore,
        allowed_inserts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TransactionStore for FailingAfterStore {
        async fn insert_user(&self, user: &crate::models::User) -> Result<()> {
            self.inner.insert_user(user).await
        }
        async fn find_user_by_email(&self, email: &str) -> Result<Option<crate::models::User>> {
            self.inner.find_user_by_email(email).await
        }
        async fn user_exists(&self, id: Uuid) -> Result<bool> {
            self.inner.user_exists(id).await
        }
        async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
            if self.allowed_inserts.fetch_sub(1, Ordering::SeqCst) == 0 {
                return Err(NumaError::StorageError("disk full".to_string()));
            }
            self.inner.insert_transaction(transaction).await
        }
        async fn fetch_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
            self.inner.fetch_transaction(id).await
        }
        async fn apply_verification(
            &self,
            id: Uuid,
            update: &crate::ledger::store::VerificationUpdate,
        ) -> Result<crate::ledger::store::VerifyAttempt> {
            self.inner.apply_verification(id, update).await
        }
        async fn update_provisional_fields(
            &self,
            id: Uuid,
            merchant: Option<&str>,
            category: Option<Category>,
        ) -> Result<crate::ledger::store::VerifyAttempt> {
            self.inner.update_provisional_fields(id, merchant, category).await
        }
        async fn list_by_owner(&self, owner: Uuid) -> Result<Vec<Transaction>> {
            self.inner.list_by_owner(owner).await
        }
    }

    #[tokio::test]
    async fn test_partial_write_reports_successes_and_failure() {
        let store = Arc::new(FailingAfterStore {
            inner: InMemoryStore::new(),
            allowed_inserts: AtomicUsize::new(1),
        });
        let h = harness_with("", store).await;

        let envelope = h
            .orchestrator
            .handle_text(h.owner, "gasté 100 en luz y 200 en agua")
            .await;

        assert_eq!(envelope.envelope_type, EnvelopeType::Transaction);
        let data = envelope.data.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].amount, dec!(100));
        assert_eq!(envelope.error_kind.as_deref(), Some("storage_error"));
    }

    //
    // ================= Narrative texts =================
    //

    fn sample_tx(kind: TransactionKind, amount: Decimal, concept: &str) -> Transaction {
        use chrono::Utc;
        Transaction {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            kind,
            amount,
            concept: concept.to_string(),
            category: None,
            merchant: None,
            status: crate::models::TransactionStatus::Provisional,
            transaction_date: None,
            created_at: Utc::now(),
            verified_at: None,
        }
    }

    #[test]
    fn test_narrative_single_expense() {
        let text = narrative(&[sample_tx(TransactionKind::Expense, dec!(120), "la cena")]);
        assert!(text.contains("la cena"));
        assert!(text.contains("120.00"));
    }

    #[test]
    fn test_narrative_grouped() {
        let text = narrative(&[
            sample_tx(TransactionKind::Expense, dec!(100), "luz"),
            sample_tx(TransactionKind::Expense, dec!(200), "agua"),
            sample_tx(TransactionKind::Income, dec!(1000), "sueldo"),
        ]);
        assert!(text.contains("2 gastos ($300.00)"));
        assert!(text.contains("1 ingresos ($1000.00)"));
    }

    #[test]
    fn test_read_template_mentions_pending() {
        let sum = SumResult {
            total: dec!(800),
            count: 2,
        };
        let pending = SumResult {
            total: dec!(300),
            count: 1,
        };
        let entities = Entities {
            period: Some(Period::Today),
            ..Default::default()
        };
        let text = read_template(&sum, &pending, &entities);
        assert!(text.contains("800.00"));
        assert!(text.contains("hoy"));
        assert!(text.contains("pendientes"));
    }
}
