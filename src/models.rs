//! Core data models for the Numa assistant

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::taxonomy::Category;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Expense,
    Income,
    Debt,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Provisional,
    Verified,
    VerifiedManual,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Verified | TransactionStatus::VerifiedManual)
    }
}

//
// ================= User =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// Opaque credential digest supplied by the facade; the core never
    /// interprets it.
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
}

//
// ================= Transaction =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub concept: String,
    pub category: Option<Category>,
    pub merchant: Option<String>,
    pub status: TransactionStatus,
    pub transaction_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Authoritative data extracted from a receipt or invoice. The document
/// amount supersedes whatever the voice pipeline recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentData {
    pub vendor: Option<String>,
    pub date: Option<NaiveDate>,
    pub total_amount: Decimal,
}

//
// ================= Intents =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    WriteLog,
    ReadQuery,
    Plan,
    Advice,
    Steer,
    ConfirmUpdate,
    Clarify,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubIntent {
    Expense,
    Income,
    Debt,
    Meta,
    Social,
}

impl SubIntent {
    pub fn kind(&self) -> Option<TransactionKind> {
        match self {
            SubIntent::Expense => Some(TransactionKind::Expense),
            SubIntent::Income => Some(TransactionKind::Income),
            SubIntent::Debt => Some(TransactionKind::Debt),
            _ => None,
        }
    }
}

/// Entities recognized inside a single utterance clause.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Entities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Why a CLARIFY record was emitted (e.g. "unintelligible",
    /// "missing_amount", "missing_concept").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One classified clause of an utterance. Produced by the intent motor,
/// consumed by the orchestrator, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentRecord {
    pub intent: Intent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_intent: Option<SubIntent>,
    #[serde(default)]
    pub entities: Entities,
    pub confidence: f32,
}

impl IntentRecord {
    pub fn new(intent: Intent, confidence: f32) -> Self {
        Self {
            intent,
            sub_intent: None,
            entities: Entities::default(),
            confidence,
        }
    }

    pub fn clarify(reason: &str) -> Self {
        let mut record = Self::new(Intent::Clarify, 1.0);
        record.entities.reason = Some(reason.to_string());
        record
    }
}

//
// ================= Query Periods & Filters =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Today,
    Yesterday,
    ThisWeek,
    ThisMonth,
    Range { start: NaiveDate, end: NaiveDate },
}

impl Period {
    /// Half-open UTC bounds `[start, end)` for the period, anchored at `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let today = now.date_naive();
        let start_of = |d: NaiveDate| d.and_time(NaiveTime::MIN).and_utc();

        match self {
            Period::Today => (start_of(today), start_of(today) + Duration::days(1)),
            Period::Yesterday => {
                (start_of(today) - Duration::days(1), start_of(today))
            }
            Period::ThisWeek => {
                use chrono::Datelike;
                let monday =
                    today - Duration::days(today.weekday().num_days_from_monday() as i64);
                (start_of(monday), start_of(today) + Duration::days(1))
            }
            Period::ThisMonth => {
                use chrono::Datelike;
                let first = today.with_day(1).unwrap_or(today);
                (start_of(first), start_of(today) + Duration::days(1))
            }
            Period::Range { start, end } => {
                (start_of(*start), start_of(*end) + Duration::days(1))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub period: Option<Period>,
    pub category: Option<Category>,
    pub status: Option<TransactionStatus>,
    pub kind: Option<TransactionKind>,
}

impl TransactionFilter {
    pub fn with_period(period: Period) -> Self {
        Self {
            period: Some(period),
            ..Default::default()
        }
    }

    pub fn with_status(status: TransactionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

//
// ================= Aggregation Results =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SumResult {
    pub total: Decimal,
    pub count: u64,
}

impl SumResult {
    pub fn zero() -> Self {
        Self {
            total: Decimal::ZERO,
            count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaySide {
    pub income: SumResult,
    pub expense: SumResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub validated: DaySide,
    pub provisional: DaySide,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub category: Category,
    pub total: Decimal,
    pub count: u64,
}

//
// ================= Response Envelope =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Transaction,
    Chat,
    Error,
}

/// The single response shape every conversational entry point returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    pub data: Option<Vec<Transaction>>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl ResponseEnvelope {
    pub fn chat(message: impl Into<String>) -> Self {
        Self {
            envelope_type: EnvelopeType::Chat,
            data: None,
            message: Some(message.into()),
            error_kind: None,
        }
    }

    pub fn transactions(data: Vec<Transaction>, message: impl Into<String>) -> Self {
        Self {
            envelope_type: EnvelopeType::Transaction,
            data: Some(data),
            message: Some(message.into()),
            error_kind: None,
        }
    }

    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Self {
            envelope_type: EnvelopeType::Error,
            data: None,
            message: Some(message.into()),
            error_kind: Some(kind.to_string()),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionKind::Expense => "EXPENSE",
            TransactionKind::Income => "INCOME",
            TransactionKind::Debt => "DEBT",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Provisional => "provisional",
            TransactionStatus::Verified => "verified",
            TransactionStatus::VerifiedManual => "verified_manual",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_period_bounds_today() {
        let now = Utc.with_ymd_and_hms(2024, 5, 14, 15, 30, 0).unwrap();
        let (start, end) = Period::Today.bounds(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 14, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_period_bounds_week_starts_monday() {
        // 2024-05-14 is a Tuesday
        let now = Utc.with_ymd_and_hms(2024, 5, 14, 10, 0, 0).unwrap();
        let (start, _) = Period::ThisWeek.bounds(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TransactionStatus::VerifiedManual).unwrap();
        assert_eq!(json, "\"verified_manual\"");
    }

    #[test]
    fn test_intent_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&Intent::WriteLog).unwrap();
        assert_eq!(json, "\"WRITE_LOG\"");
    }
}
