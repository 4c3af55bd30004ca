//! The ledger: entity ownership, the transaction state machine and
//! deterministic aggregations
//!
//! Every operation is scoped by owner; a query without an owner filter
//! does not exist in this API. Transactions move PROVISIONAL → VERIFIED or
//! PROVISIONAL → VERIFIED_MANUAL and nowhere else.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::NumaError;
use crate::models::{
    CategoryBreakdown, DailySummary, DaySide, DocumentData, Period, SumResult, Transaction,
    TransactionFilter, TransactionKind, TransactionStatus, User,
};
use crate::providers::AutoCategorizer;
use crate::taxonomy::{self, Category};
use crate::Result;

pub mod store;

use store::{matches_filter, TransactionStore, VerificationUpdate, VerifyAttempt};

/// Input for a new provisional movement.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub concept: String,
    pub merchant: Option<String>,
    pub category: Option<Category>,
    pub date: Option<NaiveDate>,
}

impl NewTransaction {
    pub fn expense(amount: Decimal, concept: impl Into<String>) -> Self {
        Self {
            kind: TransactionKind::Expense,
            amount,
            concept: concept.into(),
            merchant: None,
            category: None,
            date: None,
        }
    }
}

pub struct Ledger {
    store: Arc<dyn TransactionStore>,
    categorizer: Arc<dyn AutoCategorizer>,
    confidence_threshold: f32,
    ant_expense_threshold: Decimal,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        categorizer: Arc<dyn AutoCategorizer>,
        confidence_threshold: f32,
        ant_expense_threshold: Decimal,
    ) -> Self {
        Self {
            store,
            categorizer,
            confidence_threshold,
            ant_expense_threshold,
        }
    }

    //
    // ================= Users =================
    //

    pub async fn register_user(
        &self,
        email: &str,
        name: &str,
        credential_hash: &str,
    ) -> Result<User> {
        if self.store.find_user_by_email(email).await?.is_some() {
            return Err(NumaError::DuplicateEmail(email.to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
            credential_hash: credential_hash.to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_user(&user).await?;

        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.store.find_user_by_email(email).await
    }

    //
    // ================= Writes =================
    //

    /// Create a provisional transaction. Partial data is fine: merchant,
    /// category and date are stored when present and left null otherwise.
    pub async fn create_provisional(
        &self,
        owner: Uuid,
        new: NewTransaction,
    ) -> Result<Transaction> {
        if new.amount <= Decimal::ZERO {
            return Err(NumaError::InvalidAmount(format!(
                "amount must be positive, got {}",
                new.amount
            )));
        }
        let concept = new.concept.trim().to_string();
        if concept.is_empty() {
            return Err(NumaError::InvalidConcept("concept is empty".to_string()));
        }
        if !self.store.user_exists(owner).await? {
            return Err(NumaError::UnknownOwner);
        }

        let merchant = new
            .merchant
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            // A merchant echoing the concept adds nothing
            .filter(|m| !m.eq_ignore_ascii_case(&concept));

        let transaction = Transaction {
            id: Uuid::new_v4(),
            owner_id: owner,
            kind: new.kind,
            amount: new.amount,
            concept,
            category: new.category,
            merchant,
            status: TransactionStatus::Provisional,
            transaction_date: Some(new.date.unwrap_or_else(|| Utc::now().date_naive())),
            created_at: Utc::now(),
            verified_at: None,
        };

        self.store.insert_transaction(&transaction).await?;

        info!(
            transaction_id = %transaction.id,
            owner_id = %owner,
            kind = %transaction.kind,
            amount = %transaction.amount,
            "Provisional transaction created"
        );
        Ok(transaction)
    }

    //
    // ================= Verification =================
    //

    /// Verify against a receipt. The document is ground truth: its amount
    /// overwrites the provisional amount; the original concept stays.
    pub async fn verify_with_document(
        &self,
        id: Uuid,
        owner: Uuid,
        document: &DocumentData,
    ) -> Result<Transaction> {
        let existing = self.fetch_owned(id, owner).await?;
        if existing.status != TransactionStatus::Provisional {
            return Err(NumaError::NotProvisional(existing.status.to_string()));
        }

        let vendor = document
            .vendor
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(NumaError::MissingMerchant)?;

        if document.total_amount <= Decimal::ZERO {
            return Err(NumaError::InvalidAmount(format!(
                "document amount must be positive, got {}",
                document.total_amount
            )));
        }

        let category = self
            .auto_categorize(&existing.concept, Some(vendor), document.total_amount)
            .await;

        let update = VerificationUpdate {
            status: TransactionStatus::Verified,
            amount: Some(document.total_amount),
            merchant: Some(vendor.to_string()),
            transaction_date: document.date,
            category: Some(category),
            verified_at: Utc::now(),
        };

        self.finish_verification(id, &update).await
    }

    /// Verify without a document. The row must already carry a merchant;
    /// categorization runs only when the category is still null.
    pub async fn verify_manual(&self, id: Uuid, owner: Uuid) -> Result<Transaction> {
        let existing = self.fetch_owned(id, owner).await?;
        if existing.status != TransactionStatus::Provisional {
            return Err(NumaError::NotProvisional(existing.status.to_string()));
        }

        let merchant = existing
            .merchant
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or(NumaError::MissingMerchant)?;

        let category = match existing.category {
            Some(category) => category,
            None => {
                self.auto_categorize(&existing.concept, Some(merchant), existing.amount)
                    .await
            }
        };

        let update = VerificationUpdate {
            status: TransactionStatus::VerifiedManual,
            amount: None,
            merchant: None,
            transaction_date: None,
            category: Some(category),
            verified_at: Utc::now(),
        };

        self.finish_verification(id, &update).await
    }

    /// Merchant/category touch-up on a recent provisional row; the amount
    /// is never changed here.
    pub async fn update_provisional_fields(
        &self,
        id: Uuid,
        owner: Uuid,
        merchant: Option<&str>,
        category: Option<Category>,
    ) -> Result<Transaction> {
        let existing = self.fetch_owned(id, owner).await?;
        if existing.status != TransactionStatus::Provisional {
            return Err(NumaError::NotProvisional(existing.status.to_string()));
        }

        match self
            .store
            .update_provisional_fields(id, merchant, category)
            .await?
        {
            VerifyAttempt::Updated(transaction) => Ok(transaction),
            VerifyAttempt::NotProvisional(status) => {
                Err(NumaError::NotProvisional(status.to_string()))
            }
            VerifyAttempt::Missing => Err(NumaError::TransactionNotFound),
        }
    }

    async fn fetch_owned(&self, id: Uuid, owner: Uuid) -> Result<Transaction> {
        let Some(existing) = self.store.fetch_transaction(id).await? else {
            return Err(NumaError::TransactionNotFound);
        };
        if existing.owner_id != owner {
            // Cross-tenant access reads the same as a missing row
            warn!(transaction_id = %id, "Cross-owner access attempt");
            return Err(NumaError::TransactionNotFound);
        }
        Ok(existing)
    }

    async fn finish_verification(
        &self,
        id: Uuid,
        update: &VerificationUpdate,
    ) -> Result<Transaction> {
        match self.store.apply_verification(id, update).await? {
            VerifyAttempt::Updated(transaction) => {
                info!(
                    transaction_id = %transaction.id,
                    status = %transaction.status,
                    "Transaction verified"
                );
                Ok(transaction)
            }
            VerifyAttempt::NotProvisional(status) => {
                Err(NumaError::NotProvisional(status.to_string()))
            }
            VerifyAttempt::Missing => Err(NumaError::TransactionNotFound),
        }
    }

    /// Best-effort categorization on the way into a terminal state. Low
    /// confidence and provider failures both land in the fallback bucket;
    /// verification never fails because of this step.
    async fn auto_categorize(
        &self,
        concept: &str,
        merchant: Option<&str>,
        amount: Decimal,
    ) -> Category {
        match self.categorizer.classify(concept, merchant).await {
            Ok((category, confidence)) if confidence >= self.confidence_threshold => {
                taxonomy::apply_ant_expense(category, amount, merchant, self.ant_expense_threshold)
            }
            Ok((_, confidence)) => {
                info!(confidence, "Categorizer below threshold, using fallback");
                Category::fallback()
            }
            Err(e) => {
                warn!(error = %e, "Categorizer unavailable, using fallback");
                Category::fallback()
            }
        }
    }

    //
    // ================= Reads =================
    //

    pub async fn list_by_owner(
        &self,
        owner: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>> {
        let now = Utc::now();
        Ok(self
            .store
            .list_by_owner(owner)
            .await?
            .into_iter()
            .filter(|t| matches_filter(t, filter, now))
            .collect())
    }

    /// Deterministic aggregation. Without an explicit status filter only
    /// validated rows (VERIFIED, VERIFIED_MANUAL) are counted.
    pub async fn sum_by_owner(&self, owner: Uuid, filter: &TransactionFilter) -> Result<SumResult> {
        let rows = self.list_by_owner(owner, filter).await?;
        let rows: Vec<&Transaction> = rows
            .iter()
            .filter(|t| filter.status.is_some() || t.status.is_terminal())
            .collect();

        Ok(SumResult {
            total: rows.iter().map(|t| t.amount).sum(),
            count: rows.len() as u64,
        })
    }

    /// Sum over rows still awaiting review.
    pub async fn pending_balance(&self, owner: Uuid) -> Result<SumResult> {
        self.sum_by_owner(
            owner,
            &TransactionFilter::with_status(TransactionStatus::Provisional),
        )
        .await
    }

    pub async fn daily_summary(&self, owner: Uuid, date: NaiveDate) -> Result<DailySummary> {
        let day = Period::Range {
            start: date,
            end: date,
        };

        let side = |status: Option<TransactionStatus>, kind: TransactionKind| TransactionFilter {
            period: Some(day),
            category: None,
            status,
            kind: Some(kind),
        };

        Ok(DailySummary {
            date,
            validated: DaySide {
                income: self
                    .sum_by_owner(owner, &side(None, TransactionKind::Income))
                    .await?,
                expense: self
                    .sum_by_owner(owner, &side(None, TransactionKind::Expense))
                    .await?,
            },
            provisional: DaySide {
                income: self
                    .sum_by_owner(
                        owner,
                        &side(Some(TransactionStatus::Provisional), TransactionKind::Income),
                    )
                    .await?,
                expense: self
                    .sum_by_owner(
                        owner,
                        &side(
                            Some(TransactionStatus::Provisional),
                            TransactionKind::Expense,
                        ),
                    )
                    .await?,
            },
        })
    }

    /// Validated spending grouped by category, largest first. Feeds the
    /// advice context.
    pub async fn breakdown_by_category(&self, owner: Uuid) -> Result<Vec<CategoryBreakdown>> {
        let rows = self
            .list_by_owner(owner, &TransactionFilter::default())
            .await?;

        let mut grouped: HashMap<Category, (Decimal, u64)> = HashMap::new();
        for row in rows.iter().filter(|t| t.status.is_terminal()) {
            if let Some(category) = row.category {
                let entry = grouped.entry(category).or_insert((Decimal::ZERO, 0));
                entry.0 += row.amount;
                entry.1 += 1;
            }
        }

        let mut breakdown: Vec<CategoryBreakdown> = grouped
            .into_iter()
            .map(|(category, (total, count))| CategoryBreakdown {
                category,
                total,
                count,
            })
            .collect();
        breakdown.sort_by(|a, b| b.total.cmp(&a.total));
        Ok(breakdown)
    }

    /// Most recent provisional rows, newest first. Target lookup for
    /// follow-up corrections.
    pub async fn recent_provisional(&self, owner: Uuid, limit: usize) -> Result<Vec<Transaction>> {
        let mut rows = self
            .list_by_owner(
                owner,
                &TransactionFilter::with_status(TransactionStatus::Provisional),
            )
            .await?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }
}
