//! Transaction persistence layer
//!
//! One trait, two backends: an in-memory store for development and tests,
//! and Postgres for deployment. Status transitions go through a
//! compare-and-set so concurrent verify attempts cannot both win.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::NumaError;
use crate::models::{
    Transaction, TransactionFilter, TransactionKind, TransactionStatus, User,
};
use crate::taxonomy::Category;
use crate::Result;

/// Fields applied atomically when a transaction leaves PROVISIONAL.
#[derive(Debug, Clone)]
pub struct VerificationUpdate {
    pub status: TransactionStatus,
    /// Document amount overwrites the provisional amount when present.
    pub amount: Option<Decimal>,
    pub merchant: Option<String>,
    pub transaction_date: Option<NaiveDate>,
    pub category: Option<Category>,
    pub verified_at: DateTime<Utc>,
}

/// Outcome of a compare-and-set verification attempt.
#[derive(Debug)]
pub enum VerifyAttempt {
    Updated(Transaction),
    NotProvisional(TransactionStatus),
    Missing,
}

/// Trait for transaction persistence
#[async_trait::async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert_user(&self, user: &User) -> Result<()>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn user_exists(&self, id: Uuid) -> Result<bool>;

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()>;
    async fn fetch_transaction(&self, id: Uuid) -> Result<Option<Transaction>>;
    /// Apply `update` only while the row is still PROVISIONAL.
    async fn apply_verification(&self, id: Uuid, update: &VerificationUpdate)
        -> Result<VerifyAttempt>;
    /// Merchant/category touch-up on a PROVISIONAL row; the amount is
    /// never modified here.
    async fn update_provisional_fields(
        &self,
        id: Uuid,
        merchant: Option<&str>,
        category: Option<Category>,
    ) -> Result<VerifyAttempt>;
    /// All rows for one owner ordered by creation time. Callers refine
    /// with [`matches_filter`]; the owner scope is not optional.
    async fn list_by_owner(&self, owner: Uuid) -> Result<Vec<Transaction>>;
}

/// Shared filter semantics for both backends: status, kind and category
/// must match exactly; the period is evaluated against `created_at`.
pub fn matches_filter(
    transaction: &Transaction,
    filter: &TransactionFilter,
    now: DateTime<Utc>,
) -> bool {
    if let Some(status) = filter.status {
        if transaction.status != status {
            return false;
        }
    }
    if let Some(kind) = filter.kind {
        if transaction.kind != kind {
            return false;
        }
    }
    if let Some(category) = filter.category {
        if transaction.category != Some(category) {
            return false;
        }
    }
    if let Some(period) = filter.period {
        let (start, end) = period.bounds(now);
        if transaction.created_at < start || transaction.created_at >= end {
            return false;
        }
    }
    true
}

//
// ================= In-memory backend =================
//

/// In-memory store for development and tests.
pub struct InMemoryStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
    transactions: Arc<RwLock<HashMap<Uuid, Transaction>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            transactions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().await;
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn user_exists(&self, id: Uuid) -> Result<bool> {
        let users = self.users.read().await;
        Ok(users.contains_key(&id))
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        transactions.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn fetch_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(&id).cloned())
    }

    async fn apply_verification(
        &self,
        id: Uuid,
        update: &VerificationUpdate,
    ) -> Result<VerifyAttempt> {
        // The write lock serializes per-id races: the second verifier
        // observes the already-terminal status.
        let mut transactions = self.transactions.write().await;

        let Some(transaction) = transactions.get_mut(&id) else {
            return Ok(VerifyAttempt::Missing);
        };
        if transaction.status != TransactionStatus::Provisional {
            return Ok(VerifyAttempt::NotProvisional(transaction.status));
        }

        transaction.status = update.status;
        transaction.verified_at = Some(update.verified_at);
        if let Some(amount) = update.amount {
            transaction.amount = amount;
        }
        if let Some(merchant) = &update.merchant {
            transaction.merchant = Some(merchant.clone());
        }
        if let Some(date) = update.transaction_date {
            transaction.transaction_date = Some(date);
        }
        if let Some(category) = update.category {
            transaction.category = Some(category);
        }

        Ok(VerifyAttempt::Updated(transaction.clone()))
    }

    async fn update_provisional_fields(
        &self,
        id: Uuid,
        merchant: Option<&str>,
        category: Option<Category>,
    ) -> Result<VerifyAttempt> {
        let mut transactions = self.transactions.write().await;

        let Some(transaction) = transactions.get_mut(&id) else {
            return Ok(VerifyAttempt::Missing);
        };
        if transaction.status != TransactionStatus::Provisional {
            return Ok(VerifyAttempt::NotProvisional(transaction.status));
        }

        if let Some(merchant) = merchant {
            transaction.merchant = Some(merchant.to_string());
        }
        if let Some(category) = category {
            transaction.category = Some(category);
        }

        Ok(VerifyAttempt::Updated(transaction.clone()))
    }

    async fn list_by_owner(&self, owner: Uuid) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut rows: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.owner_id == owner)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.created_at);
        Ok(rows)
    }
}

//
// ================= Postgres backend =================
//

pub struct PostgresStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS users (
                      id UUID PRIMARY KEY,
                      email TEXT NOT NULL UNIQUE,
                      name TEXT NOT NULL,
                      credential_hash TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS transactions (
                      id UUID PRIMARY KEY,
                      owner_id UUID NOT NULL REFERENCES users(id),
                      kind TEXT NOT NULL,
                      amount NUMERIC NOT NULL,
                      concept TEXT NOT NULL,
                      category TEXT,
                      merchant TEXT,
                      status TEXT NOT NULL,
                      transaction_date DATE,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      verified_at TIMESTAMPTZ
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_transactions_owner_created
                    ON transactions (owner_id, created_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_transactions_owner_status
                    ON transactions (owner_id, status);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                NumaError::StorageError(format!("Failed to initialize ledger schema: {}", e))
            })?;

        Ok(())
    }

    fn kind_to_db(kind: TransactionKind) -> &'static str {
        match kind {
            TransactionKind::Expense => "EXPENSE",
            TransactionKind::Income => "INCOME",
            TransactionKind::Debt => "DEBT",
        }
    }

    fn kind_from_db(kind: &str) -> TransactionKind {
        match kind {
            "INCOME" => TransactionKind::Income,
            "DEBT" => TransactionKind::Debt,
            _ => TransactionKind::Expense,
        }
    }

    fn status_to_db(status: TransactionStatus) -> &'static str {
        match status {
            TransactionStatus::Provisional => "provisional",
            TransactionStatus::Verified => "verified",
            TransactionStatus::VerifiedManual => "verified_manual",
        }
    }

    fn status_from_db(status: &str) -> TransactionStatus {
        match status {
            "verified" => TransactionStatus::Verified,
            "verified_manual" => TransactionStatus::VerifiedManual,
            _ => TransactionStatus::Provisional,
        }
    }

    fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction> {
        let kind: String = row
            .try_get("kind")
            .map_err(|e| NumaError::StorageError(e.to_string()))?;
        let status: String = row
            .try_get("status")
            .map_err(|e| NumaError::StorageError(e.to_string()))?;
        let category: Option<String> = row
            .try_get("category")
            .map_err(|e| NumaError::StorageError(e.to_string()))?;

        Ok(Transaction {
            id: row
                .try_get("id")
                .map_err(|e| NumaError::StorageError(e.to_string()))?,
            owner_id: row
                .try_get("owner_id")
                .map_err(|e| NumaError::StorageError(e.to_string()))?,
            kind: Self::kind_from_db(&kind),
            amount: row
                .try_get("amount")
                .map_err(|e| NumaError::StorageError(e.to_string()))?,
            concept: row
                .try_get("concept")
                .map_err(|e| NumaError::StorageError(e.to_string()))?,
            category: category.as_deref().and_then(Category::parse),
            merchant: row
                .try_get("merchant")
                .map_err(|e| NumaError::StorageError(e.to_string()))?,
            status: Self::status_from_db(&status),
            transaction_date: row
                .try_get("transaction_date")
                .map_err(|e| NumaError::StorageError(e.to_string()))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| NumaError::StorageError(e.to_string()))?,
            verified_at: row
                .try_get("verified_at")
                .map_err(|e| NumaError::StorageError(e.to_string()))?,
        })
    }

    const TX_COLUMNS: &'static str = "id, owner_id, kind, amount, concept, category, merchant, status, transaction_date, created_at, verified_at";
}

#[async_trait::async_trait]
impl TransactionStore for PostgresStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, credential_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.credential_hash)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| NumaError::StorageError(format!("Failed to insert user: {}", e)))?;

        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT id, email, name, credential_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| NumaError::StorageError(format!("Failed to load user: {}", e)))?;

        row.map(|row| {
            Ok(User {
                id: row
                    .try_get("id")
                    .map_err(|e: sqlx::Error| NumaError::StorageError(e.to_string()))?,
                email: row
                    .try_get("email")
                    .map_err(|e: sqlx::Error| NumaError::StorageError(e.to_string()))?,
                name: row
                    .try_get("name")
                    .map_err(|e: sqlx::Error| NumaError::StorageError(e.to_string()))?,
                credential_hash: row
                    .try_get("credential_hash")
                    .map_err(|e: sqlx::Error| NumaError::StorageError(e.to_string()))?,
                created_at: row
                    .try_get("created_at")
                    .map_err(|e: sqlx::Error| NumaError::StorageError(e.to_string()))?,
            })
        })
        .transpose()
    }

    async fn user_exists(&self, id: Uuid) -> Result<bool> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT 1 AS one FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| NumaError::StorageError(format!("Failed to check user: {}", e)))?;

        Ok(row.is_some())
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO transactions
              (id, owner_id, kind, amount, concept, category, merchant, status, transaction_date, created_at, verified_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.owner_id)
        .bind(Self::kind_to_db(transaction.kind))
        .bind(transaction.amount)
        .bind(&transaction.concept)
        .bind(transaction.category.map(|c| c.label()))
        .bind(&transaction.merchant)
        .bind(Self::status_to_db(transaction.status))
        .bind(transaction.transaction_date)
        .bind(transaction.created_at)
        .bind(transaction.verified_at)
        .execute(&self.pool)
        .await
        .map_err(|e| NumaError::StorageError(format!("Failed to insert transaction: {}", e)))?;

        Ok(())
    }

    async fn fetch_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            Self::TX_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| NumaError::StorageError(format!("Failed to load transaction: {}", e)))?;

        row.map(|row| Self::row_to_transaction(&row)).transpose()
    }

    async fn apply_verification(
        &self,
        id: Uuid,
        update: &VerificationUpdate,
    ) -> Result<VerifyAttempt> {
        self.ensure_schema().await?;

        // Compare-and-set on the status column: the second of two racing
        // verifiers updates zero rows.
        let row = sqlx::query(&format!(
            r#"
            UPDATE transactions
            SET status = $2,
                amount = COALESCE($3, amount),
                merchant = COALESCE($4, merchant),
                transaction_date = COALESCE($5, transaction_date),
                category = COALESCE($6, category),
                verified_at = $7
            WHERE id = $1 AND status = 'provisional'
            RETURNING {}
            "#,
            Self::TX_COLUMNS
        ))
        .bind(id)
        .bind(Self::status_to_db(update.status))
        .bind(update.amount)
        .bind(&update.merchant)
        .bind(update.transaction_date)
        .bind(update.category.map(|c| c.label()))
        .bind(update.verified_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| NumaError::StorageError(format!("Failed to verify transaction: {}", e)))?;

        if let Some(row) = row {
            return Ok(VerifyAttempt::Updated(Self::row_to_transaction(&row)?));
        }

        match self.fetch_transaction(id).await? {
            Some(existing) => Ok(VerifyAttempt::NotProvisional(existing.status)),
            None => Ok(VerifyAttempt::Missing),
        }
    }

    async fn update_provisional_fields(
        &self,
        id: Uuid,
        merchant: Option<&str>,
        category: Option<Category>,
    ) -> Result<VerifyAttempt> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE transactions
            SET merchant = COALESCE($2, merchant),
                category = COALESCE($3, category)
            WHERE id = $1 AND status = 'provisional'
            RETURNING {}
            "#,
            Self::TX_COLUMNS
        ))
        .bind(id)
        .bind(merchant)
        .bind(category.map(|c| c.label()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| NumaError::StorageError(format!("Failed to update transaction: {}", e)))?;

        if let Some(row) = row {
            return Ok(VerifyAttempt::Updated(Self::row_to_transaction(&row)?));
        }

        match self.fetch_transaction(id).await? {
            Some(existing) => Ok(VerifyAttempt::NotProvisional(existing.status)),
            None => Ok(VerifyAttempt::Missing),
        }
    }

    async fn list_by_owner(&self, owner: Uuid) -> Result<Vec<Transaction>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE owner_id = $1 ORDER BY created_at ASC",
            Self::TX_COLUMNS
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| NumaError::StorageError(format!("Failed to list transactions: {}", e)))?;

        rows.iter().map(Self::row_to_transaction).collect()
    }
}

/// Select the ledger backend from the environment: Postgres when a
/// database URL is configured and reachable, in-memory otherwise.
pub fn store_from_env() -> Arc<dyn TransactionStore> {
    let database_url = env::var("POSTGRES_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok();

    if let Some(url) = database_url {
        match PgPoolOptions::new().max_connections(5).connect_lazy(&url) {
            Ok(pool) => {
                info!("Ledger backend: postgres");
                return Arc::new(PostgresStore::new(pool));
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres ledger backend, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Ledger backend: in-memory");
    Arc::new(InMemoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Period;
    use rust_decimal_macros::dec;

    fn sample_transaction(owner: Uuid) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            owner_id: owner,
            kind: TransactionKind::Expense,
            amount: dec!(120),
            concept: "la cena".to_string(),
            category: None,
            merchant: None,
            status: TransactionStatus::Provisional,
            transaction_date: None,
            created_at: Utc::now(),
            verified_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let transaction = sample_transaction(owner);

        store.insert_transaction(&transaction).await.unwrap();
        let loaded = store.fetch_transaction(transaction.id).await.unwrap().unwrap();
        assert_eq!(loaded.concept, "la cena");
        assert_eq!(loaded.status, TransactionStatus::Provisional);
    }

    #[tokio::test]
    async fn test_list_is_owner_scoped() {
        let store = InMemoryStore::new();
        let owner_a = Uuid::new_v4();
        let owner_b = Uuid::new_v4();

        store.insert_transaction(&sample_transaction(owner_a)).await.unwrap();
        store.insert_transaction(&sample_transaction(owner_b)).await.unwrap();

        let rows = store.list_by_owner(owner_a).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows.iter().all(|t| t.owner_id == owner_a));
    }

    #[tokio::test]
    async fn test_verification_cas_second_attempt_loses() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let transaction = sample_transaction(owner);
        store.insert_transaction(&transaction).await.unwrap();

        let update = VerificationUpdate {
            status: TransactionStatus::VerifiedManual,
            amount: None,
            merchant: Some("La Trattoria".to_string()),
            transaction_date: None,
            category: Some(Category::Restaurantes),
            verified_at: Utc::now(),
        };

        let first = store.apply_verification(transaction.id, &update).await.unwrap();
        assert!(matches!(first, VerifyAttempt::Updated(_)));

        let second = store.apply_verification(transaction.id, &update).await.unwrap();
        assert!(matches!(
            second,
            VerifyAttempt::NotProvisional(TransactionStatus::VerifiedManual)
        ));
    }

    #[tokio::test]
    async fn test_verification_missing_row() {
        let store = InMemoryStore::new();
        let update = VerificationUpdate {
            status: TransactionStatus::Verified,
            amount: None,
            merchant: None,
            transaction_date: None,
            category: None,
            verified_at: Utc::now(),
        };
        let attempt = store.apply_verification(Uuid::new_v4(), &update).await.unwrap();
        assert!(matches!(attempt, VerifyAttempt::Missing));
    }

    #[tokio::test]
    async fn test_update_fields_keeps_amount() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let transaction = sample_transaction(owner);
        store.insert_transaction(&transaction).await.unwrap();

        let attempt = store
            .update_provisional_fields(transaction.id, Some("Oxxo"), None)
            .await
            .unwrap();
        let VerifyAttempt::Updated(updated) = attempt else {
            panic!("expected update");
        };
        assert_eq!(updated.merchant.as_deref(), Some("Oxxo"));
        assert_eq!(updated.amount, dec!(120));
        assert_eq!(updated.status, TransactionStatus::Provisional);
    }

    #[test]
    fn test_matches_filter_period() {
        let owner = Uuid::new_v4();
        let mut transaction = sample_transaction(owner);
        let now = Utc::now();
        transaction.created_at = now - chrono::Duration::days(3);

        let today = TransactionFilter::with_period(Period::Today);
        assert!(!matches_filter(&transaction, &today, now));

        transaction.created_at = now;
        assert!(matches_filter(&transaction, &today, now));
    }

    #[test]
    fn test_matches_filter_status_and_kind() {
        let owner = Uuid::new_v4();
        let transaction = sample_transaction(owner);
        let now = Utc::now();

        let provisional = TransactionFilter::with_status(TransactionStatus::Provisional);
        assert!(matches_filter(&transaction, &provisional, now));

        let verified = TransactionFilter::with_status(TransactionStatus::Verified);
        assert!(!matches_filter(&transaction, &verified, now));

        let income = TransactionFilter {
            kind: Some(TransactionKind::Income),
            ..Default::default()
        };
        assert!(!matches_filter(&transaction, &income, now));
    }
}
