use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::{
    promo_code::{InconsistentRow, PromoCodeRow},
    DeactivationStamp, Page, Principal, PromoCode,
};

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("Promo code not found: {0}")]
    NotFound(String),

    #[error("Promo code already deactivated")]
    AlreadyDeactivated(DeactivationStamp),

    #[error("Promo code already exists: {0}")]
    Duplicate(String),

    #[error("Corrupt ledger record: {0}")]
    Corrupt(#[from] InconsistentRow),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable record of every minted code and its single permitted transition.
///
/// Implementations must make `deactivate` linearizable per code: of any
/// number of concurrent calls for the same active code, exactly one
/// succeeds and the rest observe the winner's stamp.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Creates a new active record, failing on an existing code.
    async fn insert(&self, code: &str) -> Result<PromoCode, LedgerError>;

    async fn get(&self, code: &str) -> Result<PromoCode, LedgerError>;

    /// Atomically moves an active code to deactivated and stamps it.
    async fn deactivate(
        &self,
        code: &str,
        principal: &Principal,
        reason: Option<&str>,
    ) -> Result<PromoCode, LedgerError>;

    /// Deactivated codes, most recently retired first.
    async fn list_deactivated(&self, page: Page) -> Result<Vec<PromoCode>, LedgerError>;

    async fn count_deactivated(&self) -> Result<i64, LedgerError>;

    /// Connectivity probe for health checks.
    async fn ping(&self) -> Result<(), LedgerError>;
}

const UNIQUE_VIOLATION: &str = "23505";

const PROMO_CODE_COLUMNS: &str = "code, is_active, created_at, deactivated_at, \
     deactivated_by, deactivated_by_username, deactivation_reason";

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert(&self, code: &str) -> Result<PromoCode, LedgerError> {
        let row = sqlx::query_as::<_, PromoCodeRow>(&format!(
            r#"
            INSERT INTO promo_codes (code)
            VALUES ($1)
            RETURNING {PROMO_CODE_COLUMNS}
            "#
        ))
        .bind(code)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::Duplicate(code.to_string())
            } else {
                LedgerError::Database(e)
            }
        })?;

        Ok(row.try_into()?)
    }

    async fn get(&self, code: &str) -> Result<PromoCode, LedgerError> {
        let row = sqlx::query_as::<_, PromoCodeRow>(&format!(
            r#"
            SELECT {PROMO_CODE_COLUMNS} FROM promo_codes WHERE code = $1
            "#
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LedgerError::NotFound(code.to_string()))?;

        Ok(row.try_into()?)
    }

    async fn deactivate(
        &self,
        code: &str,
        principal: &Principal,
        reason: Option<&str>,
    ) -> Result<PromoCode, LedgerError> {
        // Dropping the transaction on any early return rolls it back.
        let mut tx = self.pool.begin().await?;

        let current: PromoCode = sqlx::query_as::<_, PromoCodeRow>(&format!(
            r#"
            SELECT {PROMO_CODE_COLUMNS} FROM promo_codes
            WHERE code = $1
            FOR UPDATE
            "#
        ))
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LedgerError::NotFound(code.to_string()))?
        .try_into()?;

        if let Some(stamp) = current.stamp() {
            return Err(LedgerError::AlreadyDeactivated(stamp.clone()));
        }

        let row = sqlx::query_as::<_, PromoCodeRow>(&format!(
            r#"
            UPDATE promo_codes
            SET
                is_active = FALSE,
                deactivated_at = NOW(),
                deactivated_by = $2,
                deactivated_by_username = $3,
                deactivation_reason = $4
            WHERE code = $1 AND is_active = TRUE
            RETURNING {PROMO_CODE_COLUMNS}
            "#
        ))
        .bind(code)
        .bind(&principal.id)
        .bind(&principal.username)
        .bind(reason)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.try_into()?)
    }

    async fn list_deactivated(&self, page: Page) -> Result<Vec<PromoCode>, LedgerError> {
        let rows = sqlx::query_as::<_, PromoCodeRow>(&format!(
            r#"
            SELECT {PROMO_CODE_COLUMNS} FROM promo_codes
            WHERE is_active = FALSE
            ORDER BY deactivated_at DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(page.size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| PromoCode::try_from(row).map_err(LedgerError::from))
            .collect()
    }

    async fn count_deactivated(&self) -> Result<i64, LedgerError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM promo_codes WHERE is_active = FALSE
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{CodeMinter, SecureCodeMinter};
    use std::sync::Arc;

    // Needs a disposable database: DATABASE_URL=... cargo test -- --ignored
    async fn store() -> PgLedgerStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(20)
            .connect(&url)
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        PgLedgerStore::new(pool)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires a Postgres database"]
    async fn test_pg_concurrent_deactivations_have_single_winner() {
        let store = Arc::new(store().await);
        let code = SecureCodeMinter::new().mint().unwrap();
        store.insert(&code).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let code = code.clone();
                tokio::spawn(async move {
                    let principal = Principal {
                        id: format!("P{i}"),
                        username: format!("cashier-{i}"),
                    };
                    store.deactivate(&code, &principal, None).await
                })
            })
            .collect();

        let mut winners = Vec::new();
        let mut priors = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(promo) => winners.push(promo),
                Err(LedgerError::AlreadyDeactivated(prior)) => priors.push(prior),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(priors.len(), 15);
        let stamp = winners[0].stamp().unwrap();
        assert!(priors.iter().all(|p| p == stamp));
        assert_eq!(store.get(&code).await.unwrap().stamp(), Some(stamp));
    }

    #[tokio::test]
    #[ignore = "requires a Postgres database"]
    async fn test_pg_insert_rejects_duplicate_code() {
        let store = store().await;
        let code = SecureCodeMinter::new().mint().unwrap();
        store.insert(&code).await.unwrap();

        assert!(matches!(
            store.insert(&code).await,
            Err(LedgerError::Duplicate(_))
        ));
    }
}
