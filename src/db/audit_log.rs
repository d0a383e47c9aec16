use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::{AuditEntry, AuditFilter, NewAuditEntry, Page};

#[derive(thiserror::Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Audit log unavailable: {0}")]
    Unavailable(String),
}

/// Append-only record of lifecycle operations. Entries are never updated
/// or removed.
#[async_trait]
pub trait AuditLog: Send + Sync + 'static {
    /// Persists an entry and returns its assigned id.
    async fn append(&self, entry: NewAuditEntry) -> Result<i64, AuditError>;

    /// Entries matching `filter`, newest first.
    async fn list(&self, filter: AuditFilter, page: Page) -> Result<Vec<AuditEntry>, AuditError>;

    async fn count(&self, filter: AuditFilter) -> Result<i64, AuditError>;
}

#[derive(Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: AuditFilter) {
    builder.push(" WHERE TRUE");
    if let Some(operation) = filter.operation {
        builder.push(" AND operation_type = ").push_bind(operation);
    }
    if let Some(outcome) = filter.outcome {
        builder.push(" AND outcome = ").push_bind(outcome);
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, entry: NewAuditEntry) -> Result<i64, AuditError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO promo_code_requests (operation_type, promo_code, outcome, detail)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(entry.operation_type)
        .bind(entry.code_ref)
        .bind(entry.outcome)
        .bind(entry.detail)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn list(&self, filter: AuditFilter, page: Page) -> Result<Vec<AuditEntry>, AuditError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT id, operation_type, promo_code, outcome, detail, requested_at \
             FROM promo_code_requests",
        );
        push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(page.size)
            .push(" OFFSET ")
            .push_bind(page.offset());

        let entries = builder
            .build_query_as::<AuditEntry>()
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    async fn count(&self, filter: AuditFilter) -> Result<i64, AuditError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM promo_code_requests");
        push_filter(&mut builder, filter);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
