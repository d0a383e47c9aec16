use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::db::{AuditError, AuditLog, LedgerError, LedgerStore};
use crate::models::{
    promo_code::InconsistentRow, AuditEntry, AuditFilter, CodeStatus, DeactivationStamp,
    NewAuditEntry, OperationType, Outcome, Page, Pagination, Principal, PromoCode,
};
use crate::services::code_minter::{parse_code, CodeMinter, MintError, SecureCodeMinter};

pub const DEFAULT_MINT_MAX_ATTEMPTS: u32 = 3;
pub const MAX_REASON_LEN: usize = 500;

// Raw code input longer than any UUID spelling is cut before it is audited
const MAX_AUDITED_INPUT_LEN: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("Malformed promo code: {0:?}")]
    InvalidCode(String),

    #[error("Deactivation reason exceeds 500 characters")]
    InvalidReason,

    #[error("Could not mint a unique promo code after {0} attempts")]
    MintExhausted(u32),

    #[error(transparent)]
    Mint(#[from] MintError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),
}

impl LifecycleError {
    /// Stable machine-readable error kind, shared by audit detail and API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::InvalidCode(_) => "invalid_code",
            LifecycleError::InvalidReason => "invalid_reason",
            LifecycleError::MintExhausted(_) => "mint_exhausted",
            LifecycleError::Mint(MintError::RandomSourceUnavailable) => {
                "random_source_unavailable"
            }
            LifecycleError::Ledger(LedgerError::NotFound(_)) => "not_found",
            LifecycleError::Ledger(LedgerError::AlreadyDeactivated(_)) => "already_deactivated",
            LifecycleError::Ledger(LedgerError::Duplicate(_)) => "duplicate",
            LifecycleError::Ledger(LedgerError::Corrupt(_)) => "corrupt_record",
            LifecycleError::Ledger(LedgerError::Database(_)) | LifecycleError::Audit(_) => {
                "storage"
            }
        }
    }

    /// The earlier stamp when the code had already been retired.
    pub fn prior_stamp(&self) -> Option<&DeactivationStamp> {
        match self {
            LifecycleError::Ledger(LedgerError::AlreadyDeactivated(stamp)) => Some(stamp),
            _ => None,
        }
    }
}

/// First `max` characters of untrusted input headed for the audit log.
fn clip(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

fn failure_detail(err: &LifecycleError, mut detail: JsonValue) -> JsonValue {
    detail["error"] = json!(err.kind());
    detail["message"] = json!(err.to_string());
    if let Some(prior) = err.prior_stamp() {
        detail["prior"] = json!(prior);
    }
    detail
}

/// Mints, reports on, and retires promo codes.
///
/// Every public lifecycle operation appends exactly one audit entry, whether
/// it succeeds or not. A failed audit append never changes the operation's
/// result; it is logged and counted in [`LifecycleService::dropped_audit_writes`].
pub struct LifecycleService {
    ledger: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditLog>,
    minter: Arc<dyn CodeMinter>,
    mint_max_attempts: u32,
    dropped_audit_writes: AtomicU64,
}

impl LifecycleService {
    pub fn new(ledger: Arc<dyn LedgerStore>, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            ledger,
            audit,
            minter: Arc::new(SecureCodeMinter::new()),
            mint_max_attempts: DEFAULT_MINT_MAX_ATTEMPTS,
            dropped_audit_writes: AtomicU64::new(0),
        }
    }

    pub fn with_minter(mut self, minter: Arc<dyn CodeMinter>) -> Self {
        self.minter = minter;
        self
    }

    pub fn with_mint_max_attempts(mut self, attempts: u32) -> Self {
        self.mint_max_attempts = attempts.max(1);
        self
    }

    /// Number of audit entries that could not be persisted since start-up.
    pub fn dropped_audit_writes(&self) -> u64 {
        self.dropped_audit_writes.load(Ordering::Relaxed)
    }

    /// Mints a fresh code and records it as active.
    #[tracing::instrument(skip(self))]
    pub async fn generate(&self) -> Result<PromoCode, LifecycleError> {
        let mut attempts = 0;
        let result = loop {
            attempts += 1;

            let code = match self.minter.mint() {
                Ok(code) => code,
                Err(e) => break Err(LifecycleError::from(e)),
            };

            match self.ledger.insert(&code).await {
                Ok(promo) => break Ok(promo),
                Err(LedgerError::Duplicate(code)) if attempts < self.mint_max_attempts => {
                    tracing::warn!(code = %code, attempts, "Minted code collided, retrying");
                }
                Err(LedgerError::Duplicate(_)) => break Err(LifecycleError::MintExhausted(attempts)),
                Err(e) => break Err(e.into()),
            }
        };

        match &result {
            Ok(promo) => {
                tracing::info!(code = %promo.code, attempts, "Promo code generated");
                self.record(
                    OperationType::Mint,
                    Some(promo.code.clone()),
                    Outcome::Success,
                    json!({ "attempts": attempts }),
                )
                .await;
            }
            Err(e) => {
                tracing::error!(error = %e, attempts, "Promo code generation failed");
                self.record(
                    OperationType::Mint,
                    None,
                    Outcome::Failure,
                    failure_detail(e, json!({ "attempts": attempts })),
                )
                .await;
            }
        }

        result
    }

    /// Reports the current state of a code without changing it.
    #[tracing::instrument(skip(self))]
    pub async fn status(&self, raw_code: &str) -> Result<CodeStatus, LifecycleError> {
        let trimmed = raw_code.trim();
        let lookup = if trimmed.is_empty() {
            None
        } else {
            Some(parse_code(trimmed).unwrap_or_else(|| trimmed.to_string()))
        };

        let result = match &lookup {
            None => Err(LifecycleError::InvalidCode(raw_code.to_string())),
            Some(code) => self
                .ledger
                .get(code)
                .await
                .map(|promo| promo.status())
                .map_err(LifecycleError::from),
        };

        match &result {
            Ok(status) => {
                tracing::debug!(code = %status.code, is_active = status.is_active, "Status queried");
                self.record(
                    OperationType::StatusQuery,
                    lookup,
                    Outcome::Success,
                    json!({ "isActive": status.is_active }),
                )
                .await;
            }
            Err(e) => {
                tracing::info!(error = %e, "Status query failed");
                self.record(
                    OperationType::StatusQuery,
                    lookup,
                    Outcome::Failure,
                    failure_detail(e, json!({})),
                )
                .await;
            }
        }

        result
    }

    /// Retires an active code on behalf of `principal`.
    ///
    /// Fails with `already_deactivated` (carrying the earlier stamp) if the
    /// code was retired before; the stored stamp is never overwritten.
    #[tracing::instrument(skip(self, principal, reason), fields(operator = %principal.username))]
    pub async fn deactivate(
        &self,
        raw_code: &str,
        principal: &Principal,
        reason: Option<&str>,
    ) -> Result<DeactivationStamp, LifecycleError> {
        let code = parse_code(raw_code);
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());

        let mut detail = json!({
            "principal": principal,
            "reason": reason.map(|r| clip(r, MAX_REASON_LEN)),
        });
        if code.is_none() {
            detail["input"] = json!(clip(raw_code, MAX_AUDITED_INPUT_LEN));
        }

        let result = self.try_deactivate(code.as_deref(), raw_code, principal, reason).await;

        match &result {
            Ok(stamp) => {
                tracing::info!(
                    code = ?code,
                    deactivated_at = %stamp.deactivated_at,
                    "Promo code deactivated"
                );
                self.record(OperationType::Deactivate, code, Outcome::Success, detail)
                    .await;
            }
            Err(e) => {
                tracing::info!(code = ?code, error_kind = e.kind(), "Deactivation rejected");
                self.record(
                    OperationType::Deactivate,
                    code,
                    Outcome::Failure,
                    failure_detail(e, detail),
                )
                .await;
            }
        }

        result
    }

    async fn try_deactivate(
        &self,
        code: Option<&str>,
        raw_code: &str,
        principal: &Principal,
        reason: Option<&str>,
    ) -> Result<DeactivationStamp, LifecycleError> {
        let code = code.ok_or_else(|| {
            LifecycleError::InvalidCode(clip(raw_code, MAX_AUDITED_INPUT_LEN).to_string())
        })?;

        if reason.is_some_and(|r| r.chars().count() > MAX_REASON_LEN) {
            return Err(LifecycleError::InvalidReason);
        }

        let promo = self.ledger.deactivate(code, principal, reason).await?;

        promo
            .stamp()
            .cloned()
            .ok_or_else(|| LedgerError::Corrupt(InconsistentRow(code.to_string())).into())
    }

    /// Audit entries for reconciliation, newest first.
    pub async fn audit_log(
        &self,
        filter: AuditFilter,
        page: Page,
    ) -> Result<(Vec<AuditEntry>, Pagination), LifecycleError> {
        let entries = self.audit.list(filter, page).await?;
        let total = self.audit.count(filter).await?;
        Ok((entries, page.summary(total)))
    }

    /// Retired codes, most recently deactivated first.
    pub async fn deactivation_history(
        &self,
        page: Page,
    ) -> Result<(Vec<CodeStatus>, Pagination), LifecycleError> {
        let codes = self.ledger.list_deactivated(page).await?;
        let total = self.ledger.count_deactivated().await?;
        Ok((
            codes.iter().map(PromoCode::status).collect(),
            page.summary(total),
        ))
    }

    pub async fn ping(&self) -> Result<(), LifecycleError> {
        Ok(self.ledger.ping().await?)
    }

    async fn record(
        &self,
        operation_type: OperationType,
        code_ref: Option<String>,
        outcome: Outcome,
        detail: JsonValue,
    ) {
        let entry = NewAuditEntry {
            operation_type,
            code_ref,
            outcome,
            detail,
        };

        if let Err(e) = self.audit.append(entry).await {
            self.dropped_audit_writes.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                operation = operation_type.as_str(),
                error = %e,
                "Audit write dropped"
            );
        }
    }
}
