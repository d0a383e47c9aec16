//! In-process ledger and audit log backends.
//!
//! Each store keeps its state behind a single mutex that is never held
//! across an await point, so every operation is atomic. Used by the test
//! suites in place of Postgres.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::audit_log::{AuditError, AuditLog};
use super::ledger::{LedgerError, LedgerStore};
use crate::models::{
    AuditEntry, AuditFilter, CodeState, DeactivationStamp, NewAuditEntry, Page, Principal,
    PromoCode,
};

#[derive(Default)]
pub struct InMemoryLedgerStore {
    codes: Mutex<HashMap<String, PromoCode>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert(&self, code: &str) -> Result<PromoCode, LedgerError> {
        let mut codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        if codes.contains_key(code) {
            return Err(LedgerError::Duplicate(code.to_string()));
        }

        let promo = PromoCode::new_active(code.to_string(), Utc::now());
        codes.insert(code.to_string(), promo.clone());
        Ok(promo)
    }

    async fn get(&self, code: &str) -> Result<PromoCode, LedgerError> {
        let codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        codes
            .get(code)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(code.to_string()))
    }

    async fn deactivate(
        &self,
        code: &str,
        principal: &Principal,
        reason: Option<&str>,
    ) -> Result<PromoCode, LedgerError> {
        let mut codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        let promo = codes
            .get_mut(code)
            .ok_or_else(|| LedgerError::NotFound(code.to_string()))?;

        if let CodeState::Deactivated(stamp) = &promo.state {
            return Err(LedgerError::AlreadyDeactivated(stamp.clone()));
        }

        promo.state = CodeState::Deactivated(DeactivationStamp {
            deactivated_at: Utc::now(),
            deactivated_by: principal.clone(),
            deactivation_reason: reason.map(str::to_string),
        });

        Ok(promo.clone())
    }

    async fn list_deactivated(&self, page: Page) -> Result<Vec<PromoCode>, LedgerError> {
        let codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        let mut retired: Vec<PromoCode> = codes
            .values()
            .filter(|c| !c.is_active())
            .cloned()
            .collect();
        retired.sort_by(|a, b| {
            let at = |c: &PromoCode| c.stamp().map(|s| s.deactivated_at);
            at(b).cmp(&at(a))
        });

        Ok(retired
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect())
    }

    async fn count_deactivated(&self) -> Result<i64, LedgerError> {
        let codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        Ok(codes.values().filter(|c| !c.is_active()).count() as i64)
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    failing: AtomicBool,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent appends fail, simulating an unreachable audit store.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: NewAuditEntry) -> Result<i64, AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("audit store offline".to_string()));
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let id = entries.len() as i64 + 1;
        entries.push(AuditEntry {
            id,
            operation_type: entry.operation_type,
            code_ref: entry.code_ref,
            outcome: entry.outcome,
            detail: entry.detail,
            requested_at: Utc::now(),
        });

        Ok(id)
    }

    async fn list(&self, filter: AuditFilter, page: Page) -> Result<Vec<AuditEntry>, AuditError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .cloned()
            .collect())
    }

    async fn count(&self, filter: AuditFilter) -> Result<i64, AuditError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.iter().filter(|e| filter.matches(e)).count() as i64)
    }
}
