// Models module - ledger and audit record representations

pub mod audit_entry;
pub mod page;
pub mod promo_code;

pub use audit_entry::{AuditEntry, AuditFilter, NewAuditEntry, OperationType, Outcome};
pub use page::{Page, Pagination};
pub use promo_code::{CodeState, CodeStatus, DeactivationStamp, Principal, PromoCode};
