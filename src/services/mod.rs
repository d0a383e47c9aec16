// Services module - Business logic

pub mod code_minter;
pub mod lifecycle;

pub use code_minter::{CodeMinter, SecureCodeMinter};
pub use lifecycle::{LifecycleError, LifecycleService};
