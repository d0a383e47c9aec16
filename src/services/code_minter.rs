use ring::rand::{SecureRandom, SystemRandom};
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum MintError {
    #[error("Secure random source unavailable")]
    RandomSourceUnavailable,
}

/// Source of fresh promo codes. Uniqueness is enforced by the ledger, not here.
pub trait CodeMinter: Send + Sync + 'static {
    fn mint(&self) -> Result<String, MintError>;
}

/// Mints random (version 4) UUIDs from the operating system's CSPRNG,
/// giving 122 bits of entropy per code.
pub struct SecureCodeMinter {
    rng: SystemRandom,
}

impl SecureCodeMinter {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for SecureCodeMinter {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeMinter for SecureCodeMinter {
    fn mint(&self) -> Result<String, MintError> {
        let mut bytes = [0u8; 16];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| MintError::RandomSourceUnavailable)?;

        Ok(uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .hyphenated()
            .to_string())
    }
}

/// Parses a caller-supplied code into its canonical lowercase hyphenated
/// form, or `None` if it is not a UUID.
pub fn parse_code(raw: &str) -> Option<String> {
    Uuid::try_parse(raw.trim())
        .ok()
        .map(|uuid| uuid.hyphenated().to_string())
}
