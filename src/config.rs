use config::ConfigError;
use secrecy::Secret;
use serde::{de::DeserializeOwned, Deserialize};

use crate::services::lifecycle::DEFAULT_MINT_MAX_ATTEMPTS;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: Secret<String>,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,

    // Retries on minted-code collision before generation fails
    pub mint_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Self::from_source(&config)
    }

    fn from_source(config: &config::Config) -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: Secret::new(config.get("database_url")?),
            database_max_connections: get_or(config, "database_max_connections", 20)?,
            host: get_or(config, "host", "127.0.0.1".to_string())?,
            port: get_or(config, "port", 3000)?,

            mint_max_attempts: get_or(config, "mint_max_attempts", DEFAULT_MINT_MAX_ATTEMPTS)?,
        })
    }
}

/// Reads an optional key. A missing key takes `default`; a malformed one is an error.
fn get_or<T: DeserializeOwned>(
    config: &config::Config,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match config.get(key) {
        Err(ConfigError::NotFound(_)) => Ok(default),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn source(pairs: &[(&str, &str)]) -> config::Config {
        pairs
            .iter()
            .fold(config::Config::builder(), |builder, (key, value)| {
                builder.set_override(*key, *value).unwrap()
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults_apply() {
        let config =
            Config::from_source(&source(&[("database_url", "postgres://localhost/promo")]))
                .unwrap();

        assert_eq!(config.database_url.expose_secret(), "postgres://localhost/promo");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.database_max_connections, 20);
        assert_eq!(config.mint_max_attempts, DEFAULT_MINT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_overrides_are_read() {
        let config = Config::from_source(&source(&[
            ("database_url", "postgres://db/promo"),
            ("port", "8080"),
            ("mint_max_attempts", "5"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.mint_max_attempts, 5);
    }

    #[test]
    fn test_malformed_value_is_an_error() {
        let result = Config::from_source(&source(&[
            ("database_url", "postgres://db/promo"),
            ("port", "abc"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_database_url_is_required() {
        assert!(Config::from_source(&source(&[("port", "8080")])).is_err());
    }
}
