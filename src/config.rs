//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use crate::payments::providers::AcquirerConfig;
use crate::payments::signature::SignatureScheme;
use std::env;
use uuid::Uuid;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running against in-memory stores.
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub ledger: LedgerConfig,
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Card gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub signature_scheme: SignatureScheme,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Where the ACS sends the cardholder back after a challenge.
    pub return_url: String,
    pub currencies: Vec<String>,
}

/// Ledger configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Wallet that receives the platform share of asset sales.
    pub platform_user_id: Uuid,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = env::var("SKIP_EXTERNALS")
            .map(|v| v == "true")
            .unwrap_or(false);

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: if skip_externals {
                None
            } else {
                Some(DatabaseConfig::from_env()?)
            },
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            ledger: LedgerConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.gateway.validate()?;

        if !self.skip_externals && self.gateway.api_key.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "GATEWAY_API_KEY is required unless SKIP_EXTERNALS=true".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = AcquirerConfig::default();

        Ok(GatewayConfig {
            base_url: env::var("GATEWAY_BASE_URL").unwrap_or(defaults.base_url),
            api_key: env::var("GATEWAY_API_KEY").unwrap_or_default(),
            webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET")
                .ok()
                .filter(|secret| !secret.trim().is_empty()),
            signature_scheme: env::var("GATEWAY_SIGNATURE_SCHEME")
                .unwrap_or_else(|_| "hmac-sha256".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("GATEWAY_SIGNATURE_SCHEME".to_string()))?,
            timeout_secs: parse_var("GATEWAY_TIMEOUT_SECS", &defaults.timeout_secs.to_string())?,
            max_retries: parse_var("GATEWAY_MAX_RETRIES", &defaults.max_retries.to_string())?,
            return_url: env::var("GATEWAY_RETURN_URL").unwrap_or_else(|_| {
                "http://127.0.0.1:8000/api/payments/3ds/complete".to_string()
            }),
            currencies: env::var("GATEWAY_CURRENCIES")
                .ok()
                .map(|raw| {
                    raw.split(',')
                        .map(|c| c.trim().to_uppercase())
                        .filter(|c| !c.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|list| !list.is_empty())
                .unwrap_or(defaults.currencies),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("GATEWAY_TIMEOUT_SECS".to_string()));
        }

        if self.currencies.iter().any(|c| c.len() != 3) {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_CURRENCIES must be ISO 4217 codes".to_string(),
            ));
        }

        Ok(())
    }

    pub fn acquirer(&self) -> AcquirerConfig {
        AcquirerConfig {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
            currencies: self.currencies.clone(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let platform_user_id = match env::var("PLATFORM_USER_ID") {
            Ok(raw) => Uuid::parse_str(raw.trim())
                .map_err(|_| ConfigError::InvalidValue("PLATFORM_USER_ID".to_string()))?,
            Err(_) => Uuid::nil(),
        };
        Ok(LedgerConfig { platform_user_id })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> GatewayConfig {
        GatewayConfig {
            base_url: "https://gateway.test/v1".to_string(),
            api_key: "sk_test".to_string(),
            webhook_secret: Some("whsec".to_string()),
            signature_scheme: SignatureScheme::HmacSha256,
            timeout_secs: 30,
            max_retries: 2,
            return_url: "https://app.test/return".to_string(),
            currencies: vec!["USD".to_string()],
        }
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_config_validation() {
        assert!(gateway().validate().is_ok());

        let mut bad_url = gateway();
        bad_url.base_url = "gateway.test".to_string();
        assert!(bad_url.validate().is_err());

        let mut bad_currency = gateway();
        bad_currency.currencies = vec!["DOLLAR".to_string()];
        assert!(bad_currency.validate().is_err());
    }

    #[test]
    fn test_acquirer_config_mirrors_gateway_section() {
        let acquirer = gateway().acquirer();
        assert_eq!(acquirer.base_url, "https://gateway.test/v1");
        assert_eq!(acquirer.currencies, vec!["USD".to_string()]);
    }

    #[test]
    fn test_log_level_validation() {
        let config = LoggingConfig {
            level: "verbose".to_string(),
            format: LogFormat::Plain,
        };
        assert!(config.validate().is_err());
    }
}
