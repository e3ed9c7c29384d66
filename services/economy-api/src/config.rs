use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub nats: NatsConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub ledger: economy_core::Config,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity provider
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NatsConfig {
    /// Empty disables publishing; announcements are then only logged
    pub url: String,
    pub topic_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SigningConfig {
    /// Hex-encoded 32-byte Ed25519 seed; rows are signed when set
    pub seed_hex: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8090)?
            .set_default("server.workers", 4)?
            .set_default("auth.jwt_secret", "")?
            .set_default("nats.url", "")?
            .set_default("nats.topic_prefix", "economy")?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("ECONOMY_API")
                .separator("__")
                .list_separator(","),
        );

        // Special handling for common env vars
        if let Ok(secret) = env::var("JWT_SECRET") {
            builder = builder.set_override("auth.jwt_secret", secret)?;
        }

        if let Ok(nats_url) = env::var("NATS_URL") {
            builder = builder.set_override("nats.url", nats_url)?;
        }

        if let Ok(port) = env::var("ECONOMY_API_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        if let Ok(data_dir) = env::var("ECONOMY_DATA_DIR") {
            builder = builder.set_override("ledger.data_dir", data_dir)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.server.workers == 0 {
            return Err("At least one worker is required".to_string());
        }

        if self.auth.jwt_secret.len() < 16 {
            return Err("JWT secret must be at least 16 bytes".to_string());
        }

        if let Some(ref seed) = self.signing.seed_hex {
            self.signing_seed(seed)?;
        }

        self.ledger.validate().map_err(|e| e.to_string())
    }

    /// Decoded signing seed, if configured
    pub fn signing_key(&self) -> Result<Option<[u8; 32]>, String> {
        self.signing
            .seed_hex
            .as_deref()
            .map(|seed| self.signing_seed(seed))
            .transpose()
    }

    fn signing_seed(&self, seed: &str) -> Result<[u8; 32], String> {
        let bytes = hex::decode(seed.trim()).map_err(|e| format!("Invalid signing seed: {}", e))?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| "Signing seed must be 32 bytes".to_string())
    }
}
