use std::path::PathBuf;

use reportbridge_core::config::{env_optional, env_or, ConfigError};
use reportbridge_core::script::CredentialType;

/// Server configuration loaded from environment variables.
///
/// Orchestrator and session settings have their own `from_env`
/// constructors; this covers the process and its outbound services.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3100`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Base URL of the rendering engine.
    pub engine_url: String,
    /// Base URL of the distribution service.
    pub distribution_url: String,
    /// Credential type injected into computed connections.
    pub credential_type: CredentialType,
    /// Key file for decrypting output passwords; decryption is off without it.
    pub password_key_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3100,
            request_timeout_secs: 30,
            engine_url: "http://localhost:40263".into(),
            distribution_url: "http://localhost:40264".into(),
            credential_type: CredentialType::Session,
            password_key_path: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                   |
    /// |------------------------|---------------------------|
    /// | `HOST`                 | `0.0.0.0`                 |
    /// | `PORT`                 | `3100`                    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                      |
    /// | `ENGINE_URL`           | `http://localhost:40263`  |
    /// | `DISTRIBUTION_URL`     | `http://localhost:40264`  |
    /// | `CREDENTIAL_TYPE`      | `SESSION`                 |
    /// | `PASSWORD_KEY_PATH`    | unset                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            host: env_or("HOST", defaults.host)?,
            port: env_or("PORT", defaults.port)?,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            engine_url: env_or("ENGINE_URL", defaults.engine_url)?,
            distribution_url: env_or("DISTRIBUTION_URL", defaults.distribution_url)?,
            credential_type: env_or("CREDENTIAL_TYPE", defaults.credential_type)?,
            password_key_path: env_optional("PASSWORD_KEY_PATH").map(PathBuf::from),
        })
    }
}
