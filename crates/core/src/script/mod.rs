//! Config Resolver: turns a user script into a connected [`JobSpecification`].
//!
//! Resolution runs in two passes. [`normalize`] sniffs the syntax and wraps
//! the parsed tree into the `{tasks:[{reports:[...]}]}` envelope, then
//! [`resolve::Resolver`] injects connections, fills placeholders, fixes
//! formulas and decrypts output passwords. The result is deserialized into
//! the typed specification.

pub mod connection;
pub mod normalize;
pub mod password;
pub mod relaxed;
pub mod resolve;
pub mod spec;

use std::path::PathBuf;

use serde_json::Value;

pub use connection::{CredentialType, SessionContext, SessionCredential};
pub use password::{PasswordCipher, PasswordError};
pub use relaxed::RelaxedJsonError;
pub use spec::{ConnectionSpec, CredentialSpec, JobSpecification, ReportSpec, TaskSpec, TemplateSpec};

/// Why a script could not be turned into a job specification.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Script is empty")]
    Empty,

    #[error("Script is not valid JSON")]
    Json(#[from] RelaxedJsonError),

    #[error("Script is not valid YAML")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Script has an unrecognized shape: {0}")]
    UnrecognizedShape(String),

    #[error("Resolved script is not a valid job specification")]
    Schema(#[source] serde_json::Error),
}

/// Resolves raw scripts against the session a job runs with.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    credential_type: CredentialType,
    passwords: Option<PasswordCipher>,
}

impl ConfigResolver {
    pub fn new(credential_type: CredentialType) -> Self {
        Self {
            credential_type,
            passwords: None,
        }
    }

    /// Enable output-password decryption with the key stored at `path`.
    pub fn with_password_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.passwords = Some(PasswordCipher::new(path));
        self
    }

    pub fn credential_type(&self) -> CredentialType {
        self.credential_type
    }

    /// Normalize and resolve `raw`, returning the resolved JSON tree.
    pub fn resolve_tree(&self, raw: &str, ctx: &SessionContext) -> Result<Value, ScriptError> {
        let tree = normalize::normalize(raw)?;
        let resolver = resolve::Resolver {
            ctx,
            credential_type: self.credential_type,
            passwords: self.passwords.as_ref(),
        };
        Ok(resolver.resolve(tree))
    }

    /// Normalize, resolve and type-check `raw`.
    pub fn resolve(&self, raw: &str, ctx: &SessionContext) -> Result<JobSpecification, ScriptError> {
        let tree = self.resolve_tree(raw, ctx)?;
        serde_json::from_value(tree).map_err(ScriptError::Schema)
    }
}
