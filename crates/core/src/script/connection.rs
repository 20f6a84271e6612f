//! Computed platform connections and the merge rules for user overrides.

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};

use crate::types::UserIdentity;

/// Sentinel a delivery node uses to ask for the report's connections.
pub const CONFIG_CONNECTION_SENTINEL: &str = "@CONFIGCONNECTION@";

/// Credential material of an upstream-platform session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    /// Name of the session cookie (e.g. `X-Qlik-Session`).
    pub cookie_name: String,
    /// Value of the session cookie.
    pub cookie_value: String,
    /// Signed token the session was issued with, if still useful.
    pub bearer_token: Option<String>,
}

/// The active session a script is resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub server_uri: String,
    pub app_id: String,
    pub user: UserIdentity,
    pub credential: SessionCredential,
}

/// How the computed connection authenticates against the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialType {
    /// Reuse the session cookie.
    #[default]
    Session,
    /// Send the signed token as a bearer header.
    Jwt,
    /// No credentials; the engine connects anonymously.
    None,
}

impl CredentialType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "SESSION",
            Self::Jwt => "JWT",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a credential type name is not one we can compute.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown credential type '{0}'")]
pub struct UnknownCredentialType(pub String);

impl FromStr for CredentialType {
    type Err = UnknownCredentialType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SESSION" | "COOKIE" => Ok(Self::Session),
            "JWT" | "BEARER" => Ok(Self::Jwt),
            "NONE" => Ok(Self::None),
            _ => Err(UnknownCredentialType(s.to_string())),
        }
    }
}

/// Build the authentication connection for the active session.
pub fn computed_connection(ctx: &SessionContext, credential_type: CredentialType) -> Value {
    let mut connection = json!({
        "serverUri": ctx.server_uri,
        "app": ctx.app_id,
    });

    let credentials = match credential_type {
        CredentialType::Session => Some(session_credentials(ctx)),
        CredentialType::Jwt => match &ctx.credential.bearer_token {
            Some(token) => Some(json!({
                "type": CredentialType::Jwt.as_str(),
                "key": "Authorization",
                "value": format!("Bearer {token}"),
            })),
            None => {
                tracing::warn!(
                    user = %ctx.user,
                    "No bearer token on the session, falling back to the session cookie",
                );
                Some(session_credentials(ctx))
            }
        },
        CredentialType::None => None,
    };

    if let (Some(credentials), Some(map)) = (credentials, connection.as_object_mut()) {
        map.insert("credentials".into(), credentials);
    }
    connection
}

fn session_credentials(ctx: &SessionContext) -> Value {
    json!({
        "type": CredentialType::Session.as_str(),
        "key": ctx.credential.cookie_name,
        "value": ctx.credential.cookie_value,
    })
}

/// Merge `overlay` onto `base`, recursing into objects.
///
/// Overlay values win unless they are `null`.
pub fn merge(base: Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (base, Value::Null) => base,
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let merged = match base_map.remove(key) {
                    Some(existing) => merge(existing, value),
                    None if value.is_null() => continue,
                    None => value.clone(),
                };
                base_map.insert(key.clone(), merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Credential type a user connection asks for, if it names one.
pub fn declared_credential_type(connection: &Map<String, Value>) -> Option<&str> {
    connection
        .get("credentials")
        .and_then(|c| c.get("type"))
        .and_then(Value::as_str)
}
