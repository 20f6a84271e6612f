use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque identifier of a tracked job.
///
/// Generated once at creation (UUID v4) and never reused for the lifetime
/// of the process. Doubles as the job key in every rendering-engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id from its hyphenated string form.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// Identity of a user on the upstream analytics platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    /// User directory (domain) the account belongs to.
    pub directory: String,
    /// Account name inside the directory.
    pub id: String,
}

impl UserIdentity {
    pub fn new(directory: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\\{}", self.directory, self.id)
    }
}
