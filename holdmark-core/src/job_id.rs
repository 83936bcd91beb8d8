//! Replication job identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AbstractionError;
use crate::store::is_name_char;

/// Maximum job id length. Job ids are embedded into bookmark names and hold
/// tags, both of which are length-limited by the store.
pub const MAX_JOB_ID_LEN: usize = 200;

/// Opaque token naming the replication job that owns a marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Result<Self, AbstractionError> {
        let id = id.into();
        Self::check(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<(), AbstractionError> {
        Self::check(&self.0)
    }

    fn check(id: &str) -> Result<(), AbstractionError> {
        let invalid = |reason: String| AbstractionError::InvalidJobId {
            id: id.to_string(),
            reason,
        };
        if id.is_empty() {
            return Err(invalid("must not be empty".into()));
        }
        if id.len() > MAX_JOB_ID_LEN {
            return Err(invalid(format!("longer than {} bytes", MAX_JOB_ID_LEN)));
        }
        if let Some(c) = id.chars().find(|c| !is_name_char(*c)) {
            return Err(invalid(format!("invalid character {:?}", c)));
        }
        Ok(())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = AbstractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = AbstractionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}
