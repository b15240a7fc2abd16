//! # Auth Module
//!
//! Resolves who a request runs as. Authorization itself is left to the
//! database: the resolved identity only selects the role statements assume.

pub mod basic;
pub mod errors;

use serde::{Deserialize, Serialize};

pub use basic::{CredentialChecker, Credentials, CHALLENGE, DEFAULT_USER_TABLE};
pub use errors::{AuthError, AuthResult};

/// How callers authenticate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Every request runs as the anonymous role
    #[default]
    None,
    /// HTTP Basic checked against the user table
    Basic,
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(AuthMode::None),
            "basic" => Ok(AuthMode::Basic),
            other => Err(format!("unknown authentication mode '{}'", other)),
        }
    }
}

/// Identity a request runs as; empty means anonymous
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

impl CallerIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_mode_parse() {
        assert_eq!("BASIC".parse::<AuthMode>().unwrap(), AuthMode::Basic);
        assert_eq!("none".parse::<AuthMode>().unwrap(), AuthMode::None);
        assert!("jwt".parse::<AuthMode>().is_err());
    }
}
