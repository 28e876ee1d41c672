//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The value contained characters that can't appear in a hostname.
    #[error("invalid {field}: {value}")]
    Invalid { field: &'static str, value: String },
}

/// A tracked hostname.
///
/// Domains are lowercase and never carry a leading `www.`. Construction goes
/// through [`Domain::new`], which normalizes user input (exclusion lists,
/// stored markers) the same way URL classification does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Domain(String);

impl Domain {
    /// Creates a domain after normalization and validation.
    pub fn new(domain: impl Into<String>) -> Result<Self, ValidationError> {
        let domain = domain.into().trim().to_ascii_lowercase();
        let domain = domain.strip_prefix("www.").unwrap_or(&domain);
        if domain.is_empty() {
            return Err(ValidationError::Empty { field: "domain" });
        }
        if domain
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@'))
        {
            return Err(ValidationError::Invalid {
                field: "domain",
                value: domain.to_string(),
            });
        }
        Ok(Self(domain.to_string()))
    }

    /// Returns the domain as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Domain {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Domain> for String {
    fn from(domain: Domain) -> Self {
        domain.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Domain {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Generates an integer host identifier newtype.
macro_rules! define_host_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Returns the raw identifier assigned by the host.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_host_id!(
    /// A browser tab identifier.
    ///
    /// Tab IDs are unique within a browser session and are reused across
    /// restarts, so they are only compared against live host state.
    TabId
);

define_host_id!(
    /// A browser window identifier.
    WindowId
);
