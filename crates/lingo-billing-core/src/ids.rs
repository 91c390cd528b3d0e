//! Identifier types for lingo billing.
//!
//! Users are identified by the opaque `sub` claim issued by the auth provider.
//! Records created by billing (redemption receipts, payment history entries,
//! notifications) use ULIDs so that they sort chronologically.
//!
//! # Macro-based ID Types
//!
//! The `ulid_id_type!` macro reduces boilerplate for ULID-based record
//! identifiers, keeping serialization, parsing, and display consistent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Longest user identifier accepted from the auth provider.
pub const MAX_USER_ID_LEN: usize = 128;

/// A user identifier (the auth provider's `sub` claim).
///
/// Accepts ASCII letters, digits, `-` and `_`, up to [`MAX_USER_ID_LEN`]
/// characters. The restriction keeps identifiers safe to embed in storage
/// keys where `\0` is used as a separator.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Generate a new random identifier (primarily for testing).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > MAX_USER_ID_LEN {
            return Err(IdError::InvalidUserId);
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(IdError::InvalidUserId);
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl AsRef<[u8]> for UserId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Macro to define a ULID-based identifier type with standard trait implementations.
///
/// This macro generates a newtype wrapper around `ulid::Ulid` with implementations for:
/// - `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `Serialize`, `Deserialize` (as string)
/// - `FromStr`, `Display`, `Debug`
/// - `TryFrom<String>`, `Into<String>`
macro_rules! ulid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Create a new identifier from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Generate a new identifier with the current timestamp.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Return the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> &Ulid {
                &self.0
            }

            /// Return the bytes of the ULID (16 bytes, big-endian, time-ordered).
            #[must_use]
            pub fn to_bytes(&self) -> [u8; 16] {
                self.0.to_bytes()
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
                Ok(Self(ulid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

ulid_id_type!(UsageId, "Identifier of a promo-code redemption receipt.");
ulid_id_type!(PaymentId, "Identifier of a payment history record.");
ulid_id_type!(NotificationId, "Identifier of an in-app notification.");

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid user identifier.
    #[error("invalid user id: expected 1-{MAX_USER_ID_LEN} chars of [A-Za-z0-9_-]")]
    InvalidUserId,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_accepts_provider_uids() {
        let id: UserId = "Xk3pQ9zLm2bTfR7aW1cY8dE4gH5j".parse().unwrap();
        assert_eq!(id.as_str(), "Xk3pQ9zLm2bTfR7aW1cY8dE4gH5j");
    }

    #[test]
    fn user_id_rejects_separators_and_empty() {
        assert_eq!(UserId::from_str(""), Err(IdError::InvalidUserId));
        assert_eq!(UserId::from_str("a\0b"), Err(IdError::InvalidUserId));
        assert_eq!(UserId::from_str("a/b"), Err(IdError::InvalidUserId));
        let long = "a".repeat(MAX_USER_ID_LEN + 1);
        assert_eq!(UserId::from_str(&long), Err(IdError::InvalidUserId));
    }

    #[test]
    fn user_id_serde_rejects_invalid() {
        let parsed: Result<UserId, _> = serde_json::from_str("\"bad id\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn generated_user_ids_are_valid() {
        let id = UserId::generate();
        assert_eq!(UserId::from_str(id.as_str()).unwrap(), id);
    }

    #[test]
    fn ulid_ids_sort_by_creation() {
        let first = PaymentId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = PaymentId::generate();
        assert!(first < second);
        assert_eq!(PaymentId::from_str(&first.to_string()).unwrap(), first);
    }
}
