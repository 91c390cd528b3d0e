//! Key encoding utilities for `RocksDB`.
//!
//! User ids and promo codes never contain `0x00`, so it is used as the
//! separator in composite keys. Composite index keys end in a 16-byte ULID,
//! which keeps entries for one owner in creation order.

use lingo_billing_core::{PromoCodeKey, UserId};

const SEP: u8 = 0;

/// Create a promo code key.
#[must_use]
pub fn promo_code_key(code: &PromoCodeKey) -> Vec<u8> {
    code.as_str().as_bytes().to_vec()
}

/// Create the deterministic redemption receipt key for a user and code.
///
/// Format: `user_id || 0x00 || code`
#[must_use]
pub fn redemption_key(user_id: &UserId, code: &PromoCodeKey) -> Vec<u8> {
    let mut key = owner_prefix(user_id.as_str());
    key.extend_from_slice(code.as_str().as_bytes());
    key
}

/// Create an account key from a user ID.
#[must_use]
pub fn account_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_str().as_bytes().to_vec()
}

/// Create a record key from a ULID-based identifier's bytes.
#[must_use]
pub fn record_key(id_bytes: [u8; 16]) -> Vec<u8> {
    id_bytes.to_vec()
}

/// Create an owner index key.
///
/// Format: `owner || 0x00 || record_id (16 bytes)`
#[must_use]
pub fn owner_index_key(owner: &str, id_bytes: [u8; 16]) -> Vec<u8> {
    let mut key = owner_prefix(owner);
    key.extend_from_slice(&id_bytes);
    key
}

/// Create a prefix for iterating all index entries of an owner.
#[must_use]
pub fn owner_prefix(owner: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(owner.len() + 17);
    key.extend_from_slice(owner.as_bytes());
    key.push(SEP);
    key
}

/// Create a processed-event key.
#[must_use]
pub fn processed_event_key(dedupe_key: &str) -> Vec<u8> {
    dedupe_key.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingo_billing_core::UsageId;

    #[test]
    fn redemption_key_is_deterministic() {
        let user: UserId = "u1".parse().unwrap();
        let code = PromoCodeKey::normalize("save20").unwrap();
        assert_eq!(redemption_key(&user, &code), b"u1\0SAVE20".to_vec());
        assert_eq!(redemption_key(&user, &code), redemption_key(&user, &code));
    }

    #[test]
    fn owner_prefixes_do_not_overlap() {
        let id = UsageId::generate().to_bytes();
        let key = owner_index_key("abc", id);
        assert!(key.starts_with(&owner_prefix("abc")));
        assert!(!key.starts_with(&owner_prefix("ab")));
    }

    #[test]
    fn owner_index_key_format() {
        let id = UsageId::generate().to_bytes();
        let key = owner_index_key("u1", id);
        assert_eq!(key.len(), 3 + 16);
        assert_eq!(&key[..3], b"u1\0");
        assert_eq!(&key[3..], id);
    }
}
