use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use std::fmt;

use super::transaction::Transaction;

/// An account identifier. Addresses are opaque strings to this node; key
/// ownership and signature checks happen outside of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

/// Computes the canonical digest of a block's contents.
///
/// The fields are serialized into a JSON object whose keys `serde_json`
/// keeps sorted, so the digest does not depend on the order the fields were
/// assembled in and two nodes hashing the same values agree byte for byte.
///
/// # Returns
///
/// The SHA-256 digest as a lowercase hexadecimal string (64 characters).
pub fn block_digest(
    transactions: &[Transaction],
    previous_hash: &str,
    nonce: u64,
    timestamp: &DateTime<Utc>,
) -> String {
    let payload = json!({
        "transactions": transactions,
        "previous_hash": previous_hash,
        "nonce": nonce,
        "timestamp": timestamp,
    });

    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());

    hex::encode(hasher.finalize())
}

/// Difficulty predicate: the digest must start with `difficulty` literal
/// zero characters.
pub fn meets_difficulty(digest: &str, difficulty: usize) -> bool {
    digest.len() >= difficulty && digest.as_bytes()[..difficulty].iter().all(|&b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transactions() -> Vec<Transaction> {
        vec![
            Transaction::new(Address::from("alice"), Address::from("bob"), 10.0, 0.001),
            Transaction::reward(Address::from("miner"), 1.0, 0.001),
        ]
    }

    #[test]
    fn test_digest_is_deterministic() {
        let transactions = sample_transactions();
        let timestamp = Utc::now();

        let first = block_digest(&transactions, "prev", 42, &timestamp);
        let second = block_digest(&transactions, "prev", 42, &timestamp);

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_digest_ignores_construction_order() {
        // The same field values must hash identically no matter how the
        // transaction was put together.
        let timestamp = Utc::now();
        let built = Transaction::new(Address::from("alice"), Address::from("bob"), 10.0, 0.5);
        let literal = Transaction {
            fee: 0.5,
            amount: 10.0,
            recipient: Address::from("bob"),
            sender: Some(Address::from("alice")),
        };

        assert_eq!(
            block_digest(&[built], "prev", 7, &timestamp),
            block_digest(&[literal], "prev", 7, &timestamp),
        );
    }

    #[test]
    fn test_digest_changes_with_any_field() {
        let transactions = sample_transactions();
        let timestamp = Utc::now();
        let base = block_digest(&transactions, "prev", 42, &timestamp);

        assert_ne!(base, block_digest(&transactions, "other", 42, &timestamp));
        assert_ne!(base, block_digest(&transactions, "prev", 43, &timestamp));
        assert_ne!(base, block_digest(&[], "prev", 42, &timestamp));
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("0000abcd", 4));
        assert!(meets_difficulty("0001", 3));
        assert!(!meets_difficulty("0001", 4));
        assert!(!meets_difficulty("abcd", 1));
        assert!(meets_difficulty("anything", 0));
        assert!(!meets_difficulty("00", 4));
    }
}
