use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::crypto::block_digest;
use super::transaction::Transaction;

/// A sealed block.
///
/// The digest is computed exactly once, when the block is sealed; a block
/// whose stored hash disagrees with its own contents cannot be constructed
/// through this API. Changing the parent linkage goes through
/// [`Block::relink`], which reseals the block in the same step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Transactions included in this block, in admission order.
    transactions: Vec<Transaction>,

    /// Digest of the chain predecessor, `"0"` for the genesis block.
    previous_hash: String,

    /// Nonce found by proof-of-work.
    nonce: u64,

    /// Timestamp captured when the mining candidate was created.
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    timestamp: DateTime<Utc>,

    /// Digest of the fields above, computed at seal time.
    hash: String,
}

/// A mining candidate: the mutable search state for proof-of-work.
///
/// The nonce is free to change and nothing here carries a digest that could
/// go stale. Once a satisfying nonce is found the candidate is turned into
/// an immutable [`Block`] with [`BlockTemplate::seal`].
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub timestamp: DateTime<Utc>,

    /// Proof-of-work search variable.
    pub nonce: u64,
}

impl BlockTemplate {
    /// Creates a candidate with `nonce = 0` and the current time.
    pub fn new(transactions: Vec<Transaction>, previous_hash: impl Into<String>) -> Self {
        BlockTemplate {
            transactions,
            previous_hash: previous_hash.into(),
            timestamp: Utc::now(),
            nonce: 0,
        }
    }

    /// Digest over the candidate's current field values.
    pub fn digest(&self) -> String {
        block_digest(
            &self.transactions,
            &self.previous_hash,
            self.nonce,
            &self.timestamp,
        )
    }

    /// Seals the candidate into an immutable block, computing its digest
    /// exactly once.
    pub fn seal(self) -> Block {
        let hash = self.digest();

        Block {
            transactions: self.transactions,
            previous_hash: self.previous_hash,
            nonce: self.nonce,
            timestamp: self.timestamp,
            hash,
        }
    }
}

impl Block {
    /// Creates a sealed block with `nonce = 0` and the current time. Used
    /// for the genesis block and for externally built candidates that skip
    /// the proof-of-work loop.
    pub fn new(transactions: Vec<Transaction>, previous_hash: impl Into<String>) -> Self {
        BlockTemplate::new(transactions, previous_hash).seal()
    }

    /// Rebinds the block to a new parent digest and reseals it. The digest
    /// is recomputed in the same step as the mutation, so a block can never
    /// be observed with a hash that predates its linkage.
    pub fn relink(self, previous_hash: impl Into<String>) -> Block {
        BlockTemplate {
            transactions: self.transactions,
            previous_hash: previous_hash.into(),
            timestamp: self.timestamp,
            nonce: self.nonce,
        }
        .seal()
    }

    /// Recomputes the digest from the block's current field values. Chain
    /// validation uses this rather than trusting the stored hash, which for
    /// a block received from a peer may be anything.
    pub fn digest(&self) -> String {
        block_digest(
            &self.transactions,
            &self.previous_hash,
            self.nonce,
            &self.timestamp,
        )
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The digest stored when the block was sealed.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}
