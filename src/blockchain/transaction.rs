use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::crypto::Address;

/// An intent to move value between two accounts.
///
/// `sender` is `None` for system-minted reward transactions. The fee is
/// assigned by the engine when the transaction enters the pending pool;
/// whatever the caller supplied is overwritten at that point. No balance or
/// signature checks happen here: amounts and addresses are trusted as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address, or `None` for a mining reward.
    pub sender: Option<Address>,

    /// Recipient's address.
    pub recipient: Address,

    /// Amount being transferred.
    pub amount: f64,

    /// Fee charged at admission time.
    pub fee: f64,
}

impl Transaction {
    /// Creates a new transaction between two accounts.
    pub fn new(sender: Address, recipient: Address, amount: f64, fee: f64) -> Self {
        Transaction {
            sender: Some(sender),
            recipient,
            amount,
            fee,
        }
    }

    /// Creates a system-minted reward transaction crediting a miner.
    pub fn reward(recipient: Address, amount: f64, fee: f64) -> Self {
        Transaction {
            sender: None,
            recipient,
            amount,
            fee,
        }
    }

    /// Overwrites the fee with the engine's current rate. Called exactly
    /// once, at pool admission.
    pub fn set_fee(&mut self, rate: f64) {
        self.fee = rate;
    }

    /// Whether this transaction was minted by the system rather than
    /// submitted by a sender.
    pub fn is_reward(&self) -> bool {
        self.sender.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction() {
        let transaction =
            Transaction::new(Address::from("alice"), Address::from("bob"), 10.5, 0.1);

        assert_eq!(transaction.sender, Some(Address::from("alice")));
        assert_eq!(transaction.recipient, Address::from("bob"));
        assert_eq!(transaction.amount, 10.5);
        assert_eq!(transaction.fee, 0.1);
        assert!(!transaction.is_reward());
    }

    #[test]
    fn test_reward_transaction() {
        let transaction = Transaction::reward(Address::from("miner"), 1.0, 0.001);

        assert!(transaction.sender.is_none());
        assert_eq!(transaction.recipient, Address::from("miner"));
        assert_eq!(transaction.amount, 1.0);
        assert!(transaction.is_reward());
    }

    #[test]
    fn test_set_fee_overwrites() {
        let mut transaction =
            Transaction::new(Address::from("alice"), Address::from("bob"), 10.0, 99.0);

        transaction.set_fee(0.001);

        assert_eq!(transaction.fee, 0.001);
    }

    #[test]
    fn test_wire_form() {
        let reward = Transaction::reward(Address::from("miner"), 1.0, 0.001);
        let value = serde_json::to_value(&reward).unwrap();

        assert!(value["sender"].is_null());
        assert_eq!(value["recipient"], "miner");
        assert_eq!(value["amount"], 1.0);
        assert_eq!(value["fee"], 0.001);
    }
}
