use crate::{
    crypto::{hash, Hash, PublicKey},
    Amount,
};
use serde::{Deserialize, Serialize};

// The payment hash an invoice is locked to
pub fn payment_hash_for(preimage: &Hash) -> Hash {
    hash(preimage.as_bytes())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub memo: String,
    pub payment_hash: Hash,
    pub preimage: Hash,
    pub value: Amount,
    pub settled: bool,
    // Amount received when settled, may exceed value
    pub amt_paid: Amount,
}

impl Invoice {
    pub fn new(memo: String, preimage: Hash, value: Amount) -> Self {
        Self {
            memo,
            payment_hash: payment_hash_for(&preimage),
            preimage,
            value,
            settled: false,
            amt_paid: 0,
        }
    }

    /// Settles the invoice with an incoming HTLC of `amount`.
    /// Returns the preimage, or a reason when the payment must be refused.
    pub fn settle(&mut self, amount: Amount) -> Result<Hash, &'static str> {
        if self.settled {
            return Err("invoice already settled");
        }
        if amount < self.value {
            return Err("incoming amount below invoice value");
        }
        self.settled = true;
        self.amt_paid = amount;
        Ok(self.preimage)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddInvoiceResponse {
    pub r_hash: Hash,
    pub payment_request: String,
}

impl AddInvoiceResponse {
    pub fn new(r_hash: Hash, destination: &PublicKey, value: Amount) -> Self {
        Self {
            r_hash,
            payment_request: format!("lnbcrt{}:{}:{}", value, destination, r_hash),
        }
    }
}

/// Request written on a node's `SendPayment` stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub payment_hash: Hash,
    pub dest: PublicKey,
    pub amount: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Settled { preimage: Hash, hops: usize },
    Failed { reason: String },
}

/// Response read back from the `SendPayment` stream. It echoes the payment hash
/// so several in-flight requests can share one stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub payment_hash: Hash,
    pub outcome: PaymentOutcome,
}

impl SendResponse {
    pub fn is_settled(&self) -> bool {
        matches!(self.outcome, PaymentOutcome::Settled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_settles_exactly_once() {
        let preimage = Hash::new([5; 32]);
        let mut invoice = Invoice::new("coffee".into(), preimage, 1000);
        assert_eq!(invoice.payment_hash, payment_hash_for(&preimage));

        assert!(invoice.settle(999).is_err());
        assert!(!invoice.settled);

        assert_eq!(invoice.settle(1200), Ok(preimage));
        assert!(invoice.settled);
        assert_eq!(invoice.amt_paid, 1200);

        assert!(invoice.settle(1000).is_err());
        assert_eq!(invoice.amt_paid, 1200);
    }

    #[test]
    fn test_payment_hash_is_not_preimage() {
        let preimage = Hash::new([1; 32]);
        assert_ne!(payment_hash_for(&preimage), preimage);
    }
}
