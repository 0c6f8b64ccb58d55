use crate::{
    crypto::{hash, Hash, PublicKey},
    Amount,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// Reference to a single transaction output.
///
/// Its canonical text form is `txid:outputIndex`, the same string the
/// channel RPCs use to identify a channel by its funding output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    pub index: u32,
}

impl OutPoint {
    pub const fn new(txid: Hash, index: u32) -> Self {
        Self { txid, index }
    }

    // Spent by coinbase inputs only
    pub const fn null() -> Self {
        Self {
            txid: Hash::zero(),
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

impl Display for OutPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

impl FromStr for OutPoint {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, index) = s.split_once(':').ok_or("Missing ':' separator")?;
        let txid = txid.parse::<Hash>()?;
        let index = index.parse::<u32>().map_err(|_| "Invalid output index")?;
        Ok(Self::new(txid, index))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub previous_output: OutPoint,
    // Relative timelock in blocks when non zero. Coinbase inputs store the height here.
    pub sequence: u32,
}

impl TxIn {
    pub fn new(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            sequence: 0,
        }
    }

    pub fn with_sequence(previous_output: OutPoint, sequence: u32) -> Self {
        Self {
            previous_output,
            sequence,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    PayToAddress(Hash),
    Multisig2of2(PublicKey, PublicKey),
    DelayedPayToKey { key: PublicKey, csv_delay: u32 },
}

impl Script {
    /// Whether `key` alone can spend an output locked by this script,
    /// ignoring any relative timelock.
    pub fn is_spendable_by(&self, key: &PublicKey) -> bool {
        match self {
            Script::PayToAddress(address) => *address == key.address(),
            Script::DelayedPayToKey { key: owner, .. } => owner == key,
            Script::Multisig2of2(..) => false,
        }
    }

    pub fn csv_delay(&self) -> Option<u32> {
        match self {
            Script::DelayedPayToKey { csv_delay, .. } => Some(*csv_delay),
            _ => None,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Script::PayToAddress(address) => {
                out.push(0);
                out.extend_from_slice(address.as_bytes());
            }
            Script::Multisig2of2(a, b) => {
                out.push(1);
                out.extend_from_slice(a.as_bytes());
                out.extend_from_slice(b.as_bytes());
            }
            Script::DelayedPayToKey { key, csv_delay } => {
                out.push(2);
                out.extend_from_slice(key.as_bytes());
                out.extend_from_slice(&csv_delay.to_le_bytes());
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub script: Script,
}

impl TxOut {
    pub fn new(value: Amount, script: Script) -> Self {
        Self { value, script }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self { inputs, outputs }
    }

    pub fn coinbase(height: u64, outputs: Vec<TxOut>) -> Self {
        // Heights past u32 never happen on a test chain
        let sequence = height.min(u32::MAX as u64) as u32;
        Self {
            inputs: vec![TxIn::with_sequence(OutPoint::null(), sequence)],
            outputs,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    // Deterministic byte encoding used for the txid
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.inputs.len() * 40 + self.outputs.len() * 80);
        out.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            out.extend_from_slice(input.previous_output.txid.as_bytes());
            out.extend_from_slice(&input.previous_output.index.to_le_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        out.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            output.script.encode(&mut out);
        }
        out
    }

    pub fn txid(&self) -> Hash {
        hash(&self.to_bytes())
    }

    pub fn outpoint(&self, index: u32) -> OutPoint {
        OutPoint::new(self.txid(), index)
    }

    pub fn total_output(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }

    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.inputs.iter().any(|i| i.previous_output == *outpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use proptest::prelude::*;

    fn sample_key(seed: u8) -> PublicKey {
        *KeyPair::from_secret([seed; 32]).public_key()
    }

    #[test]
    fn test_outpoint_display() {
        let op = OutPoint::new(Hash::new([0xab; 32]), 1);
        assert_eq!(op.to_string(), format!("{}:1", "ab".repeat(32)));
    }

    #[test]
    fn test_outpoint_parse_errors() {
        assert!("nocolon".parse::<OutPoint>().is_err());
        assert!(format!("{}:x", "ab".repeat(32)).parse::<OutPoint>().is_err());
        assert!("abcd:0".parse::<OutPoint>().is_err());
    }

    #[test]
    fn test_coinbase_detection() {
        let cb = Transaction::coinbase(7, vec![]);
        assert!(cb.is_coinbase());
        assert_eq!(cb.inputs[0].sequence, 7);
        let tx = Transaction::new(vec![TxIn::new(cb.outpoint(0))], vec![]);
        assert!(!tx.is_coinbase());
        assert!(tx.spends(&cb.outpoint(0)));
    }

    #[test]
    fn test_txid_depends_on_sequence() {
        let prev = OutPoint::new(Hash::new([1; 32]), 0);
        let a = Transaction::new(vec![TxIn::new(prev)], vec![]);
        let b = Transaction::new(vec![TxIn::with_sequence(prev, 4)], vec![]);
        assert_ne!(a.txid(), b.txid());
    }

    #[test]
    fn test_script_ownership() {
        let alice = sample_key(1);
        let bob = sample_key(2);
        assert!(Script::PayToAddress(alice.address()).is_spendable_by(&alice));
        assert!(!Script::PayToAddress(alice.address()).is_spendable_by(&bob));
        assert!(!Script::Multisig2of2(alice, bob).is_spendable_by(&alice));

        let delayed = Script::DelayedPayToKey {
            key: bob,
            csv_delay: 4,
        };
        assert!(delayed.is_spendable_by(&bob));
        assert_eq!(delayed.csv_delay(), Some(4));
    }

    proptest! {
        #[test]
        fn prop_outpoint_text_form_parses_back(bytes in any::<[u8; 32]>(), index in any::<u32>()) {
            let op = OutPoint::new(Hash::new(bytes), index);
            let parsed: OutPoint = op.to_string().parse().unwrap();
            prop_assert_eq!(parsed, op);
        }
    }
}
