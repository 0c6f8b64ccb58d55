#![allow(clippy::module_inception)]

pub mod block;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod invoice;
pub mod node;
pub mod transaction;

pub use error::RpcError;

// Amounts are integer satoshis everywhere in the harness
pub type Amount = u64;
