use thiserror::Error;

// Errors returned across the node and chain RPC surfaces
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("Service is unavailable: {}", _0)]
    Unavailable(String),
    #[error("{} was not found", _0)]
    NotFound(String),
    #[error("Invalid argument: {}", _0)]
    InvalidArgument(String),
    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("Node {} is not a connected peer", _0)]
    NotPeer(String),
    #[error("No route to {destination} for {amount} sat")]
    NoRoute { destination: String, amount: u64 },
    #[error("Payment failed: {}", _0)]
    PaymentFailed(String),
    #[error("Transaction rejected: {}", _0)]
    Rejected(String),
    #[error("Transaction is not final: input {input} needs {required} confirmations, has {current}")]
    NonFinal {
        input: String,
        required: u32,
        current: u64,
    },
    #[error("Stream was closed")]
    StreamClosed,
}

impl RpcError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    // Errors that may go away on their own while a read-only probe keeps polling
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::NonFinal { .. } | Self::NoRoute { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = RpcError::InsufficientFunds {
            needed: 10,
            available: 3,
        };
        assert_eq!(err.to_string(), "Insufficient funds: needed 10, available 3");
        assert_eq!(
            RpcError::not_found("channel").to_string(),
            "channel was not found"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(RpcError::not_found("tx").is_transient());
        assert!(!RpcError::StreamClosed.is_transient());
        assert!(!RpcError::Unavailable("down".into()).is_transient());
    }
}
