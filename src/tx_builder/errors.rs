//! Error taxonomy for stake operations
//!
//! Every failure a prepare or submit request can hit maps onto one variant.
//! Decode and business-rule failures are deterministic for a given chain
//! state and are never retried; transport failures are surfaced as-is so the
//! caller can ask again with a fresh blockhash.

use crate::rpc::ChainRpcError;
use crate::stake_state::{DecodeError, MergeRejection};
use serde::Serialize;
use solana_sdk::{clock::Epoch, pubkey::Pubkey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StakeServiceError {
    /// The address holds no account
    #[error("Stake account {0} not found")]
    AccountNotFound(Pubkey),

    /// Account bytes do not match the stake layout
    #[error("Failed to decode stake account {address}: {source}")]
    Decode {
        address: Pubkey,
        #[source]
        source: DecodeError,
    },

    /// Amount is below a minimum or above what the account holds
    #[error("{0}")]
    InsufficientStake(String),

    /// Stake has not finished cooling down
    #[error(
        "Stake account is still in cooldown (current epoch {current_epoch}, deactivation epoch {})",
        epoch_label(.deactivation_epoch)
    )]
    CooldownActive {
        current_epoch: Epoch,
        deactivation_epoch: Option<Epoch>,
    },

    #[error("Stake accounts cannot be merged: {0}")]
    MergeIneligible(#[from] MergeRejection),

    /// Would leave an account below its rent-exempt reserve
    #[error("Withdrawing {requested} lamports would leave the account below its rent-exempt reserve (at most {available} available)")]
    RentExemptionViolation { requested: u64, available: u64 },

    #[error("RPC timeout: {0}")]
    RpcTimeout(ChainRpcError),

    #[error("RPC error: {0}")]
    Rpc(ChainRpcError),

    /// Unexpected failure while assembling instructions or encoding
    #[error("Transaction build error: {0}")]
    TransactionBuild(String),

    /// Malformed address, amount or transaction payload
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Signed transaction could not be relayed
    #[error("Submission failed: {0}")]
    Submission(String),
}

fn epoch_label(epoch: &Option<Epoch>) -> String {
    epoch
        .map(|e| e.to_string())
        .unwrap_or_else(|| "not set".to_string())
}

/// Serialisable error kind for the response boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    AccountNotFound,
    DecodeError,
    InsufficientStake,
    CooldownActive,
    MergeIneligible,
    RentExemptionViolation,
    RpcTimeout,
    RpcError,
    TransactionBuildError,
    InvalidInput,
    SubmissionFailed,
}

impl StakeServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound(_) => ErrorKind::AccountNotFound,
            Self::Decode { .. } => ErrorKind::DecodeError,
            Self::InsufficientStake(_) => ErrorKind::InsufficientStake,
            Self::CooldownActive { .. } => ErrorKind::CooldownActive,
            Self::MergeIneligible(_) => ErrorKind::MergeIneligible,
            Self::RentExemptionViolation { .. } => ErrorKind::RentExemptionViolation,
            Self::RpcTimeout(_) => ErrorKind::RpcTimeout,
            Self::Rpc(_) => ErrorKind::RpcError,
            Self::TransactionBuild(_) => ErrorKind::TransactionBuildError,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Submission(_) => ErrorKind::SubmissionFailed,
        }
    }

    /// Check if asking again might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RpcTimeout(_) => true,
            Self::Rpc(err) => err.is_retryable(),
            // Cooldown ends at the next epoch boundary.
            Self::CooldownActive { .. } => true,
            Self::AccountNotFound(_)
            | Self::Decode { .. }
            | Self::InsufficientStake(_)
            | Self::MergeIneligible(_)
            | Self::RentExemptionViolation { .. }
            | Self::TransactionBuild(_)
            | Self::InvalidInput(_)
            | Self::Submission(_) => false,
        }
    }

    /// Get the error category for metrics and logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::AccountNotFound(_) | Self::Decode { .. } => "state",
            Self::InsufficientStake(_)
            | Self::CooldownActive { .. }
            | Self::MergeIneligible(_)
            | Self::RentExemptionViolation { .. } => "business_rule",
            Self::RpcTimeout(_) | Self::Rpc(_) => "rpc",
            Self::TransactionBuild(_) => "build",
            Self::InvalidInput(_) => "input",
            Self::Submission(_) => "submission",
        }
    }
}

// Convenience constructors for common error scenarios
impl StakeServiceError {
    pub fn decode(address: Pubkey, source: DecodeError) -> Self {
        Self::Decode { address, source }
    }

    pub fn insufficient(reason: impl Into<String>) -> Self {
        Self::InsufficientStake(reason.into())
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn build_failed(reason: impl Into<String>) -> Self {
        Self::TransactionBuild(reason.into())
    }
}

impl From<ChainRpcError> for StakeServiceError {
    fn from(err: ChainRpcError) -> Self {
        if err.is_timeout() {
            Self::RpcTimeout(err)
        } else {
            Self::Rpc(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stake_state::MergeRole;

    #[test]
    fn test_error_display() {
        let err = StakeServiceError::CooldownActive {
            current_epoch: 501,
            deactivation_epoch: Some(501),
        };
        assert_eq!(
            err.to_string(),
            "Stake account is still in cooldown (current epoch 501, deactivation epoch 501)"
        );

        let err = StakeServiceError::from(MergeRejection::DifferentVoteAccount);
        assert!(err.to_string().contains("different vote account"));
    }

    #[test]
    fn test_rpc_errors_split_by_timeout() {
        let err = StakeServiceError::from(ChainRpcError::timeout("getEpochInfo", 100));
        assert_eq!(err.kind(), ErrorKind::RpcTimeout);
        assert!(err.is_retryable());

        let err = StakeServiceError::from(ChainRpcError::invalid_response("getEpochInfo", "bad"));
        assert_eq!(err.kind(), ErrorKind::RpcError);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_business_rules_not_retryable() {
        assert!(!StakeServiceError::insufficient("too small").is_retryable());
        assert!(!StakeServiceError::from(MergeRejection::AccountNotFound(MergeRole::Source))
            .is_retryable());
        assert!(!StakeServiceError::RentExemptionViolation {
            requested: 10,
            available: 5
        }
        .is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(StakeServiceError::AccountNotFound(Pubkey::new_unique()).category(), "state");
        assert_eq!(StakeServiceError::insufficient("x").category(), "business_rule");
        assert_eq!(StakeServiceError::build_failed("x").category(), "build");
    }

    #[test]
    fn test_kind_serialises_camel_case() {
        let json = serde_json::to_value(ErrorKind::RentExemptionViolation).unwrap();
        assert_eq!(json, "rentExemptionViolation");
    }
}
