//! solstake - Solana stake account lifecycle library
//!
//! Decodes stake accounts, resolves their activation status, validates
//! merges and prepares unsigned stake transactions against a single
//! configured vote account.

pub mod config;
pub mod metrics;
pub mod observability;
pub mod pools;
pub mod retry;
pub mod rpc;
pub mod stake_state;
pub mod stats;
pub mod structured_logging;
pub mod test_utils;
pub mod tx_builder;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use pools::{PoolAccount, PoolAggregate, PoolScanner};
pub use rpc::{ChainRpc, SolanaChainClient};
pub use stake_state::{ActivationResolver, ActivationState, StakeAccountSnapshot};
pub use tx_builder::{BuildResponse, StakeService, StakeServiceError, SubmitResponse};
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
