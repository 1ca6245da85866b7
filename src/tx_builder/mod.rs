//! Stake Transaction Builder
//!
//! The supercomponent is split into focused modules:
//! - **errors**: Error taxonomy and the serialisable `ErrorKind`
//! - **context**: Per-request chain view (epoch, stake history)
//! - **instructions**: Instruction planning and ordering validation
//! - **output**: Prepared transaction and the response boundary
//! - **builder**: `StakeService`, which ties the above together
//!
//! ## Flow
//!
//! A request reads fresh chain state, decodes and resolves the accounts it
//! touches, applies the business rules, and emits an unsigned legacy
//! transaction. Accounts the transaction creates are co-signed with keys
//! generated for this request; the wallet signs last, on its own side.
//! Nothing is tracked between prepare and submit.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use solstake::rpc::SolanaChainClient;
//! use solstake::stake_state::ActivationResolver;
//! use solstake::tx_builder::{StakeService, StakingSettings};
//! # use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
//! # async fn example(vote: Pubkey, wallet: &str) {
//! let rpc = SolanaChainClient::new(
//!     "https://api.mainnet-beta.solana.com",
//!     std::time::Duration::from_secs(30),
//!     CommitmentConfig::confirmed(),
//! );
//! let service = StakeService::new(
//!     Arc::new(rpc),
//!     vote,
//!     ActivationResolver::default(),
//!     StakingSettings::default(),
//! );
//! let response = service.prepare_stake(wallet, 2_000_000_000).await;
//! println!("{}", serde_json::to_string(&response).unwrap());
//! # }
//! ```

pub mod errors;
pub use errors::{ErrorKind, StakeServiceError};

mod builder;
mod context;
pub mod instructions;
pub mod output;

pub use builder::{
    parse_pubkey, parse_sol_amount, StakeService, StakingSettings, DEFAULT_DUST_FLOOR_LAMPORTS,
    MAX_INPUT_SOL,
};
pub use context::ChainContext;
pub use instructions::{sanity_check_ix_order, InstructionPlan, SplitPlan, StakeOperation};
pub use output::{BuildResponse, SubmitResponse, TxBuildOutput};
