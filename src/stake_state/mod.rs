//! Stake account state: decoding, activation and merge compatibility.

pub mod activation;
pub mod history;
pub mod layout;
pub mod merge;
pub mod snapshot;

pub use activation::{
    ActivationResolver, ActivationState, ActivationStatus, NetworkWarmupCooldown,
    WarmupCooldownPolicy, WithdrawPolicy, DEFAULT_WARMUP_COOLDOWN_RATE, NEW_WARMUP_COOLDOWN_RATE,
};
pub use history::{StakeHistory, StakeHistoryEntry};
pub use layout::{
    decode_account_state, encode_account_state, AccountState, DecodeError, Delegation, Lockup,
    StakeMeta, STAKER_OFFSET, STAKE_ACCOUNT_SIZE, VOTER_OFFSET, WITHDRAWER_OFFSET,
};
pub use merge::{can_merge, MergeRejection, MergeRole};
pub use snapshot::{StakeAccountSnapshot, StakeAccountSummary};
