//! Per-request view of one stake account
//!
//! A snapshot is built from a fresh RPC read and dropped with the request.
//! Two snapshots of the same address are unrelated values.

use serde::Serialize;
use solana_sdk::{account::Account, clock::Epoch, pubkey::Pubkey, stake};

use super::activation::{ActivationResolver, ActivationState, ActivationStatus, WithdrawPolicy};
use super::history::StakeHistory;
use super::layout::{decode_account_state, serialize_pubkey, AccountState, DecodeError, Delegation, StakeMeta};

#[derive(Debug, Clone, PartialEq)]
pub struct StakeAccountSnapshot {
    pub address: Pubkey,
    /// Total account balance.
    pub lamports: u64,
    pub meta: StakeMeta,
    /// `None` for initialized accounts that were never delegated.
    pub delegation: Option<Delegation>,
    pub status: ActivationStatus,
    pub fetched_epoch: Epoch,
}

impl StakeAccountSnapshot {
    /// Decode and resolve an account fetched at `current_epoch`.
    ///
    /// # Errors
    ///
    /// Any `DecodeError` from the layout, `WrongOwner` for accounts outside
    /// the stake program and `NotStakeAccount` for uninitialized or
    /// rewards-pool states.
    pub fn from_account(
        address: Pubkey,
        account: &Account,
        current_epoch: Epoch,
        history: &StakeHistory,
        resolver: &ActivationResolver,
    ) -> Result<Self, DecodeError> {
        if account.owner != stake::program::id() {
            return Err(DecodeError::WrongOwner {
                owner: account.owner,
            });
        }

        let (meta, delegation) = match decode_account_state(&account.data)? {
            AccountState::Initialized(meta) => (meta, None),
            AccountState::Stake(meta, delegation) => (meta, Some(delegation)),
            AccountState::Uninitialized => {
                return Err(DecodeError::NotStakeAccount("uninitialized"))
            }
            AccountState::RewardsPool => return Err(DecodeError::NotStakeAccount("rewards pool")),
        };

        let status = match &delegation {
            Some(delegation) => resolver.resolve(delegation, current_epoch, history),
            // Undelegated balance above the reserve is free to withdraw.
            None => ActivationStatus::inactive(
                account.lamports.saturating_sub(meta.rent_exempt_reserve),
            ),
        };

        Ok(Self {
            address,
            lamports: account.lamports,
            meta,
            delegation,
            status,
            fetched_epoch: current_epoch,
        })
    }

    pub fn state(&self) -> ActivationState {
        self.status.state
    }

    pub fn delegated_lamports(&self) -> u64 {
        self.delegation.map(|d| d.stake_lamports).unwrap_or(0)
    }

    /// Balance that can leave the account while keeping it rent exempt.
    pub fn spendable_lamports(&self) -> u64 {
        self.lamports.saturating_sub(self.meta.rent_exempt_reserve)
    }

    pub fn summary(&self, policy: &WithdrawPolicy) -> StakeAccountSummary {
        StakeAccountSummary {
            address: self.address,
            amount_staked: self.lamports,
            delegated_stake: self.delegated_lamports(),
            withdrawable_amount: policy.withdrawable_amount(&self.status),
            active_stake: self.status.active_lamports,
            inactive_stake: self.status.inactive_lamports,
            status: self.status.state,
            rent_exempt_reserve: self.meta.rent_exempt_reserve,
            staking_authority: self.meta.authorized_staker,
            withdraw_authority: self.meta.authorized_withdrawer,
            voter: self.delegation.map(|d| d.voter_pubkey.to_string()),
            activation_epoch: self.delegation.map(|d| d.activation_epoch),
            deactivation_epoch: self.delegation.and_then(|d| d.deactivation_epoch),
        }
    }
}

/// Display record for one stake account. Amounts are lamports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeAccountSummary {
    #[serde(serialize_with = "serialize_pubkey")]
    pub address: Pubkey,
    pub amount_staked: u64,
    pub delegated_stake: u64,
    pub withdrawable_amount: u64,
    pub active_stake: u64,
    pub inactive_stake: u64,
    pub status: ActivationState,
    pub rent_exempt_reserve: u64,
    #[serde(serialize_with = "serialize_pubkey")]
    pub staking_authority: Pubkey,
    #[serde(serialize_with = "serialize_pubkey")]
    pub withdraw_authority: Pubkey,
    pub voter: Option<String>,
    pub activation_epoch: Option<Epoch>,
    pub deactivation_epoch: Option<Epoch>,
}
