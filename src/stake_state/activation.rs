//! Activation status resolution
//!
//! Rules, first match wins:
//! 1. zero delegated stake: `Inactive`, nothing active or inactive
//! 2. before the activation epoch: `Activating`, nothing active
//! 3. past the deactivation epoch with cooldown finished: `Inactive`
//! 4. from the deactivation epoch until then: `Deactivating`, cooldown split
//! 5. warming up, including the activation epoch: `Activating`
//! 6. otherwise: `Active`, all stake active
//!
//! The warmup/cooldown split is the network's own, computed by the stake
//! program's `Delegation` against the stake history. Stake stays fully
//! effective during its deactivation epoch and cools from the next one.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use solana_sdk::clock::Epoch;
use solana_sdk::stake::state::{
    warmup_cooldown_rate, Delegation as NetworkDelegation, StakeActivationStatus,
};

use super::history::StakeHistory;
use super::layout::{Delegation, NOT_DEACTIVATING};

pub use solana_sdk::stake::state::{DEFAULT_WARMUP_COOLDOWN_RATE, NEW_WARMUP_COOLDOWN_RATE};

/// Lifecycle state of a stake account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationState {
    Inactive,
    Activating,
    Active,
    Deactivating,
}

impl ActivationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Deactivating => "deactivating",
        }
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved state plus the active/inactive lamport split.
///
/// `active_lamports + inactive_lamports` never exceeds the delegated stake,
/// and `Active`/`Inactive` always carry a zero on one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationStatus {
    pub state: ActivationState,
    pub active_lamports: u64,
    pub inactive_lamports: u64,
}

impl ActivationStatus {
    pub fn inactive(inactive_lamports: u64) -> Self {
        Self {
            state: ActivationState::Inactive,
            active_lamports: 0,
            inactive_lamports,
        }
    }

    fn new(state: ActivationState, active_lamports: u64, inactive_lamports: u64) -> Self {
        Self {
            state,
            active_lamports,
            inactive_lamports,
        }
    }

    /// Activating or deactivating with part of the stake still earning.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.state,
            ActivationState::Activating | ActivationState::Deactivating
        ) && self.active_lamports > 0
    }
}

/// Warmup/cooldown schedule. The network lowered the per-epoch rate once,
/// at a feature-gated epoch, so that epoch is injected.
pub trait WarmupCooldownPolicy: Send + Sync + Debug {
    /// Epoch from which the reduced rate applies, if it is active.
    fn new_rate_activation_epoch(&self) -> Option<Epoch>;

    /// Fraction of cluster-effective stake that may warm up or cool down in
    /// `epoch`.
    fn rate(&self, epoch: Epoch) -> f64 {
        warmup_cooldown_rate(epoch, self.new_rate_activation_epoch())
    }
}

/// Network schedule: 25% until the reduced-rate feature epoch, 9% after.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkWarmupCooldown {
    pub new_rate_activation_epoch: Option<Epoch>,
}

impl WarmupCooldownPolicy for NetworkWarmupCooldown {
    fn new_rate_activation_epoch(&self) -> Option<Epoch> {
        self.new_rate_activation_epoch
    }
}

/// Whether stake counts as withdrawable in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawPolicy {
    /// Expose activation-epoch stake as withdrawable. Off by default: the
    /// stake is lamport-inactive but withdrawing it forfeits the delegation.
    #[serde(default)]
    pub activating_is_withdrawable: bool,
}

impl WithdrawPolicy {
    /// Amount the holder may withdraw right now.
    pub fn withdrawable_amount(&self, status: &ActivationStatus) -> u64 {
        match status.state {
            ActivationState::Inactive | ActivationState::Deactivating => {
                status.inactive_lamports
            }
            ActivationState::Activating if self.activating_is_withdrawable => {
                status.inactive_lamports
            }
            ActivationState::Activating | ActivationState::Active => 0,
        }
    }
}

/// Computes activation status against a warmup/cooldown policy.
#[derive(Debug, Clone)]
pub struct ActivationResolver {
    policy: Arc<dyn WarmupCooldownPolicy>,
}

impl ActivationResolver {
    pub fn new(policy: impl WarmupCooldownPolicy + 'static) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn rate(&self, epoch: Epoch) -> f64 {
        self.policy.rate(epoch)
    }

    pub fn resolve(
        &self,
        delegation: &Delegation,
        current_epoch: Epoch,
        history: &StakeHistory,
    ) -> ActivationStatus {
        let stake = delegation.stake_lamports;

        if stake == 0 {
            return ActivationStatus::inactive(0);
        }
        // Genesis stake carries the maximum activation epoch and is always active.
        let bootstrap = delegation.activation_epoch == Epoch::MAX;
        if current_epoch < delegation.activation_epoch && !bootstrap {
            return ActivationStatus::new(ActivationState::Activating, 0, stake);
        }

        let network = self.network_status(delegation, current_epoch, history);
        let active = network.effective.min(stake);
        let inactive = stake - active;

        match delegation.deactivation_epoch {
            Some(deactivation_epoch) if current_epoch > deactivation_epoch && active == 0 => {
                ActivationStatus::inactive(stake)
            }
            Some(deactivation_epoch) if current_epoch >= deactivation_epoch => {
                ActivationStatus::new(ActivationState::Deactivating, active, inactive)
            }
            _ if active < stake => {
                ActivationStatus::new(ActivationState::Activating, active, inactive)
            }
            _ => ActivationStatus::new(ActivationState::Active, stake, 0),
        }
    }

    /// Effective, activating and deactivating stake as the stake program
    /// computes them for `target_epoch`.
    pub fn network_status(
        &self,
        delegation: &Delegation,
        target_epoch: Epoch,
        history: &StakeHistory,
    ) -> StakeActivationStatus {
        let mut network = NetworkDelegation::new(
            &delegation.voter_pubkey,
            delegation.stake_lamports,
            delegation.activation_epoch,
        );
        network.deactivation_epoch = delegation.deactivation_epoch.unwrap_or(NOT_DEACTIVATING);
        network.stake_activating_and_deactivating(
            target_epoch,
            history,
            self.policy.new_rate_activation_epoch(),
        )
    }
}

impl Default for ActivationResolver {
    fn default() -> Self {
        Self::new(NetworkWarmupCooldown::default())
    }
}
