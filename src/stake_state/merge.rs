//! Merge eligibility
//!
//! Mirrors the stake program's merge preconditions so a doomed merge is
//! reported before the user pays for it. Checks run in order and the first
//! failing rule wins.

use solana_sdk::clock::Epoch;
use thiserror::Error;

use super::activation::ActivationState;
use super::snapshot::StakeAccountSnapshot;

/// Which side of the merge an account is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRole {
    Source,
    Destination,
}

impl std::fmt::Display for MergeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Destination => f.write_str("destination"),
        }
    }
}

/// Reason a merge would fail on-chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeRejection {
    #[error("{0} stake account not found")]
    AccountNotFound(MergeRole),

    #[error("stake accounts must share the same authorized staker")]
    StakerMismatch,

    #[error("stake accounts must share the same withdraw authority")]
    WithdrawerMismatch,

    #[error("stake accounts must share the same lockup configuration")]
    LockupMismatch,

    #[error("{0} stake is partially activating or deactivating")]
    TransientState(MergeRole),

    #[error("select the activating stake as the destination account when merging")]
    SwapRequired,

    #[error("destination activating stake must still be in its activation epoch")]
    DestinationAlreadyEarning,

    #[error("stake accounts are delegated to a different vote account")]
    DifferentVoteAccount,

    #[error("stake accounts observed different vote credits")]
    CreditsObservedMismatch,

    #[error("activating stakes can only be merged during their shared activation epoch")]
    ActivationEpochMismatch,

    #[error("activating stakes cannot be merged once any portion has become active")]
    AlreadyEarning,

    #[error("cannot merge a {source_state} source into a {destination_state} destination")]
    UnsupportedStates {
        source_state: ActivationState,
        destination_state: ActivationState,
    },
}

/// State used for pairing. A deactivating account with nothing active left
/// behaves as inactive.
fn merge_state(snapshot: &StakeAccountSnapshot) -> ActivationState {
    match snapshot.status.state {
        ActivationState::Deactivating if snapshot.status.active_lamports == 0 => {
            ActivationState::Inactive
        }
        state => state,
    }
}

/// Decide whether `source` can be merged into `destination`.
///
/// A `None` snapshot means the account could not be fetched.
///
/// # Errors
///
/// The first [`MergeRejection`] that applies.
pub fn can_merge(
    source: Option<&StakeAccountSnapshot>,
    destination: Option<&StakeAccountSnapshot>,
    current_epoch: Epoch,
) -> Result<(), MergeRejection> {
    let source = source.ok_or(MergeRejection::AccountNotFound(MergeRole::Source))?;
    let destination =
        destination.ok_or(MergeRejection::AccountNotFound(MergeRole::Destination))?;

    if source.meta.authorized_staker != destination.meta.authorized_staker {
        return Err(MergeRejection::StakerMismatch);
    }
    if source.meta.authorized_withdrawer != destination.meta.authorized_withdrawer {
        return Err(MergeRejection::WithdrawerMismatch);
    }
    if source.meta.lockup != destination.meta.lockup {
        return Err(MergeRejection::LockupMismatch);
    }

    if source.status.is_transient() {
        return Err(MergeRejection::TransientState(MergeRole::Source));
    }
    if destination.status.is_transient() {
        return Err(MergeRejection::TransientState(MergeRole::Destination));
    }

    use ActivationState::{Activating, Active, Inactive};
    match (merge_state(source), merge_state(destination)) {
        (Inactive, Inactive) => Ok(()),

        (Inactive, Activating) => {
            let activation_epoch = destination.delegation.map(|d| d.activation_epoch);
            if activation_epoch != Some(current_epoch) || destination.status.active_lamports > 0 {
                return Err(MergeRejection::DestinationAlreadyEarning);
            }
            Ok(())
        }

        (Activating, Inactive) => Err(MergeRejection::SwapRequired),

        (Active, Active) => same_delegation_target(source, destination),

        (Activating, Activating) => {
            let source_epoch = source.delegation.map(|d| d.activation_epoch);
            let destination_epoch = destination.delegation.map(|d| d.activation_epoch);
            if source_epoch != destination_epoch || source_epoch != Some(current_epoch) {
                return Err(MergeRejection::ActivationEpochMismatch);
            }
            same_delegation_target(source, destination)?;
            if source.status.active_lamports > 0 || destination.status.active_lamports > 0 {
                return Err(MergeRejection::AlreadyEarning);
            }
            Ok(())
        }

        (source_state, destination_state) => Err(MergeRejection::UnsupportedStates {
            source_state,
            destination_state,
        }),
    }
}

fn same_delegation_target(
    source: &StakeAccountSnapshot,
    destination: &StakeAccountSnapshot,
) -> Result<(), MergeRejection> {
    let (Some(source), Some(destination)) = (source.delegation, destination.delegation) else {
        return Err(MergeRejection::DifferentVoteAccount);
    };
    if source.voter_pubkey != destination.voter_pubkey {
        return Err(MergeRejection::DifferentVoteAccount);
    }
    if source.credits_observed != destination.credits_observed {
        return Err(MergeRejection::CreditsObservedMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stake_state::activation::{ActivationResolver, ActivationStatus};
    use crate::stake_state::history::{StakeHistory, StakeHistoryEntry};
    use crate::test_utils::StakeAccountBuilder;
    use solana_sdk::pubkey::Pubkey;

    const EPOCH: Epoch = 600;

    fn snapshot(builder: &StakeAccountBuilder) -> StakeAccountSnapshot {
        builder.snapshot(Pubkey::new_unique(), EPOCH)
    }

    fn pair() -> (StakeAccountBuilder, StakeAccountBuilder) {
        let source = StakeAccountBuilder::new();
        let destination = source.sibling();
        (source, destination)
    }

    #[test]
    fn test_missing_accounts() {
        let (source, _) = pair();
        let s = snapshot(&source);
        assert_eq!(
            can_merge(None, Some(&s), EPOCH),
            Err(MergeRejection::AccountNotFound(MergeRole::Source))
        );
        assert_eq!(
            can_merge(Some(&s), None, EPOCH),
            Err(MergeRejection::AccountNotFound(MergeRole::Destination))
        );
    }

    #[test]
    fn test_inactive_pair_ignores_voter_and_credits() {
        let (source, destination) = pair();
        let source = source.deactivated_at(EPOCH - 5).credits(1);
        let destination = destination
            .voter(Pubkey::new_unique())
            .deactivated_at(EPOCH - 2)
            .credits(99);
        assert_eq!(can_merge(Some(&snapshot(&source)), Some(&snapshot(&destination)), EPOCH), Ok(()));
    }

    #[test]
    fn test_authority_and_lockup_checked_first() {
        let (source, destination) = pair();
        let other = destination.clone().staker(Pubkey::new_unique());
        assert_eq!(
            can_merge(Some(&snapshot(&source)), Some(&snapshot(&other)), EPOCH),
            Err(MergeRejection::StakerMismatch)
        );

        let other = destination.clone().withdrawer(Pubkey::new_unique());
        assert_eq!(
            can_merge(Some(&snapshot(&source)), Some(&snapshot(&other)), EPOCH),
            Err(MergeRejection::WithdrawerMismatch)
        );

        let other = destination.lockup_epoch(EPOCH + 10);
        assert_eq!(
            can_merge(Some(&snapshot(&source)), Some(&snapshot(&other)), EPOCH),
            Err(MergeRejection::LockupMismatch)
        );
    }

    #[test]
    fn test_active_pair_requires_same_voter() {
        let (source, destination) = pair();
        let source = source.activated_at(EPOCH - 10).credits(1_000);
        let destination = destination
            .activated_at(EPOCH - 10)
            .voter(Pubkey::new_unique())
            .credits(1_000);
        let err = can_merge(Some(&snapshot(&source)), Some(&snapshot(&destination)), EPOCH)
            .unwrap_err();
        assert_eq!(err, MergeRejection::DifferentVoteAccount);
        assert!(err.to_string().contains("different vote account"));
    }

    #[test]
    fn test_active_pair_requires_same_credits() {
        let (source, destination) = pair();
        let source = source.activated_at(EPOCH - 10).credits(1_000);
        let destination = destination.activated_at(EPOCH - 3).credits(1_001);
        assert_eq!(
            can_merge(Some(&snapshot(&source)), Some(&snapshot(&destination)), EPOCH),
            Err(MergeRejection::CreditsObservedMismatch)
        );

        let destination = destination.credits(1_000);
        assert_eq!(can_merge(Some(&snapshot(&source)), Some(&snapshot(&destination)), EPOCH), Ok(()));
    }

    #[test]
    fn test_inactive_into_activating() {
        let (source, destination) = pair();
        let source = source.deactivated_at(EPOCH - 3);
        let destination = destination.activated_at(EPOCH);
        assert_eq!(can_merge(Some(&snapshot(&source)), Some(&snapshot(&destination)), EPOCH), Ok(()));

        // Swapped direction is refused.
        assert_eq!(
            can_merge(Some(&snapshot(&destination)), Some(&snapshot(&source)), EPOCH),
            Err(MergeRejection::SwapRequired)
        );

        // Delegated for a future epoch: activating, but not in its activation epoch.
        let destination = destination.activated_at(EPOCH + 1);
        assert_eq!(
            can_merge(Some(&snapshot(&source)), Some(&snapshot(&destination)), EPOCH),
            Err(MergeRejection::DestinationAlreadyEarning)
        );
    }

    #[test]
    fn test_activating_pair() {
        let (source, destination) = pair();
        let source = source.activated_at(EPOCH).credits(5);
        let destination = destination.activated_at(EPOCH).credits(5);
        assert_eq!(can_merge(Some(&snapshot(&source)), Some(&snapshot(&destination)), EPOCH), Ok(()));

        let late = destination.clone().activated_at(EPOCH + 1);
        assert_eq!(
            can_merge(Some(&snapshot(&source)), Some(&snapshot(&late)), EPOCH),
            Err(MergeRejection::ActivationEpochMismatch)
        );

        let elsewhere = destination.voter(Pubkey::new_unique());
        assert_eq!(
            can_merge(Some(&snapshot(&source)), Some(&snapshot(&elsewhere)), EPOCH),
            Err(MergeRejection::DifferentVoteAccount)
        );
    }

    #[test]
    fn test_transient_rejected_regardless_of_partner() {
        let (source, destination) = pair();
        let mut transient = snapshot(&source.activated_at(EPOCH - 10).deactivated_at(EPOCH));
        transient.status = ActivationStatus {
            state: ActivationState::Deactivating,
            active_lamports: 1,
            inactive_lamports: transient.delegated_lamports() - 1,
        };

        for partner in [
            destination.clone().deactivated_at(EPOCH - 4),
            destination.clone().activated_at(EPOCH - 10),
            destination.clone().activated_at(EPOCH),
        ] {
            let partner = snapshot(&partner);
            assert_eq!(
                can_merge(Some(&transient), Some(&partner), EPOCH),
                Err(MergeRejection::TransientState(MergeRole::Source))
            );
            assert_eq!(
                can_merge(Some(&partner), Some(&transient), EPOCH),
                Err(MergeRejection::TransientState(MergeRole::Destination))
            );
        }
    }

    #[test]
    fn test_deactivation_epoch_stake_is_transient() {
        let mut history = StakeHistory::new();
        for epoch in EPOCH - 50..=EPOCH {
            history.insert(
                epoch,
                StakeHistoryEntry::with_deactivating(1_000_000_000_000, 40_000_000_000),
            );
        }
        let resolver = ActivationResolver::default();
        let at = |builder: &StakeAccountBuilder, epoch: Epoch| {
            StakeAccountSnapshot::from_account(
                Pubkey::new_unique(),
                &builder.build(),
                epoch,
                &history,
                &resolver,
            )
            .unwrap()
        };

        let (source, destination) = pair();
        let source = source.activated_at(EPOCH - 100).deactivated_at(EPOCH);
        let destination = destination.activated_at(EPOCH - 100).deactivated_at(EPOCH - 60);

        let cooling = at(&source, EPOCH);
        assert_eq!(cooling.state(), ActivationState::Deactivating);
        assert_eq!(cooling.status.active_lamports, cooling.delegated_lamports());
        assert_eq!(
            can_merge(Some(&cooling), Some(&at(&destination, EPOCH)), EPOCH),
            Err(MergeRejection::TransientState(MergeRole::Source))
        );

        // One epoch later the cluster cooldown covers the whole stake.
        let cooled = at(&source, EPOCH + 1);
        assert_eq!(cooled.state(), ActivationState::Inactive);
        assert_eq!(
            can_merge(Some(&cooled), Some(&at(&destination, EPOCH + 1)), EPOCH + 1),
            Ok(())
        );
    }

    #[test]
    fn test_fully_cooled_deactivating_counts_as_inactive() {
        let (source, destination) = pair();
        // Deactivated in its activation epoch: nothing ever became active.
        let source = source.activated_at(EPOCH).deactivated_at(EPOCH);
        let destination = destination.deactivated_at(EPOCH - 1);
        let s = snapshot(&source);
        assert_eq!(s.state(), ActivationState::Deactivating);
        assert_eq!(can_merge(Some(&s), Some(&snapshot(&destination)), EPOCH), Ok(()));
    }

    #[test]
    fn test_active_with_inactive_unsupported() {
        let (source, destination) = pair();
        let source = source.activated_at(EPOCH - 10);
        let destination = destination.deactivated_at(EPOCH - 3);
        assert_eq!(
            can_merge(Some(&snapshot(&source)), Some(&snapshot(&destination)), EPOCH),
            Err(MergeRejection::UnsupportedStates {
                source_state: ActivationState::Active,
                destination_state: ActivationState::Inactive,
            })
        );
    }
}
