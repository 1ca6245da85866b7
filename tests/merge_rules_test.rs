//! Merge requests through the service boundary

use solana_sdk::pubkey::Pubkey;
use solstake::stake_state::{
    can_merge, ActivationResolver, MergeRejection, MergeRole, StakeHistory, StakeHistoryEntry,
};
use solstake::test_utils::{MockChain, StakeAccountBuilder};
use solstake::tx_builder::{ErrorKind, StakeService, StakingSettings};
use std::sync::Arc;

const EPOCH: u64 = 800;

struct Fixture {
    chain: MockChain,
    svc: StakeService,
    wallet: Pubkey,
    vote: Pubkey,
}

fn fixture() -> Fixture {
    let chain = MockChain::new(EPOCH);
    let vote = Pubkey::new_unique();
    let svc = StakeService::new(
        Arc::new(chain.clone()),
        vote,
        ActivationResolver::default(),
        StakingSettings::default(),
    );
    Fixture {
        chain,
        svc,
        wallet: Pubkey::new_unique(),
        vote,
    }
}

impl Fixture {
    fn active(&self) -> StakeAccountBuilder {
        StakeAccountBuilder::new()
            .owned_by(self.wallet)
            .voter(self.vote)
            .activated_at(EPOCH - 20)
            .credits(42)
    }

    async fn merge(&self, source: &Pubkey, destination: &Pubkey) -> solstake::BuildResponse {
        self.svc
            .prepare_merge(
                &self.wallet.to_string(),
                &source.to_string(),
                &destination.to_string(),
            )
            .await
    }
}

#[tokio::test]
async fn test_active_siblings_merge() {
    let f = fixture();
    let base = f.active();
    let source = f.chain.add_stake_account(&base);
    let destination = f.chain.add_stake_account(&base.sibling().stake(9_000_000_000));

    let response = f.merge(&source, &destination).await;
    assert!(response.success, "{:?}", response.error);
    assert!(response.generated_keypair_public_keys.is_empty());
}

#[tokio::test]
async fn test_inactive_into_activating_destination() {
    let f = fixture();
    let source = f
        .chain
        .add_stake_account(&f.active().deactivated_at(EPOCH - 5));
    let destination = f.chain.add_stake_account(&f.active().activated_at(EPOCH));

    assert!(f.merge(&source, &destination).await.success);

    // The reverse direction asks for a swap.
    let response = f.merge(&destination, &source).await;
    assert_eq!(response.error_kind, Some(ErrorKind::MergeIneligible));
    assert!(response
        .error
        .unwrap()
        .contains("select the activating stake as the destination"));
}

#[tokio::test]
async fn test_authority_and_credit_mismatches() {
    let f = fixture();
    let source = f.chain.add_stake_account(&f.active());

    let other_staker = f
        .chain
        .add_stake_account(&f.active().staker(Pubkey::new_unique()));
    let response = f.merge(&source, &other_staker).await;
    assert_eq!(response.error_kind, Some(ErrorKind::MergeIneligible));
    assert!(response.error.unwrap().contains("authorized staker"));

    let other_credits = f.chain.add_stake_account(&f.active().credits(43));
    let response = f.merge(&source, &other_credits).await;
    assert!(response.error.unwrap().contains("vote credits"));

    let other_vote = f
        .chain
        .add_stake_account(&f.active().voter(Pubkey::new_unique()));
    let response = f.merge(&source, &other_vote).await;
    assert!(response.error.unwrap().contains("different vote account"));
}

#[tokio::test]
async fn test_missing_and_identical_accounts() {
    let f = fixture();
    let source = f.chain.add_stake_account(&f.active());

    let missing = Pubkey::new_unique();
    let response = f.merge(&source, &missing).await;
    assert_eq!(response.error_kind, Some(ErrorKind::AccountNotFound));
    assert!(response.error.unwrap().contains(&missing.to_string()));

    let response = f.merge(&missing, &source).await;
    assert_eq!(response.error_kind, Some(ErrorKind::AccountNotFound));

    let before = f.chain.calls().len();
    let response = f.merge(&source, &source).await;
    assert_eq!(response.error_kind, Some(ErrorKind::InvalidInput));
    assert_eq!(f.chain.calls().len(), before);
}

#[tokio::test]
async fn test_wallet_must_be_staker() {
    let f = fixture();
    let owner = Pubkey::new_unique();
    let base = f.active().owned_by(owner);
    let source = f.chain.add_stake_account(&base);
    let destination = f.chain.add_stake_account(&base.sibling());

    let response = f.merge(&source, &destination).await;
    assert_eq!(response.error_kind, Some(ErrorKind::InvalidInput));
}

#[test]
fn test_deactivating_account_is_transient() {
    let base = StakeAccountBuilder::new().activated_at(EPOCH - 20);
    let source = base.snapshot(Pubkey::new_unique(), EPOCH);
    // No stake history: a deactivating account keeps its full stake active.
    let destination = base
        .sibling()
        .deactivated_at(EPOCH)
        .snapshot(Pubkey::new_unique(), EPOCH);

    assert_eq!(
        can_merge(Some(&source), Some(&destination), EPOCH),
        Err(MergeRejection::TransientState(MergeRole::Destination))
    );
}

#[tokio::test]
async fn test_freshly_deactivated_stake_cannot_merge() {
    let f = fixture();
    let mut history = StakeHistory::new();
    for epoch in EPOCH - 10..=EPOCH {
        history.insert(
            epoch,
            StakeHistoryEntry::with_deactivating(1_000_000_000_000, 40_000_000_000),
        );
    }
    let chain = f.chain.clone().with_stake_history(&history);

    let cooling = chain.add_stake_account(&f.active().deactivated_at(EPOCH));
    let cooled = chain.add_stake_account(&f.active().deactivated_at(EPOCH - 30));

    let response = f.merge(&cooling, &cooled).await;
    assert_eq!(response.error_kind, Some(ErrorKind::MergeIneligible));
    assert!(response
        .error
        .unwrap()
        .contains("source stake is partially activating or deactivating"));
    assert!(chain.submitted().is_empty());
}
