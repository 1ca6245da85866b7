//! Pool discovery against the in-memory chain

use solana_sdk::{account::Account, pubkey::Pubkey, stake};
use solstake::pools::{KnownPool, PoolScanner, OTHER_POOL};
use solstake::rpc::VoteAccountStake;
use solstake::stake_state::{
    ActivationResolver, ActivationState, STAKE_ACCOUNT_SIZE, VOTER_OFFSET,
};
use solstake::test_utils::{MockChain, StakeAccountBuilder};
use std::sync::Arc;

const SOL: u64 = 1_000_000_000;
const EPOCH: u64 = 900;

struct Network {
    chain: MockChain,
    vote: Pubkey,
    jito: Pubkey,
    blaze: Pubkey,
}

fn network() -> Network {
    let chain = MockChain::new(EPOCH);
    let vote = Pubkey::new_unique();
    let jito = Pubkey::new_unique();
    let blaze = Pubkey::new_unique();

    let delegated = |authority: Pubkey, stake: u64| {
        StakeAccountBuilder::new()
            .staker(authority)
            .voter(vote)
            .stake(stake)
            .activated_at(EPOCH - 3)
    };
    chain.add_stake_account(&delegated(jito, 4 * SOL));
    chain.add_stake_account(&delegated(jito, 6 * SOL));
    chain.add_stake_account(&delegated(blaze, 20 * SOL));
    chain.add_stake_account(&delegated(Pubkey::new_unique(), SOL).activated_at(EPOCH));

    // Delegated elsewhere.
    chain.add_stake_account(
        &StakeAccountBuilder::new()
            .staker(jito)
            .voter(Pubkey::new_unique())
            .stake(50 * SOL),
    );

    // Right size and voter, unknown state tag.
    let mut data = vec![0u8; STAKE_ACCOUNT_SIZE];
    data[..4].copy_from_slice(&9u32.to_le_bytes());
    data[VOTER_OFFSET..VOTER_OFFSET + 32].copy_from_slice(vote.as_ref());
    chain.insert_account(
        Pubkey::new_unique(),
        Account {
            lamports: SOL,
            data,
            owner: stake::program::id(),
            executable: false,
            rent_epoch: 0,
        },
    );

    Network {
        chain,
        vote,
        jito,
        blaze,
    }
}

fn scanner(net: &Network) -> PoolScanner {
    PoolScanner::new(
        Arc::new(net.chain.clone()),
        net.vote,
        ActivationResolver::default(),
    )
}

#[tokio::test]
async fn test_scan_skips_undecodable_accounts() {
    let net = network();
    let pools = scanner(&net).list_pools(None).await.unwrap();

    assert_eq!(pools.len(), 4);
    let amounts: Vec<u64> = pools.iter().map(|p| p.amount_staked).collect();
    assert_eq!(amounts, vec![20 * SOL, 6 * SOL, 4 * SOL, SOL]);
    assert_eq!(pools[0].staking_authority, net.blaze);
    assert_eq!(pools[3].status, ActivationState::Activating);
}

#[tokio::test]
async fn test_scan_by_authority() {
    let net = network();
    let pools = scanner(&net).list_pools(Some(&net.jito)).await.unwrap();

    assert_eq!(pools.len(), 2);
    assert!(pools.iter().all(|p| p.staking_authority == net.jito));
    assert!(pools.iter().all(|p| p.status == ActivationState::Active));
}

#[tokio::test]
async fn test_aggregate_named_and_other() {
    let net = network();
    let known = vec![
        KnownPool {
            name: "Jito".to_string(),
            authority: net.jito,
        },
        KnownPool {
            name: "BlazeStake".to_string(),
            authority: net.blaze,
        },
    ];

    let rows = scanner(&net).aggregate(&known, 10).await.unwrap();
    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["BlazeStake", "Jito", OTHER_POOL]);
    assert_eq!(rows[1].amount_staked, 10 * SOL);
    assert_eq!(rows[1].account_count, 2);
    assert_eq!(rows[2].amount_staked, SOL);

    let json = serde_json::to_value(&rows[0]).unwrap();
    assert_eq!(json["amountStaked"], 20 * SOL);
    assert_eq!(json["stakingAuthority"], net.blaze.to_string());
}

#[tokio::test]
async fn test_validator_total() {
    let net = network();
    let scanner = scanner(&net);
    assert_eq!(scanner.validator_total().await.unwrap(), None);

    net.chain.add_vote_account(VoteAccountStake {
        vote_pubkey: net.vote,
        node_pubkey: Some(Pubkey::new_unique()),
        activated_stake: 31 * SOL,
        delinquent: true,
    });
    let total = scanner.validator_total().await.unwrap().unwrap();
    assert_eq!(total.activated_stake, 31 * SOL);
    assert!(total.delinquent);
}
