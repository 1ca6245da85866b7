//! Pool discovery and aggregation
//!
//! Read-only scan of every stake account delegated to the configured vote
//! account. One undecodable account never aborts a scan: it is logged,
//! counted and skipped.

use crate::metrics::metrics;
use crate::observability::TraceContext;
use crate::rpc::{AccountFilter, ChainRpc, VoteAccountStake};
use crate::stake_state::{
    ActivationResolver, ActivationState, StakeAccountSnapshot, STAKER_OFFSET, STAKE_ACCOUNT_SIZE,
    VOTER_OFFSET,
};
use crate::structured_logging::StructuredLogger;
use crate::tx_builder::{ChainContext, StakeServiceError};
use serde::Serialize;
use solana_sdk::{pubkey::Pubkey, stake};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Label of the bucket collecting unlisted authorities.
pub const OTHER_POOL: &str = "Other";

/// One stake account, as listed for pool display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolAccount {
    #[serde(serialize_with = "crate::stake_state::layout::serialize_pubkey")]
    pub address: Pubkey,
    /// Delegated lamports.
    pub amount_staked: u64,
    #[serde(serialize_with = "crate::stake_state::layout::serialize_pubkey")]
    pub staking_authority: Pubkey,
    #[serde(serialize_with = "crate::stake_state::layout::serialize_pubkey")]
    pub withdraw_authority: Pubkey,
    pub status: ActivationState,
}

impl From<&StakeAccountSnapshot> for PoolAccount {
    fn from(snapshot: &StakeAccountSnapshot) -> Self {
        Self {
            address: snapshot.address,
            amount_staked: snapshot.delegated_lamports(),
            staking_authority: snapshot.meta.authorized_staker,
            withdraw_authority: snapshot.meta.authorized_withdrawer,
            status: snapshot.state(),
        }
    }
}

/// Staking authority with a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownPool {
    pub name: String,
    pub authority: Pubkey,
}

/// Stake summed per staking authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolAggregate {
    pub name: String,
    /// `None` for the "Other" bucket.
    pub staking_authority: Option<String>,
    pub amount_staked: u64,
    pub account_count: usize,
}

/// Group accounts by staking authority.
///
/// Known authorities get their own row, sorted by stake descending and
/// capped at `max_pools`; everything else, including known pools past the
/// cap, is summed into a trailing "Other" row.
pub fn aggregate_by_authority(
    accounts: &[PoolAccount],
    known: &[KnownPool],
    max_pools: usize,
) -> Vec<PoolAggregate> {
    let mut totals: HashMap<Pubkey, (u64, usize)> = HashMap::new();
    for account in accounts {
        let entry = totals.entry(account.staking_authority).or_default();
        entry.0 = entry.0.saturating_add(account.amount_staked);
        entry.1 += 1;
    }

    let mut named: Vec<PoolAggregate> = known
        .iter()
        .filter_map(|pool| {
            totals.remove(&pool.authority).map(|(amount, count)| PoolAggregate {
                name: pool.name.clone(),
                staking_authority: Some(pool.authority.to_string()),
                amount_staked: amount,
                account_count: count,
            })
        })
        .collect();
    named.sort_by(|a, b| b.amount_staked.cmp(&a.amount_staked));

    let overflow = if named.len() > max_pools {
        named.split_off(max_pools)
    } else {
        Vec::new()
    };

    let mut other = PoolAggregate {
        name: OTHER_POOL.to_string(),
        staking_authority: None,
        amount_staked: 0,
        account_count: 0,
    };
    for (amount, count) in totals
        .into_values()
        .chain(overflow.into_iter().map(|p| (p.amount_staked, p.account_count)))
    {
        other.amount_staked = other.amount_staked.saturating_add(amount);
        other.account_count += count;
    }

    if other.account_count > 0 {
        named.push(other);
    }
    named
}

/// Scans the stake program for accounts delegated to one vote account.
pub struct PoolScanner {
    rpc: Arc<dyn ChainRpc>,
    vote_account: Pubkey,
    resolver: ActivationResolver,
}

impl PoolScanner {
    pub fn new(rpc: Arc<dyn ChainRpc>, vote_account: Pubkey, resolver: ActivationResolver) -> Self {
        Self {
            rpc,
            vote_account,
            resolver,
        }
    }

    /// Every decodable stake account delegated to the vote account,
    /// optionally restricted to one staking authority.
    pub async fn list_stake_accounts(
        &self,
        authority: Option<&Pubkey>,
    ) -> Result<Vec<StakeAccountSnapshot>, StakeServiceError> {
        let trace = TraceContext::new("pool_scan");
        let logger = StructuredLogger::for_trace(&trace);
        let ctx = ChainContext::fetch(self.rpc.as_ref(), trace.child_span("load_state")).await?;

        let mut filters = vec![
            AccountFilter::DataSize(STAKE_ACCOUNT_SIZE as u64),
            AccountFilter::memcmp_pubkey(VOTER_OFFSET, &self.vote_account),
        ];
        if let Some(authority) = authority {
            filters.push(AccountFilter::memcmp_pubkey(STAKER_OFFSET, authority));
        }

        let accounts = self
            .rpc
            .get_program_accounts(&stake::program::id(), filters)
            .await?;
        let scanned = accounts.len();

        let snapshots: Vec<StakeAccountSnapshot> = accounts
            .into_iter()
            .filter_map(|(address, account)| {
                match StakeAccountSnapshot::from_account(
                    address,
                    &account,
                    ctx.epoch(),
                    &ctx.stake_history,
                    &self.resolver,
                ) {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        metrics().decode_failures.inc();
                        metrics().scan_accounts_skipped.inc();
                        logger.log_account_skipped(&address, &e.to_string());
                        None
                    }
                }
            })
            .collect();

        debug!(
            vote_account = %self.vote_account,
            scanned,
            decoded = snapshots.len(),
            "Stake account scan complete"
        );
        Ok(snapshots)
    }

    /// Pool listing sorted by delegated stake, largest first.
    pub async fn list_pools(
        &self,
        authority: Option<&Pubkey>,
    ) -> Result<Vec<PoolAccount>, StakeServiceError> {
        let mut pools: Vec<PoolAccount> = self
            .list_stake_accounts(authority)
            .await?
            .iter()
            .map(PoolAccount::from)
            .collect();
        pools.sort_by(|a, b| b.amount_staked.cmp(&a.amount_staked));
        Ok(pools)
    }

    pub async fn aggregate(
        &self,
        known: &[KnownPool],
        max_pools: usize,
    ) -> Result<Vec<PoolAggregate>, StakeServiceError> {
        let pools = self.list_pools(None).await?;
        Ok(aggregate_by_authority(&pools, known, max_pools))
    }

    /// Activated stake of the vote account, current set first, then
    /// delinquent.
    pub async fn validator_total(&self) -> Result<Option<VoteAccountStake>, StakeServiceError> {
        Ok(self.rpc.get_vote_account_stake(&self.vote_account).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(authority: Pubkey, amount: u64) -> PoolAccount {
        PoolAccount {
            address: Pubkey::new_unique(),
            amount_staked: amount,
            staking_authority: authority,
            withdraw_authority: authority,
            status: ActivationState::Active,
        }
    }

    #[test]
    fn test_aggregate_groups_and_buckets() {
        let jito = Pubkey::new_unique();
        let blaze = Pubkey::new_unique();
        let stranger = Pubkey::new_unique();
        let known = vec![
            KnownPool {
                name: "Jito".to_string(),
                authority: jito,
            },
            KnownPool {
                name: "BlazeStake".to_string(),
                authority: blaze,
            },
        ];
        let accounts = vec![
            account(jito, 10),
            account(blaze, 50),
            account(jito, 15),
            account(stranger, 7),
            account(Pubkey::new_unique(), 3),
        ];

        let rows = aggregate_by_authority(&accounts, &known, 10);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].name, "BlazeStake");
        assert_eq!(rows[0].amount_staked, 50);
        assert_eq!(rows[1].name, "Jito");
        assert_eq!(rows[1].amount_staked, 25);
        assert_eq!(rows[1].account_count, 2);
        assert_eq!(rows[2].name, OTHER_POOL);
        assert_eq!(rows[2].amount_staked, 10);
        assert!(rows[2].staking_authority.is_none());
    }

    #[test]
    fn test_aggregate_cap_spills_into_other() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let known = vec![
            KnownPool {
                name: "A".to_string(),
                authority: a,
            },
            KnownPool {
                name: "B".to_string(),
                authority: b,
            },
        ];
        let rows = aggregate_by_authority(&[account(a, 5), account(b, 9)], &known, 1);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "B");
        assert_eq!(rows[1].name, OTHER_POOL);
        assert_eq!(rows[1].amount_staked, 5);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate_by_authority(&[], &[], 10).is_empty());
    }
}
