//! Test Utilities Module
//!
//! In-memory chain and stake account fixtures for deterministic tests.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::rpc::{AccountFilter, ChainRpc, ChainRpcError, VoteAccountStake};
use crate::stake_state::{
    encode_account_state, AccountState, ActivationResolver, Delegation, Lockup, StakeAccountSnapshot,
    StakeHistory, StakeMeta,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    account::Account, clock::Epoch, epoch_info::EpochInfo, hash::Hash, pubkey::Pubkey,
    signature::Signature, stake, sysvar, transaction::Transaction,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Rent-exempt minimum of a 200-byte account at current rent parameters.
pub const STAKE_RENT_RESERVE: u64 = 2_282_880;

/// Builder for encoded stake accounts.
///
/// Defaults to a 5 SOL delegation activated at epoch 0 with random
/// authorities and voter.
#[derive(Debug, Clone)]
pub struct StakeAccountBuilder {
    pub staker: Pubkey,
    pub withdrawer: Pubkey,
    pub voter: Pubkey,
    pub rent_exempt_reserve: u64,
    pub stake: u64,
    pub activation_epoch: Epoch,
    pub deactivation_epoch: Option<Epoch>,
    pub credits_observed: u64,
    pub lockup: Lockup,
    lamports: Option<u64>,
    delegated: bool,
}

impl StakeAccountBuilder {
    pub fn new() -> Self {
        Self {
            staker: Pubkey::new_unique(),
            withdrawer: Pubkey::new_unique(),
            voter: Pubkey::new_unique(),
            rent_exempt_reserve: STAKE_RENT_RESERVE,
            stake: 5_000_000_000,
            activation_epoch: 0,
            deactivation_epoch: None,
            credits_observed: 0,
            lockup: Lockup::default(),
            lamports: None,
            delegated: true,
        }
    }

    /// Same authorities, lockup, voter and delegation; mergeable by default.
    pub fn sibling(&self) -> Self {
        self.clone()
    }

    /// Staker and withdrawer both set to `wallet`.
    pub fn owned_by(mut self, wallet: Pubkey) -> Self {
        self.staker = wallet;
        self.withdrawer = wallet;
        self
    }

    pub fn staker(mut self, staker: Pubkey) -> Self {
        self.staker = staker;
        self
    }

    pub fn withdrawer(mut self, withdrawer: Pubkey) -> Self {
        self.withdrawer = withdrawer;
        self
    }

    pub fn voter(mut self, voter: Pubkey) -> Self {
        self.voter = voter;
        self
    }

    pub fn stake(mut self, lamports: u64) -> Self {
        self.stake = lamports;
        self
    }

    /// Total account balance; defaults to stake plus reserve.
    pub fn lamports(mut self, lamports: u64) -> Self {
        self.lamports = Some(lamports);
        self
    }

    pub fn activated_at(mut self, epoch: Epoch) -> Self {
        self.activation_epoch = epoch;
        self
    }

    pub fn deactivated_at(mut self, epoch: Epoch) -> Self {
        self.deactivation_epoch = Some(epoch);
        self
    }

    pub fn credits(mut self, credits: u64) -> Self {
        self.credits_observed = credits;
        self
    }

    pub fn lockup_epoch(mut self, epoch: Epoch) -> Self {
        self.lockup.epoch = epoch;
        self
    }

    /// Authorized but never delegated.
    pub fn initialized_only(mut self) -> Self {
        self.delegated = false;
        self
    }

    pub fn total_lamports(&self) -> u64 {
        self.lamports
            .unwrap_or(self.stake + self.rent_exempt_reserve)
    }

    pub fn state(&self) -> AccountState {
        let meta = StakeMeta {
            rent_exempt_reserve: self.rent_exempt_reserve,
            authorized_staker: self.staker,
            authorized_withdrawer: self.withdrawer,
            lockup: self.lockup,
        };
        if !self.delegated {
            return AccountState::Initialized(meta);
        }
        AccountState::Stake(
            meta,
            Delegation {
                voter_pubkey: self.voter,
                stake_lamports: self.stake,
                activation_epoch: self.activation_epoch,
                deactivation_epoch: self.deactivation_epoch,
                credits_observed: self.credits_observed,
            },
        )
    }

    pub fn build(&self) -> Account {
        Account {
            lamports: self.total_lamports(),
            data: encode_account_state(&self.state()),
            owner: stake::program::id(),
            executable: false,
            rent_epoch: 0,
        }
    }

    /// Snapshot at `epoch` against an empty stake history.
    pub fn snapshot(&self, address: Pubkey, epoch: Epoch) -> StakeAccountSnapshot {
        StakeAccountSnapshot::from_account(
            address,
            &self.build(),
            epoch,
            &StakeHistory::new(),
            &ActivationResolver::default(),
        )
        .expect("builder produces decodable accounts")
    }
}

impl Default for StakeAccountBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct MockChainState {
    accounts: HashMap<Pubkey, Account>,
    balances: HashMap<Pubkey, u64>,
    vote_accounts: HashMap<Pubkey, VoteAccountStake>,
    leader_slots: HashMap<Pubkey, Vec<u64>>,
    failing: HashMap<&'static str, ChainRpcError>,
    submitted: Vec<Transaction>,
    calls: Vec<&'static str>,
}

/// In-memory `ChainRpc`.
///
/// Every call is recorded by its JSON-RPC method name, so tests can assert
/// that a rejected request never reached the network.
#[derive(Debug, Clone)]
pub struct MockChain {
    state: Arc<Mutex<MockChainState>>,
    epoch_info: EpochInfo,
    rent_exempt_minimum: u64,
    blockhash: Hash,
}

impl MockChain {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockChainState::default())),
            epoch_info: EpochInfo {
                epoch,
                slot_index: 1_000,
                slots_in_epoch: 432_000,
                absolute_slot: epoch * 432_000 + 1_000,
                block_height: epoch * 400_000,
                transaction_count: None,
            },
            rent_exempt_minimum: STAKE_RENT_RESERVE,
            blockhash: Hash::new_unique(),
        }
    }

    pub fn blockhash(&self) -> Hash {
        self.blockhash
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch_info.epoch
    }

    pub fn with_rent_exempt_minimum(mut self, lamports: u64) -> Self {
        self.rent_exempt_minimum = lamports;
        self
    }

    pub fn with_stake_history(self, history: &StakeHistory) -> Self {
        self.insert_account(
            sysvar::stake_history::id(),
            Account {
                lamports: 1,
                data: history.to_sysvar_data(),
                owner: sysvar::id(),
                executable: false,
                rent_epoch: 0,
            },
        );
        self
    }

    pub fn insert_account(&self, address: Pubkey, account: Account) {
        self.state.lock().accounts.insert(address, account);
    }

    /// Insert a stake account and return its address.
    pub fn add_stake_account(&self, builder: &StakeAccountBuilder) -> Pubkey {
        let address = Pubkey::new_unique();
        self.insert_account(address, builder.build());
        address
    }

    pub fn set_balance(&self, address: Pubkey, lamports: u64) {
        self.state.lock().balances.insert(address, lamports);
    }

    pub fn add_vote_account(&self, vote: VoteAccountStake) {
        self.state.lock().vote_accounts.insert(vote.vote_pubkey, vote);
    }

    pub fn set_leader_slots(&self, identity: Pubkey, slots: Vec<u64>) {
        self.state.lock().leader_slots.insert(identity, slots);
    }

    /// Make every call to `operation` fail with `error`.
    pub fn fail(&self, operation: &'static str, error: ChainRpcError) {
        self.state.lock().failing.insert(operation, error);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == operation).count()
    }

    pub fn submitted(&self) -> Vec<Transaction> {
        self.state.lock().submitted.clone()
    }

    fn record(&self, operation: &'static str) -> Result<(), ChainRpcError> {
        let mut state = self.state.lock();
        state.calls.push(operation);
        match state.failing.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, ChainRpcError> {
        self.record("getAccountInfo")?;
        Ok(self.state.lock().accounts.get(address).cloned())
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, ChainRpcError> {
        self.record("getBalance")?;
        let state = self.state.lock();
        Ok(state
            .balances
            .get(address)
            .copied()
            .or_else(|| state.accounts.get(address).map(|a| a.lamports))
            .unwrap_or(0))
    }

    async fn get_epoch_info(&self) -> Result<EpochInfo, ChainRpcError> {
        self.record("getEpochInfo")?;
        Ok(self.epoch_info.clone())
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, ChainRpcError> {
        self.record("getLatestBlockhash")?;
        Ok(self.blockhash)
    }

    async fn get_minimum_balance_for_rent_exemption(
        &self,
        _data_len: usize,
    ) -> Result<u64, ChainRpcError> {
        self.record("getMinimumBalanceForRentExemption")?;
        Ok(self.rent_exempt_minimum)
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: Vec<AccountFilter>,
    ) -> Result<Vec<(Pubkey, Account)>, ChainRpcError> {
        self.record("getProgramAccounts")?;
        let state = self.state.lock();
        Ok(state
            .accounts
            .iter()
            .filter(|(_, account)| account.owner == *program_id)
            .filter(|(_, account)| filters.iter().all(|f| f.matches(&account.data)))
            .map(|(address, account)| (*address, account.clone()))
            .collect())
    }

    async fn get_vote_account_stake(
        &self,
        vote_pubkey: &Pubkey,
    ) -> Result<Option<VoteAccountStake>, ChainRpcError> {
        self.record("getVoteAccounts")?;
        Ok(self.state.lock().vote_accounts.get(vote_pubkey).cloned())
    }

    async fn get_leader_slots(
        &self,
        _slot: u64,
        identity: &Pubkey,
    ) -> Result<Vec<u64>, ChainRpcError> {
        self.record("getLeaderSchedule")?;
        Ok(self
            .state
            .lock()
            .leader_slots
            .get(identity)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_and_confirm(
        &self,
        transaction: &Transaction,
    ) -> Result<Signature, ChainRpcError> {
        self.record("sendTransaction")?;
        let signature = transaction.signatures.first().copied().unwrap_or_default();
        self.state.lock().submitted.push(transaction.clone());
        Ok(signature)
    }
}

/// Distinct addresses in a list; used to assert generated keys never collide.
pub fn distinct(keys: &[Pubkey]) -> bool {
    keys.iter().collect::<HashSet<_>>().len() == keys.len()
}
