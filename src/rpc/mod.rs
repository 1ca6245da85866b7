//! Chain RPC access
//!
//! Every component receives an `Arc<dyn ChainRpc>` at construction; there is
//! no global connection. Calls carry a single timeout and are not retried
//! here, callers choose their own retry policy.

use async_trait::async_trait;
use solana_sdk::{
    account::Account, epoch_info::EpochInfo, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};

pub mod rpc_client;
pub mod rpc_errors;

pub use rpc_client::SolanaChainClient;
pub use rpc_errors::ChainRpcError;

/// Server-side filter for program account scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    /// Account data at `offset` starts with `bytes`.
    Memcmp { offset: usize, bytes: Vec<u8> },
    DataSize(u64),
}

impl AccountFilter {
    pub fn memcmp_pubkey(offset: usize, key: &Pubkey) -> Self {
        Self::Memcmp {
            offset,
            bytes: key.to_bytes().to_vec(),
        }
    }

    /// Evaluate the filter locally, as the RPC node would.
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            Self::Memcmp { offset, bytes } => data
                .get(*offset..offset + bytes.len())
                .map(|window| window == bytes.as_slice())
                .unwrap_or(false),
            Self::DataSize(size) => data.len() as u64 == *size,
        }
    }
}

/// Activated stake of one vote account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteAccountStake {
    pub vote_pubkey: Pubkey,
    pub node_pubkey: Option<Pubkey>,
    pub activated_stake: u64,
    pub delinquent: bool,
}

/// Read/submit surface of a chain RPC endpoint.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// `Ok(None)` when the address holds no account.
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, ChainRpcError>;

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, ChainRpcError>;

    async fn get_epoch_info(&self) -> Result<EpochInfo, ChainRpcError>;

    async fn get_latest_blockhash(&self) -> Result<Hash, ChainRpcError>;

    async fn get_minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, ChainRpcError>;

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: Vec<AccountFilter>,
    ) -> Result<Vec<(Pubkey, Account)>, ChainRpcError>;

    /// Looks in the current set first, then the delinquent set.
    async fn get_vote_account_stake(
        &self,
        vote_pubkey: &Pubkey,
    ) -> Result<Option<VoteAccountStake>, ChainRpcError>;

    /// Slot indexes (relative to the epoch start) led by `identity`.
    async fn get_leader_slots(
        &self,
        slot: u64,
        identity: &Pubkey,
    ) -> Result<Vec<u64>, ChainRpcError>;

    /// Send an already signed transaction and wait for confirmation.
    async fn send_and_confirm(&self, transaction: &Transaction)
        -> Result<Signature, ChainRpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memcmp_filter_matching() {
        let key = Pubkey::new_unique();
        let filter = AccountFilter::memcmp_pubkey(4, &key);

        let mut data = vec![0u8; 40];
        assert!(!filter.matches(&data));
        data[4..36].copy_from_slice(key.as_ref());
        assert!(filter.matches(&data));
        // Window past the end never matches.
        assert!(!filter.matches(&data[..20]));
    }

    #[test]
    fn test_data_size_filter() {
        assert!(AccountFilter::DataSize(3).matches(&[1, 2, 3]));
        assert!(!AccountFilter::DataSize(3).matches(&[1, 2]));
    }
}
