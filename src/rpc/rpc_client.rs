//! `ChainRpc` backed by the nonblocking Solana RPC client.

use super::{AccountFilter, ChainRpc, ChainRpcError, VoteAccountStake};
use crate::metrics::{metrics, Timer};
use async_trait::async_trait;
use solana_account_decoder::UiAccountEncoding;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{
    RpcAccountInfoConfig, RpcLeaderScheduleConfig, RpcProgramAccountsConfig,
};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_client::rpc_response::RpcVoteAccountInfo;
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, epoch_info::EpochInfo, hash::Hash,
    pubkey::Pubkey, signature::Signature, transaction::Transaction,
};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Confirmation polls can legitimately outlast a plain request.
const MIN_CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SolanaChainClient {
    client: RpcClient,
    commitment: CommitmentConfig,
    timeout: Duration,
}

impl SolanaChainClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, commitment: CommitmentConfig) -> Self {
        let endpoint = endpoint.into();
        debug!(endpoint = %endpoint, timeout_ms = timeout.as_millis() as u64, "Creating RPC client");
        Self {
            client: RpcClient::new_with_timeout_and_commitment(endpoint, timeout, commitment),
            commitment,
            timeout,
        }
    }

    pub fn endpoint(&self) -> String {
        self.client.url()
    }

    /// Run one RPC call under `limit`, recording its latency.
    async fn timed<T, F>(
        &self,
        operation: &'static str,
        limit: Duration,
        call: F,
    ) -> Result<T, ChainRpcError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let timer = Timer::new();
        let timeout_ms = limit.as_millis() as u64;
        let outcome = tokio::time::timeout(limit, call).await;
        timer.observe_duration(&metrics().rpc_latency);

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                let err = ChainRpcError::from_client_error(err, operation, timeout_ms);
                warn!(operation, error = %err, "RPC call failed");
                Err(err)
            }
            Err(_) => {
                warn!(operation, timeout_ms, "RPC call timed out");
                Err(ChainRpcError::timeout(operation, timeout_ms))
            }
        }
    }

    fn to_rpc_filter(filter: AccountFilter) -> RpcFilterType {
        match filter {
            AccountFilter::Memcmp { offset, bytes } => {
                RpcFilterType::Memcmp(Memcmp::new_raw_bytes(offset, bytes))
            }
            AccountFilter::DataSize(size) => RpcFilterType::DataSize(size),
        }
    }

    fn vote_stake(
        info: &RpcVoteAccountInfo,
        delinquent: bool,
    ) -> Result<VoteAccountStake, ChainRpcError> {
        let vote_pubkey = Pubkey::from_str(&info.vote_pubkey).map_err(|e| {
            ChainRpcError::invalid_response("getVoteAccounts", format!("vote pubkey: {e}"))
        })?;
        Ok(VoteAccountStake {
            vote_pubkey,
            node_pubkey: Pubkey::from_str(&info.node_pubkey).ok(),
            activated_stake: info.activated_stake,
            delinquent,
        })
    }
}

#[async_trait]
impl ChainRpc for SolanaChainClient {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, ChainRpcError> {
        let response = self
            .timed(
                "getAccountInfo",
                self.timeout,
                self.client.get_account_with_commitment(address, self.commitment),
            )
            .await?;
        Ok(response.value)
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, ChainRpcError> {
        self.timed("getBalance", self.timeout, self.client.get_balance(address))
            .await
    }

    async fn get_epoch_info(&self) -> Result<EpochInfo, ChainRpcError> {
        self.timed("getEpochInfo", self.timeout, self.client.get_epoch_info())
            .await
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, ChainRpcError> {
        self.timed(
            "getLatestBlockhash",
            self.timeout,
            self.client.get_latest_blockhash(),
        )
        .await
    }

    async fn get_minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, ChainRpcError> {
        self.timed(
            "getMinimumBalanceForRentExemption",
            self.timeout,
            self.client.get_minimum_balance_for_rent_exemption(data_len),
        )
        .await
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: Vec<AccountFilter>,
    ) -> Result<Vec<(Pubkey, Account)>, ChainRpcError> {
        let config = RpcProgramAccountsConfig {
            filters: Some(filters.into_iter().map(Self::to_rpc_filter).collect()),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(self.commitment),
                ..RpcAccountInfoConfig::default()
            },
            ..RpcProgramAccountsConfig::default()
        };
        self.timed(
            "getProgramAccounts",
            self.timeout,
            self.client.get_program_accounts_with_config(program_id, config),
        )
        .await
    }

    async fn get_vote_account_stake(
        &self,
        vote_pubkey: &Pubkey,
    ) -> Result<Option<VoteAccountStake>, ChainRpcError> {
        let status = self
            .timed("getVoteAccounts", self.timeout, self.client.get_vote_accounts())
            .await?;
        let wanted = vote_pubkey.to_string();

        if let Some(info) = status.current.iter().find(|v| v.vote_pubkey == wanted) {
            return Self::vote_stake(info, false).map(Some);
        }
        match status.delinquent.iter().find(|v| v.vote_pubkey == wanted) {
            Some(info) => Self::vote_stake(info, true).map(Some),
            None => Ok(None),
        }
    }

    async fn get_leader_slots(
        &self,
        slot: u64,
        identity: &Pubkey,
    ) -> Result<Vec<u64>, ChainRpcError> {
        let config = RpcLeaderScheduleConfig {
            identity: Some(identity.to_string()),
            commitment: Some(self.commitment),
        };
        let schedule = self
            .timed(
                "getLeaderSchedule",
                self.timeout,
                self.client.get_leader_schedule_with_config(Some(slot), config),
            )
            .await?;

        Ok(schedule
            .and_then(|mut by_identity| by_identity.remove(&identity.to_string()))
            .map(|slots| slots.into_iter().map(|s| s as u64).collect())
            .unwrap_or_default())
    }

    async fn send_and_confirm(
        &self,
        transaction: &Transaction,
    ) -> Result<Signature, ChainRpcError> {
        self.timed(
            "sendTransaction",
            self.timeout.max(MIN_CONFIRM_TIMEOUT),
            self.client.send_and_confirm_transaction(transaction),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_conversion() {
        let key = Pubkey::new_unique();
        match SolanaChainClient::to_rpc_filter(AccountFilter::memcmp_pubkey(12, &key)) {
            RpcFilterType::Memcmp(memcmp) => {
                assert_eq!(memcmp.offset(), 12);
                assert!(memcmp.bytes_match(&{
                    let mut data = vec![0u8; 44];
                    data[12..44].copy_from_slice(key.as_ref());
                    data
                }));
            }
            other => panic!("unexpected filter {other:?}"),
        }
        assert_eq!(
            SolanaChainClient::to_rpc_filter(AccountFilter::DataSize(200)),
            RpcFilterType::DataSize(200)
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_or_timeout() {
        let client = SolanaChainClient::new(
            "http://127.0.0.1:9",
            Duration::from_millis(500),
            CommitmentConfig::confirmed(),
        );
        let err = client.get_epoch_info().await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
        assert_eq!(err.operation(), "getEpochInfo");
    }
}
