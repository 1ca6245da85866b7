//! Per-request chain context
//!
//! Each operation reads the epoch and the stake history once, then resolves
//! every account it touches against that same view. Nothing here outlives
//! the request.

use crate::metrics::metrics;
use crate::observability::TraceContext;
use crate::rpc::ChainRpc;
use crate::stake_state::{ActivationResolver, StakeAccountSnapshot, StakeHistory};
use crate::structured_logging::StructuredLogger;
use crate::tx_builder::errors::StakeServiceError;
use solana_sdk::{clock::Epoch, epoch_info::EpochInfo, pubkey::Pubkey, sysvar};
use tracing::{error, warn};

/// Chain view shared by all reads of one request.
#[derive(Debug, Clone)]
pub struct ChainContext {
    pub epoch_info: EpochInfo,
    pub stake_history: StakeHistory,
    pub trace_context: TraceContext,
}

impl ChainContext {
    /// Fetch the current epoch and the stake history sysvar.
    ///
    /// A missing sysvar yields an empty history, which only affects the
    /// split of a deactivating account (it then stays fully active for the
    /// epoch). Undecodable sysvar bytes are an error.
    pub async fn fetch(
        rpc: &dyn ChainRpc,
        trace_context: TraceContext,
    ) -> Result<Self, StakeServiceError> {
        let epoch_info = rpc.get_epoch_info().await?;
        let stake_history = match rpc.get_account(&sysvar::stake_history::id()).await? {
            Some(account) => StakeHistory::from_sysvar_data(&account.data)
                .map_err(|e| StakeServiceError::decode(sysvar::stake_history::id(), e))?,
            None => {
                warn!(
                    trace_id = %trace_context.trace_id(),
                    "Stake history sysvar unavailable, resolving with empty history"
                );
                StakeHistory::new()
            }
        };

        Ok(Self {
            epoch_info,
            stake_history,
            trace_context,
        })
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch_info.epoch
    }

    pub fn logger(&self) -> StructuredLogger {
        StructuredLogger::for_trace(&self.trace_context)
    }

    /// Read and resolve one stake account.
    pub async fn load_snapshot(
        &self,
        rpc: &dyn ChainRpc,
        address: &Pubkey,
        resolver: &ActivationResolver,
    ) -> Result<StakeAccountSnapshot, StakeServiceError> {
        self.try_load_snapshot(rpc, address, resolver)
            .await?
            .ok_or(StakeServiceError::AccountNotFound(*address))
    }

    /// Like `load_snapshot`, but a missing account is `Ok(None)`.
    pub async fn try_load_snapshot(
        &self,
        rpc: &dyn ChainRpc,
        address: &Pubkey,
        resolver: &ActivationResolver,
    ) -> Result<Option<StakeAccountSnapshot>, StakeServiceError> {
        let Some(account) = rpc.get_account(address).await? else {
            return Ok(None);
        };

        let snapshot = StakeAccountSnapshot::from_account(
            *address,
            &account,
            self.epoch(),
            &self.stake_history,
            resolver,
        )
        .map_err(|e| {
            metrics().decode_failures.inc();
            error!(
                trace_id = %self.trace_context.trace_id(),
                address = %address,
                error = %e,
                "Stake account failed to decode"
            );
            StakeServiceError::decode(*address, e)
        })?;

        self.logger()
            .log_snapshot_resolved(address, self.epoch(), &snapshot.status);
        Ok(Some(snapshot))
    }
}
