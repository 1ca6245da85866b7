//! Structured events for the stake account lifecycle

use crate::observability::TraceContext;
use crate::stake_state::ActivationStatus;
use solana_sdk::pubkey::Pubkey;

/// Emits one structured event per lifecycle step, tagged with the request's
/// correlation id.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context_id: String,
    operation: String,
}

impl StructuredLogger {
    pub fn new(context_id: String, operation: &str) -> Self {
        Self {
            context_id,
            operation: operation.to_string(),
        }
    }

    pub fn for_trace(trace: &TraceContext) -> Self {
        Self::new(trace.correlation_id().to_string(), &trace.operation)
    }

    pub fn log_operation_requested(&self, wallet: &Pubkey, lamports: Option<u64>) {
        tracing::info!(
            context_id = %self.context_id,
            operation = %self.operation,
            wallet = %wallet,
            lamports = ?lamports,
            "Stake operation requested"
        );
    }

    pub fn log_snapshot_resolved(&self, address: &Pubkey, epoch: u64, status: &ActivationStatus) {
        tracing::debug!(
            context_id = %self.context_id,
            address = %address,
            epoch = %epoch,
            state = %status.state,
            active = %status.active_lamports,
            inactive = %status.inactive_lamports,
            "Stake account resolved"
        );
    }

    pub fn log_transaction_prepared(
        &self,
        instruction_count: usize,
        generated: &[Pubkey],
        latency_ms: u64,
    ) {
        tracing::info!(
            context_id = %self.context_id,
            operation = %self.operation,
            instruction_count = %instruction_count,
            generated_accounts = ?generated,
            latency_ms = %latency_ms,
            "Unsigned transaction prepared"
        );
    }

    pub fn log_operation_rejected(&self, kind: &str, reason: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            operation = %self.operation,
            kind = %kind,
            reason = %reason,
            "Stake operation rejected"
        );
    }

    pub fn log_transaction_submitted(&self, signature: &str) {
        tracing::info!(
            context_id = %self.context_id,
            signature = %signature,
            "Signed transaction confirmed"
        );
    }

    pub fn log_account_skipped(&self, address: &Pubkey, error: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            address = %address,
            error = %error,
            "Skipping undecodable stake account"
        );
    }

    pub fn log_retry(&self, attempt: u32, error: &str) {
        tracing::debug!(
            context_id = %self.context_id,
            operation = %self.operation,
            attempt = %attempt,
            error = %error,
            "Retrying request"
        );
    }
}
