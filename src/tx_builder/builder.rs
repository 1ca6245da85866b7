//! Stake service: reads fresh chain state and prepares unsigned transactions
//!
//! Every `prepare_*` method returns a `BuildResponse` and never an error;
//! the matching `build_*` method carries the typed error for callers that
//! want it. The only keys the service ever signs with are the ones it
//! generates for new stake accounts.

use crate::metrics::{metrics, Timer};
use crate::observability::TraceContext;
use crate::rpc::ChainRpc;
use crate::stake_state::{
    can_merge, ActivationResolver, ActivationState, MergeRejection, MergeRole,
    StakeAccountSnapshot, StakeAccountSummary, WithdrawPolicy, STAKE_ACCOUNT_SIZE,
};
use crate::structured_logging::StructuredLogger;
use crate::tx_builder::context::ChainContext;
use crate::tx_builder::errors::StakeServiceError;
use crate::tx_builder::instructions::{
    plan_deactivate, plan_merge, plan_stake, plan_withdraw, remaining_stake_after_deactivation,
    sanity_check_ix_order, InstructionPlan, SplitPlan,
};
use crate::tx_builder::output::{
    decode_transaction, missing_signers, BuildResponse, SubmitResponse, TxBuildOutput,
};
use solana_sdk::{
    message::Message,
    native_token::{lamports_to_sol, LAMPORTS_PER_SOL},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::Transaction,
};
use std::str::FromStr;
use std::sync::Arc;

/// Smallest stake above the rent-exempt reserve the service will create.
pub const DEFAULT_DUST_FLOOR_LAMPORTS: u64 = 1_000_000;

/// Business-rule knobs of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakingSettings {
    pub dust_floor_lamports: u64,
    /// Withdraw the whole balance, reserve included, of a fully inactive
    /// account, closing it.
    pub close_inactive_accounts: bool,
    pub withdraw_policy: WithdrawPolicy,
}

impl Default for StakingSettings {
    fn default() -> Self {
        Self {
            dust_floor_lamports: DEFAULT_DUST_FLOOR_LAMPORTS,
            close_inactive_accounts: false,
            withdraw_policy: WithdrawPolicy::default(),
        }
    }
}

pub fn parse_pubkey(value: &str, what: &str) -> Result<Pubkey, StakeServiceError> {
    Pubkey::from_str(value.trim())
        .map_err(|e| StakeServiceError::invalid_input(format!("invalid {what} address {value:?}: {e}")))
}

/// Largest amount accepted from user input, in SOL.
pub const MAX_INPUT_SOL: f64 = 1_000_000.0;

/// Parse a user-entered SOL amount into lamports, rounding down.
pub fn parse_sol_amount(value: &str) -> Result<u64, StakeServiceError> {
    let sol: f64 = value
        .trim()
        .parse()
        .map_err(|_| StakeServiceError::invalid_input(format!("invalid SOL amount {value:?}")))?;
    if !sol.is_finite() || sol <= 0.0 || sol > MAX_INPUT_SOL {
        return Err(StakeServiceError::invalid_input(format!(
            "SOL amount must be greater than 0 and at most {MAX_INPUT_SOL}"
        )));
    }
    Ok((sol * LAMPORTS_PER_SOL as f64).floor() as u64)
}

pub struct StakeService {
    rpc: Arc<dyn ChainRpc>,
    vote_account: Pubkey,
    resolver: ActivationResolver,
    settings: StakingSettings,
}

impl StakeService {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        vote_account: Pubkey,
        resolver: ActivationResolver,
        settings: StakingSettings,
    ) -> Self {
        Self {
            rpc,
            vote_account,
            resolver,
            settings,
        }
    }

    pub fn vote_account(&self) -> &Pubkey {
        &self.vote_account
    }

    pub fn settings(&self) -> &StakingSettings {
        &self.settings
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    // ---- prepare boundary ----

    pub async fn prepare_stake(&self, wallet: &str, lamports: u64) -> BuildResponse {
        let trace = TraceContext::new("stake");
        let result = match parse_pubkey(wallet, "wallet") {
            Ok(wallet) => self.build_stake(&wallet, lamports, &trace).await,
            Err(e) => Err(e),
        };
        self.respond(&trace, result)
    }

    pub async fn prepare_deactivate(
        &self,
        wallet: &str,
        stake_account: &str,
        lamports: u64,
    ) -> BuildResponse {
        let trace = TraceContext::new("deactivate");
        let result = match (
            parse_pubkey(wallet, "wallet"),
            parse_pubkey(stake_account, "stake account"),
        ) {
            (Ok(wallet), Ok(account)) => {
                self.build_deactivate(&wallet, &account, lamports, &trace)
                    .await
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        self.respond(&trace, result)
    }

    pub async fn prepare_withdraw(&self, wallet: &str, stake_account: &str) -> BuildResponse {
        let trace = TraceContext::new("withdraw");
        let result = match (
            parse_pubkey(wallet, "wallet"),
            parse_pubkey(stake_account, "stake account"),
        ) {
            (Ok(wallet), Ok(account)) => self.build_withdraw(&wallet, &account, &trace).await,
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        self.respond(&trace, result)
    }

    pub async fn prepare_merge(
        &self,
        wallet: &str,
        source: &str,
        destination: &str,
    ) -> BuildResponse {
        let trace = TraceContext::new("merge");
        let result = match (
            parse_pubkey(wallet, "wallet"),
            parse_pubkey(source, "source stake account"),
            parse_pubkey(destination, "destination stake account"),
        ) {
            (Ok(wallet), Ok(source), Ok(destination)) => {
                self.build_merge(&wallet, &source, &destination, &trace)
                    .await
            }
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => Err(e),
        };
        self.respond(&trace, result)
    }

    pub async fn submit_signed_transaction(&self, encoded: &str) -> SubmitResponse {
        let trace = TraceContext::new("submit");
        let logger = StructuredLogger::for_trace(&trace);
        let result = self.submit(encoded).await;
        match &result {
            Ok(signature) => {
                metrics().transactions_submitted.inc();
                logger.log_transaction_submitted(&signature.to_string());
            }
            Err(err) => logger.log_operation_rejected(err.category(), &err.to_string()),
        }
        result.into()
    }

    fn respond(
        &self,
        trace: &TraceContext,
        result: Result<TxBuildOutput, StakeServiceError>,
    ) -> BuildResponse {
        if let Err(err) = &result {
            metrics().transactions_rejected.inc();
            StructuredLogger::for_trace(trace)
                .log_operation_rejected(err.category(), &err.to_string());
        }
        result.into()
    }

    // ---- typed operations ----

    /// Create a new stake account with `lamports` and delegate it to the
    /// configured vote account.
    pub async fn build_stake(
        &self,
        wallet: &Pubkey,
        lamports: u64,
        trace: &TraceContext,
    ) -> Result<TxBuildOutput, StakeServiceError> {
        let timer = Timer::new();
        let logger = StructuredLogger::for_trace(trace);
        logger.log_operation_requested(wallet, Some(lamports));

        // Checked before any network round trip.
        if lamports < self.settings.dust_floor_lamports {
            return Err(StakeServiceError::insufficient(format!(
                "Amount too small. Minimum stake is {} SOL above the rent-exempt reserve",
                lamports_to_sol(self.settings.dust_floor_lamports)
            )));
        }

        let rent = self
            .rpc
            .get_minimum_balance_for_rent_exemption(STAKE_ACCOUNT_SIZE)
            .await?;
        let minimum = rent.saturating_add(self.settings.dust_floor_lamports);
        if lamports < minimum {
            return Err(StakeServiceError::insufficient(format!(
                "Amount too small. Minimum stake is {:.3} SOL",
                lamports_to_sol(minimum)
            )));
        }

        let stake_account = Keypair::new();
        let plan = plan_stake(wallet, &stake_account.pubkey(), &self.vote_account, lamports);
        self.finish(wallet, plan, &[&stake_account], &logger, timer)
            .await
    }

    /// Deactivate `lamports` of the delegation in `stake_account`.
    ///
    /// A partial request first splits the stake that stays delegated into a
    /// new account, then deactivates the original.
    pub async fn build_deactivate(
        &self,
        wallet: &Pubkey,
        stake_account: &Pubkey,
        lamports: u64,
        trace: &TraceContext,
    ) -> Result<TxBuildOutput, StakeServiceError> {
        let timer = Timer::new();
        let logger = StructuredLogger::for_trace(trace);
        logger.log_operation_requested(wallet, Some(lamports));

        let ctx = ChainContext::fetch(self.rpc.as_ref(), trace.child_span("load_state")).await?;
        let snapshot = ctx
            .load_snapshot(self.rpc.as_ref(), stake_account, &self.resolver)
            .await?;

        let delegation = snapshot.delegation.ok_or_else(|| {
            StakeServiceError::invalid_input("Stake account is not delegated")
        })?;
        if delegation.is_deactivating() {
            return Err(StakeServiceError::invalid_input(
                "Stake account is already deactivating",
            ));
        }
        if snapshot.meta.authorized_staker != *wallet {
            return Err(StakeServiceError::invalid_input(
                "Wallet is not the staking authority of this account",
            ));
        }

        let reserve = snapshot.meta.rent_exempt_reserve;
        let remaining =
            remaining_stake_after_deactivation(delegation.stake_lamports, lamports, reserve)?;

        match remaining {
            Some(remaining) => {
                let split_account = Keypair::new();
                let plan = plan_deactivate(
                    wallet,
                    stake_account,
                    Some(SplitPlan {
                        split_account: split_account.pubkey(),
                        lamports: remaining,
                        prefund_lamports: reserve,
                    }),
                );
                self.finish(wallet, plan, &[&split_account], &logger, timer)
                    .await
            }
            None => {
                let plan = plan_deactivate(wallet, stake_account, None);
                self.finish(wallet, plan, &[], &logger, timer).await
            }
        }
    }

    /// Withdraw everything currently withdrawable from `stake_account`.
    pub async fn build_withdraw(
        &self,
        wallet: &Pubkey,
        stake_account: &Pubkey,
        trace: &TraceContext,
    ) -> Result<TxBuildOutput, StakeServiceError> {
        let timer = Timer::new();
        let logger = StructuredLogger::for_trace(trace);
        logger.log_operation_requested(wallet, None);

        let ctx = ChainContext::fetch(self.rpc.as_ref(), trace.child_span("load_state")).await?;
        let snapshot = ctx
            .load_snapshot(self.rpc.as_ref(), stake_account, &self.resolver)
            .await?;

        if snapshot.meta.authorized_withdrawer != *wallet {
            return Err(StakeServiceError::invalid_input(
                "Wallet is not the withdraw authority of this account",
            ));
        }

        let lamports = self.withdraw_amount(&snapshot, ctx.epoch())?;
        let plan = plan_withdraw(wallet, stake_account, lamports);
        self.finish(wallet, plan, &[], &logger, timer).await
    }

    fn withdraw_amount(
        &self,
        snapshot: &StakeAccountSnapshot,
        current_epoch: u64,
    ) -> Result<u64, StakeServiceError> {
        if let Some(delegation) = &snapshot.delegation {
            let cooled = delegation
                .deactivation_epoch
                .is_some_and(|deactivation| current_epoch > deactivation);
            if !cooled {
                return Err(StakeServiceError::CooldownActive {
                    current_epoch,
                    deactivation_epoch: delegation.deactivation_epoch,
                });
            }
        }

        if self.settings.close_inactive_accounts && snapshot.state() == ActivationState::Inactive
        {
            if snapshot.lamports == 0 {
                return Err(StakeServiceError::insufficient(
                    "Nothing to withdraw from this stake account",
                ));
            }
            return Ok(snapshot.lamports);
        }

        let requested = self
            .settings
            .withdraw_policy
            .withdrawable_amount(&snapshot.status);
        if requested == 0 {
            return Err(StakeServiceError::insufficient(
                "Stake account has no inactive balance available to withdraw yet",
            ));
        }

        let available = snapshot.spendable_lamports();
        if requested > available {
            return Err(StakeServiceError::RentExemptionViolation {
                requested,
                available,
            });
        }
        Ok(requested)
    }

    /// Merge `source` into `destination`.
    pub async fn build_merge(
        &self,
        wallet: &Pubkey,
        source: &Pubkey,
        destination: &Pubkey,
        trace: &TraceContext,
    ) -> Result<TxBuildOutput, StakeServiceError> {
        let timer = Timer::new();
        let logger = StructuredLogger::for_trace(trace);
        logger.log_operation_requested(wallet, None);

        if source == destination {
            return Err(StakeServiceError::invalid_input(
                "Source and destination must be different stake accounts",
            ));
        }

        let ctx = ChainContext::fetch(self.rpc.as_ref(), trace.child_span("load_state")).await?;
        let (source_snapshot, destination_snapshot) = futures::try_join!(
            ctx.try_load_snapshot(self.rpc.as_ref(), source, &self.resolver),
            ctx.try_load_snapshot(self.rpc.as_ref(), destination, &self.resolver),
        )?;

        can_merge(
            source_snapshot.as_ref(),
            destination_snapshot.as_ref(),
            ctx.epoch(),
        )
        .map_err(|rejection| match rejection {
            MergeRejection::AccountNotFound(MergeRole::Source) => {
                StakeServiceError::AccountNotFound(*source)
            }
            MergeRejection::AccountNotFound(MergeRole::Destination) => {
                StakeServiceError::AccountNotFound(*destination)
            }
            rejection => rejection.into(),
        })?;

        // can_merge has established both exist and share a staker.
        if destination_snapshot
            .as_ref()
            .is_some_and(|d| d.meta.authorized_staker != *wallet)
        {
            return Err(StakeServiceError::invalid_input(
                "Wallet is not the staking authority of these accounts",
            ));
        }

        let plan = plan_merge(wallet, destination, source);
        self.finish(wallet, plan, &[], &logger, timer).await
    }

    /// Check ordering, attach a fresh blockhash and co-sign generated accounts.
    async fn finish(
        &self,
        wallet: &Pubkey,
        plan: InstructionPlan,
        generated: &[&Keypair],
        logger: &StructuredLogger,
        timer: Timer,
    ) -> Result<TxBuildOutput, StakeServiceError> {
        sanity_check_ix_order(&plan)?;

        let blockhash = self.rpc.get_latest_blockhash().await?;
        let message = Message::new_with_blockhash(&plan.instructions, Some(wallet), &blockhash);
        let mut tx = Transaction::new_unsigned(message);
        if !generated.is_empty() {
            tx.try_partial_sign(generated, blockhash)
                .map_err(|e| StakeServiceError::build_failed(format!("co-sign failed: {e}")))?;
        }

        let generated_accounts: Vec<Pubkey> = generated.iter().map(|k| k.pubkey()).collect();
        let output = TxBuildOutput::new(plan.operation, tx, generated_accounts);

        metrics().transactions_prepared.inc();
        logger.log_transaction_prepared(
            plan.instructions.len(),
            &output.generated_accounts,
            (timer.elapsed_secs() * 1000.0) as u64,
        );
        timer.observe_duration(&metrics().build_latency);
        Ok(output)
    }

    // ---- reads ----

    pub async fn stake_account_summary(
        &self,
        address: &Pubkey,
    ) -> Result<StakeAccountSummary, StakeServiceError> {
        let ctx = ChainContext::fetch(self.rpc.as_ref(), TraceContext::new("summary")).await?;
        let snapshot = ctx
            .load_snapshot(self.rpc.as_ref(), address, &self.resolver)
            .await?;
        Ok(snapshot.summary(&self.settings.withdraw_policy))
    }

    pub async fn wallet_balance(&self, address: &Pubkey) -> Result<u64, StakeServiceError> {
        Ok(self.rpc.get_balance(address).await?)
    }

    pub async fn rent_exempt_minimum(&self) -> Result<u64, StakeServiceError> {
        Ok(self
            .rpc
            .get_minimum_balance_for_rent_exemption(STAKE_ACCOUNT_SIZE)
            .await?)
    }

    /// Relay a transaction signed by its wallet.
    ///
    /// The service adds no signatures; a transaction with an empty signature
    /// slot is refused.
    pub async fn submit(&self, encoded: &str) -> Result<Signature, StakeServiceError> {
        let tx = decode_transaction(encoded)?;

        let missing = missing_signers(&tx);
        if !missing.is_empty() {
            let missing: Vec<String> = missing.iter().map(Pubkey::to_string).collect();
            return Err(StakeServiceError::invalid_input(format!(
                "transaction is missing signatures from {}",
                missing.join(", ")
            )));
        }
        tx.verify().map_err(|e| {
            StakeServiceError::invalid_input(format!("signature verification failed: {e}"))
        })?;

        self.rpc.send_and_confirm(&tx).await.map_err(|e| {
            if e.is_timeout() {
                StakeServiceError::RpcTimeout(e)
            } else {
                StakeServiceError::Submission(e.to_string())
            }
        })
    }
}
