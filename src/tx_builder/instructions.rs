//! Instruction planning and ordering validation
//!
//! Expected stake-program sequences per operation:
//! - stake:      create_account, initialize, delegate
//! - deactivate: [transfer, allocate, assign, split], deactivate
//! - withdraw:   withdraw
//! - merge:      merge
//!
//! Planning functions are pure; the builder supplies the fetched state and
//! any freshly generated account addresses.

use crate::tx_builder::errors::StakeServiceError;
use serde::Serialize;
use solana_sdk::{
    instruction::Instruction,
    native_token::lamports_to_sol,
    pubkey::Pubkey,
    stake::{
        self,
        instruction as stake_instruction,
        state::{Authorized, Lockup},
    },
    system_instruction, system_program,
};

// u32 little-endian discriminators of the stake program's instruction enum.
const STAKE_IX_INITIALIZE: u32 = 0;
const STAKE_IX_DELEGATE: u32 = 2;
const STAKE_IX_SPLIT: u32 = 3;
const STAKE_IX_WITHDRAW: u32 = 4;
const STAKE_IX_DEACTIVATE: u32 = 5;
const STAKE_IX_MERGE: u32 = 7;

const SYSTEM_IX_CREATE_ACCOUNT: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StakeOperation {
    Stake,
    Deactivate,
    Withdraw,
    Merge,
}

impl StakeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stake => "stake",
            Self::Deactivate => "deactivate",
            Self::Withdraw => "withdraw",
            Self::Merge => "merge",
        }
    }
}

/// Ordered instructions for one operation.
#[derive(Debug, Clone)]
pub struct InstructionPlan {
    pub operation: StakeOperation,
    pub instructions: Vec<Instruction>,
}

impl InstructionPlan {
    pub fn new(operation: StakeOperation, instructions: Vec<Instruction>) -> Self {
        Self {
            operation,
            instructions,
        }
    }
}

/// Carve-out of the stake the holder keeps earning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    pub split_account: Pubkey,
    /// Stake moved into the new account.
    pub lamports: u64,
    /// Transferred from the wallet first so the new account is rent exempt.
    pub prefund_lamports: u64,
}

/// Lamports to keep delegated when deactivating `requested` out of `total`.
///
/// `None` means the whole account is deactivated: either everything was
/// requested or the remainder would sit below the rent-exempt reserve.
pub fn remaining_stake_after_deactivation(
    total: u64,
    requested: u64,
    rent_exempt_reserve: u64,
) -> Result<Option<u64>, StakeServiceError> {
    if requested == 0 {
        return Err(StakeServiceError::insufficient(
            "Enter a valid amount to deactivate",
        ));
    }
    if requested > total {
        return Err(StakeServiceError::insufficient(format!(
            "Insufficient staked SOL in selected account ({} SOL delegated)",
            lamports_to_sol(total)
        )));
    }

    let remaining = total - requested;
    if remaining == 0 || remaining < rent_exempt_reserve {
        return Ok(None);
    }
    Ok(Some(remaining))
}

/// Create a new stake account funded by `wallet` and delegate it.
///
/// The wallet becomes staker, withdrawer and lockup custodian; the lockup
/// itself is empty.
pub fn plan_stake(
    wallet: &Pubkey,
    stake_account: &Pubkey,
    vote_account: &Pubkey,
    lamports: u64,
) -> InstructionPlan {
    let authorized = Authorized {
        staker: *wallet,
        withdrawer: *wallet,
    };
    let lockup = Lockup {
        unix_timestamp: 0,
        epoch: 0,
        custodian: *wallet,
    };

    let mut instructions =
        stake_instruction::create_account(wallet, stake_account, &authorized, &lockup, lamports);
    instructions.push(stake_instruction::delegate_stake(
        stake_account,
        wallet,
        vote_account,
    ));
    InstructionPlan::new(StakeOperation::Stake, instructions)
}

/// Optionally split off the stake that stays delegated, then deactivate.
pub fn plan_deactivate(
    wallet: &Pubkey,
    stake_account: &Pubkey,
    split: Option<SplitPlan>,
) -> InstructionPlan {
    let mut instructions = Vec::with_capacity(5);

    if let Some(split) = split {
        instructions.push(system_instruction::transfer(
            wallet,
            &split.split_account,
            split.prefund_lamports,
        ));
        instructions.extend(stake_instruction::split(
            stake_account,
            wallet,
            split.lamports,
            &split.split_account,
        ));
    }

    instructions.push(stake_instruction::deactivate_stake(stake_account, wallet));
    InstructionPlan::new(StakeOperation::Deactivate, instructions)
}

/// Withdraw `lamports` from `stake_account` back to the wallet.
pub fn plan_withdraw(wallet: &Pubkey, stake_account: &Pubkey, lamports: u64) -> InstructionPlan {
    InstructionPlan::new(
        StakeOperation::Withdraw,
        vec![stake_instruction::withdraw(
            stake_account,
            wallet,
            wallet,
            lamports,
            None,
        )],
    )
}

/// Merge `source` into `destination`; the source account is consumed.
pub fn plan_merge(wallet: &Pubkey, destination: &Pubkey, source: &Pubkey) -> InstructionPlan {
    InstructionPlan::new(
        StakeOperation::Merge,
        stake_instruction::merge(destination, source, wallet),
    )
}

fn discriminator(ix: &Instruction) -> Option<u32> {
    ix.data
        .get(..4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)
}

/// Verify the stake-program instruction sequence of a plan.
///
/// System-program instructions may only precede the first stake-program
/// instruction.
pub fn sanity_check_ix_order(plan: &InstructionPlan) -> Result<(), StakeServiceError> {
    if plan.instructions.is_empty() {
        return Err(StakeServiceError::build_failed("Instruction list is empty"));
    }

    let mut stake_sequence = Vec::with_capacity(plan.instructions.len());
    for (idx, ix) in plan.instructions.iter().enumerate() {
        if ix.program_id == stake::program::id() {
            stake_sequence.push(discriminator(ix).ok_or_else(|| {
                StakeServiceError::build_failed(format!(
                    "Stake instruction at position {idx} has no discriminator"
                ))
            })?);
        } else if ix.program_id == system_program::id() {
            if !stake_sequence.is_empty() {
                return Err(StakeServiceError::build_failed(format!(
                    "System instruction at position {idx} follows a stake instruction"
                )));
            }
        } else {
            return Err(StakeServiceError::build_failed(format!(
                "Unexpected program {} at position {idx}",
                ix.program_id
            )));
        }
    }

    let valid = match plan.operation {
        StakeOperation::Stake => {
            plan.instructions[0].program_id == system_program::id()
                && discriminator(&plan.instructions[0]) == Some(SYSTEM_IX_CREATE_ACCOUNT)
                && stake_sequence == [STAKE_IX_INITIALIZE, STAKE_IX_DELEGATE]
        }
        StakeOperation::Deactivate => {
            stake_sequence == [STAKE_IX_DEACTIVATE]
                || stake_sequence == [STAKE_IX_SPLIT, STAKE_IX_DEACTIVATE]
        }
        StakeOperation::Withdraw => stake_sequence == [STAKE_IX_WITHDRAW],
        StakeOperation::Merge => stake_sequence == [STAKE_IX_MERGE],
    };

    if valid {
        Ok(())
    } else {
        Err(StakeServiceError::build_failed(format!(
            "Invalid instruction order for {}: stake sequence {:?}",
            plan.operation.as_str(),
            stake_sequence
        )))
    }
}
