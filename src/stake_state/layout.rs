//! Binary layout of stake-program accounts
//!
//! Stake accounts are 200 bytes, bincode-encoded `StakeStateV2`:
//!
//! ```text
//! [0..4)     u32 tag (Uninitialized=0, Initialized=1, Stake=2, RewardsPool=3)
//! [4..124)   Meta      rent_exempt_reserve, staker, withdrawer, lockup
//! [124..196) Stake     voter, stake, activation, deactivation, rate, credits
//! [196]      stake flags
//! ```
//!
//! The offsets are fixed by the stake program. A change there is a breaking
//! external change and shows up here as a `DecodeError`, never as a default.

use serde::Serialize;
use solana_sdk::{clock::Epoch, pubkey::Pubkey};
use thiserror::Error;

/// Size of an allocated stake account.
pub const STAKE_ACCOUNT_SIZE: usize = 200;

pub const TAG_OFFSET: usize = 0;
pub const META_OFFSET: usize = 4;
pub const STAKER_OFFSET: usize = 12;
pub const WITHDRAWER_OFFSET: usize = 44;
pub const LOCKUP_OFFSET: usize = 76;
pub const DELEGATION_OFFSET: usize = 124;
/// Voter pubkey is the first field of the delegation.
pub const VOTER_OFFSET: usize = DELEGATION_OFFSET;
const STAKE_LAMPORTS_OFFSET: usize = 156;
const ACTIVATION_EPOCH_OFFSET: usize = 164;
const DEACTIVATION_EPOCH_OFFSET: usize = 172;
// [180..188) holds the deprecated per-delegation warmup rate (f64); unused.
const CREDITS_OBSERVED_OFFSET: usize = 188;

/// On-wire marker for "not deactivating". Only the codecs see it.
pub(crate) const NOT_DEACTIVATING: u64 = u64::MAX;

/// Errors produced while decoding account bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("account data too short: {len} bytes, need at least {required}")]
    TooShort { len: usize, required: usize },

    #[error("unrecognized stake state tag {0}")]
    UnknownTag(u32),

    #[error("account is not a usable stake account ({0})")]
    NotStakeAccount(&'static str),

    #[error("account is owned by {owner}, not the stake program")]
    WrongOwner { owner: Pubkey },

    #[error("malformed stake history: {0}")]
    BadStakeHistory(String),
}

/// Lockup restricting withdrawals until an epoch or timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lockup {
    pub unix_timestamp: i64,
    pub epoch: Epoch,
    #[serde(serialize_with = "serialize_pubkey")]
    pub custodian: Pubkey,
}

/// Authorities, lockup and rent reserve of an initialized stake account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeMeta {
    pub rent_exempt_reserve: u64,
    #[serde(serialize_with = "serialize_pubkey")]
    pub authorized_staker: Pubkey,
    #[serde(serialize_with = "serialize_pubkey")]
    pub authorized_withdrawer: Pubkey,
    pub lockup: Lockup,
}

/// Delegation of a `Stake` account to a vote account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    #[serde(serialize_with = "serialize_pubkey")]
    pub voter_pubkey: Pubkey,
    pub stake_lamports: u64,
    pub activation_epoch: Epoch,
    /// `None` while the stake is not deactivating.
    pub deactivation_epoch: Option<Epoch>,
    pub credits_observed: u64,
}

impl Delegation {
    pub fn is_deactivating(&self) -> bool {
        self.deactivation_epoch.is_some()
    }
}

/// Outer stake-state enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Uninitialized,
    Initialized(StakeMeta),
    Stake(StakeMeta, Delegation),
    RewardsPool,
}

impl AccountState {
    pub fn meta(&self) -> Option<&StakeMeta> {
        match self {
            Self::Initialized(meta) | Self::Stake(meta, _) => Some(meta),
            Self::Uninitialized | Self::RewardsPool => None,
        }
    }

    pub fn delegation(&self) -> Option<&Delegation> {
        match self {
            Self::Stake(_, delegation) => Some(delegation),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized(_) => "initialized",
            Self::Stake(..) => "delegated",
            Self::RewardsPool => "rewardsPool",
        }
    }
}

/// Decode raw stake-account bytes.
///
/// The tag is read first; only `Stake` carries a delegation.
///
/// # Errors
///
/// `DecodeError::TooShort` for buffers under [`STAKE_ACCOUNT_SIZE`] and
/// `DecodeError::UnknownTag` for an unrecognized discriminant.
pub fn decode_account_state(data: &[u8]) -> Result<AccountState, DecodeError> {
    if data.len() < STAKE_ACCOUNT_SIZE {
        return Err(DecodeError::TooShort {
            len: data.len(),
            required: STAKE_ACCOUNT_SIZE,
        });
    }

    match read_u32(data, TAG_OFFSET) {
        0 => Ok(AccountState::Uninitialized),
        1 => Ok(AccountState::Initialized(decode_meta(data))),
        2 => Ok(AccountState::Stake(decode_meta(data), decode_delegation(data))),
        3 => Ok(AccountState::RewardsPool),
        tag => Err(DecodeError::UnknownTag(tag)),
    }
}

// Callers have checked the buffer length.
fn decode_meta(data: &[u8]) -> StakeMeta {
    StakeMeta {
        rent_exempt_reserve: read_u64(data, META_OFFSET),
        authorized_staker: read_pubkey(data, STAKER_OFFSET),
        authorized_withdrawer: read_pubkey(data, WITHDRAWER_OFFSET),
        lockup: Lockup {
            unix_timestamp: read_u64(data, LOCKUP_OFFSET) as i64,
            epoch: read_u64(data, LOCKUP_OFFSET + 8),
            custodian: read_pubkey(data, LOCKUP_OFFSET + 16),
        },
    }
}

fn decode_delegation(data: &[u8]) -> Delegation {
    let deactivation_epoch = match read_u64(data, DEACTIVATION_EPOCH_OFFSET) {
        NOT_DEACTIVATING => None,
        epoch => Some(epoch),
    };
    Delegation {
        voter_pubkey: read_pubkey(data, VOTER_OFFSET),
        stake_lamports: read_u64(data, STAKE_LAMPORTS_OFFSET),
        activation_epoch: read_u64(data, ACTIVATION_EPOCH_OFFSET),
        deactivation_epoch,
        credits_observed: read_u64(data, CREDITS_OBSERVED_OFFSET),
    }
}

/// Encode a state back into a 200-byte buffer.
///
/// Used by fixtures and by tests that check offsets against the decoder.
pub fn encode_account_state(state: &AccountState) -> Vec<u8> {
    let mut data = vec![0u8; STAKE_ACCOUNT_SIZE];
    let tag: u32 = match state {
        AccountState::Uninitialized => 0,
        AccountState::Initialized(_) => 1,
        AccountState::Stake(..) => 2,
        AccountState::RewardsPool => 3,
    };
    data[TAG_OFFSET..TAG_OFFSET + 4].copy_from_slice(&tag.to_le_bytes());

    if let Some(meta) = state.meta() {
        write_u64(&mut data, META_OFFSET, meta.rent_exempt_reserve);
        write_pubkey(&mut data, STAKER_OFFSET, &meta.authorized_staker);
        write_pubkey(&mut data, WITHDRAWER_OFFSET, &meta.authorized_withdrawer);
        write_u64(&mut data, LOCKUP_OFFSET, meta.lockup.unix_timestamp as u64);
        write_u64(&mut data, LOCKUP_OFFSET + 8, meta.lockup.epoch);
        write_pubkey(&mut data, LOCKUP_OFFSET + 16, &meta.lockup.custodian);
    }

    if let Some(delegation) = state.delegation() {
        write_pubkey(&mut data, VOTER_OFFSET, &delegation.voter_pubkey);
        write_u64(&mut data, STAKE_LAMPORTS_OFFSET, delegation.stake_lamports);
        write_u64(&mut data, ACTIVATION_EPOCH_OFFSET, delegation.activation_epoch);
        write_u64(
            &mut data,
            DEACTIVATION_EPOCH_OFFSET,
            delegation.deactivation_epoch.unwrap_or(NOT_DEACTIVATING),
        );
        // Deprecated warmup rate field; the program still writes 0.25.
        data[180..188].copy_from_slice(&0.25f64.to_le_bytes());
        write_u64(&mut data, CREDITS_OBSERVED_OFFSET, delegation.credits_observed);
    }

    data
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn read_pubkey(data: &[u8], offset: usize) -> Pubkey {
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&data[offset..offset + 32]);
    Pubkey::new_from_array(buf)
}

fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn write_pubkey(data: &mut [u8], offset: usize, key: &Pubkey) {
    data[offset..offset + 32].copy_from_slice(key.as_ref());
}

pub(crate) fn serialize_pubkey<S: serde::Serializer>(
    key: &Pubkey,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&key.to_string())
}
