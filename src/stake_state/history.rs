//! Stake-history sysvar decoding
//!
//! Sysvar layout (bincode `Vec<(Epoch, StakeHistoryEntry)>`, newest first):
//! `[0..8)` entry count, then 32 bytes per entry: epoch, effective,
//! activating, deactivating, all u64 little-endian.

use std::collections::BTreeMap;

use solana_sdk::clock::Epoch;
use solana_sdk::sysvar::stake_history::{
    StakeHistoryEntry as NetworkHistoryEntry, StakeHistoryGetEntry,
};

use super::layout::{read_u64, DecodeError};

const ENTRY_SIZE: usize = 32;
/// The sysvar keeps at most this many epochs.
pub const MAX_ENTRIES: usize = 512;

/// Cluster-wide stake totals for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StakeHistoryEntry {
    pub effective: u64,
    pub activating: u64,
    pub deactivating: u64,
}

impl StakeHistoryEntry {
    pub fn with_effective(effective: u64) -> Self {
        Self {
            effective,
            ..Self::default()
        }
    }

    pub fn with_deactivating(effective: u64, deactivating: u64) -> Self {
        Self {
            effective,
            deactivating,
            ..Self::default()
        }
    }
}

/// Decoded stake history, keyed by epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StakeHistory {
    entries: BTreeMap<Epoch, StakeHistoryEntry>,
}

impl StakeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the sysvar account data.
    ///
    /// # Errors
    ///
    /// `DecodeError::BadStakeHistory` when the declared length does not fit
    /// the buffer or exceeds [`MAX_ENTRIES`].
    pub fn from_sysvar_data(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 8 {
            return Err(DecodeError::BadStakeHistory(format!(
                "{} bytes, missing length prefix",
                data.len()
            )));
        }
        let len = read_u64(data, 0) as usize;
        if len > MAX_ENTRIES {
            return Err(DecodeError::BadStakeHistory(format!(
                "{len} entries exceeds maximum {MAX_ENTRIES}"
            )));
        }
        let required = 8 + len * ENTRY_SIZE;
        if data.len() < required {
            return Err(DecodeError::BadStakeHistory(format!(
                "{} bytes for {len} entries, need {required}",
                data.len()
            )));
        }

        let mut history = Self::new();
        for index in 0..len {
            let offset = 8 + index * ENTRY_SIZE;
            history.insert(
                read_u64(data, offset),
                StakeHistoryEntry {
                    effective: read_u64(data, offset + 8),
                    activating: read_u64(data, offset + 16),
                    deactivating: read_u64(data, offset + 24),
                },
            );
        }
        Ok(history)
    }

    pub fn insert(&mut self, epoch: Epoch, entry: StakeHistoryEntry) {
        self.entries.insert(epoch, entry);
    }

    pub fn get(&self, epoch: Epoch) -> Option<&StakeHistoryEntry> {
        self.entries.get(&epoch)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode in sysvar layout, newest epoch first.
    pub fn to_sysvar_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + self.entries.len() * ENTRY_SIZE);
        data.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        for (epoch, entry) in self.entries.iter().rev() {
            data.extend_from_slice(&epoch.to_le_bytes());
            data.extend_from_slice(&entry.effective.to_le_bytes());
            data.extend_from_slice(&entry.activating.to_le_bytes());
            data.extend_from_slice(&entry.deactivating.to_le_bytes());
        }
        data
    }
}

impl StakeHistoryGetEntry for StakeHistory {
    fn get_entry(&self, epoch: Epoch) -> Option<NetworkHistoryEntry> {
        self.get(epoch).map(|entry| NetworkHistoryEntry {
            effective: entry.effective,
            activating: entry.activating,
            deactivating: entry.deactivating,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysvar_layout_decodes() {
        let mut history = StakeHistory::new();
        history.insert(9, StakeHistoryEntry::with_effective(1_000));
        history.insert(10, StakeHistoryEntry::with_deactivating(2_000, 300));

        let data = history.to_sysvar_data();
        assert_eq!(data.len(), 8 + 2 * ENTRY_SIZE);
        // newest first
        assert_eq!(read_u64(&data, 8), 10);

        let decoded = StakeHistory::from_sysvar_data(&data).unwrap();
        assert_eq!(decoded, history);
        assert_eq!(decoded.get(10).unwrap().deactivating, 300);
        assert!(decoded.get(11).is_none());
    }

    #[test]
    fn test_truncated_sysvar_rejected() {
        let mut data = 3u64.to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8; ENTRY_SIZE]);
        assert!(matches!(
            StakeHistory::from_sysvar_data(&data),
            Err(DecodeError::BadStakeHistory(_))
        ));
        assert!(StakeHistory::from_sysvar_data(&[1, 2]).is_err());
    }

    #[test]
    fn test_network_lookup_matches_entries() {
        let mut history = StakeHistory::new();
        history.insert(42, StakeHistoryEntry::with_deactivating(5_000, 700));

        let entry = history.get_entry(42).unwrap();
        assert_eq!(entry.effective, 5_000);
        assert_eq!(entry.deactivating, 700);
        assert!(history.get_entry(41).is_none());
    }

    #[test]
    fn test_empty_sysvar() {
        let history = StakeHistory::from_sysvar_data(&0u64.to_le_bytes()).unwrap();
        assert!(history.is_empty());
    }
}
