//! Local keypair wallet
//!
//! Prepared transactions come back partially signed by the service's
//! generated keys; the wallet adds the fee payer / authority signature.

use crate::tx_builder::output::{decode_transaction, encode_transaction};
use anyhow::{bail, Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct LocalWallet {
    keypair: Arc<Keypair>,
}

impl LocalWallet {
    /// Load a keypair file, either raw 64 bytes or the JSON byte array
    /// written by `solana-keygen`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let keypair_bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read keypair file: {}", path.display()))?;

        let bytes = if keypair_bytes.len() == 64 {
            keypair_bytes
        } else {
            serde_json::from_slice::<Vec<u8>>(&keypair_bytes)
                .context("Failed to parse keypair JSON")?
        };
        if bytes.len() != 64 {
            bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
        }
        if bytes.iter().all(|&b| b == 0) {
            bail!("Invalid keypair: all-zero key rejected");
        }
        let keypair = Keypair::try_from(bytes.as_slice()).context("Invalid keypair bytes")?;

        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Add this wallet's signature, keeping the signatures already present.
    pub fn co_sign(&self, tx: &mut Transaction) -> Result<()> {
        let pubkey = self.pubkey();
        let required = tx.message.header.num_required_signatures as usize;
        if !tx.message.account_keys[..required.min(tx.message.account_keys.len())].contains(&pubkey) {
            bail!("Wallet {pubkey} is not a required signer of this transaction");
        }
        let blockhash = tx.message.recent_blockhash;
        tx.try_partial_sign(&[self.keypair.as_ref()], blockhash)
            .context("Failed to sign transaction")?;
        Ok(())
    }

    /// Co-sign a base64 transaction and return it re-encoded.
    pub fn co_sign_encoded(&self, encoded: &str) -> Result<String> {
        let mut tx = decode_transaction(encoded)?;
        self.co_sign(&mut tx)?;
        Ok(encode_transaction(&tx)?)
    }
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("pubkey", &self.pubkey())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_builder::output::missing_signers;
    use solana_sdk::{hash::Hash, message::Message, system_instruction};
    use std::io::Write;

    fn two_signer_tx(payer: &Pubkey, generated: &Keypair) -> Transaction {
        let ix = system_instruction::create_account(
            payer,
            &generated.pubkey(),
            1_000_000,
            200,
            &solana_sdk::stake::program::id(),
        );
        let message = Message::new_with_blockhash(&[ix], Some(payer), &Hash::new_unique());
        let mut tx = Transaction::new_unsigned(message);
        let blockhash = tx.message.recent_blockhash;
        tx.try_partial_sign(&[generated], blockhash).unwrap();
        tx
    }

    #[test]
    fn test_co_sign_completes_partial_transaction() {
        let wallet = LocalWallet::from_keypair(Keypair::new());
        let generated = Keypair::new();
        let tx = two_signer_tx(&wallet.pubkey(), &generated);
        assert_eq!(missing_signers(&tx), vec![wallet.pubkey()]);

        let encoded = encode_transaction(&tx).unwrap();
        let signed = decode_transaction(&wallet.co_sign_encoded(&encoded).unwrap()).unwrap();
        assert!(missing_signers(&signed).is_empty());
        assert!(signed.verify().is_ok());
    }

    #[test]
    fn test_co_sign_rejects_foreign_transaction() {
        let wallet = LocalWallet::from_keypair(Keypair::new());
        let mut tx = two_signer_tx(&Pubkey::new_unique(), &Keypair::new());
        assert!(wallet.co_sign(&mut tx).is_err());
    }

    #[test]
    fn test_from_file_json_and_raw() {
        let keypair = Keypair::new();
        let bytes = keypair.to_bytes();

        let mut json = tempfile::NamedTempFile::new().unwrap();
        write!(json, "{}", serde_json::to_string(&bytes.to_vec()).unwrap()).unwrap();
        assert_eq!(LocalWallet::from_file(json.path()).unwrap().pubkey(), keypair.pubkey());

        let mut raw = tempfile::NamedTempFile::new().unwrap();
        raw.write_all(&bytes).unwrap();
        assert_eq!(LocalWallet::from_file(raw.path()).unwrap().pubkey(), keypair.pubkey());

        let mut zeros = tempfile::NamedTempFile::new().unwrap();
        zeros.write_all(&[0u8; 64]).unwrap();
        assert!(LocalWallet::from_file(zeros.path()).is_err());
    }
}
