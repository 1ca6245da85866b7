//! Prepared transaction and the response boundary
//!
//! A prepared transaction carries the signatures of any accounts the builder
//! generated. The wallet's signature slot is left empty: the builder never
//! sees the wallet's key material.

use crate::tx_builder::errors::{ErrorKind, StakeServiceError};
use crate::tx_builder::instructions::StakeOperation;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::Transaction};

/// Partially signed transaction awaiting the wallet's signature.
#[derive(Debug, Clone)]
pub struct TxBuildOutput {
    pub operation: StakeOperation,
    pub tx: Transaction,
    /// Accounts created by this transaction, already co-signed.
    pub generated_accounts: Vec<Pubkey>,
    /// Taken from `message.header.num_required_signatures`.
    pub required_signers: Vec<Pubkey>,
}

impl TxBuildOutput {
    pub fn new(operation: StakeOperation, tx: Transaction, generated_accounts: Vec<Pubkey>) -> Self {
        let required = tx.message.header.num_required_signatures as usize;
        let required_signers = tx
            .message
            .account_keys
            .iter()
            .take(required)
            .copied()
            .collect();

        Self {
            operation,
            tx,
            generated_accounts,
            required_signers,
        }
    }

    /// Signers whose signature slot is still empty.
    pub fn missing_signers(&self) -> Vec<Pubkey> {
        missing_signers(&self.tx)
    }

    /// Wire-format bytes, base64 encoded.
    pub fn encode(&self) -> Result<String, StakeServiceError> {
        encode_transaction(&self.tx)
    }
}

pub fn encode_transaction(tx: &Transaction) -> Result<String, StakeServiceError> {
    let bytes = bincode::serialize(tx)
        .map_err(|e| StakeServiceError::build_failed(format!("serialize transaction: {e}")))?;
    Ok(STANDARD.encode(bytes))
}

pub fn decode_transaction(encoded: &str) -> Result<Transaction, StakeServiceError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| StakeServiceError::invalid_input(format!("transaction is not base64: {e}")))?;
    bincode::deserialize(&bytes)
        .map_err(|e| StakeServiceError::invalid_input(format!("malformed transaction: {e}")))
}

pub fn missing_signers(tx: &Transaction) -> Vec<Pubkey> {
    let required = tx.message.header.num_required_signatures as usize;
    tx.message
        .account_keys
        .iter()
        .take(required)
        .zip(tx.signatures.iter().map(Some).chain(std::iter::repeat(None)))
        .filter(|(_, sig)| sig.map_or(true, |s| *s == Signature::default()))
        .map(|(key, _)| *key)
        .collect()
}

/// Outcome of a prepare request, as serialised to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub generated_keypair_public_keys: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_signers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildResponse {
    pub fn failure(err: &StakeServiceError) -> Self {
        Self {
            success: false,
            transaction: None,
            generated_keypair_public_keys: Vec::new(),
            required_signers: Vec::new(),
            error_kind: Some(err.kind()),
            error: Some(err.to_string()),
        }
    }
}

impl From<Result<TxBuildOutput, StakeServiceError>> for BuildResponse {
    fn from(result: Result<TxBuildOutput, StakeServiceError>) -> Self {
        let output = match result {
            Ok(output) => output,
            Err(err) => return Self::failure(&err),
        };
        match output.encode() {
            Ok(transaction) => Self {
                success: true,
                transaction: Some(transaction),
                generated_keypair_public_keys: output
                    .generated_accounts
                    .iter()
                    .map(Pubkey::to_string)
                    .collect(),
                required_signers: output
                    .required_signers
                    .iter()
                    .map(Pubkey::to_string)
                    .collect(),
                error_kind: None,
                error: None,
            },
            Err(err) => Self::failure(&err),
        }
    }
}

/// Outcome of a submit request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<Signature, StakeServiceError>> for SubmitResponse {
    fn from(result: Result<Signature, StakeServiceError>) -> Self {
        match result {
            Ok(signature) => Self {
                success: true,
                signature: Some(signature.to_string()),
                error_kind: None,
                error: None,
            },
            Err(err) => Self {
                success: false,
                signature: None,
                error_kind: Some(err.kind()),
                error: Some(err.to_string()),
            },
        }
    }
}
