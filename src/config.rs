//! Configuration module for the stake service
//!
//! This module handles configuration loading from TOML files and
//! environment variables, and converts sections into the settings each
//! component takes at construction.

use crate::pools::KnownPool;
use crate::retry::RetryPolicy;
use crate::stake_state::{ActivationResolver, NetworkWarmupCooldown, WithdrawPolicy};
use crate::stats::{StatsSettings, DEFAULT_STATS_ENDPOINT};
use crate::tx_builder::{StakingSettings, DEFAULT_DUST_FLOOR_LAMPORTS};
use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const ENV_RPC_ENDPOINT: &str = "SOLSTAKE_RPC_ENDPOINT";
pub const ENV_VOTE_ACCOUNT: &str = "SOLSTAKE_VOTE_ACCOUNT";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub staking: StakingConfig,

    #[serde(default)]
    pub pools: PoolsConfig,

    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// processed, confirmed or finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Base58 vote account every delegation targets
    #[serde(default)]
    pub vote_account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Smallest delegation accepted on top of the rent-exempt reserve
    #[serde(default = "default_dust_floor")]
    pub dust_floor_lamports: u64,

    #[serde(default)]
    pub activating_is_withdrawable: bool,

    /// Sweep the full balance of fully inactive accounts
    #[serde(default)]
    pub close_inactive_accounts: bool,

    /// Epoch from which the reduced warmup/cooldown rate applies
    #[serde(default)]
    pub new_warmup_cooldown_rate_epoch: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownPoolConfig {
    pub name: String,
    pub authority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsConfig {
    /// Named rows before the rest is folded into "Other"
    #[serde(default = "default_max_pools")]
    pub max_pools: usize,

    #[serde(default = "default_known_pools")]
    pub known: Vec<KnownPoolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_stats_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_stats_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

// Default value functions
fn default_rpc_endpoint() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_dust_floor() -> u64 { DEFAULT_DUST_FLOOR_LAMPORTS }
fn default_max_pools() -> usize { 10 }
fn default_stats_endpoint() -> String { DEFAULT_STATS_ENDPOINT.to_string() }
fn default_stats_timeout() -> u64 { 5_000 }
fn default_max_attempts() -> u32 { 3 }
fn default_base_delay() -> u64 { 500 }
fn default_true() -> bool { true }

fn default_known_pools() -> Vec<KnownPoolConfig> {
    [
        ("Solana Foundation", "mpa4abUkjQoAvPzREkh5Mo75hZhPFQ2FSH6w7dWKuQ5"),
        ("AeroSOL", "AKJt3m2xJ6ANda9adBGqb5BMrheKJSwxyCfYkLuZNmjn"),
        ("Jito", "6iQKfEyhr3bZMotVkW6beNZz5CPAkiwvgV2CTje9pVSS"),
        ("BlazeStake", "6WecYymEARvjG5ZyqkrVQ6YkhPfujNzWpSPwNKXHCbV2"),
        ("JPool", "CtMyWsrUtAwXWiGr9WjHT5fC3p3fgV8cyGpLTo2LJzG1"),
        ("The Vault", "Fu9BYC6tWBo1KMKaP3CFoKfRhqv9akmy3DuYwnCyWiyC"),
        ("Double Zero", "3fV1sdGeXaNEZj6EPDTpub82pYxcRXwt2oie6jkSzeWi"),
    ]
    .into_iter()
    .map(|(name, authority)| KnownPoolConfig {
        name: name.to_string(),
        authority: authority.to_string(),
    })
    .collect()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_secs: default_rpc_timeout(),
            commitment: default_commitment(),
        }
    }
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            dust_floor_lamports: default_dust_floor(),
            activating_is_withdrawable: false,
            close_inactive_accounts: false,
            new_warmup_cooldown_rate_epoch: None,
        }
    }
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            max_pools: default_max_pools(),
            known: default_known_pools(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_stats_endpoint(),
            request_timeout_ms: default_stats_timeout(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides.
    /// A missing file yields the defaults.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            warn!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup; empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(endpoint) = lookup(ENV_RPC_ENDPOINT) {
            self.rpc.endpoint = endpoint;
        }
        if let Some(vote_account) = lookup(ENV_VOTE_ACCOUNT) {
            self.validator.vote_account = vote_account;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc.endpoint.trim().is_empty() {
            bail!("rpc.endpoint must not be empty");
        }
        if self.rpc.timeout_secs == 0 {
            bail!("rpc.timeout_secs must be greater than zero");
        }
        self.commitment()?;
        self.vote_account()?;
        self.known_pools()?;
        if self.stats.max_attempts == 0 {
            bail!("stats.max_attempts must be at least 1");
        }
        if self.stats.request_timeout_ms == 0 {
            bail!("stats.request_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn vote_account(&self) -> anyhow::Result<Pubkey> {
        let raw = self.validator.vote_account.trim();
        if raw.is_empty() {
            bail!("validator.vote_account is not set (or set {ENV_VOTE_ACCOUNT})");
        }
        Pubkey::from_str(raw).with_context(|| format!("Invalid vote account {raw:?}"))
    }

    pub fn commitment(&self) -> anyhow::Result<CommitmentConfig> {
        match self.rpc.commitment.as_str() {
            "processed" => Ok(CommitmentConfig::processed()),
            "confirmed" => Ok(CommitmentConfig::confirmed()),
            "finalized" => Ok(CommitmentConfig::finalized()),
            other => Err(anyhow!("Unknown commitment level {other:?}")),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.timeout_secs)
    }

    pub fn known_pools(&self) -> anyhow::Result<Vec<KnownPool>> {
        self.pools
            .known
            .iter()
            .map(|pool| {
                let authority = Pubkey::from_str(pool.authority.trim()).with_context(|| {
                    format!("Invalid authority for pool {:?}: {:?}", pool.name, pool.authority)
                })?;
                Ok(KnownPool {
                    name: pool.name.clone(),
                    authority,
                })
            })
            .collect()
    }

    pub fn staking_settings(&self) -> StakingSettings {
        StakingSettings {
            dust_floor_lamports: self.staking.dust_floor_lamports,
            close_inactive_accounts: self.staking.close_inactive_accounts,
            withdraw_policy: WithdrawPolicy {
                activating_is_withdrawable: self.staking.activating_is_withdrawable,
            },
        }
    }

    pub fn activation_resolver(&self) -> ActivationResolver {
        ActivationResolver::new(NetworkWarmupCooldown {
            new_rate_activation_epoch: self.staking.new_warmup_cooldown_rate_epoch,
        })
    }

    pub fn stats_settings(&self) -> StatsSettings {
        let request_timeout = Duration::from_millis(self.stats.request_timeout_ms);
        StatsSettings {
            endpoint: self.stats.endpoint.clone(),
            request_timeout,
            retry: RetryPolicy {
                max_attempts: self.stats.max_attempts,
                base_delay_ms: self.stats.base_delay_ms,
                attempt_timeout: request_timeout,
                ..RetryPolicy::default()
            },
        }
    }
}
