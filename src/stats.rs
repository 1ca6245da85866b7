//! Validator statistics
//!
//! Stake and APY come from a third-party stats API keyed by vote account;
//! upcoming leader slots come from the chain. Stats are informational, so a
//! failure degrades to zeroed values instead of an error.

use crate::metrics::metrics;
use crate::retry::{retry_with_backoff, RetryPolicy, Retryable};
use crate::rpc::ChainRpc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const DEFAULT_STATS_ENDPOINT: &str = "https://api.stakewiz.com/validator";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error("Stats request to {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Stats API responded with {status}")]
    Status { status: u16 },

    #[error("Stats transport error: {0}")]
    Transport(String),

    #[error("Malformed stats response: {0}")]
    Malformed(String),

    #[error("Chain error: {0}")]
    Chain(String),
}

impl Retryable for StatsError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport(_) => true,
            Self::Status { status } => *status >= 500 || *status == 429,
            Self::Malformed(_) | Self::Chain(_) => false,
        }
    }

    fn attempt_timed_out(operation: &str, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }
    }
}

impl StatsError {
    /// Classify an HTTP failure. `request_timeout` is the client limit that
    /// a timed-out request ran into.
    pub fn from_http(err: reqwest::Error, request_timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::attempt_timed_out("stats_api", request_timeout)
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Body of the stats API for one validator. Numbers may arrive as strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ValidatorRecord {
    /// Activated stake in SOL.
    #[serde(default, deserialize_with = "number_or_string")]
    pub activated_stake: Option<f64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub total_apy: Option<f64>,
    #[serde(default)]
    pub identity: Option<String>,
}

fn number_or_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorStats {
    /// Activated stake in SOL.
    pub total_stake: f64,
    /// Percent; never negative.
    pub apy: f64,
    pub current_slot: u64,
    /// Absolute slots still ahead in the current epoch.
    pub upcoming_leader_slots: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct StatsSettings {
    pub endpoint: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for StatsSettings {
    fn default() -> Self {
        let request_timeout = Duration::from_millis(5_000);
        Self {
            endpoint: DEFAULT_STATS_ENDPOINT.to_string(),
            request_timeout,
            retry: RetryPolicy {
                attempt_timeout: request_timeout,
                ..RetryPolicy::default()
            },
        }
    }
}

/// Relative leader slots after `slot_index`, as absolute slots.
pub fn upcoming_slots(relative: &[u64], absolute_slot: u64, slot_index: u64) -> Vec<u64> {
    let epoch_start = absolute_slot.saturating_sub(slot_index);
    let mut slots: Vec<u64> = relative
        .iter()
        .filter(|&&r| r > slot_index)
        .map(|r| epoch_start + r)
        .collect();
    slots.sort_unstable();
    slots
}

pub struct ValidatorStatsClient {
    http: reqwest::Client,
    rpc: Arc<dyn ChainRpc>,
    vote_account: Pubkey,
    settings: StatsSettings,
}

impl ValidatorStatsClient {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        vote_account: Pubkey,
        settings: StatsSettings,
    ) -> Result<Self, StatsError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| StatsError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            rpc,
            vote_account,
            settings,
        })
    }

    /// Stats for the configured validator, zeroed on failure.
    pub async fn fetch(&self) -> ValidatorStats {
        match self.try_fetch().await {
            Ok(stats) => stats,
            Err(e) => {
                error!(vote_account = %self.vote_account, error = %e, "Failed to fetch validator stats");
                ValidatorStats::default()
            }
        }
    }

    pub async fn try_fetch(&self) -> Result<ValidatorStats, StatsError> {
        let (record, epoch_info) = futures::try_join!(self.fetch_record(), async {
            self.rpc
                .get_epoch_info()
                .await
                .map_err(|e| StatsError::Chain(e.to_string()))
        })?;

        let upcoming_leader_slots = match record.identity.as_deref() {
            Some(identity) => {
                self.leader_slots(identity, epoch_info.absolute_slot, epoch_info.slot_index)
                    .await
            }
            None => Vec::new(),
        };

        Ok(ValidatorStats {
            total_stake: record.activated_stake.unwrap_or(0.0),
            apy: record.total_apy.filter(|apy| *apy > 0.0).unwrap_or(0.0),
            current_slot: epoch_info.absolute_slot,
            upcoming_leader_slots,
        })
    }

    /// Stats API record, retried per the configured policy.
    pub async fn fetch_record(&self) -> Result<ValidatorRecord, StatsError> {
        let url = format!(
            "{}/{}",
            self.settings.endpoint.trim_end_matches('/'),
            self.vote_account
        );
        let attempts = AtomicU32::new(0);
        let request_timeout = self.settings.request_timeout;

        retry_with_backoff("stats_api", &self.settings.retry, || {
            if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                metrics().stats_retries.inc();
            }
            let request = self
                .http
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/json");
            async move {
                let response = request
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| StatsError::from_http(e, request_timeout))?;
                let body = response
                    .text()
                    .await
                    .map_err(|e| StatsError::from_http(e, request_timeout))?;
                serde_json::from_str::<ValidatorRecord>(&body)
                    .map_err(|e| StatsError::Malformed(e.to_string()))
            }
        })
        .await
    }

    async fn leader_slots(&self, identity: &str, absolute_slot: u64, slot_index: u64) -> Vec<u64> {
        let identity = match Pubkey::from_str(identity) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(identity, error = %e, "Stats API returned an unparsable identity");
                return Vec::new();
            }
        };
        match self.rpc.get_leader_slots(absolute_slot, &identity).await {
            Ok(relative) => {
                let slots = upcoming_slots(&relative, absolute_slot, slot_index);
                debug!(identity = %identity, upcoming = slots.len(), "Leader schedule resolved");
                slots
            }
            Err(e) => {
                error!(identity = %identity, error = %e, "Failed to fetch leader schedule");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ChainRpcError;
    use crate::test_utils::MockChain;

    fn fast_settings(endpoint: String) -> StatsSettings {
        StatsSettings {
            endpoint,
            request_timeout: Duration::from_secs(2),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
                multiplier: 2.0,
                jitter_factor: 0.0,
                attempt_timeout: Duration::from_secs(2),
            },
        }
    }

    #[test]
    fn test_record_accepts_numbers_and_strings() {
        let record: ValidatorRecord = serde_json::from_str(
            r#"{"activated_stake":"12345.5","total_apy":7.1,"identity":"abc"}"#,
        )
        .unwrap();
        assert_eq!(record.activated_stake, Some(12345.5));
        assert_eq!(record.total_apy, Some(7.1));

        let record: ValidatorRecord =
            serde_json::from_str(r#"{"activated_stake":"n/a"}"#).unwrap();
        assert_eq!(record.activated_stake, None);
        assert_eq!(record.identity, None);
    }

    #[test]
    fn test_upcoming_slots_skip_past() {
        // Epoch starts at 1000; slot index 10.
        let slots = upcoming_slots(&[12, 4, 10, 11], 1010, 10);
        assert_eq!(slots, vec![1011, 1012]);
    }

    #[test]
    fn test_retry_classification() {
        assert!(StatsError::Status { status: 503 }.is_retryable());
        assert!(StatsError::Status { status: 429 }.is_retryable());
        assert!(!StatsError::Status { status: 404 }.is_retryable());
        assert!(!StatsError::Malformed("x".into()).is_retryable());
        assert!(StatsError::attempt_timed_out("stats", Duration::from_secs(5)).is_retryable());
    }

    #[tokio::test]
    async fn test_http_timeout_reports_configured_limit() {
        // Completes the TCP handshake from the backlog but never answers.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut settings = fast_settings(format!("http://{}", silent.local_addr().unwrap()));
        settings.request_timeout = Duration::from_millis(150);
        settings.retry.max_attempts = 1;

        let client = ValidatorStatsClient::new(
            Arc::new(MockChain::new(1)),
            Pubkey::new_unique(),
            settings,
        )
        .unwrap();
        let err = client.fetch_record().await.unwrap_err();
        assert!(
            matches!(err, StatsError::Timeout { timeout_ms: 150, .. }),
            "{err:?}"
        );
        assert!(err.to_string().contains("150"));
    }

    #[tokio::test]
    async fn test_fetch_resolves_stake_and_leader_slots() {
        let vote = Pubkey::new_unique();
        let identity = Pubkey::new_unique();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", format!("/{}", vote).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"activated_stake":"250000.25","total_apy":"6.8","identity":"{}"}}"#,
                identity
            ))
            .expect(1)
            .create_async()
            .await;

        let chain = MockChain::new(500);
        // slot_index is 1000 in the mock chain.
        chain.set_leader_slots(identity, vec![200, 1000, 1004, 2000]);
        let client =
            ValidatorStatsClient::new(Arc::new(chain.clone()), vote, fast_settings(server.url()))
                .unwrap();

        let stats = client.try_fetch().await.unwrap();
        mock.assert_async().await;
        assert_eq!(stats.total_stake, 250000.25);
        assert_eq!(stats.apy, 6.8);
        let epoch_start = stats.current_slot - 1000;
        assert_eq!(
            stats.upcoming_leader_slots,
            vec![epoch_start + 1004, epoch_start + 2000]
        );
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_zeroed() {
        let vote = Pubkey::new_unique();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", format!("/{}", vote).as_str())
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = ValidatorStatsClient::new(
            Arc::new(MockChain::new(10)),
            vote,
            fast_settings(server.url()),
        )
        .unwrap();

        assert_eq!(
            client.fetch_record().await,
            Err(StatsError::Status { status: 503 })
        );
        mock.assert_async().await;
        assert_eq!(client.fetch().await, ValidatorStats::default());
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_retried() {
        let vote = Pubkey::new_unique();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", format!("/{}", vote).as_str())
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .expect(1)
            .create_async()
            .await;

        let client = ValidatorStatsClient::new(
            Arc::new(MockChain::new(10)),
            vote,
            fast_settings(server.url()),
        )
        .unwrap();

        assert!(matches!(
            client.fetch_record().await,
            Err(StatsError::Malformed(_))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_leader_schedule_failure_keeps_stake() {
        let vote = Pubkey::new_unique();
        let identity = Pubkey::new_unique();
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", format!("/{}", vote).as_str())
            .with_status(200)
            .with_body(format!(
                r#"{{"activated_stake":10,"total_apy":-1,"identity":"{}"}}"#,
                identity
            ))
            .create_async()
            .await;

        let chain = MockChain::new(10);
        chain.fail(
            "getLeaderSchedule",
            ChainRpcError::Transport {
                operation: "getLeaderSchedule".to_string(),
                message: "connection reset".to_string(),
            },
        );
        let client =
            ValidatorStatsClient::new(Arc::new(chain), vote, fast_settings(server.url())).unwrap();

        let stats = client.try_fetch().await.unwrap();
        assert_eq!(stats.total_stake, 10.0);
        assert_eq!(stats.apy, 0.0);
        assert!(stats.upcoming_leader_slots.is_empty());
    }
}
