//! Store readiness gate
//!
//! The master cannot serve anything until the backing store answers. The gate
//! asks the store whether its root key exists; any answer at all, "found" or
//! "not found", means the store is up.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use keystone_common::{Addr, Error, Result};

use super::polling::{poll_until_ready, PollBudget};

/// Per-request timeout for a single probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Answer to a root-key existence query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The root key exists
    Found,
    /// The store answered that the key does not exist
    NotFound,
}

/// A probe that did not get a usable answer
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Connection refused, reset, timed out, etc.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with something other than found/not-found
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),
}

/// Existence query against the store's root key
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreProbe: Send + Sync {
    /// Endpoint being probed, for diagnostics
    fn endpoint(&self) -> String;

    /// Ask whether the root key exists
    async fn probe_root(&self) -> std::result::Result<ProbeOutcome, ProbeError>;
}

/// Probes an etcd-compatible store over its v2 HTTP keys API
pub struct EtcdProbe {
    client: reqwest::Client,
    keys_url: String,
}

impl EtcdProbe {
    /// Build a probe for the store at `store`
    pub fn new(store: &Addr) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::store_unreachable(store.url(), 0, format!("failed to build client: {}", e))
            })?;

        Ok(Self {
            client,
            keys_url: format!("{}/v2/keys/", store.url()),
        })
    }
}

#[async_trait]
impl StoreProbe for EtcdProbe {
    fn endpoint(&self) -> String {
        self.keys_url.clone()
    }

    async fn probe_root(&self) -> std::result::Result<ProbeOutcome, ProbeError> {
        let response = self
            .client
            .get(&self.keys_url)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(ProbeOutcome::Found),
            reqwest::StatusCode::NOT_FOUND => Ok(ProbeOutcome::NotFound),
            s => Err(ProbeError::UnexpectedStatus(s.as_u16())),
        }
    }
}

/// Block until `probe` gets an answer, or fail after `budget` attempts
pub async fn wait_for_store(probe: &dyn StoreProbe, budget: PollBudget) -> Result<ProbeOutcome> {
    let endpoint = probe.endpoint();
    tracing::info!(
        endpoint = %endpoint,
        attempts = budget.attempts,
        deadline = ?budget.deadline(),
        "Waiting for store"
    );

    let outcome = poll_until_ready("store", budget, || async move {
        probe.probe_root().await.map_err(|e| e.to_string())
    })
    .await
    .map_err(|exhausted| {
        Error::store_unreachable(&endpoint, exhausted.attempts, exhausted.last_error)
    })?;

    tracing::info!(endpoint = %endpoint, ?outcome, "Store is reachable");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;

    use super::*;

    const FAST: PollBudget = PollBudget {
        attempts: 101,
        interval: Duration::from_millis(0),
    };

    fn refused() -> ProbeError {
        ProbeError::Transport("connection refused".to_string())
    }

    #[tokio::test]
    async fn not_found_counts_as_ready() {
        let mut probe = MockStoreProbe::new();
        probe
            .expect_endpoint()
            .return_const("http://10.0.0.5:4001/v2/keys/".to_string());
        probe
            .expect_probe_root()
            .times(1)
            .returning(|| Ok(ProbeOutcome::NotFound));

        let outcome = wait_for_store(&probe, FAST).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::NotFound);
    }

    #[tokio::test]
    async fn retries_until_store_answers() {
        let mut probe = MockStoreProbe::new();
        let mut seq = Sequence::new();
        probe
            .expect_endpoint()
            .return_const("http://10.0.0.5:4001/v2/keys/".to_string());
        probe
            .expect_probe_root()
            .times(3)
            .in_sequence(&mut seq)
            .returning(|| Err(refused()));
        probe
            .expect_probe_root()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(ProbeOutcome::Found));

        assert_eq!(
            wait_for_store(&probe, FAST).await.unwrap(),
            ProbeOutcome::Found
        );
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let mut probe = MockStoreProbe::new();
        probe
            .expect_endpoint()
            .return_const("http://10.0.0.5:4001/v2/keys/".to_string());
        probe
            .expect_probe_root()
            .times(101)
            .returning(|| Err(refused()));

        let err = wait_for_store(&probe, FAST).await.unwrap_err();
        match err {
            Error::StoreUnreachable {
                endpoint,
                attempts,
                message,
            } => {
                assert_eq!(endpoint, "http://10.0.0.5:4001/v2/keys/");
                assert_eq!(attempts, 101);
                assert!(message.contains("connection refused"));
            }
            other => panic!("expected StoreUnreachable, got {:?}", other),
        }
    }

    #[test]
    fn etcd_probe_targets_keys_root() {
        let store = keystone_common::Config::default_etcd()
            .provided_with("http://10.0.0.5:4001")
            .unwrap();
        let probe = EtcdProbe::new(&store).unwrap();
        assert_eq!(probe.endpoint(), "http://10.0.0.5:4001/v2/keys/");
    }

    /// Story: The store port accepts connections but never answers
    #[tokio::test]
    async fn story_silent_store_is_abandoned_at_deadline() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });

        let store = keystone_common::Config::default_etcd()
            .provided_with(&format!("http://127.0.0.1:{}", port))
            .unwrap();
        let probe = EtcdProbe::new(&store).unwrap();
        let budget = PollBudget {
            attempts: 5,
            interval: Duration::from_millis(50),
        };

        let start = std::time::Instant::now();
        let err = wait_for_store(&probe, budget).await.unwrap_err();

        assert!(start.elapsed() < PROBE_TIMEOUT);
        assert!(matches!(err, Error::StoreUnreachable { .. }));
    }
}
