//! Storage endpoints and their activation check.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::error::BackendError;

/// Default number of activation attempts.
pub const DEFAULT_PROBE_LIMIT: u32 = 10;

/// Default pause between activation attempts.
pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_secs(600);

/// An addressable storage location owned by one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub base_dir: Option<PathBuf>,
    /// Once false, the owning backend stays not-ready for the run.
    pub active: bool,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, base_dir: Option<PathBuf>) -> Self {
        Self {
            id: id.into(),
            base_dir,
            active: false,
        }
    }
}

/// One look at whether an endpoint's service is accepting work.
#[async_trait]
pub trait ActivationProbe: Send + Sync {
    async fn probe(&self) -> Result<bool, BackendError>;
}

#[derive(Debug, Deserialize)]
struct ServiceStatus {
    status: String,
}

/// Reads `{"status": "up"}` style JSON from a status URL.
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpStatusProbe {
    pub fn new(url: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ActivationProbe for HttpStatusProbe {
    async fn probe(&self) -> Result<bool, BackendError> {
        debug!("Checking {}", self.url);
        let status: ServiceStatus = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        warn!("Archive server is {}", status.status);
        Ok(status.status == "up")
    }
}

/// How hard to try before declaring an endpoint inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationPolicy {
    /// Operator override: skip probing entirely.
    pub assume_ready: bool,
    pub limit: u32,
    pub delay: Duration,
}

impl Default for ActivationPolicy {
    fn default() -> Self {
        Self {
            assume_ready: false,
            limit: DEFAULT_PROBE_LIMIT,
            delay: DEFAULT_PROBE_DELAY,
        }
    }
}

impl ActivationPolicy {
    pub fn with_assume_ready(mut self, assume_ready: bool) -> Self {
        self.assume_ready = assume_ready;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Probes until the service is up or the attempt limit is reached.
///
/// Probe errors count as "not up".
pub async fn activate(probe: &dyn ActivationProbe, policy: &ActivationPolicy) -> bool {
    if policy.assume_ready {
        return true;
    }
    let limit = policy.limit.max(1);
    for attempt in 1..=limit {
        match probe.probe().await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => debug!("Status probe failed: {}", e),
        }
        if attempt < limit {
            warn!("Waiting for archive to come up. Retrying [{}/{}].", attempt, limit);
            tokio::time::sleep(policy.delay).await;
        }
    }
    error!(critical = true, "Archive not up after {} tries. Giving up!", limit);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports "up" from the given attempt onwards.
    struct CountingProbe {
        up_from: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ActivationProbe for CountingProbe {
        async fn probe(&self) -> Result<bool, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.up_from {
                Ok(true)
            } else {
                Err(BackendError::NotReady("down".to_string()))
            }
        }
    }

    fn fast(limit: u32) -> ActivationPolicy {
        ActivationPolicy::default()
            .with_limit(limit)
            .with_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_assume_ready_skips_probe() {
        let probe = CountingProbe {
            up_from: u32::MAX,
            calls: AtomicU32::new(0),
        };
        assert!(activate(&probe, &fast(3).with_assume_ready(true)).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retries_until_up() {
        let probe = CountingProbe {
            up_from: 3,
            calls: AtomicU32::new(0),
        };
        assert!(activate(&probe, &fast(5)).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_at_limit() {
        let probe = CountingProbe {
            up_from: 10,
            calls: AtomicU32::new(0),
        };
        assert!(!activate(&probe, &fast(4)).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }
}
