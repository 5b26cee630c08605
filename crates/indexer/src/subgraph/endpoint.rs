//! Subgraph endpoint selection and failover.

use super::EndpointProbe;
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Owns the ordered list of subgraph endpoints and which one is in use.
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone)]
pub struct EndpointService {
    endpoints: Arc<Vec<String>>,
    current: Arc<RwLock<usize>>,
}

impl EndpointService {
    /// Create a service starting at the first endpoint.
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        if endpoints.is_empty() {
            bail!("At least one subgraph endpoint is required");
        }

        Ok(Self {
            endpoints: Arc::new(endpoints),
            current: Arc::new(RwLock::new(0)),
        })
    }

    /// All configured endpoints in failover order.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// The endpoint requests should go to.
    pub async fn current_endpoint(&self) -> String {
        let index = *self.current.read().await;
        self.endpoints[index].clone()
    }

    /// Switch to `url`, which must be one of the configured endpoints.
    pub async fn set_current_endpoint(&self, url: &str) -> Result<()> {
        let Some(index) = self.endpoints.iter().position(|e| e == url) else {
            bail!("Unknown subgraph endpoint: {}", url);
        };

        let mut current = self.current.write().await;
        if *current != index {
            info!("Switching subgraph endpoint to {}", url);
            *current = index;
        }
        Ok(())
    }

    /// Advance to the next endpoint, wrapping around. Returns the new one.
    pub async fn failover(&self) -> String {
        let mut current = self.current.write().await;
        let previous = *current;
        *current = (previous + 1) % self.endpoints.len();

        if *current != previous {
            warn!(
                "Failing over from subgraph endpoint {} to {}",
                self.endpoints[previous], self.endpoints[*current]
            );
        }
        self.endpoints[*current].clone()
    }

    /// Probe the current endpoint; if it is unhealthy, switch to the first
    /// healthy one in order after it.
    ///
    /// Returns the endpoint in use afterwards, or an error if none responds.
    pub async fn check_health(&self, probe: &dyn EndpointProbe) -> Result<String> {
        let start = *self.current.read().await;
        let count = self.endpoints.len();

        for offset in 0..count {
            let index = (start + offset) % count;
            let endpoint = &self.endpoints[index];

            match probe.probe(endpoint).await {
                Ok(()) => {
                    if offset > 0 {
                        self.set_current_endpoint(endpoint).await?;
                    } else {
                        debug!("Subgraph endpoint {} healthy", endpoint);
                    }
                    return Ok(endpoint.clone());
                }
                Err(e) => {
                    warn!("Subgraph endpoint {} unhealthy: {:#}", endpoint, e);
                }
            }
        }

        bail!("No healthy subgraph endpoint among {} configured", count)
    }

    /// Run health checks forever on a fixed interval.
    pub async fn run_health_checks(self, probe: Arc<dyn EndpointProbe>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = self.check_health(probe.as_ref()).await {
                error!("Subgraph health check failed: {:#}", e);
            }
        }
    }
}
