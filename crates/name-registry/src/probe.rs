//! Liveness probing for registered providers
//!
//! The registry never expires advertisements on a timer; eviction is driven
//! by an explicit status check, which probes the provider's listener and
//! treats any transport failure or an expired deadline as unreachable.

use crate::models::ServiceProviderInfo;
use async_net::TcpStream;
use async_trait::async_trait;
use futures::future::{self, Either};
use futures::pin_mut;
use smol::Timer;
use std::time::Duration;
use tracing::debug;

/// Outcome of a liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The provider's listener answered
    Reachable,
    /// Connection failed, was refused, or the deadline elapsed
    Unreachable,
}

/// Trait for provider reachability checks
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Probe the provider's listener address
    async fn probe(&self, provider: &ServiceProviderInfo) -> ProbeOutcome;
}

/// TCP connect probe with a bounded deadline
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    /// Create a prober with the given deadline
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl LivenessProbe for TcpProber {
    async fn probe(&self, provider: &ServiceProviderInfo) -> ProbeOutcome {
        let connect = TcpStream::connect((provider.host.as_str(), provider.port));
        let deadline = Timer::after(self.timeout);
        pin_mut!(connect);
        pin_mut!(deadline);

        match future::select(connect, deadline).await {
            Either::Left((Ok(_), _)) => {
                debug!("Probe of {} succeeded", provider.address());
                ProbeOutcome::Reachable
            }
            Either::Left((Err(e), _)) => {
                debug!("Probe of {} failed: {}", provider.address(), e);
                ProbeOutcome::Unreachable
            }
            Either::Right(_) => {
                debug!(
                    "Probe of {} timed out after {:?}",
                    provider.address(),
                    self.timeout
                );
                ProbeOutcome::Unreachable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnvironmentInfo;

    #[smol_potat::test]
    async fn probe_reaches_live_listener() {
        let listener = async_net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _accept_task = smol::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let provider =
            ServiceProviderInfo::new("127.0.0.1", addr.port(), EnvironmentInfo::current());
        let prober = TcpProber::new(Duration::from_secs(2));
        assert_eq!(prober.probe(&provider).await, ProbeOutcome::Reachable);
    }

    #[smol_potat::test]
    async fn probe_reports_dead_listener() {
        // Bind then drop to get a port nothing listens on
        let listener = async_net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider =
            ServiceProviderInfo::new("127.0.0.1", addr.port(), EnvironmentInfo::current());
        let prober = TcpProber::new(Duration::from_secs(2));
        assert_eq!(prober.probe(&provider).await, ProbeOutcome::Unreachable);
    }
}
