//! Reachability and port probing.
//!
//! Liveness is an optional ICMP echo followed by TCP connects to a short list
//! of common ports; a refused connection proves the host is up. Live targets
//! then get a bounded-concurrency connect scan of the candidate ports.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};

use fleet_core::{FleetError, PipelineStage};

use crate::config::DiscoverConfig;

/// What the probe learned about one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub alive: bool,
    pub open_ports: BTreeSet<u16>,
    /// The port scan was cut off by the deadline.
    pub truncated: bool,
}

impl ProbeReport {
    pub fn dead() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `target`, finishing by `deadline`.
    ///
    /// A target that does not answer the liveness check in time is dead, not
    /// an error. [`FleetError::ProbeTimeout`] means the deadline expired
    /// before reachability was known.
    async fn probe(&self, target: IpAddr, deadline: Instant) -> Result<ProbeReport, FleetError>;
}

/// Outcome of a single TCP connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortState {
    Open,
    /// Connection refused: the port is closed but the host answered.
    Closed,
    /// Timed out or unreachable.
    Silent,
}

async fn connect(target: IpAddr, port: u16, limit: Duration) -> PortState {
    match timeout(limit, TcpStream::connect((target, port))).await {
        Ok(Ok(_stream)) => PortState::Open,
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => PortState::Closed,
        Ok(Err(_)) | Err(_) => PortState::Silent,
    }
}

/// Connect-scan prober.
pub struct TcpProber {
    liveness_ports: Vec<u16>,
    candidate_ports: Vec<u16>,
    liveness_timeout: Duration,
    port_timeout: Duration,
    concurrency: usize,
    /// `ping` binary, when ICMP is enabled.
    ping_path: Option<String>,
}

impl TcpProber {
    pub fn new(config: &DiscoverConfig) -> Self {
        Self {
            liveness_ports: config.liveness_ports.clone(),
            candidate_ports: config.candidate_ports.clone(),
            liveness_timeout: Duration::from_millis(config.liveness_timeout_ms),
            port_timeout: Duration::from_millis(config.port_timeout_ms),
            concurrency: config.port_scan_concurrency.max(1),
            ping_path: config.icmp.then(|| config.ping_path.clone()),
        }
    }

    async fn ping(&self, path: &str, target: IpAddr) -> bool {
        let wait_secs = self.liveness_timeout.as_secs().max(1).to_string();
        let child = Command::new(path)
            .args(["-c", "1", "-W", wait_secs.as_str()])
            .arg(target.to_string())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .status();

        match timeout(self.liveness_timeout + Duration::from_secs(1), child).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, path, "ping unavailable, relying on TCP liveness");
                false
            }
            Err(_) => false,
        }
    }

    /// Returns liveness plus any ports found open along the way.
    async fn liveness(&self, target: IpAddr) -> (bool, BTreeSet<u16>) {
        if let Some(path) = &self.ping_path {
            if self.ping(path, target).await {
                return (true, BTreeSet::new());
            }
        }

        let mut set = JoinSet::new();
        for &port in &self.liveness_ports {
            let limit = self.liveness_timeout;
            set.spawn(async move { (port, connect(target, port, limit).await) });
        }

        let mut open = BTreeSet::new();
        let mut alive = false;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((port, PortState::Open)) => {
                    open.insert(port);
                    alive = true;
                }
                Ok((_, PortState::Closed)) => alive = true,
                Ok((_, PortState::Silent)) => {}
                Err(e) => tracing::warn!(error = %e, "liveness task failed"),
            }
        }
        (alive, open)
    }

    async fn scan_ports(
        &self,
        target: IpAddr,
        skip: &BTreeSet<u16>,
        deadline: Instant,
    ) -> (BTreeSet<u16>, bool) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();
        for &port in self.candidate_ports.iter().filter(|p| !skip.contains(p)) {
            let permits = Arc::clone(&permits);
            let limit = self.port_timeout;
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                Some((port, connect(target, port, limit).await))
            });
        }

        let mut open = BTreeSet::new();
        loop {
            match timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok(Some((port, PortState::Open))))) => {
                    open.insert(port);
                }
                Ok(Some(_)) => {}
                Ok(None) => return (open, false),
                Err(_) => {
                    set.abort_all();
                    return (open, true);
                }
            }
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, target: IpAddr, deadline: Instant) -> Result<ProbeReport, FleetError> {
        let start = std::time::Instant::now();

        let (alive, mut open_ports) = timeout_at(deadline, self.liveness(target))
            .await
            .map_err(|_| FleetError::Cancelled {
                target: target.to_string(),
                stage: PipelineStage::Probe,
            })?;

        if !alive {
            tracing::debug!(%target, "No liveness response");
            return Ok(ProbeReport::dead());
        }

        let (scanned, truncated) = self.scan_ports(target, &open_ports, deadline).await;
        open_ports.extend(scanned);

        tracing::debug!(
            %target,
            open_ports = ?open_ports,
            truncated,
            duration_ms = start.elapsed().as_millis(),
            "Probe complete"
        );

        Ok(ProbeReport {
            alive,
            open_ports,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn prober(liveness_ports: Vec<u16>, candidate_ports: Vec<u16>) -> TcpProber {
        TcpProber::new(&DiscoverConfig {
            liveness_ports,
            candidate_ports,
            liveness_timeout_ms: 300,
            port_timeout_ms: 300,
            icmp: false,
            ..DiscoverConfig::default()
        })
    }

    /// A local port with nothing listening on it.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn open_ports_are_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port().await;

        let report = prober(vec![closed], vec![open, closed])
            .probe("127.0.0.1".parse().unwrap(), Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();

        assert!(report.alive);
        assert!(!report.truncated);
        assert_eq!(report.open_ports, BTreeSet::from([open]));
    }

    #[tokio::test]
    async fn refused_connection_counts_as_alive() {
        let closed = closed_port().await;
        let report = prober(vec![closed], vec![])
            .probe("127.0.0.1".parse().unwrap(), Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();

        assert!(report.alive);
        assert!(report.open_ports.is_empty());
    }

    #[tokio::test]
    async fn silent_target_is_dead_not_an_error() {
        // TEST-NET-1 is never routed.
        let report = prober(vec![80, 443], vec![22])
            .probe("192.0.2.1".parse().unwrap(), Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(report, ProbeReport::dead());
    }

    #[tokio::test]
    async fn expired_deadline_cancels_the_probe() {
        let err = prober(vec![80], vec![])
            .probe("192.0.2.1".parse().unwrap(), Instant::now())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FleetError::Cancelled {
                stage: PipelineStage::Probe,
                ..
            }
        ));
    }
}
