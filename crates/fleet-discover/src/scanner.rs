//! Nmap OS fingerprinting.
//!
//! Runs `nmap -O` against one live target as a child process via
//! `tokio::process::Command` and reduces the XML output to the hints the
//! classifier consumes.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use crate::error::{DiscoverError, Result};
use crate::nmap_xml;

/// What OS detection suggested about a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OsHints {
    pub os_family: Option<String>,
    pub os_version: Option<String>,
    /// The osclass device type, or the OS match name when nmap only says
    /// "general purpose".
    pub device_type: Option<String>,
    /// Only present when the target shares a layer-2 segment with the scanner.
    pub mac: Option<String>,
    /// Reverse-DNS name.
    pub hostname: Option<String>,
}

#[async_trait]
pub trait OsFingerprinter: Send + Sync {
    async fn fingerprint(&self, target: IpAddr, open_ports: &BTreeSet<u16>) -> Result<OsHints>;
}

/// Wrapper around the nmap binary.
pub struct NmapFingerprinter {
    nmap_path: String,
    timeout: Duration,
}

impl NmapFingerprinter {
    pub fn new(nmap_path: &str, timeout: Duration) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
            timeout,
        }
    }

    /// Verify nmap is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .output()
            .await
            .map_err(|_| DiscoverError::NmapNotFound {
                path: self.nmap_path.clone(),
            })?;

        String::from_utf8(output.stdout).map_err(|e| DiscoverError::XmlParse(e.to_string()))
    }

    /// nmap arguments for one target. Known-open ports are passed so OS
    /// detection skips its own port discovery.
    fn args(&self, target: IpAddr, open_ports: &BTreeSet<u16>) -> Vec<String> {
        let mut args: Vec<String> = ["-O", "-Pn", "--osscan-guess", "--max-os-tries", "1"]
            .into_iter()
            .map(String::from)
            .collect();
        args.push("--host-timeout".to_string());
        args.push(format!("{}s", self.timeout.as_secs().max(1)));
        if !open_ports.is_empty() {
            let ports: Vec<String> = open_ports.iter().map(u16::to_string).collect();
            args.push("-p".to_string());
            args.push(ports.join(","));
        }
        if target.is_ipv6() {
            args.push("-6".to_string());
        }
        args.extend(["-oX", "-", "--noninteractive"].map(String::from));
        args.push(target.to_string());
        args
    }
}

/// Reduce parsed nmap output to hints for `target`.
pub fn hints_from_run(run: &nmap_xml::NmapRun) -> OsHints {
    let Some(host) = run.hosts.iter().find(|h| h.is_up()) else {
        return OsHints::default();
    };
    OsHints {
        os_family: host.os_family().map(str::to_string),
        os_version: host.os_name().map(str::to_string),
        device_type: host.device_type().or(host.os_name()).map(str::to_string),
        mac: host.mac().map(str::to_string),
        hostname: host.hostname().map(str::to_string),
    }
}

#[async_trait]
impl OsFingerprinter for NmapFingerprinter {
    async fn fingerprint(&self, target: IpAddr, open_ports: &BTreeSet<u16>) -> Result<OsHints> {
        let start = Instant::now();
        tracing::debug!(%target, "Starting nmap OS detection");

        let output = Command::new(&self.nmap_path)
            .args(self.args(target, open_ports))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DiscoverError::NmapNotFound {
                path: format!("{}: {e}", self.nmap_path),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(DiscoverError::NmapFailed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let run = nmap_xml::parse_nmap_xml(&output.stdout)?;
        let hints = hints_from_run(&run);

        tracing::debug!(
            %target,
            os = ?hints.os_version,
            device_type = ?hints.device_type,
            duration_ms = start.elapsed().as_millis(),
            "Nmap OS detection complete"
        );

        Ok(hints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_carry_known_ports_and_xml_output() {
        let scanner = NmapFingerprinter::new("nmap", Duration::from_secs(60));
        let args = scanner.args("10.0.1.40".parse().unwrap(), &BTreeSet::from([443, 22]));

        assert_eq!(&args[..2], ["-O", "-Pn"]);
        let p = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[p + 1], "22,443");
        assert!(args.windows(2).any(|w| w == ["-oX", "-"]));
        assert_eq!(args.last().map(String::as_str), Some("10.0.1.40"));
        assert!(!args.contains(&"-6".to_string()));
    }

    #[test]
    fn hints_come_from_the_live_host() {
        let xml = r#"<nmaprun>
  <host>
    <status state="up"/>
    <address addr="10.0.1.1" addrtype="ipv4"/>
    <address addr="AA:BB:CC:DD:EE:01" addrtype="mac"/>
    <os>
      <osmatch name="Cisco IOS 15.2" accuracy="96">
        <osclass type="switch" vendor="Cisco" osfamily="IOS" osgen="15.X"/>
      </osmatch>
    </os>
  </host>
</nmaprun>"#;
        let run = nmap_xml::parse_nmap_xml(xml.as_bytes()).unwrap();
        let hints = hints_from_run(&run);

        assert_eq!(hints.os_family.as_deref(), Some("IOS"));
        assert_eq!(hints.os_version.as_deref(), Some("Cisco IOS 15.2"));
        assert_eq!(hints.device_type.as_deref(), Some("switch"));
        assert_eq!(hints.mac.as_deref(), Some("AA:BB:CC:DD:EE:01"));
        assert_eq!(hints.hostname, None);
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let scanner = NmapFingerprinter::new("/nonexistent/nmap", Duration::from_secs(1));
        let err = scanner
            .fingerprint("127.0.0.1".parse().unwrap(), &BTreeSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoverError::NmapNotFound { .. }));
    }
}
