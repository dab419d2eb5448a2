//! Nmap XML output deserialization.
//!
//! Only the parts OS detection needs are modelled: host status, addresses,
//! hostnames, and the `<os>` block with its `<osclass>` children.

use serde::Deserialize;

use crate::error::{DiscoverError, Result};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    #[serde(rename = "@args")]
    pub args: Option<String>,
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
}

/// A single host from scan results.
#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub hostnames: Option<Hostnames>,
    pub os: Option<OsMatches>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
    #[serde(rename = "@vendor")]
    pub vendor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub hostnames: Vec<Hostname>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatches {
    #[serde(rename = "osmatch", default)]
    pub matches: Vec<OsMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatch {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@accuracy")]
    pub accuracy: Option<u8>,
    #[serde(rename = "osclass", default)]
    pub classes: Vec<OsClass>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsClass {
    /// Device type, e.g. "general purpose", "printer", "switch".
    #[serde(rename = "@type")]
    pub device_type: Option<String>,
    #[serde(rename = "@vendor")]
    pub vendor: Option<String>,
    #[serde(rename = "@osfamily")]
    pub os_family: Option<String>,
    #[serde(rename = "@osgen")]
    pub os_gen: Option<String>,
}

impl NmapHost {
    /// Extract the MAC address, if present.
    pub fn mac(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == "mac")
            .map(|a| a.addr.as_str())
    }

    /// Extract the first hostname, if present.
    pub fn hostname(&self) -> Option<&str> {
        self.hostnames
            .as_ref()
            .and_then(|hn| hn.hostnames.first())
            .map(|h| h.name.as_str())
    }

    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }

    /// Best OS match (nmap lists them by descending accuracy).
    pub fn best_match(&self) -> Option<&OsMatch> {
        self.os.as_ref().and_then(|os| os.matches.first())
    }

    pub fn os_name(&self) -> Option<&str> {
        self.best_match().map(|m| m.name.as_str())
    }

    /// OS family from the best match's first class.
    pub fn os_family(&self) -> Option<&str> {
        self.best_match()?
            .classes
            .iter()
            .find_map(|c| c.os_family.as_deref())
    }

    /// Device type of the best match. "general purpose" says nothing about
    /// the device and is skipped.
    pub fn device_type(&self) -> Option<&str> {
        self.best_match()?
            .classes
            .iter()
            .filter_map(|c| c.device_type.as_deref())
            .find(|t| !t.eq_ignore_ascii_case("general purpose"))
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_nmap_xml(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| DiscoverError::XmlParse(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OS_SCAN_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -O -Pn -p 22,80,443 10.0.1.40" startstr="Mon Feb 24 10:05:00 2026">
  <host>
    <status state="up" reason="user-set"/>
    <address addr="10.0.1.40" addrtype="ipv4"/>
    <address addr="AA:BB:CC:DD:EE:40" addrtype="mac" vendor="Dell"/>
    <hostnames>
      <hostname name="build-01.corp.local" type="PTR"/>
    </hostnames>
    <os>
      <osmatch name="Linux 5.15" accuracy="95">
        <osclass type="general purpose" vendor="Linux" osfamily="Linux" osgen="5.X" accuracy="95"/>
      </osmatch>
      <osmatch name="Linux 6.1" accuracy="90">
        <osclass type="general purpose" vendor="Linux" osfamily="Linux" osgen="6.X" accuracy="90"/>
      </osmatch>
    </os>
  </host>
</nmaprun>"#;

    const PRINTER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -O 10.0.1.80">
  <host>
    <status state="up"/>
    <address addr="10.0.1.80" addrtype="ipv4"/>
    <os>
      <osmatch name="HP LaserJet M402 printer" accuracy="98">
        <osclass type="printer" vendor="HP" osfamily="embedded" accuracy="98"/>
      </osmatch>
    </os>
  </host>
</nmaprun>"#;

    #[test]
    fn test_parse_os_scan() {
        let result = parse_nmap_xml(OS_SCAN_XML.as_bytes()).unwrap();
        assert_eq!(result.hosts.len(), 1);

        let host = &result.hosts[0];
        assert!(host.is_up());
        assert_eq!(host.mac(), Some("AA:BB:CC:DD:EE:40"));
        assert_eq!(host.hostname(), Some("build-01.corp.local"));
        assert_eq!(host.os_name(), Some("Linux 5.15"));
        assert_eq!(host.os_family(), Some("Linux"));
        assert_eq!(host.best_match().and_then(|m| m.accuracy), Some(95));
        assert_eq!(host.device_type(), None);
    }

    #[test]
    fn test_device_type_from_osclass() {
        let result = parse_nmap_xml(PRINTER_XML.as_bytes()).unwrap();
        let host = &result.hosts[0];
        assert_eq!(host.device_type(), Some("printer"));
        assert_eq!(host.os_family(), Some("embedded"));
        assert_eq!(host.mac(), None);
        assert_eq!(host.hostname(), None);
    }

    #[test]
    fn test_parse_empty_scan() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -O 192.168.99.7">
  <runstats>
    <finished elapsed="1.00"/>
  </runstats>
</nmaprun>"#;

        let result = parse_nmap_xml(xml.as_bytes()).unwrap();
        assert!(result.hosts.is_empty());
    }

    #[test]
    fn test_truncated_output_is_a_parse_error() {
        assert!(matches!(
            parse_nmap_xml(b"<nmaprun><host><status state=\"up\"/>"),
            Err(DiscoverError::XmlParse(_))
        ));
    }
}
