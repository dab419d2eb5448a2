//! Device classification from fingerprint hints, OS family, open ports, and
//! hostname.
//!
//! Signals are consulted strongest first and the first that matches decides:
//! a fingerprinting tool's device-type hint, then OS family with open ports,
//! then ports alone, then hostname patterns.

use std::collections::BTreeSet;

use fleet_core::{Classification, DeviceType, OsFamily};

const HINT_CONFIDENCE: f64 = 0.90;

/// Directory-service ports: Kerberos, LDAP, LDAPS, global catalog.
const DIRECTORY_PORTS: [u16; 5] = [88, 389, 636, 3268, 3269];
/// Ports served by dedicated server roles (mail, DNS, web, databases).
const SERVICE_PORTS: [u16; 12] = [25, 53, 80, 443, 1433, 1521, 3306, 5432, 6379, 8080, 8443, 27017];
const WINDOWS_PORTS: [u16; 5] = [135, 139, 445, 3389, 5985];
const WEB_PORTS: [u16; 4] = [80, 443, 8080, 8443];
const DATABASE_PORTS: [u16; 6] = [1433, 1521, 3306, 5432, 6379, 27017];
const PRINTER_PORTS: [u16; 3] = [515, 631, 9100];
const SNMP_TELNET_PORTS: [u16; 3] = [23, 161, 162];
/// Router/switch management: SSH, telnet, SNMP, NETCONF, MikroTik API.
const MANAGEMENT_PORTS: [u16; 6] = [22, 23, 161, 162, 830, 8291];
const SSH: u16 = 22;
const RDP: u16 = 3389;
const SMB: u16 = 445;

/// Fingerprint-tool device types, checked in order. The first entry whose
/// keyword occurs in the lowercased hint wins.
const HINTS: &[(&str, DeviceType)] = &[
    ("printer", DeviceType::Printer),
    ("print server", DeviceType::Printer),
    ("switch", DeviceType::NetworkDevice),
    ("router", DeviceType::NetworkDevice),
    ("firewall", DeviceType::NetworkDevice),
    ("wap", DeviceType::NetworkDevice),
    ("access point", DeviceType::NetworkDevice),
    ("bridge", DeviceType::NetworkDevice),
    ("load balancer", DeviceType::NetworkDevice),
    ("proxy server", DeviceType::NetworkDevice),
    ("terminal server", DeviceType::NetworkDevice),
    ("windows server", DeviceType::Server),
    ("domain controller", DeviceType::Server),
    ("storage", DeviceType::Server),
    ("server", DeviceType::Server),
    ("workstation", DeviceType::Workstation),
    ("desktop", DeviceType::Workstation),
    ("laptop", DeviceType::Workstation),
    ("windows 7", DeviceType::Workstation),
    ("windows 8", DeviceType::Workstation),
    ("windows 10", DeviceType::Workstation),
    ("windows 11", DeviceType::Workstation),
    ("mac os x", DeviceType::Workstation),
    ("macos", DeviceType::Workstation),
];

const HOSTNAME_PATTERNS: &[(&str, DeviceType, f64)] = &[
    ("srv", DeviceType::Server, 0.40),
    ("dc-", DeviceType::Server, 0.40),
    ("sql", DeviceType::Server, 0.40),
    ("ws-", DeviceType::Workstation, 0.40),
    ("pc-", DeviceType::Workstation, 0.40),
    ("desktop", DeviceType::Workstation, 0.40),
    ("laptop", DeviceType::Workstation, 0.40),
    ("switch", DeviceType::NetworkDevice, 0.35),
    ("router", DeviceType::NetworkDevice, 0.35),
    ("fw-", DeviceType::NetworkDevice, 0.35),
];

fn any_open(ports: &BTreeSet<u16>, set: &[u16]) -> bool {
    set.iter().any(|p| ports.contains(p))
}

fn listed(ports: &BTreeSet<u16>, set: &[u16]) -> String {
    let hits: Vec<String> = set
        .iter()
        .filter(|p| ports.contains(p))
        .map(u16::to_string)
        .collect();
    hits.join("/")
}

fn decided(device_type: DeviceType, confidence: f64, reasoning: String) -> Classification {
    Classification {
        device_type,
        confidence,
        reasoning,
    }
}

/// OS family from the family hint, falling back to the version string.
pub fn os_family(os_family_hint: Option<&str>, os_version: Option<&str>) -> OsFamily {
    let from_hint = os_family_hint.map(OsFamily::from_text).unwrap_or_default();
    if from_hint != OsFamily::Unknown {
        return from_hint;
    }
    os_version.map(OsFamily::from_text).unwrap_or_default()
}

/// Guess a family from open ports. Used to pick a collector, never stored.
pub fn infer_family_from_ports(open_ports: &BTreeSet<u16>) -> OsFamily {
    if any_open(open_ports, &WINDOWS_PORTS) {
        OsFamily::Windows
    } else if open_ports.contains(&SSH) {
        OsFamily::Linux
    } else {
        OsFamily::Unknown
    }
}

/// Classify a device.
pub fn classify(
    os_family_hint: Option<&str>,
    device_type_hint: Option<&str>,
    os_version: Option<&str>,
    open_ports: &BTreeSet<u16>,
    hostname: Option<&str>,
) -> Classification {
    if let Some(c) = device_type_hint.and_then(by_hint) {
        return c;
    }
    let family = os_family(os_family_hint, os_version);
    by_family(family, open_ports)
        .or_else(|| by_ports(open_ports))
        .or_else(|| hostname.and_then(by_hostname))
        .unwrap_or_else(Classification::unknown)
}

fn by_hint(hint: &str) -> Option<Classification> {
    let lower = hint.to_lowercase();
    let (keyword, device_type) = HINTS.iter().find(|(k, _)| lower.contains(k))?;
    Some(decided(
        *device_type,
        HINT_CONFIDENCE,
        format!("fingerprint hint '{hint}' matches '{keyword}'"),
    ))
}

fn by_family(family: OsFamily, ports: &BTreeSet<u16>) -> Option<Classification> {
    match family {
        OsFamily::Windows => Some(windows(ports)),
        OsFamily::Linux | OsFamily::Unix => Some(unix(family, ports)),
        OsFamily::Embedded => embedded(ports),
        OsFamily::Unknown => None,
    }
}

fn windows(ports: &BTreeSet<u16>) -> Classification {
    if any_open(ports, &DIRECTORY_PORTS) {
        return decided(
            DeviceType::Server,
            0.80,
            format!(
                "Windows with directory service ports {}",
                listed(ports, &DIRECTORY_PORTS)
            ),
        );
    }
    if any_open(ports, &SERVICE_PORTS) {
        return decided(
            DeviceType::Server,
            0.75,
            format!("Windows serving ports {}", listed(ports, &SERVICE_PORTS)),
        );
    }
    if ports.contains(&RDP) && ports.contains(&SMB) {
        return decided(
            DeviceType::Server,
            0.70,
            "Windows exposing remote desktop and file sharing".to_string(),
        );
    }
    if any_open(ports, &WINDOWS_PORTS) {
        return decided(
            DeviceType::Workstation,
            0.65,
            format!(
                "Windows with workstation ports {} only",
                listed(ports, &WINDOWS_PORTS)
            ),
        );
    }
    decided(
        DeviceType::Workstation,
        0.60,
        "Windows without distinguishing ports".to_string(),
    )
}

fn unix(family: OsFamily, ports: &BTreeSet<u16>) -> Classification {
    let ssh = ports.contains(&SSH);
    let services = any_open(ports, &SERVICE_PORTS);
    match (ssh, services) {
        (true, true) => decided(
            DeviceType::Server,
            0.75,
            format!(
                "{family} with SSH and service ports {}",
                listed(ports, &SERVICE_PORTS)
            ),
        ),
        (false, true) => decided(
            DeviceType::Server,
            0.70,
            format!("{family} serving ports {}", listed(ports, &SERVICE_PORTS)),
        ),
        (true, false) => decided(
            DeviceType::Server,
            0.65,
            format!("{family} reachable over SSH only"),
        ),
        (false, false) => decided(
            DeviceType::Workstation,
            0.60,
            format!("{family} without listening services"),
        ),
    }
}

fn embedded(ports: &BTreeSet<u16>) -> Option<Classification> {
    if any_open(ports, &PRINTER_PORTS) {
        return Some(decided(
            DeviceType::Printer,
            0.70,
            format!("embedded OS with printing ports {}", listed(ports, &PRINTER_PORTS)),
        ));
    }
    if any_open(ports, &MANAGEMENT_PORTS) {
        return Some(decided(
            DeviceType::NetworkDevice,
            0.75,
            format!(
                "embedded OS with management ports {}",
                listed(ports, &MANAGEMENT_PORTS)
            ),
        ));
    }
    None
}

/// Port-only rules, most confident first.
fn by_ports(ports: &BTreeSet<u16>) -> Option<Classification> {
    let rules: [(&[u16], DeviceType, f64, &str); 4] = [
        (&PRINTER_PORTS, DeviceType::Printer, 0.70, "printing"),
        (&DATABASE_PORTS, DeviceType::Server, 0.65, "database"),
        (&WEB_PORTS, DeviceType::Server, 0.60, "web"),
        (&SNMP_TELNET_PORTS, DeviceType::NetworkDevice, 0.55, "SNMP/telnet"),
    ];
    rules
        .iter()
        .find(|(set, ..)| any_open(ports, set))
        .map(|(set, device_type, confidence, label)| {
            decided(
                *device_type,
                *confidence,
                format!("{label} ports {} with unknown OS", listed(ports, set)),
            )
        })
}

fn by_hostname(hostname: &str) -> Option<Classification> {
    let lower = hostname.to_lowercase();
    HOSTNAME_PATTERNS
        .iter()
        .find(|(pattern, ..)| lower.contains(pattern))
        .map(|(pattern, device_type, confidence)| {
            decided(
                *device_type,
                *confidence,
                format!("hostname '{hostname}' contains '{pattern}'"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(list: &[u16]) -> BTreeSet<u16> {
        list.iter().copied().collect()
    }

    #[test]
    fn windows_with_rdp_and_smb_is_a_server() {
        let c = classify(Some("Windows"), None, None, &ports(&[135, 139, 445, 3389]), None);
        assert_eq!(c.device_type, DeviceType::Server);
        assert!((0.70..=0.80).contains(&c.confidence));
    }

    #[test]
    fn linux_with_ssh_only_leans_server() {
        let c = classify(Some("Linux"), None, None, &ports(&[22]), None);
        assert_eq!(c.device_type, DeviceType::Server);
        assert!((0.65..=0.75).contains(&c.confidence));
    }

    #[test]
    fn hint_beats_everything_else() {
        let c = classify(
            Some("Linux"),
            Some("Microsoft Windows Server 2019"),
            None,
            &ports(&[22, 80]),
            Some("ws-042"),
        );
        assert_eq!(c.device_type, DeviceType::Server);
        assert_eq!(c.confidence, HINT_CONFIDENCE);

        let printer = classify(None, Some("printer"), None, &ports(&[]), None);
        assert_eq!(printer.device_type, DeviceType::Printer);
    }

    #[test]
    fn unknown_hint_falls_through() {
        let c = classify(None, Some("Linux 5.15"), None, &ports(&[22]), None);
        assert_eq!(c.device_type, DeviceType::Server);
        assert_eq!(c.confidence, 0.65);
    }

    #[test]
    fn domain_controller_ports() {
        let c = classify(Some("Windows"), None, None, &ports(&[53, 88, 389, 445]), None);
        assert_eq!(c.device_type, DeviceType::Server);
        assert_eq!(c.confidence, 0.80);
    }

    #[test]
    fn bare_windows_is_a_workstation() {
        let c = classify(None, None, Some("Microsoft Windows 10 Pro"), &ports(&[]), None);
        assert_eq!(c.device_type, DeviceType::Workstation);
        assert_eq!(c.confidence, 0.60);

        let smb = classify(Some("Windows"), None, None, &ports(&[135, 445]), None);
        assert_eq!(smb.device_type, DeviceType::Workstation);
        assert_eq!(smb.confidence, 0.65);
    }

    #[test]
    fn embedded_with_management_ports_is_network_device() {
        let c = classify(Some("Cisco IOS"), None, None, &ports(&[22, 161]), None);
        assert_eq!(c.device_type, DeviceType::NetworkDevice);
        assert_eq!(c.confidence, 0.75);
    }

    #[test]
    fn port_only_signals() {
        let printer = classify(None, None, None, &ports(&[80, 9100]), None);
        assert_eq!(printer.device_type, DeviceType::Printer);
        assert_eq!(printer.confidence, 0.70);

        let db = classify(None, None, None, &ports(&[3306]), None);
        assert_eq!((db.device_type, db.confidence), (DeviceType::Server, 0.65));

        let web = classify(None, None, None, &ports(&[443]), None);
        assert_eq!((web.device_type, web.confidence), (DeviceType::Server, 0.60));

        let snmp = classify(None, None, None, &ports(&[161]), None);
        assert_eq!(
            (snmp.device_type, snmp.confidence),
            (DeviceType::NetworkDevice, 0.55)
        );
    }

    #[test]
    fn hostname_is_the_last_resort() {
        let c = classify(None, None, None, &ports(&[]), Some("CORE-SWITCH-01"));
        assert_eq!(c.device_type, DeviceType::NetworkDevice);
        assert_eq!(c.confidence, 0.35);

        let ws = classify(None, None, None, &ports(&[5900]), Some("ws-042.corp.local"));
        assert_eq!((ws.device_type, ws.confidence), (DeviceType::Workstation, 0.40));
    }

    #[test]
    fn no_signal_is_unknown() {
        let c = classify(None, None, None, &ports(&[]), None);
        assert_eq!(c, Classification::unknown());
    }

    #[test]
    fn family_inference_for_routing() {
        assert_eq!(infer_family_from_ports(&ports(&[135, 445])), OsFamily::Windows);
        assert_eq!(infer_family_from_ports(&ports(&[22, 80])), OsFamily::Linux);
        assert_eq!(infer_family_from_ports(&ports(&[161])), OsFamily::Unknown);
    }

    #[test]
    fn version_string_backs_up_missing_family() {
        assert_eq!(os_family(None, Some("Ubuntu 22.04.3 LTS")), OsFamily::Linux);
        assert_eq!(os_family(Some("Windows"), Some("Ubuntu")), OsFamily::Windows);
        assert_eq!(os_family(Some("n/a"), None), OsFamily::Unknown);
    }
}
