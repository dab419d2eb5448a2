//! Scan requests: target expressions plus credential sets.
//!
//! Requests are validated before any probing starts. Malformed entries are
//! rejected individually with a [`FleetError::SchemaValidation`] and the
//! rest of the batch proceeds.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use fleet_core::FleetError;

/// A batch of targets to scan.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanRequest {
    /// Addresses (`10.0.1.5`), CIDR blocks (`10.0.1.0/24`), or dash ranges
    /// (`10.0.1.10-10.0.1.20`, `10.0.1.10-20`).
    pub targets: Vec<String>,

    #[serde(default)]
    pub credentials: CredentialSets,
}

/// Credentials per collection protocol, tried in order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialSets {
    #[serde(default)]
    pub wmi: Vec<PasswordCredential>,
    #[serde(default)]
    pub ssh: Vec<SshCredential>,
    #[serde(default)]
    pub snmp: Vec<SnmpCredential>,
}

impl CredentialSets {
    pub fn is_empty(&self) -> bool {
        self.wmi.is_empty() && self.ssh.is_empty() && self.snmp.is_empty()
    }

    /// Keep well-formed credentials; return the rest as validation errors.
    fn validate(self) -> (Self, Vec<FleetError>) {
        let mut rejected = Vec::new();
        let mut valid = Self::default();

        for (i, cred) in self.wmi.into_iter().enumerate() {
            match cred.check() {
                Ok(()) => valid.wmi.push(cred),
                Err(reason) => rejected.push(FleetError::validation(
                    format!("wmi credential #{} ({cred:?})", i + 1),
                    reason,
                )),
            }
        }
        for (i, cred) in self.ssh.into_iter().enumerate() {
            match cred.check() {
                Ok(()) => valid.ssh.push(cred),
                Err(reason) => rejected.push(FleetError::validation(
                    format!("ssh credential #{} ({cred:?})", i + 1),
                    reason,
                )),
            }
        }
        for (i, cred) in self.snmp.into_iter().enumerate() {
            match cred.check() {
                Ok(()) => valid.snmp.push(cred),
                Err(reason) => rejected.push(FleetError::validation(
                    format!("snmp credential #{} ({cred:?})", i + 1),
                    reason,
                )),
            }
        }
        (valid, rejected)
    }
}

/// Username and password for the management-instrumentation protocol.
#[derive(Clone, Deserialize)]
pub struct PasswordCredential {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub domain: Option<String>,
}

impl PasswordCredential {
    fn check(&self) -> Result<(), &'static str> {
        if self.username.trim().is_empty() {
            return Err("username is empty");
        }
        if self.password.is_empty() {
            return Err("password is empty");
        }
        Ok(())
    }
}

impl fmt::Debug for PasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCredential")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Remote-shell login: a password or a private key file, not both.
#[derive(Clone, Deserialize)]
pub struct SshCredential {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl SshCredential {
    fn check(&self) -> Result<(), &'static str> {
        if self.username.trim().is_empty() {
            return Err("username is empty");
        }
        let has_password = self.password.as_deref().is_some_and(|p| !p.is_empty());
        let has_key = self.key_path.as_deref().is_some_and(|k| !k.trim().is_empty());
        match (has_password, has_key) {
            (false, false) => return Err("needs a password or a key_path"),
            (true, true) => return Err("password and key_path are mutually exclusive"),
            _ => {}
        }
        if self.port == Some(0) {
            return Err("port 0 is not valid");
        }
        Ok(())
    }
}

impl fmt::Debug for SshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredential")
            .field("username", &self.username)
            .field("key_path", &self.key_path)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Network-management protocol credentials.
#[derive(Clone, Deserialize)]
#[serde(tag = "version", rename_all = "lowercase")]
pub enum SnmpCredential {
    V2c {
        community: String,
    },
    V3 {
        username: String,
        #[serde(default)]
        auth_protocol: Option<String>,
        #[serde(default)]
        auth_passphrase: Option<String>,
        #[serde(default)]
        privacy_protocol: Option<String>,
        #[serde(default)]
        privacy_passphrase: Option<String>,
    },
}

const AUTH_PROTOCOLS: [&str; 6] = ["MD5", "SHA", "SHA-224", "SHA-256", "SHA-384", "SHA-512"];
const PRIVACY_PROTOCOLS: [&str; 5] = ["DES", "AES", "AES-128", "AES-192", "AES-256"];

/// SNMPv3 passphrases shorter than this are refused by agents.
const MIN_PASSPHRASE: usize = 8;

/// SNMPv3 security level implied by which secrets are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SecurityLevel {
    NoAuthNoPriv,
    AuthNoPriv,
    AuthPriv,
}

impl SecurityLevel {
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::NoAuthNoPriv => "noAuthNoPriv",
            Self::AuthNoPriv => "authNoPriv",
            Self::AuthPriv => "authPriv",
        }
    }
}

impl SnmpCredential {
    pub fn security_level(&self) -> Option<SecurityLevel> {
        match self {
            Self::V2c { .. } => None,
            Self::V3 {
                auth_passphrase,
                privacy_passphrase,
                ..
            } => Some(match (auth_passphrase.is_some(), privacy_passphrase.is_some()) {
                (false, _) => SecurityLevel::NoAuthNoPriv,
                (true, false) => SecurityLevel::AuthNoPriv,
                (true, true) => SecurityLevel::AuthPriv,
            }),
        }
    }

    fn check(&self) -> Result<(), &'static str> {
        match self {
            Self::V2c { community } => {
                if community.is_empty() {
                    return Err("community is empty");
                }
            }
            Self::V3 {
                username,
                auth_protocol,
                auth_passphrase,
                privacy_protocol,
                privacy_passphrase,
            } => {
                if username.trim().is_empty() {
                    return Err("username is empty");
                }
                if let Some(proto) = auth_protocol {
                    if !AUTH_PROTOCOLS.iter().any(|p| p.eq_ignore_ascii_case(proto)) {
                        return Err("unsupported auth_protocol");
                    }
                }
                if let Some(proto) = privacy_protocol {
                    if !PRIVACY_PROTOCOLS.iter().any(|p| p.eq_ignore_ascii_case(proto)) {
                        return Err("unsupported privacy_protocol");
                    }
                }
                if auth_passphrase.as_ref().is_some_and(|p| p.len() < MIN_PASSPHRASE) {
                    return Err("auth_passphrase shorter than 8 characters");
                }
                if privacy_passphrase.is_some() && auth_passphrase.is_none() {
                    return Err("privacy_passphrase requires auth_passphrase");
                }
                if privacy_passphrase.as_ref().is_some_and(|p| p.len() < MIN_PASSPHRASE) {
                    return Err("privacy_passphrase shorter than 8 characters");
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SnmpCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V2c { .. } => f
                .debug_struct("SnmpCredential::V2c")
                .field("community", &"<redacted>")
                .finish(),
            Self::V3 {
                username,
                auth_protocol,
                privacy_protocol,
                ..
            } => f
                .debug_struct("SnmpCredential::V3")
                .field("username", username)
                .field("auth_protocol", auth_protocol)
                .field("privacy_protocol", privacy_protocol)
                .field("security_level", &self.security_level())
                .finish(),
        }
    }
}

/// A request after validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    /// Expanded addresses in submission order. Duplicates are kept.
    pub targets: Vec<IpAddr>,
    pub credentials: CredentialSets,
}

impl ScanRequest {
    pub fn new(targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            credentials: CredentialSets::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialSets) -> Self {
        self.credentials = credentials;
        self
    }

    /// Expand targets and filter credentials.
    ///
    /// Entries that fail to parse, or that would push the batch past
    /// `max_targets`, are returned as errors alongside the valid part.
    pub fn validate(&self, max_targets: usize) -> (ValidatedRequest, Vec<FleetError>) {
        let mut rejected = Vec::new();
        let mut targets = Vec::new();

        for entry in &self.targets {
            let remaining = max_targets.saturating_sub(targets.len());
            match expand_target(entry, remaining) {
                Ok(addrs) => targets.extend(addrs),
                Err(reason) => {
                    rejected.push(FleetError::validation(format!("target '{entry}'"), reason))
                }
            }
        }

        let (credentials, bad_credentials) = self.credentials.clone().validate();
        rejected.extend(bad_credentials);

        (
            ValidatedRequest {
                targets,
                credentials,
            },
            rejected,
        )
    }
}

/// Expand one target expression into addresses, refusing more than `limit`.
pub fn expand_target(entry: &str, limit: usize) -> Result<Vec<IpAddr>, String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return Err("empty target".to_string());
    }

    let addrs = if entry.contains('/') {
        let net: IpNet = entry
            .parse()
            .map_err(|e| format!("not a CIDR block: {e}"))?;
        let host_bits = u32::from(net.max_prefix_len() - net.prefix_len());
        let size = 1u128.checked_shl(host_bits).unwrap_or(u128::MAX);
        // Network and broadcast addresses are skipped for IPv4 blocks.
        let size = match net {
            IpNet::V4(_) if host_bits >= 2 => size - 2,
            _ => size,
        };
        if size > limit as u128 {
            return Err(format!("expands to {size} addresses, over the batch cap"));
        }
        net.hosts().collect()
    } else if let Some((start, end)) = entry.split_once('-') {
        expand_range(start.trim(), end.trim(), limit)?
    } else {
        let addr: IpAddr = entry
            .parse()
            .map_err(|_| "not an IP address, CIDR block, or range".to_string())?;
        vec![addr]
    };

    if addrs.len() > limit {
        return Err("over the batch cap".to_string());
    }
    Ok(addrs)
}

fn expand_range(start: &str, end: &str, limit: usize) -> Result<Vec<IpAddr>, String> {
    let start: Ipv4Addr = start
        .parse()
        .map_err(|_| "range start is not an IPv4 address".to_string())?;
    let end: Ipv4Addr = match end.parse::<u8>() {
        Ok(last) => {
            let [a, b, c, _] = start.octets();
            Ipv4Addr::new(a, b, c, last)
        }
        Err(_) => end
            .parse()
            .map_err(|_| "range end is not an IPv4 address or last octet".to_string())?,
    };

    let (lo, hi) = (u32::from(start), u32::from(end));
    if lo > hi {
        return Err("range end precedes its start".to_string());
    }
    let size = u64::from(hi - lo) + 1;
    if size > limit as u64 {
        return Err(format!("expands to {size} addresses, over the batch cap"));
    }
    Ok((lo..=hi).map(|n| IpAddr::V4(Ipv4Addr::from(n))).collect())
}
