//! Protocol collectors.
//!
//! Each collector is a thin client over an existing command-line tool and
//! turns its output into named inventory fields. Authentication rejections
//! are kept apart from transport failures so the dispatcher knows whether
//! trying the next credential can help.

pub mod command;
pub mod snmp;
pub mod ssh;
pub mod wmi;

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::request::{CredentialSets, PasswordCredential, SnmpCredential, SshCredential};

pub use snmp::SnmpCollector;
pub use ssh::SshCollector;
pub use wmi::WmiCollector;

/// Fields as reported by a collector, keyed by [`fleet_core::fields`] names.
pub type RawFields = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Windows management instrumentation.
    Wmi,
    Ssh,
    Snmp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wmi => "wmi",
            Self::Ssh => "ssh",
            Self::Snmp => "snmp",
        })
    }
}

/// One credential for one protocol.
#[derive(Debug, Clone)]
pub enum Credential {
    Wmi(PasswordCredential),
    Ssh(SshCredential),
    Snmp(SnmpCredential),
}

impl CredentialSets {
    /// Ordered credentials for `protocol`.
    pub fn for_protocol(&self, protocol: Protocol) -> Vec<Credential> {
        match protocol {
            Protocol::Wmi => self.wmi.iter().cloned().map(Credential::Wmi).collect(),
            Protocol::Ssh => self.ssh.iter().cloned().map(Credential::Ssh).collect(),
            Protocol::Snmp => self.snmp.iter().cloned().map(Credential::Snmp).collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CollectError {
    /// The target rejected the credential; another one may work.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The tool could not reach or talk to the target.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("credential does not fit the {0} collector")]
    CredentialMismatch(Protocol),
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    fn protocol(&self) -> Protocol;

    /// Fields a successful collection is expected to fill.
    fn expected_fields(&self) -> &'static [&'static str];

    async fn collect(&self, target: IpAddr, credential: &Credential)
        -> Result<RawFields, CollectError>;
}

/// Drop blank values and trim the rest.
pub fn clean(fields: RawFields) -> RawFields {
    fields
        .into_iter()
        .filter_map(|(k, v)| {
            let v = v.trim();
            (!v.is_empty()).then(|| (k, v.to_string()))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Write an executable shell script standing in for an external tool.
    pub(crate) fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_selected_per_protocol_in_order() {
        let sets: CredentialSets = serde_json::from_value(serde_json::json!({
            "snmp": [
                {"version": "v2c", "community": "first"},
                {"version": "v2c", "community": "second"}
            ]
        }))
        .unwrap();

        let snmp = sets.for_protocol(Protocol::Snmp);
        assert_eq!(snmp.len(), 2);
        assert!(matches!(
            &snmp[0],
            Credential::Snmp(SnmpCredential::V2c { community }) if community == "first"
        ));
        assert!(sets.for_protocol(Protocol::Wmi).is_empty());
    }

    #[test]
    fn clean_drops_blank_values() {
        let raw: RawFields = [
            ("hostname".to_string(), "  ws-042 ".to_string()),
            ("model".to_string(), "   ".to_string()),
        ]
        .into_iter()
        .collect();

        let cleaned = clean(raw);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned["hostname"], "ws-042");
    }
}
