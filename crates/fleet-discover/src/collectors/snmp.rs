//! Network-device inventory over SNMP, via net-snmp's `snmpget`.
//!
//! Reads the MIB-2 system group plus the first entity-MIB entry (serial,
//! manufacturer, model) and the printer-MIB serial. An agent that does not
//! implement an object just leaves its field empty.

use std::net::IpAddr;

use async_trait::async_trait;

use fleet_core::fields;

use super::command::{run_tool, ToolOutput};
use super::{clean, CollectError, Collector, Credential, Protocol, RawFields};
use crate::request::SnmpCredential;

const SYS_DESCR: &str = ".1.3.6.1.2.1.1.1.0";
const PRINTER_SERIAL: &str = ".1.3.6.1.2.1.43.5.1.1.17.1";

/// Queried objects and the field each one fills.
const OBJECTS: [(&str, &str); 8] = [
    (SYS_DESCR, fields::DESCRIPTION),
    (".1.3.6.1.2.1.1.4.0", fields::CONTACT),
    (".1.3.6.1.2.1.1.5.0", fields::HOSTNAME),
    (".1.3.6.1.2.1.1.6.0", fields::LOCATION),
    (".1.3.6.1.2.1.47.1.1.1.1.11.1", fields::DEVICE_SERIAL),
    (".1.3.6.1.2.1.47.1.1.1.1.12.1", fields::MANUFACTURER),
    (".1.3.6.1.2.1.47.1.1.1.1.13.1", fields::MODEL),
    (PRINTER_SERIAL, fields::DEVICE_SERIAL),
];

const EXPECTED: &[&str] = &[fields::HOSTNAME, fields::DESCRIPTION];

/// Agent answers meaning "not implemented here".
const ABSENT: [&str; 3] = ["No Such Object", "No Such Instance", "No more variables"];

/// USM errors that mean the v3 credential was refused.
const AUTH_FAILURES: [&str; 5] = [
    "Authentication failure",
    "Unknown user name",
    "Unknown security name",
    "Decryption error",
    "Unsupported security level",
];

pub struct SnmpCollector {
    snmpget_path: String,
    timeout_secs: u64,
}

impl SnmpCollector {
    pub fn new(snmpget_path: &str, timeout_secs: u64) -> Self {
        Self {
            snmpget_path: snmpget_path.to_string(),
            timeout_secs: timeout_secs.max(1),
        }
    }

    fn args(&self, target: IpAddr, cred: &SnmpCredential) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-On".into(),
            "-Oq".into(),
            "-t".into(),
            self.timeout_secs.to_string(),
            "-r".into(),
            "1".into(),
        ];
        match cred {
            SnmpCredential::V2c { community } => {
                args.extend(["-v2c".into(), "-c".into(), community.clone()]);
            }
            SnmpCredential::V3 {
                username,
                auth_protocol,
                auth_passphrase,
                privacy_protocol,
                privacy_passphrase,
            } => {
                args.extend(["-v3".into(), "-u".into(), username.clone()]);
                if let Some(level) = cred.security_level() {
                    args.extend(["-l".to_string(), level.as_arg().to_string()]);
                }
                if let Some(pass) = auth_passphrase {
                    let proto = auth_protocol.as_deref().unwrap_or("SHA");
                    args.extend(["-a".into(), proto.to_uppercase(), "-A".into(), pass.clone()]);
                }
                if let Some(pass) = privacy_passphrase {
                    let proto = privacy_protocol.as_deref().unwrap_or("AES");
                    args.extend(["-x".into(), proto.to_uppercase(), "-X".into(), pass.clone()]);
                }
            }
        }
        let host = match target {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("udp6:[{v6}]"),
        };
        args.push(host);
        args.extend(OBJECTS.iter().map(|(oid, _)| oid.to_string()));
        args
    }
}

fn check(out: &ToolOutput, cred: &SnmpCredential) -> Result<(), CollectError> {
    let timed_out = out.stderr.contains("Timeout");
    if out.success() && !timed_out {
        return Ok(());
    }
    if let Some(reason) = AUTH_FAILURES.iter().find(|r| out.stderr.contains(*r)) {
        return Err(CollectError::Auth((*reason).to_string()));
    }
    // A v2c agent silently drops requests with the wrong community, so a
    // timeout is as close to a rejection as v2c gets.
    if timed_out && matches!(cred, SnmpCredential::V2c { .. }) {
        return Err(CollectError::Auth("no response to community".to_string()));
    }
    Err(CollectError::Transport(out.diagnostic()))
}

/// Parse `snmpget -On -Oq` output into `(oid, value)` pairs. Values may
/// span lines; continuation lines are joined.
pub fn parse_snmpget(stdout: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for line in stdout.lines() {
        if line.starts_with('.') {
            let (oid, value) = line.split_once(' ').unwrap_or((line, ""));
            pairs.push((oid.to_string(), value.to_string()));
        } else if let Some((_, value)) = pairs.last_mut() {
            value.push('\n');
            value.push_str(line);
        }
    }
    pairs
        .into_iter()
        .map(|(oid, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            (oid, value.trim().to_string())
        })
        .filter(|(_, value)| !ABSENT.iter().any(|a| value.starts_with(a)))
        .collect()
}

/// Map answered objects to inventory fields.
pub fn to_fields(pairs: &[(String, String)]) -> RawFields {
    let mut out = RawFields::new();
    for (oid, value) in pairs {
        let Some((_, field)) = OBJECTS.iter().find(|(o, _)| o == oid) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        // The entity serial wins over the printer serial.
        if oid == PRINTER_SERIAL && out.contains_key(fields::DEVICE_SERIAL) {
            continue;
        }
        out.insert(field.to_string(), value.clone());
        if oid == SYS_DESCR {
            if let Some(first_line) = value.lines().next() {
                out.insert(fields::OS_VERSION.to_string(), first_line.trim().to_string());
            }
        }
    }
    out
}

#[async_trait]
impl Collector for SnmpCollector {
    fn name(&self) -> &'static str {
        "snmp"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Snmp
    }

    fn expected_fields(&self) -> &'static [&'static str] {
        EXPECTED
    }

    async fn collect(
        &self,
        target: IpAddr,
        credential: &Credential,
    ) -> Result<RawFields, CollectError> {
        let Credential::Snmp(cred) = credential else {
            return Err(CollectError::CredentialMismatch(Protocol::Snmp));
        };

        let out = run_tool(&self.snmpget_path, &self.args(target, cred), &[]).await?;
        check(&out, cred)?;
        Ok(clean(to_fields(&parse_snmpget(&out.stdout))))
    }
}
