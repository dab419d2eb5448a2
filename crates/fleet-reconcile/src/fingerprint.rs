//! Fingerprint resolution: a stable identity key from an observation's
//! strongest identity signal.
//!
//! Priority: hardware serial > MAC address > hostname + address > address.
//! Keys carry a scheme prefix so tiers never collide:
//!
//! | Tier | Key |
//! |---|---|
//! | Serial | `serial:{manufacturer}/{model}/{serial}` or `serial:{serial}` |
//! | Mac | `mac:aa:bb:cc:dd:ee:ff` |
//! | HostnameAddress | `host:{hostname}@{ip}` |
//! | Address | `ip:{ip}` |
//!
//! Resolution is pure: it reads only the observation.

use std::net::IpAddr;

use fleet_core::{fields, IdentityTier, Observation};

/// Serial values that BIOS vendors and collectors emit when no real serial exists.
const PLACEHOLDERS: [&str; 16] = [
    "none",
    "unknown",
    "n/a",
    "na",
    "null",
    "default",
    "default string",
    "to be filled by o.e.m.",
    "system serial number",
    "chassis serial number",
    "not specified",
    "not applicable",
    "0",
    "00000000",
    "123456789",
    "0123456789",
];

const MIN_SERIAL_LEN: usize = 5;

/// A resolved identity key plus the weaker keys the same observation would
/// produce, used for alias lookup and promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub key: String,
    pub tier: IdentityTier,
    /// Equivalent keys at the same tier (the serial-only form of a composite key).
    pub aliases: Vec<String>,
    /// Keys from weaker signals present in the same observation, strongest first.
    pub fallbacks: Vec<(String, IdentityTier)>,
}

impl Fingerprint {
    /// Every key this fingerprint answers to.
    pub fn candidate_keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.key.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .chain(self.fallbacks.iter().map(|(k, _)| k.as_str()))
    }

    /// The MAC key among the fallbacks, if the observation carried one.
    pub fn mac_key(&self) -> Option<&str> {
        self.fallbacks
            .iter()
            .find(|(_, tier)| *tier == IdentityTier::Mac)
            .map(|(k, _)| k.as_str())
    }
}

/// Resolve an observation to its fingerprint.
pub fn resolve(obs: &Observation) -> Fingerprint {
    let mut keys: Vec<(String, IdentityTier)> = Vec::with_capacity(4);
    let mut aliases = Vec::new();

    if let Some(serial) = first_valid_serial(obs) {
        let manufacturer = obs.field(fields::MANUFACTURER).and_then(normalize_attribute);
        let model = obs.field(fields::MODEL).and_then(normalize_attribute);
        let serial_key = format!("serial:{serial}");
        match (manufacturer, model) {
            (Some(mfr), Some(model)) => {
                keys.push((
                    format!("serial:{mfr}/{model}/{serial}"),
                    IdentityTier::Serial,
                ));
                aliases.push(serial_key);
            }
            _ => keys.push((serial_key, IdentityTier::Serial)),
        }
    }

    if let Some(mac) = obs.field(fields::MAC_ADDRESS).and_then(first_valid_mac) {
        keys.push((format!("mac:{mac}"), IdentityTier::Mac));
    }

    if let Some(hostname) = obs.field(fields::HOSTNAME).and_then(normalize_hostname) {
        keys.push((
            format!("host:{hostname}@{}", obs.target),
            IdentityTier::HostnameAddress,
        ));
    }

    keys.push((address_key(obs.target), IdentityTier::Address));

    let mut keys = keys.into_iter();
    // The address key is always present, so there is always a first key.
    let (key, tier) = keys
        .next()
        .unwrap_or_else(|| (address_key(obs.target), IdentityTier::Address));

    Fingerprint {
        key,
        tier,
        aliases,
        fallbacks: keys.collect(),
    }
}

pub fn address_key(address: IpAddr) -> String {
    format!("ip:{address}")
}

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A usable hardware serial, normalized, or `None` for empty, placeholder,
/// and too-short values.
pub fn normalize_serial(raw: &str) -> Option<String> {
    let serial = normalize(raw);
    if serial.chars().count() < MIN_SERIAL_LEN || PLACEHOLDERS.contains(&serial.as_str()) {
        return None;
    }
    // "xxxxxxxx", "00000000000": filler, not a serial
    let mut chars = serial.chars().filter(|c| c.is_alphanumeric());
    if let Some(first) = chars.next() {
        if chars.all(|c| c == first) {
            return None;
        }
    }
    Some(serial)
}

fn first_valid_serial(obs: &Observation) -> Option<String> {
    fields::SERIALS
        .iter()
        .filter_map(|name| obs.field(name))
        .find_map(normalize_serial)
}

/// Manufacturer or model, normalized, or `None` for placeholders.
pub fn normalize_attribute(raw: &str) -> Option<String> {
    let value = normalize(raw);
    const FILLER: [&str; 4] = [
        "system manufacturer",
        "system product name",
        "o.e.m.",
        "to be filled by o.e.m.",
    ];
    if value.is_empty() || PLACEHOLDERS.contains(&value.as_str()) || FILLER.contains(&value.as_str())
    {
        return None;
    }
    Some(value)
}

/// Normalize a MAC address to lowercase colon-separated form.
///
/// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF`, `aabb.ccdd.eeff`, and
/// bare hex. Rejects all-zero and broadcast addresses.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let hex = hex.to_lowercase();
    if hex == "000000000000" || hex == "ffffffffffff" {
        return None;
    }

    let mut out = String::with_capacity(17);
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push_str(&String::from_utf8_lossy(chunk));
    }
    Some(out)
}

/// Collectors report every adapter's MAC, comma-separated; the first valid
/// one identifies the device.
pub fn first_valid_mac(raw: &str) -> Option<String> {
    raw.split([',', ';', ' '])
        .filter(|s| !s.is_empty())
        .find_map(normalize_mac)
}

pub fn normalize_hostname(raw: &str) -> Option<String> {
    let hostname = normalize(raw);
    if hostname.is_empty()
        || hostname == "localhost"
        || hostname.starts_with("localhost.")
        || PLACEHOLDERS.contains(&hostname.as_str())
    {
        return None;
    }
    Some(hostname)
}
