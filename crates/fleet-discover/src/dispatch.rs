//! Collector dispatch: pick protocols from the classified OS family and
//! device type, then walk each protocol's credentials in order.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use fleet_core::{CollectionStatus, DeviceType, FleetError, OsFamily};

use crate::collectors::{clean, CollectError, Collector, Protocol, RawFields};
use crate::request::CredentialSets;

/// One routing rule. `None` matches anything.
struct Route {
    device_type: Option<DeviceType>,
    family: Option<OsFamily>,
    protocols: &'static [Protocol],
}

/// Checked in order; the first match decides. Device types that only speak
/// SNMP come first so they route the same whatever their OS family.
const ROUTES: &[Route] = &[
    Route {
        device_type: Some(DeviceType::NetworkDevice),
        family: None,
        protocols: &[Protocol::Snmp],
    },
    Route {
        device_type: Some(DeviceType::Printer),
        family: None,
        protocols: &[Protocol::Snmp],
    },
    Route {
        device_type: None,
        family: Some(OsFamily::Windows),
        protocols: &[Protocol::Wmi],
    },
    Route {
        device_type: None,
        family: Some(OsFamily::Linux),
        protocols: &[Protocol::Ssh],
    },
    Route {
        device_type: None,
        family: Some(OsFamily::Unix),
        protocols: &[Protocol::Ssh],
    },
    Route {
        device_type: None,
        family: Some(OsFamily::Embedded),
        protocols: &[Protocol::Snmp],
    },
    // Unknown family: SNMP is the only protocol worth trying without a session.
    Route {
        device_type: None,
        family: None,
        protocols: &[Protocol::Snmp],
    },
];

/// Protocols to try for a target.
pub fn route(family: OsFamily, device_type: DeviceType) -> &'static [Protocol] {
    ROUTES
        .iter()
        .find(|r| {
            r.device_type.map_or(true, |d| d == device_type)
                && r.family.map_or(true, |f| f == family)
        })
        .map(|r| r.protocols)
        .unwrap_or(&[])
}

/// Result of the collection stage for one target.
#[derive(Debug, Default)]
pub struct Collection {
    /// Collector that produced `fields`, or the last one tried.
    pub collector: Option<&'static str>,
    pub protocol: Option<Protocol>,
    pub fields: RawFields,
    pub status: CollectionStatus,
    pub errors: Vec<FleetError>,
    /// Credential attempts made across all protocols.
    pub attempts: usize,
    /// The batch deadline stopped collection.
    pub interrupted: bool,
}

pub struct Dispatcher {
    collectors: HashMap<Protocol, Arc<dyn Collector>>,
    max_attempts: usize,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(max_attempts: usize, call_timeout: Duration) -> Self {
        Self {
            collectors: HashMap::new(),
            max_attempts: max_attempts.max(1),
            call_timeout,
        }
    }

    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.insert(collector.protocol(), collector);
        self
    }

    /// Collect inventory from `target`, finishing by `deadline`.
    ///
    /// Never fails: every problem is folded into the returned status and
    /// errors so the caller keeps what the probe already learned.
    pub async fn collect(
        &self,
        target: IpAddr,
        family: OsFamily,
        device_type: DeviceType,
        credentials: &CredentialSets,
        deadline: Instant,
    ) -> Collection {
        let mut collection = Collection::default();

        for &protocol in route(family, device_type) {
            let Some(collector) = self.collectors.get(&protocol) else {
                tracing::debug!(%target, %protocol, "No collector registered");
                continue;
            };
            let candidates = credentials.for_protocol(protocol);
            if candidates.is_empty() {
                tracing::debug!(%target, %protocol, "No credentials for protocol");
                continue;
            }

            collection.collector = Some(collector.name());
            collection.protocol = Some(protocol);
            let mut rejected = 0;

            for credential in candidates.iter().take(self.max_attempts) {
                if Instant::now() >= deadline {
                    collection.interrupted = true;
                    collection.status = CollectionStatus::Failed;
                    return collection;
                }
                collection.attempts += 1;
                let call_deadline = deadline.min(Instant::now() + self.call_timeout);

                match timeout_at(call_deadline, collector.collect(target, credential)).await {
                    Ok(Ok(raw)) => {
                        let raw = clean(raw);
                        let missing: Vec<String> = collector
                            .expected_fields()
                            .iter()
                            .filter(|f| !raw.contains_key(**f))
                            .map(|f| f.to_string())
                            .collect();
                        collection.fields = raw;
                        collection.status = if missing.is_empty() {
                            CollectionStatus::Success
                        } else {
                            collection.errors.push(FleetError::PartialCollection {
                                protocol: protocol.to_string(),
                                target: target.to_string(),
                                missing: missing.clone(),
                            });
                            CollectionStatus::Partial
                        };
                        tracing::info!(
                            %target,
                            %protocol,
                            attempt = collection.attempts,
                            fields = collection.fields.len(),
                            missing = ?missing,
                            "Collection succeeded"
                        );
                        return collection;
                    }
                    Ok(Err(CollectError::Auth(reason))) => {
                        rejected += 1;
                        tracing::debug!(%target, %protocol, attempt = rejected, %reason, "Credential rejected");
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(%target, %protocol, error = %e, "Collection failed");
                        collection.errors.push(FleetError::CollectionFailed {
                            protocol: protocol.to_string(),
                            target: target.to_string(),
                            reason: e.to_string(),
                        });
                        rejected = 0;
                        break;
                    }
                    Err(_) => {
                        let interrupted = Instant::now() >= deadline;
                        tracing::warn!(%target, %protocol, interrupted, "Collector call timed out");
                        collection.errors.push(FleetError::CollectionFailed {
                            protocol: protocol.to_string(),
                            target: target.to_string(),
                            reason: if interrupted {
                                "batch deadline reached".to_string()
                            } else {
                                format!("no answer within {:?}", self.call_timeout)
                            },
                        });
                        if interrupted {
                            collection.interrupted = true;
                            collection.status = CollectionStatus::Failed;
                            return collection;
                        }
                        rejected = 0;
                        break;
                    }
                }
            }

            if rejected > 0 {
                tracing::warn!(%target, %protocol, attempts = rejected, "All credentials rejected");
                collection.errors.push(FleetError::AuthenticationFailed {
                    protocol: protocol.to_string(),
                    target: target.to_string(),
                    attempts: rejected,
                });
            }
            collection.status = CollectionStatus::Failed;
        }

        collection
    }
}

/// SNMP answering proves UDP/161 open even though the TCP scan cannot see it.
pub fn implied_ports(collection: &Collection) -> Option<u16> {
    let collected = matches!(
        collection.status,
        CollectionStatus::Success | CollectionStatus::Partial
    );
    (collected && collection.protocol == Some(Protocol::Snmp)).then_some(161)
}
