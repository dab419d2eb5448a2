//! The per-target pipeline: probe, fingerprint, classify, collect.
//!
//! Stages run strictly in order and every one of them is bounded by the
//! batch deadline. Whatever a stage learned before the deadline or a failure
//! stopped it ends up in the returned [`Observation`]; nothing gathered is
//! dropped.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use fleet_core::{
    fields, Classification, CollectionStatus, FleetError, Observation, ObservationDraft, OsFamily,
    PipelineStage,
};

use crate::classify;
use crate::collectors::{Protocol, SnmpCollector, SshCollector, WmiCollector};
use crate::config::DiscoverConfig;
use crate::dispatch::{self, Dispatcher};
use crate::probe::{Prober, TcpProber};
use crate::request::CredentialSets;
use crate::scanner::{NmapFingerprinter, OsFingerprinter, OsHints};

/// An observation plus the errors met while producing it.
#[derive(Debug)]
pub struct PipelineRun {
    pub observation: Observation,
    pub errors: Vec<FleetError>,
}

pub struct Pipeline {
    prober: Arc<dyn Prober>,
    fingerprinter: Option<Arc<dyn OsFingerprinter>>,
    dispatcher: Dispatcher,
    infer_family_from_ports: bool,
}

impl Pipeline {
    pub fn new(prober: Arc<dyn Prober>, dispatcher: Dispatcher) -> Self {
        Self {
            prober,
            fingerprinter: None,
            dispatcher,
            infer_family_from_ports: true,
        }
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn OsFingerprinter>) -> Self {
        self.fingerprinter = Some(fingerprinter);
        self
    }

    pub fn infer_family_from_ports(mut self, enabled: bool) -> Self {
        self.infer_family_from_ports = enabled;
        self
    }

    /// The production pipeline: TCP prober, optional nmap, and the three
    /// tool-backed collectors.
    pub fn from_config(config: &DiscoverConfig) -> Self {
        let call_timeout = Duration::from_secs(config.collector_timeout_secs.max(1));
        // snmpget retries once, so each try gets half the call budget.
        let snmp_timeout = (config.collector_timeout_secs / 2).max(1);
        let dispatcher = Dispatcher::new(config.max_credential_attempts, call_timeout)
            .with_collector(Arc::new(WmiCollector::new(&config.tools.wmic)))
            .with_collector(Arc::new(SshCollector::new(
                &config.tools.ssh,
                &config.tools.sshpass,
                config.collector_timeout_secs,
            )))
            .with_collector(Arc::new(SnmpCollector::new(
                &config.tools.snmpget,
                snmp_timeout,
            )));

        let mut pipeline = Self::new(Arc::new(TcpProber::new(config)), dispatcher)
            .infer_family_from_ports(config.infer_family_from_ports);
        if config.os_fingerprint {
            pipeline = pipeline.with_fingerprinter(Arc::new(NmapFingerprinter::new(
                &config.nmap_path,
                Duration::from_secs(config.fingerprint_timeout_secs),
            )));
        }
        pipeline
    }

    /// Run every stage for `target`, stopping at `deadline`.
    pub async fn run(
        &self,
        target: IpAddr,
        credentials: &CredentialSets,
        deadline: Instant,
    ) -> PipelineRun {
        let start = std::time::Instant::now();
        let mut errors = Vec::new();
        let draft = self.stages(target, credentials, deadline, &mut errors).await;
        let observation = draft.finish();

        tracing::info!(
            %target,
            reachable = observation.reachable,
            open_ports = observation.open_ports.len(),
            device_type = ?observation.classification.as_ref().map(|c| c.device_type),
            collection = ?observation.status,
            interrupted_at = ?observation.interrupted_at,
            errors = errors.len(),
            duration_ms = start.elapsed().as_millis(),
            "Pipeline complete"
        );

        PipelineRun {
            observation,
            errors,
        }
    }

    async fn stages(
        &self,
        target: IpAddr,
        credentials: &CredentialSets,
        deadline: Instant,
        errors: &mut Vec<FleetError>,
    ) -> ObservationDraft {
        let draft = Observation::builder(target);

        // Probe
        let report = match timeout_at(deadline, self.prober.probe(target, deadline)).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                tracing::warn!(%target, error = %e, "Probe did not finish");
                errors.push(e);
                return draft.interrupted_at(PipelineStage::Probe);
            }
            Err(_) => {
                errors.push(cancelled(target, PipelineStage::Probe));
                return draft.interrupted_at(PipelineStage::Probe);
            }
        };
        if !report.alive {
            errors.push(FleetError::ProbeTimeout {
                target: target.to_string(),
            });
            return draft.reachable(false);
        }
        let mut draft = draft.reachable(true).open_ports(report.open_ports);
        if report.truncated {
            let classification = classify_draft(&draft);
            return draft
                .classification(classification)
                .interrupted_at(PipelineStage::Probe);
        }

        // Fingerprint
        if let Some(fingerprinter) = &self.fingerprinter {
            let ports = draft.peek().open_ports.clone();
            match timeout_at(deadline, fingerprinter.fingerprint(target, &ports)).await {
                Ok(Ok(hints)) => draft = apply_hints(draft, hints),
                Ok(Err(e)) => {
                    tracing::warn!(%target, error = %e, "OS fingerprinting failed, continuing without hints");
                }
                Err(_) => {
                    errors.push(cancelled(target, PipelineStage::Fingerprint));
                    let classification = classify_draft(&draft);
                    return draft
                        .classification(classification)
                        .interrupted_at(PipelineStage::Fingerprint);
                }
            }
        }

        // Classify, for routing
        let routing = classify_draft(&draft);
        let family = self.routing_family(draft.peek());
        tracing::debug!(
            %target,
            %family,
            device_type = ?routing.device_type,
            confidence = routing.confidence,
            reasoning = %routing.reasoning,
            "Classified for dispatch"
        );
        if Instant::now() >= deadline {
            errors.push(cancelled(target, PipelineStage::Classify));
            return draft
                .classification(routing)
                .interrupted_at(PipelineStage::Classify);
        }

        // Collect
        let collection = self
            .dispatcher
            .collect(target, family, routing.device_type, credentials, deadline)
            .await;
        if let Some(port) = dispatch::implied_ports(&collection) {
            draft = draft.open_ports([port]);
        }
        draft = match collection.collector {
            Some(name) => draft.collector(name, collection.status),
            None => draft.status(CollectionStatus::NotAttempted),
        };
        let proved_windows = collection.protocol == Some(Protocol::Wmi)
            && matches!(
                collection.status,
                CollectionStatus::Success | CollectionStatus::Partial
            );
        let interrupted = collection.interrupted;
        errors.extend(collection.errors);
        draft = draft.fields(collection.fields);

        if draft.peek().os_family.is_none() {
            let obs = draft.peek();
            let known = match classify::os_family(None, collected_version(obs)) {
                OsFamily::Unknown if proved_windows => OsFamily::Windows,
                f => f,
            };
            if known != OsFamily::Unknown {
                draft = draft.os_family(known.to_string());
            }
        }

        let classification = classify_draft(&draft);
        draft = draft.classification(classification);
        if interrupted {
            draft = draft.interrupted_at(PipelineStage::Collect);
        }
        draft
    }

    /// Family used to pick collectors. Port inference only steers routing
    /// and is never written to the observation.
    fn routing_family(&self, obs: &Observation) -> OsFamily {
        let family = classify::os_family(obs.os_family.as_deref(), collected_version(obs));
        if family == OsFamily::Unknown && self.infer_family_from_ports {
            classify::infer_family_from_ports(&obs.open_ports)
        } else {
            family
        }
    }
}

fn apply_hints(mut draft: ObservationDraft, hints: OsHints) -> ObservationDraft {
    if let Some(family) = hints.os_family {
        draft = draft.os_family(family);
    }
    if let Some(version) = hints.os_version {
        draft = draft.os_version(version);
    }
    if let Some(hint) = hints.device_type {
        draft = draft.device_type_hint(hint);
    }
    if let Some(mac) = hints.mac {
        draft = draft.field(fields::MAC_ADDRESS, mac);
    }
    if let Some(hostname) = hints.hostname {
        draft = draft.field(fields::HOSTNAME, hostname);
    }
    draft
}

/// The collector's OS version when it reported one, else the fingerprint's.
fn collected_version(obs: &Observation) -> Option<&str> {
    obs.field(fields::OS_VERSION).or(obs.os_version.as_deref())
}

fn cancelled(target: IpAddr, stage: PipelineStage) -> FleetError {
    FleetError::Cancelled {
        target: target.to_string(),
        stage,
    }
}

fn classify_draft(draft: &ObservationDraft) -> Classification {
    let obs = draft.peek();
    classify::classify(
        obs.os_family.as_deref(),
        obs.device_type_hint.as_deref(),
        collected_version(obs),
        &obs.open_ports,
        obs.field(fields::HOSTNAME),
    )
}
