//! fleet-discover: probe pipeline and scan orchestration for the Fleet
//! inventory.
//!
//! Probes targets for reachability and open ports, classifies them, collects
//! inventory over WMI, SSH, or SNMP, and hands every observation to the
//! reconcile engine. Batches run on a bounded worker pool under a deadline
//! and are journaled.

pub mod batch;
pub mod classify;
pub mod collectors;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod journal;
pub mod nmap_xml;
pub mod pipeline;
pub mod probe;
pub mod request;
pub mod scanner;
pub mod scheduler;
