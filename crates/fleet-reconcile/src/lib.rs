//! Fleet Reconcile: device identity resolution and multi-source merge.
//!
//! Turns a stream of [`Observation`](fleet_core::Observation)s into durable
//! [`AssetRecord`](fleet_core::AssetRecord)s:
//!
//! 1. [`fingerprint::resolve`] derives the identity key.
//! 2. [`ReconcileEngine`] locks the key, finds the matching record (directly,
//!    through an alias, or by promoting a weaker-keyed record).
//! 3. [`merge::merge`] reconciles the observation field by field, or raises an
//!    identity conflict.
//! 4. The result and its audit event are persisted through the
//!    [`AssetStore`](fleet_store::AssetStore).

pub mod conflict;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod locks;
pub mod merge;

pub use engine::{Outcome, ReconcileEngine};
pub use error::{ReconcileError, Result};
pub use fingerprint::{resolve, Fingerprint};
pub use merge::{merge, MergePolicy, Merged};
