use fleet_core::FleetError;
use fleet_store::StoreError;

/// Errors from the reconcile engine.
///
/// Identity conflicts are not errors here: they are an
/// [`Outcome`](crate::Outcome) of a successful reconcile.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

impl From<ReconcileError> for FleetError {
    fn from(err: ReconcileError) -> Self {
        FleetError::Store(err.to_string())
    }
}
