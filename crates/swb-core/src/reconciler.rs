//! Persistence reconciler
//!
//! Decides create vs. update from the record's identity and recovers from a
//! stale identity: an update answered with "not found" falls back to a
//! create and the stale id is discarded. Any other failure is returned to
//! the caller untouched; there is no automatic retry.

use crate::api::{SpecDraft, SpecUpdate};
use crate::backend::{bounded, SpecBackend};
use crate::error::{BackendError, WorkbenchError};
use crate::model::{Spec, SpecId, SpecIdentity};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a save reached the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveKind {
    /// First persistence of an unsaved spec
    Created,
    /// Update of the confirmed id
    Updated,
    /// Update hit "not found"; recreated under a new id
    Recreated {
        /// Discarded identity
        stale: SpecId,
    },
}

/// Successful save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Identity callers must use from now on
    pub id: SpecId,
    /// Spec as returned by the backend
    pub persisted: Spec,
    /// Route taken
    pub kind: SaveKind,
}

impl SaveOutcome {
    /// Check if the save assigned a new identity
    #[inline]
    #[must_use]
    pub fn adopted_identity(&self) -> bool {
        !matches!(self.kind, SaveKind::Updated)
    }
}

/// Create-vs-update reconciler
#[derive(Clone)]
pub struct Reconciler {
    backend: Arc<dyn SpecBackend>,
    timeout: Duration,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create new reconciler
    #[inline]
    #[must_use]
    pub fn new(backend: Arc<dyn SpecBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Persist `spec` according to `identity`
    ///
    /// `identity` must not be `Pending`; the caller marks the record pending
    /// before calling and resolves it from the outcome.
    ///
    /// # Errors
    /// `PersistenceFailure` for every failure except a recovered stale id
    #[tracing::instrument(skip(self, spec, cancel), fields(title = %spec.title))]
    pub async fn save(
        &self,
        identity: &SpecIdentity,
        spec: &Spec,
        cancel: &CancellationToken,
    ) -> Result<SaveOutcome, WorkbenchError> {
        let Some(id) = identity.confirmed() else {
            let persisted = self.create(spec, cancel).await?;
            return Self::outcome(persisted, SaveKind::Created);
        };

        tracing::debug!(%id, "updating spec");
        let update = SpecUpdate::from(spec);
        match bounded(self.timeout, cancel, self.backend.update_spec(id, &update)).await {
            Ok(persisted) => Self::outcome(persisted, SaveKind::Updated),
            Err(BackendError::NotFound(_)) => {
                tracing::warn!(stale = %id, "update target not found; recreating spec");
                let persisted = self.create(spec, cancel).await?;
                Self::outcome(persisted, SaveKind::Recreated { stale: id.clone() })
            }
            Err(e) => {
                tracing::error!(%id, error = %e, "spec update failed");
                Err(WorkbenchError::PersistenceFailure(e))
            }
        }
    }

    async fn create(&self, spec: &Spec, cancel: &CancellationToken) -> Result<Spec, WorkbenchError> {
        tracing::debug!("creating spec");
        let draft = SpecDraft::from(spec);
        bounded(self.timeout, cancel, self.backend.create_spec(&draft))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "spec create failed");
                WorkbenchError::PersistenceFailure(e)
            })
    }

    fn outcome(persisted: Spec, kind: SaveKind) -> Result<SaveOutcome, WorkbenchError> {
        let id = persisted.id.clone().ok_or_else(|| {
            WorkbenchError::PersistenceFailure(BackendError::Parse(
                "saved spec carries no id".to_string(),
            ))
        })?;
        if let SaveKind::Recreated { stale } = &kind {
            if *stale == id {
                tracing::warn!(%id, "backend recreated spec under the stale id");
            }
        }
        tracing::info!(%id, ?kind, "spec saved");
        Ok(SaveOutcome {
            id,
            persisted,
            kind,
        })
    }
}
