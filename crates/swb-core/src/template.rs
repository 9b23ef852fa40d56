//! Template merge engine
//!
//! Pulls planning defaults from a template into a spec without overwriting
//! anything the user already entered. The merge is a pure function of the
//! current record; it may be attempted from either the spec-fetch or the
//! template-fetch completion and short-circuits once planning is present.

use crate::backend::{bounded, SpecBackend};
use crate::error::{BackendError, WorkbenchError};
use crate::model::{Planning, Spec, Template};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fill blank fields of `draft` from `defaults`
///
/// Text fields are copied only when blank, gate flags only when `false`.
#[must_use]
pub fn fill_blank(draft: &Planning, defaults: &Planning) -> Planning {
    fn pick(current: &str, default: &str) -> String {
        if current.trim().is_empty() {
            default.to_string()
        } else {
            current.to_string()
        }
    }

    let mut merged = draft.clone();
    merged.tech_stack = pick(&draft.tech_stack, &defaults.tech_stack);
    merged.architecture = pick(&draft.architecture, &defaults.architecture);
    merged.non_functional_requirements = pick(
        &draft.non_functional_requirements,
        &defaults.non_functional_requirements,
    );
    merged.gates.simplicity |= defaults.gates.simplicity;
    merged.gates.anti_abstraction |= defaults.gates.anti_abstraction;
    merged.gates.integration_first |= defaults.gates.integration_first;
    merged
}

/// Result of a merge attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Spec planning adopted from the template; editable planning filled
    Merged {
        /// Planning stored on the spec
        planning: Planning,
        /// Editable planning after filling blanks
        draft: Planning,
    },
    /// Spec already carries planning
    AlreadyPresent,
    /// Template has no planning to offer
    NothingToMerge,
}

/// Attempt the template merge against the current state
///
/// Re-entrant: once it has merged, `spec.planning` is set and every further
/// attempt returns `AlreadyPresent`, so later user edits survive.
#[must_use]
pub fn merge_template(spec: &Spec, draft: &Planning, template: &Template) -> MergeOutcome {
    if spec.planning.is_some() {
        return MergeOutcome::AlreadyPresent;
    }
    match &template.planning {
        Some(planning) => MergeOutcome::Merged {
            planning: planning.clone(),
            draft: fill_blank(draft, planning),
        },
        None => MergeOutcome::NothingToMerge,
    }
}

/// Read-through cache of the backend template catalog
///
/// Templates are read-only; concurrent fetches of one id share a single
/// backend request.
#[derive(Clone)]
pub struct TemplateCatalog {
    backend: Arc<dyn SpecBackend>,
    cache: Cache<String, Arc<Template>>,
    timeout: Duration,
}

impl std::fmt::Debug for TemplateCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCatalog")
            .field("entries", &self.cache.entry_count())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TemplateCatalog {
    /// Create new catalog
    #[must_use]
    pub fn new(backend: Arc<dyn SpecBackend>, capacity: u64, timeout: Duration) -> Self {
        Self {
            backend,
            cache: Cache::new(capacity),
            timeout,
        }
    }

    /// Fetch a template, from cache when possible
    ///
    /// # Errors
    /// `TemplateFetchFailure` if the backend cannot deliver the template
    #[tracing::instrument(skip(self, cancel))]
    pub async fn fetch(
        &self,
        template_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Template>, WorkbenchError> {
        let backend = Arc::clone(&self.backend);
        let id = template_id.to_string();
        self.cache
            .try_get_with(id.clone(), async move {
                bounded(self.timeout, cancel, backend.get_template(&id))
                    .await
                    .map(Arc::new)
            })
            .await
            .map_err(|e: Arc<BackendError>| {
                tracing::warn!(template_id, error = %e, "template fetch failed");
                WorkbenchError::TemplateFetchFailure((*e).clone())
            })
    }

    /// Drop a cached template
    pub async fn invalidate(&self, template_id: &str) {
        self.cache.invalidate(template_id).await;
    }
}
