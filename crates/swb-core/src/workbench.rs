//! Spec Workbench orchestrator
//!
//! Owns one spec record for the duration of a session and drives it through
//! the guided workflow:
//! - Persists the record, adopting the identity the backend assigns
//! - Runs the specify, plan and tasks phase operations
//! - Streams enhancements into the content
//! - Merges template planning defaults
//! - Delegates selected tasks to coding agents
//!
//! Every operation takes `&self`; independent operations may run
//! concurrently. Record state sits behind a lock that is never held across
//! a suspension point.

use crate::api::{
    ConstitutionData, PlanArtifacts, PlanRequest, SpecifyRequest, TasksRequest, TemplateContext,
    TokenCheck,
};
use crate::backend::{bounded, SpecBackend};
use crate::config::WorkbenchConfig;
use crate::delegation::{AgentConfig, DelegationCoordinator, DelegationReport};
use crate::enhance::{ContentSink, EnhanceSummary, StreamingIngestor};
use crate::error::{BackendError, ValidationError, WorkbenchError};
use crate::model::{
    DelegationResult, DevelopmentOptions, Gate, Phase, Planning, PlanningField, Spec, SpecId,
    SpecIdentity, Task, TaskId, Template, WorkflowMode,
};
use crate::panel::DetailsPanel;
use crate::phase::{self, Action, View};
use crate::reconciler::{Reconciler, SaveKind, SaveOutcome};
use crate::template::{fill_blank, merge_template, MergeOutcome, TemplateCatalog};
use indexmap::IndexSet;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 256;

/// Progress notification for a view layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkbenchEvent {
    /// The record was persisted under a new identity
    IdentityAdopted {
        /// Adopted identity
        id: SpecId,
        /// Identity discarded by a stale-update fallback
        stale: Option<SpecId>,
    },
    /// The phase moved one step forward
    PhaseAdvanced {
        /// Previous phase
        from: Phase,
        /// New phase
        to: Phase,
    },
    /// Streamed text was appended to the content
    ContentAppended {
        /// Appended bytes
        bytes: usize,
    },
    /// Template planning defaults were merged
    PlanningMerged {
        /// Source template
        template_id: String,
    },
    /// A phase operation stored new artifacts
    ArtifactsUpdated {
        /// Phase whose operation produced them
        phase: Phase,
    },
    /// A delegation batch finished and its results were committed
    DelegationCompleted {
        /// Delegated tasks
        delegated: usize,
        /// Failed tasks (partial-success policy only)
        failed: usize,
    },
    /// An operation failed; editable state is unchanged
    OperationFailed {
        /// Operation name
        operation: &'static str,
        /// Failure description
        message: String,
    },
}

/// Busy indicators, one per long-running operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusyFlags {
    /// Save in flight
    pub saving: bool,
    /// Specify in flight
    pub specifying: bool,
    /// Plan generation in flight
    pub planning: bool,
    /// Task generation in flight
    pub generating_tasks: bool,
    /// Enhancement stream in flight
    pub enhancing: bool,
    /// Delegation batch in flight
    pub delegating: bool,
}

impl BusyFlags {
    /// Check if any operation is in flight
    #[must_use]
    pub fn any(&self) -> bool {
        self.saving
            || self.specifying
            || self.planning
            || self.generating_tasks
            || self.enhancing
            || self.delegating
    }

    fn flag_mut(&mut self, operation: Operation) -> &mut bool {
        match operation {
            Operation::Save => &mut self.saving,
            Operation::Specify => &mut self.specifying,
            Operation::Plan => &mut self.planning,
            Operation::Tasks => &mut self.generating_tasks,
            Operation::Enhance => &mut self.enhancing,
            Operation::Delegate => &mut self.delegating,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Save,
    Specify,
    Plan,
    Tasks,
    Enhance,
    Delegate,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::Save => "save",
            Operation::Specify => "specify",
            Operation::Plan => "plan",
            Operation::Tasks => "tasks",
            Operation::Enhance => "enhance",
            Operation::Delegate => "delegate",
        }
    }
}

/// Clears its busy flag on every exit path
struct BusyGuard {
    flags: Arc<Mutex<BusyFlags>>,
    operation: Operation,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        *self.flags.lock().flag_mut(self.operation) = false;
    }
}

/// Restores the prior identity unless the save resolved it
struct PendingIdentity {
    record: Arc<Mutex<SpecRecord>>,
    prior: Option<SpecIdentity>,
}

impl PendingIdentity {
    fn disarm(&mut self) {
        self.prior = None;
    }
}

impl Drop for PendingIdentity {
    fn drop(&mut self) {
        if let Some(prior) = self.prior.take() {
            let mut record = self.record.lock();
            if record.identity.is_pending() {
                record.identity = prior;
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SpecRecord {
    spec: Spec,
    identity: SpecIdentity,
    planning_draft: Planning,
    template: Option<Arc<Template>>,
    selection: IndexSet<TaskId>,
    delegation_results: Vec<DelegationResult>,
    view: View,
    workflow_mode: WorkflowMode,
    development_options: DevelopmentOptions,
}

impl SpecRecord {
    fn hydrate(spec: Spec, fallback_id: Option<&SpecId>) -> Self {
        let identity = spec
            .id
            .clone()
            .or_else(|| fallback_id.cloned())
            .map_or(SpecIdentity::Absent, SpecIdentity::Confirmed);
        Self {
            planning_draft: spec.planning.clone().unwrap_or_default(),
            view: View::for_phase(spec.phase),
            identity,
            spec,
            ..Self::default()
        }
    }

    /// Advance the phase, returning the single steps taken
    fn advance(&mut self, target: Phase) -> Result<Vec<WorkbenchEvent>, WorkbenchError> {
        let from = self.spec.phase;
        let path = phase::advance(&mut self.spec.phase, target)?;
        let mut previous = from;
        Ok(path
            .into_iter()
            .map(|to| {
                let event = WorkbenchEvent::PhaseAdvanced { from: previous, to };
                previous = to;
                event
            })
            .collect())
    }

    fn try_merge_template(&mut self) -> Option<WorkbenchEvent> {
        let template = self.template.clone()?;
        match merge_template(&self.spec, &self.planning_draft, &template) {
            MergeOutcome::Merged { planning, draft } => {
                self.spec.planning = Some(planning);
                self.planning_draft = draft;
                tracing::info!(template_id = %template.id, "template planning merged");
                Some(WorkbenchEvent::PlanningMerged {
                    template_id: template.id.clone(),
                })
            }
            MergeOutcome::AlreadyPresent | MergeOutcome::NothingToMerge => None,
        }
    }
}

/// Point-in-time copy of the workbench state
#[derive(Debug, Clone, PartialEq)]
pub struct WorkbenchSnapshot {
    /// Spec record
    pub spec: Spec,
    /// Identity state
    pub identity: SpecIdentity,
    /// Editable planning configuration
    pub planning_draft: Planning,
    /// Attached template
    pub template: Option<Arc<Template>>,
    /// Selected task ids in selection order
    pub selection: Vec<TaskId>,
    /// Last committed delegation results
    pub delegation_results: Vec<DelegationResult>,
    /// Current view
    pub view: View,
    /// Task generation mode
    pub workflow_mode: WorkflowMode,
    /// Development options
    pub development_options: DevelopmentOptions,
    /// Busy indicators
    pub busy: BusyFlags,
    /// Actions enabled in the current phase
    pub enabled_actions: Vec<Action>,
}

/// Streams chunks into the record content and notifies watchers
struct RecordSink<'a> {
    workbench: &'a Workbench,
}

impl ContentSink for RecordSink<'_> {
    fn content_is_empty(&self) -> bool {
        self.workbench.record.lock().spec.content.is_empty()
    }

    fn append(&self, text: &str) {
        let content = {
            let mut record = self.workbench.record.lock();
            record.spec.content.push_str(text);
            record.spec.content.clone()
        };
        self.workbench.content.send_replace(content);
        self.workbench.emit(WorkbenchEvent::ContentAppended { bytes: text.len() });
    }
}

/// The workflow orchestrator for one spec
pub struct Workbench {
    config: WorkbenchConfig,
    backend: Arc<dyn SpecBackend>,
    reconciler: Reconciler,
    catalog: TemplateCatalog,
    ingestor: StreamingIngestor,
    coordinator: DelegationCoordinator,
    record: Arc<Mutex<SpecRecord>>,
    busy: Arc<Mutex<BusyFlags>>,
    cancel: Mutex<CancellationToken>,
    events: broadcast::Sender<WorkbenchEvent>,
    content: watch::Sender<String>,
    panel: DetailsPanel,
}

impl std::fmt::Debug for Workbench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let record = self.record.lock();
        f.debug_struct("Workbench")
            .field("identity", &record.identity)
            .field("phase", &record.spec.phase)
            .field("busy", &*self.busy.lock())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Workbench {
    fn with_record(backend: Arc<dyn SpecBackend>, config: WorkbenchConfig, record: SpecRecord) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (content, _) = watch::channel(record.spec.content.clone());
        let panel = DetailsPanel::new(config.details_collapse_delay());
        Self {
            reconciler: Reconciler::new(Arc::clone(&backend), config.request_timeout()),
            catalog: TemplateCatalog::new(
                Arc::clone(&backend),
                config.template_cache_capacity,
                config.request_timeout(),
            ),
            ingestor: StreamingIngestor::new(
                Arc::clone(&backend),
                config.enhance_methods.clone(),
                config.request_timeout(),
                config.stream_idle_timeout(),
            ),
            coordinator: DelegationCoordinator::new(
                Arc::clone(&backend),
                config.delegation_timeout(),
                config.delegation_policy,
            ),
            backend,
            config,
            record: Arc::new(Mutex::new(record)),
            busy: Arc::new(Mutex::new(BusyFlags::default())),
            cancel: Mutex::new(CancellationToken::new()),
            events,
            content,
            panel,
        }
    }

    /// Start a new, unsaved spec
    #[must_use]
    pub fn new_spec(backend: Arc<dyn SpecBackend>, config: WorkbenchConfig) -> Self {
        let record = SpecRecord {
            view: View::Details,
            ..SpecRecord::default()
        };
        Self::with_record(backend, config, record)
    }

    /// Open a persisted spec
    ///
    /// # Errors
    /// `Backend` if the spec cannot be fetched
    #[tracing::instrument(skip(backend, config))]
    pub async fn open(
        backend: Arc<dyn SpecBackend>,
        config: WorkbenchConfig,
        id: &SpecId,
    ) -> Result<Self, WorkbenchError> {
        let spec = Self::fetch_spec(backend.as_ref(), &config, id).await?;
        let workbench = Self::with_record(backend, config, SpecRecord::hydrate(spec, Some(id)));
        workbench.refresh_panel();
        Ok(workbench)
    }

    /// Open a spec (or start a new one) seeded from a template
    ///
    /// The spec and the template are fetched concurrently and merged once
    /// both are available. A template failure is logged and leaves the spec
    /// usable without planning defaults.
    ///
    /// # Errors
    /// `Backend` if the spec cannot be fetched
    #[tracing::instrument(skip(backend, config))]
    pub async fn open_with_template(
        backend: Arc<dyn SpecBackend>,
        config: WorkbenchConfig,
        id: Option<&SpecId>,
        template_id: &str,
    ) -> Result<Self, WorkbenchError> {
        let catalog = TemplateCatalog::new(
            Arc::clone(&backend),
            config.template_cache_capacity,
            config.request_timeout(),
        );
        let cancel = CancellationToken::new();
        let spec_fetch = async {
            match id {
                Some(id) => Self::fetch_spec(backend.as_ref(), &config, id).await.map(Some),
                None => Ok(None),
            }
        };
        let (spec, template) = tokio::join!(spec_fetch, catalog.fetch(template_id, &cancel));

        let mut record = match spec? {
            Some(spec) => SpecRecord::hydrate(spec, id),
            None => SpecRecord::default(),
        };
        match template {
            Ok(template) => record.template = Some(template),
            Err(e) => tracing::warn!(template_id, error = %e, "continuing without template"),
        }
        let merged = record.try_merge_template();

        let mut workbench = Self::with_record(backend, config, record);
        workbench.catalog = catalog;
        if let Some(event) = merged {
            workbench.emit(event);
        }
        workbench.refresh_panel();
        Ok(workbench)
    }

    async fn fetch_spec(
        backend: &dyn SpecBackend,
        config: &WorkbenchConfig,
        id: &SpecId,
    ) -> Result<Spec, WorkbenchError> {
        bounded(config.request_timeout(), &CancellationToken::new(), backend.get_spec(id))
            .await
            .map_err(|e| {
                tracing::error!(%id, error = %e, "spec fetch failed");
                WorkbenchError::Backend(e)
            })
    }

    /// List persisted specs
    ///
    /// # Errors
    /// `Backend` on request failure
    pub async fn list_specs(&self) -> Result<Vec<Spec>, WorkbenchError> {
        let cancel = self.token();
        bounded(self.config.request_timeout(), &cancel, self.backend.list_specs())
            .await
            .map_err(WorkbenchError::Backend)
    }

    /// Replace the record with the persisted copy
    ///
    /// Local edits not yet saved are discarded; selection and delegation
    /// results are kept.
    ///
    /// # Errors
    /// `Backend` if the spec cannot be fetched; nothing to reload for an
    /// unsaved spec is a no-op
    pub async fn reload(&self) -> Result<(), WorkbenchError> {
        let Some(id) = self.record.lock().identity.confirmed().cloned() else {
            return Ok(());
        };
        let spec = Self::fetch_spec(self.backend.as_ref(), &self.config, &id).await?;
        let content = {
            let mut record = self.record.lock();
            let fresh = SpecRecord::hydrate(spec, Some(&id));
            record.spec = fresh.spec;
            record.identity = fresh.identity;
            record.planning_draft = fresh.planning_draft;
            let tasks: Vec<TaskId> = record.spec.tasks.iter().map(|t| t.id.clone()).collect();
            record.selection.retain(|id| tasks.contains(id));
            record.spec.content.clone()
        };
        self.content.send_replace(content);
        self.refresh_panel();
        Ok(())
    }

    /// Fetch a template and merge its planning defaults
    ///
    /// # Errors
    /// `TemplateFetchFailure` if the template cannot be fetched
    pub async fn attach_template(&self, template_id: &str) -> Result<bool, WorkbenchError> {
        let cancel = self.token();
        let template = self
            .catalog
            .fetch(template_id, &cancel)
            .await
            .map_err(|e| self.report("template", e))?;
        let merged = {
            let mut record = self.record.lock();
            record.template = Some(template);
            record.try_merge_template()
        };
        Ok(match merged {
            Some(event) => {
                self.emit(event);
                true
            }
            None => false,
        })
    }

    /// Attempt the template merge against the current record
    ///
    /// Safe to call at any time; returns `false` once planning is present.
    pub fn try_merge_template(&self) -> bool {
        let merged = self.record.lock().try_merge_template();
        match merged {
            Some(event) => {
                self.emit(event);
                true
            }
            None => false,
        }
    }

    // ---- Local edits (last write wins) ----

    /// Set the title
    pub fn set_title(&self, title: impl Into<String>) {
        self.record.lock().spec.title = title.into();
        self.refresh_panel();
    }

    /// Set the description
    pub fn set_description(&self, description: impl Into<String>) {
        self.record.lock().spec.description = description.into();
        self.refresh_panel();
    }

    /// Replace the content
    ///
    /// During an enhancement stream later chunks append to this value.
    pub fn set_content(&self, content: impl Into<String>) {
        let content = content.into();
        self.record.lock().spec.content.clone_from(&content);
        self.content.send_replace(content);
    }

    /// Set the formal requirements text
    pub fn set_requirements(&self, text: impl Into<String>) {
        self.record.lock().spec.specification = Some(text.into());
    }

    /// Set the plan text
    pub fn set_plan_text(&self, text: impl Into<String>) {
        self.record.lock().spec.plan = Some(text.into());
    }

    /// Set one editable planning text field
    pub fn set_planning_field(&self, field: PlanningField, value: impl Into<String>) {
        *self.record.lock().planning_draft.field_mut(field) = value.into();
    }

    /// Set one editable gate flag
    pub fn set_gate(&self, gate: Gate, enabled: bool) {
        *self.record.lock().planning_draft.gate_mut(gate) = enabled;
    }

    /// Add a tag; duplicates are ignored
    ///
    /// # Errors
    /// `EmptyTag` if the tag is blank after trimming
    pub fn add_tag(&self, tag: &str) -> Result<bool, WorkbenchError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(ValidationError::EmptyTag.into());
        }
        Ok(self.record.lock().spec.tags.insert(tag.to_string()))
    }

    /// Remove a tag
    pub fn remove_tag(&self, tag: &str) -> bool {
        self.record.lock().spec.tags.shift_remove(tag.trim())
    }

    /// Set the task generation mode
    pub fn set_workflow_mode(&self, mode: WorkflowMode) {
        self.record.lock().workflow_mode = mode;
    }

    /// Set development options
    pub fn set_development_options(&self, options: DevelopmentOptions) {
        self.record.lock().development_options = options;
    }

    // ---- Selection ----

    /// Toggle a task in the selection; returns whether it is now selected
    ///
    /// # Errors
    /// `UnknownTask` if the id is not in the task list
    pub fn toggle_task(&self, task_id: &TaskId) -> Result<bool, WorkbenchError> {
        let mut record = self.record.lock();
        phase::ensure_enabled(&record.spec, Action::SelectTasks)?;
        if record.spec.task(task_id).is_none() {
            return Err(ValidationError::UnknownTask(task_id.clone()).into());
        }
        if record.selection.shift_remove(task_id) {
            Ok(false)
        } else {
            record.selection.insert(task_id.clone());
            Ok(true)
        }
    }

    /// Select every task, in list order after the current selection
    pub fn select_all_tasks(&self) {
        let mut record = self.record.lock();
        let ids: Vec<TaskId> = record.spec.tasks.iter().map(|t| t.id.clone()).collect();
        record.selection.extend(ids);
    }

    /// Clear the selection
    pub fn clear_selection(&self) {
        self.record.lock().selection.clear();
    }

    // ---- Navigation ----

    /// Switch view; returns `false` if the view is not open yet
    ///
    /// Navigation never changes the phase.
    pub fn navigate(&self, view: View) -> bool {
        let mut record = self.record.lock();
        if phase::view_enabled(&record.spec, view) {
            record.view = view;
            true
        } else {
            false
        }
    }

    /// Actions enabled in the current phase
    #[must_use]
    pub fn enabled_actions(&self) -> Vec<Action> {
        phase::enabled_actions(&self.record.lock().spec)
    }

    // ---- Observation ----

    /// Copy the current state
    #[must_use]
    pub fn snapshot(&self) -> WorkbenchSnapshot {
        let busy = *self.busy.lock();
        let record = self.record.lock();
        WorkbenchSnapshot {
            spec: record.spec.clone(),
            identity: record.identity.clone(),
            planning_draft: record.planning_draft.clone(),
            template: record.template.clone(),
            selection: record.selection.iter().cloned().collect(),
            delegation_results: record.delegation_results.clone(),
            view: record.view,
            workflow_mode: record.workflow_mode,
            development_options: record.development_options.clone(),
            busy,
            enabled_actions: phase::enabled_actions(&record.spec),
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.record.lock().spec.phase
    }

    /// Current identity
    #[must_use]
    pub fn identity(&self) -> SpecIdentity {
        self.record.lock().identity.clone()
    }

    /// Busy indicators
    #[must_use]
    pub fn busy(&self) -> BusyFlags {
        *self.busy.lock()
    }

    /// Subscribe to progress events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WorkbenchEvent> {
        self.events.subscribe()
    }

    /// Watch the content
    #[must_use]
    pub fn subscribe_content(&self) -> watch::Receiver<String> {
        self.content.subscribe()
    }

    /// Details panel state
    #[inline]
    #[must_use]
    pub fn panel(&self) -> &DetailsPanel {
        &self.panel
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    /// Cancel every in-flight operation
    ///
    /// Operations started afterwards run under a fresh token.
    pub fn cancel_all(&self) {
        let previous = std::mem::replace(&mut *self.cancel.lock(), CancellationToken::new());
        previous.cancel();
        tracing::info!("in-flight operations cancelled");
    }

    // ---- Operations ----

    /// Persist the record
    ///
    /// # Errors
    /// - `Busy` if a save is already in flight
    /// - `PersistenceFailure` if the backend rejects the save
    #[tracing::instrument(skip(self))]
    pub async fn save(&self) -> Result<SaveOutcome, WorkbenchError> {
        let cancel = self.token();
        self.persist(&cancel)
            .await
            .map_err(|e| self.report(Operation::Save.name(), e))
    }

    /// Generate the formal specification and advance to `plan`
    ///
    /// # Errors
    /// - `Validation` if the content is empty; nothing is sent
    /// - `PersistenceFailure` if the spec cannot be persisted first
    /// - `PhaseTransitionFailure` if the endpoint fails; phase unchanged
    #[tracing::instrument(skip(self))]
    pub async fn specify(&self) -> Result<Spec, WorkbenchError> {
        let _busy = self.begin(Operation::Specify)?;
        self.specify_inner()
            .await
            .map_err(|e| self.report(Operation::Specify.name(), e))
    }

    async fn specify_inner(&self) -> Result<Spec, WorkbenchError> {
        {
            let record = self.record.lock();
            phase::ensure_enabled(&record.spec, Action::Specify)?;
            if record.spec.content.trim().is_empty() {
                return Err(ValidationError::EmptyContent.into());
            }
        }

        let cancel = self.token();
        let id = self.ensure_persisted(&cancel).await?;
        let request = {
            let record = self.record.lock();
            let spec = &record.spec;
            SpecifyRequest {
                requirements: spec
                    .specification
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| spec.content.clone()),
                title: Some(spec.title.clone()).filter(|s| !s.trim().is_empty()),
                description: Some(spec.description.clone()).filter(|s| !s.trim().is_empty()),
                template_id: record.template.as_ref().map(|t| t.id.clone()),
            }
        };

        tracing::debug!(%id, "calling specify endpoint");
        let response = bounded(
            self.config.request_timeout(),
            &cancel,
            self.backend.specify(&id, &request),
        )
        .await
        .map_err(|source| WorkbenchError::PhaseTransitionFailure {
            phase: Phase::Specification,
            source,
        })?;

        let (spec, events) = {
            let mut record = self.record.lock();
            let returned = response.spec;
            record.spec.absorb_provenance(&returned);
            record.spec.id = Some(id.clone());
            if let Some(text) = returned.specification.filter(|s| !s.trim().is_empty()) {
                record.spec.specification = Some(text);
            }
            if returned.constitutional_compliance.is_some() {
                record.spec.constitutional_compliance = returned.constitutional_compliance;
            }
            if record.spec.planning.is_none() {
                if let Some(planning) = returned.planning {
                    record.planning_draft = fill_blank(&record.planning_draft, &planning);
                    record.spec.planning = Some(planning);
                }
            }
            let mut events = vec![WorkbenchEvent::ArtifactsUpdated {
                phase: Phase::Specification,
            }];
            events.extend(record.try_merge_template());
            events.extend(record.advance(Phase::Plan)?);
            record.view = View::Plan;
            (record.spec.clone(), events)
        };
        self.emit_all(events);
        tracing::info!(%id, phase = %spec.phase, "specification generated");
        Ok(spec)
    }

    /// Generate the implementation plan
    ///
    /// The editable planning configuration is sent and, on success, becomes
    /// the spec's planning. The phase stays `plan`.
    ///
    /// # Errors
    /// - `ActionNotEnabled` before the `plan` phase
    /// - `PhaseTransitionFailure` if the endpoint fails or returns no artifact
    #[tracing::instrument(skip(self))]
    pub async fn generate_plan(&self) -> Result<Spec, WorkbenchError> {
        let _busy = self.begin(Operation::Plan)?;
        self.generate_plan_inner()
            .await
            .map_err(|e| self.report(Operation::Plan.name(), e))
    }

    async fn generate_plan_inner(&self) -> Result<Spec, WorkbenchError> {
        phase::ensure_enabled(&self.record.lock().spec, Action::GeneratePlan)?;

        let cancel = self.token();
        let id = self.ensure_persisted(&cancel).await?;
        let (request, draft) = {
            let record = self.record.lock();
            let draft = record.planning_draft.clone();
            let request = PlanRequest {
                tech_stack: draft.tech_stack.clone(),
                architecture: Some(draft.architecture.clone()).filter(|s| !s.trim().is_empty()),
                constraints: Some(draft.non_functional_requirements.clone())
                    .filter(|s| !s.trim().is_empty()),
                constitution_gates: draft.gates.to_map(),
                specification: record.spec.specification.clone(),
                use_mcp_tools: record.development_options.use_mcp_tools,
                use_a2a: record.development_options.use_a2a,
            };
            (request, draft)
        };

        tracing::debug!(%id, "calling plan endpoint");
        let failure = |source: BackendError| WorkbenchError::PhaseTransitionFailure {
            phase: Phase::Plan,
            source,
        };
        let response = bounded(
            self.config.request_timeout(),
            &cancel,
            self.backend.plan(&id, &request),
        )
        .await
        .map_err(failure)?;

        let artifacts = PlanArtifacts::from(response);
        if artifacts.is_empty() {
            return Err(failure(BackendError::Parse(
                "plan response carried no plan artifacts".to_string(),
            )));
        }

        let spec = {
            let mut record = self.record.lock();
            let PlanArtifacts {
                plan,
                research,
                data_model,
                contracts,
                constitutional_compliance,
            } = artifacts;
            let spec = &mut record.spec;
            for (slot, value) in [
                (&mut spec.plan, plan),
                (&mut spec.research, research),
                (&mut spec.data_model, data_model),
                (&mut spec.contracts, contracts),
            ] {
                if value.is_some() {
                    *slot = value;
                }
            }
            if constitutional_compliance.is_some() {
                spec.constitutional_compliance = constitutional_compliance;
            }
            spec.planning = Some(draft);
            record.spec.clone()
        };
        self.emit(WorkbenchEvent::ArtifactsUpdated { phase: Phase::Plan });
        tracing::info!(%id, "plan generated");
        Ok(spec)
    }

    /// Generate tasks from the plan and advance to `tasks`, then `completed`
    /// when the list is non-empty
    ///
    /// # Errors
    /// - `Validation` if no plan artifact exists
    /// - `PhaseTransitionFailure` if the endpoint fails; phase unchanged
    #[tracing::instrument(skip(self))]
    pub async fn generate_tasks(&self) -> Result<Vec<Task>, WorkbenchError> {
        let _busy = self.begin(Operation::Tasks)?;
        self.generate_tasks_inner()
            .await
            .map_err(|e| self.report(Operation::Tasks.name(), e))
    }

    async fn generate_tasks_inner(&self) -> Result<Vec<Task>, WorkbenchError> {
        {
            let record = self.record.lock();
            if !record.spec.has_plan_artifacts() {
                return Err(ValidationError::NoPlanArtifacts.into());
            }
            phase::ensure_enabled(&record.spec, Action::GenerateTasks)?;
        }

        let cancel = self.token();
        let id = self.ensure_persisted(&cancel).await?;
        let request = {
            let record = self.record.lock();
            let spec = &record.spec;
            TasksRequest {
                mode: record.workflow_mode,
                specification: spec
                    .specification
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| spec.content.clone()),
                plan: spec.plan.clone().unwrap_or_default(),
                title: spec.title.clone(),
                description: spec.description.clone(),
                constitution: ConstitutionData::from(&record.planning_draft),
                development_options: record.development_options.clone(),
                template_context: record.template.as_ref().map(|t| TemplateContext {
                    id: t.id.clone(),
                    title: t.title.clone(),
                    planning: t.planning.clone(),
                }),
                research: spec.research.clone(),
                data_model: spec.data_model.clone(),
                contracts: spec.contracts.clone(),
            }
        };

        tracing::debug!(%id, mode = ?request.mode, "calling tasks endpoint");
        let response = bounded(
            self.config.request_timeout(),
            &cancel,
            self.backend.generate_tasks(&id, &request),
        )
        .await
        .map_err(|source| WorkbenchError::PhaseTransitionFailure {
            phase: Phase::Tasks,
            source,
        })?;

        let tasks = response.tasks;
        let events = {
            let mut record = self.record.lock();
            record.spec.tasks.clone_from(&tasks);
            let SpecRecord {
                spec, selection, ..
            } = &mut *record;
            selection.retain(|selected| spec.task(selected).is_some());

            let mut events = vec![WorkbenchEvent::ArtifactsUpdated { phase: Phase::Tasks }];
            events.extend(record.advance(Phase::Tasks)?);
            if !tasks.is_empty() {
                events.extend(record.advance(Phase::Completed)?);
            }
            record.view = View::Tasks;
            events
        };
        self.emit_all(events);
        tracing::info!(%id, count = tasks.len(), "tasks generated");
        Ok(tasks)
    }

    /// Stream an enhancement into the content
    ///
    /// Content appended before a failure or cancellation is kept.
    ///
    /// # Errors
    /// - `PersistenceFailure` if the spec cannot be persisted first
    /// - `EnhancementFailure` if no method streams or the stream breaks
    #[tracing::instrument(skip(self))]
    pub async fn enhance(&self) -> Result<EnhanceSummary, WorkbenchError> {
        let _busy = self.begin(Operation::Enhance)?;
        self.enhance_inner()
            .await
            .map_err(|e| self.report(Operation::Enhance.name(), e))
    }

    async fn enhance_inner(&self) -> Result<EnhanceSummary, WorkbenchError> {
        let cancel = self.token();
        let id = self.ensure_persisted(&cancel).await?;
        let sink = RecordSink { workbench: self };
        self.ingestor.ingest(&id, &sink, &cancel).await
    }

    /// Delegate the selected tasks to a coding agent
    ///
    /// Under the all-or-nothing policy nothing is committed unless every
    /// task succeeds. Committed results replace earlier ones.
    ///
    /// # Errors
    /// - `ActionNotEnabled` before the `completed` phase
    /// - `Validation` for an empty selection or missing agent
    /// - `DelegationFailure` for the first failing task (all-or-nothing)
    #[tracing::instrument(skip(self, agent))]
    pub async fn delegate(&self, agent: &AgentConfig) -> Result<DelegationReport, WorkbenchError> {
        let _busy = self.begin(Operation::Delegate)?;
        self.delegate_inner(agent)
            .await
            .map_err(|e| self.report(Operation::Delegate.name(), e))
    }

    async fn delegate_inner(&self, agent: &AgentConfig) -> Result<DelegationReport, WorkbenchError> {
        phase::ensure_enabled(&self.record.lock().spec, Action::Delegate)?;

        let cancel = self.token();
        let id = self.ensure_persisted(&cancel).await?;
        let (spec, selection, mode) = {
            let record = self.record.lock();
            (
                record.spec.clone(),
                record.selection.iter().cloned().collect::<Vec<_>>(),
                record.workflow_mode,
            )
        };

        let report = self
            .coordinator
            .delegate(&spec, &id, &selection, agent, mode, &cancel)
            .await?;

        let delegated: Vec<DelegationResult> = report.results().cloned().collect();
        let failed = report.failures().count();
        let count = delegated.len();
        self.record.lock().delegation_results = delegated;
        self.emit(WorkbenchEvent::DelegationCompleted {
            delegated: count,
            failed,
        });
        Ok(report)
    }

    /// Check a repository credential with the backend
    ///
    /// # Errors
    /// - `EmptyToken` if the token is blank; nothing is sent
    /// - `Backend` on request failure
    #[tracing::instrument(skip(self, token))]
    pub async fn test_github_token(&self, token: &SecretString) -> Result<TokenCheck, WorkbenchError> {
        let raw = token.expose_secret().trim();
        if raw.is_empty() {
            return Err(ValidationError::EmptyToken.into());
        }
        let cancel = self.token();
        let check = bounded(
            self.config.request_timeout(),
            &cancel,
            self.backend.test_github_token(raw),
        )
        .await
        .map_err(WorkbenchError::Backend)?;
        tracing::info!(ok = check.ok, login = ?check.login, "credential checked");
        Ok(check)
    }

    // ---- Internals ----

    fn token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    fn begin(&self, operation: Operation) -> Result<BusyGuard, WorkbenchError> {
        let mut flags = self.busy.lock();
        let flag = flags.flag_mut(operation);
        if *flag {
            return Err(WorkbenchError::Busy {
                operation: operation.name(),
            });
        }
        *flag = true;
        Ok(BusyGuard {
            flags: Arc::clone(&self.busy),
            operation,
        })
    }

    fn emit(&self, event: WorkbenchEvent) {
        // No subscriber is not an error.
        let _ = self.events.send(event);
    }

    fn emit_all(&self, events: impl IntoIterator<Item = WorkbenchEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    fn report(&self, operation: &'static str, error: WorkbenchError) -> WorkbenchError {
        tracing::error!(operation, error = %error, "operation failed");
        self.emit(WorkbenchEvent::OperationFailed {
            operation,
            message: error.to_string(),
        });
        error
    }

    fn refresh_panel(&self) {
        let (title, description) = {
            let record = self.record.lock();
            (record.spec.title.clone(), record.spec.description.clone())
        };
        self.panel.evaluate(&title, &description);
    }

    /// Confirmed identity, persisting first if there is none
    async fn ensure_persisted(&self, cancel: &CancellationToken) -> Result<SpecId, WorkbenchError> {
        if let Some(id) = self.record.lock().identity.confirmed().cloned() {
            return Ok(id);
        }
        self.persist(cancel).await.map(|outcome| outcome.id)
    }

    async fn persist(&self, cancel: &CancellationToken) -> Result<SaveOutcome, WorkbenchError> {
        let _busy = self.begin(Operation::Save)?;
        let (prior, spec) = {
            let mut record = self.record.lock();
            if record.identity.is_pending() {
                return Err(WorkbenchError::Busy {
                    operation: Operation::Save.name(),
                });
            }
            let prior = std::mem::replace(&mut record.identity, SpecIdentity::Pending);
            (prior, record.spec.clone())
        };
        let mut pending = PendingIdentity {
            record: Arc::clone(&self.record),
            prior: Some(prior.clone()),
        };

        let outcome = self.reconciler.save(&prior, &spec, cancel).await?;

        pending.disarm();
        {
            let mut record = self.record.lock();
            record.spec.absorb_provenance(&outcome.persisted);
            record.spec.id = Some(outcome.id.clone());
            record.identity = SpecIdentity::Confirmed(outcome.id.clone());
        }
        if outcome.adopted_identity() {
            let stale = match &outcome.kind {
                SaveKind::Recreated { stale } => Some(stale.clone()),
                _ => None,
            };
            tracing::info!(id = %outcome.id, ?stale, "identity adopted");
            self.emit(WorkbenchEvent::IdentityAdopted {
                id: outcome.id.clone(),
                stale,
            });
        }
        Ok(outcome)
    }
}
