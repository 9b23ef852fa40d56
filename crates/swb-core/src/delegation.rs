//! Parallel delegation coordinator
//!
//! Provides task fan-out to external coding agents:
//! - One assignment request per selected task, all issued concurrently
//! - Attribution by selection position, independent of completion order
//! - Batch outcome under a configurable [`DelegationPolicy`]

use crate::api::{AssignRequest, AssignResponse, Customization, TaskDetails};
use crate::backend::{bounded, SpecBackend};
use crate::config::DelegationPolicy;
use crate::error::{BackendError, ValidationError, WorkbenchError};
use crate::model::{DelegationResult, Spec, SpecId, Task, TaskId, WorkflowMode};
use futures::future::join_all;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Status label used when the backend reports none
pub const UNKNOWN_STATUS: &str = "unknown";

/// Shared coding-agent configuration for a delegation batch
#[derive(Clone)]
pub struct AgentConfig {
    /// Coding agent identity
    pub agent_id: String,
    /// Agent credential
    pub api_key: SecretString,
    /// Agent endpoint
    pub endpoint: Option<String>,
    /// Repository credential
    pub github_pat: Option<SecretString>,
    /// Import the template repository instead of forking
    pub prefer_import: bool,
    /// Scenario customisation
    pub customization: Customization,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("agent_id", &self.agent_id)
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("github_pat", &self.github_pat.as_ref().map(|_| "[REDACTED]"))
            .field("prefer_import", &self.prefer_import)
            .field("customization", &self.customization)
            .finish()
    }
}

impl AgentConfig {
    /// Create new agent configuration
    #[must_use]
    pub fn new(agent_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            api_key: SecretString::from(api_key.into()),
            endpoint: None,
            github_pat: None,
            prefer_import: false,
            customization: Customization::default(),
        }
    }

    /// With agent endpoint
    #[inline]
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// With repository credential
    #[inline]
    #[must_use]
    pub fn with_github_pat(mut self, pat: impl Into<String>) -> Self {
        self.github_pat = Some(SecretString::from(pat.into()));
        self
    }

    /// With repository import preference
    #[inline]
    #[must_use]
    pub fn with_prefer_import(mut self, prefer_import: bool) -> Self {
        self.prefer_import = prefer_import;
        self
    }

    /// With scenario customisation
    #[inline]
    #[must_use]
    pub fn with_customization(mut self, customization: Customization) -> Self {
        self.customization = customization;
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.agent_id.trim().is_empty() {
            return Err(ValidationError::MissingAgent);
        }
        Ok(())
    }

    /// Build the wire request delegating `task`
    fn request_for(&self, spec: &Spec, task: &Task, mode: WorkflowMode) -> AssignRequest {
        AssignRequest {
            agent_id: self.agent_id.clone(),
            api_key: self.api_key.expose_secret().to_string(),
            endpoint: self.endpoint.clone(),
            customization: self.customization.for_spec(spec),
            github_pat: self
                .github_pat
                .as_ref()
                .map(|pat| pat.expose_secret().to_string()),
            prefer_import: self.prefer_import,
            selected_tasks: vec![task.id.clone()],
            workflow_mode: mode,
            task_details: TaskDetails::from(task),
        }
    }
}

/// Outcome of one delegated task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Originating task
    pub task_id: TaskId,
    /// Task title at issue time
    pub task_title: String,
    /// 1-based position in the selection
    pub assignment_number: usize,
    /// Result or failure
    pub result: Result<DelegationResult, BackendError>,
}

impl TaskOutcome {
    /// Check if the task was delegated
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-task outcomes of a delegation batch, in selection order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationReport {
    outcomes: Vec<TaskOutcome>,
}

impl DelegationReport {
    /// All outcomes, index-aligned to the selection
    #[inline]
    #[must_use]
    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    /// Successful results in selection order
    pub fn results(&self) -> impl Iterator<Item = &DelegationResult> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Failed tasks in selection order
    pub fn failures(&self) -> impl Iterator<Item = (&TaskId, &BackendError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.task_id, e)))
    }

    /// Check if every task was delegated
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(TaskOutcome::is_success)
    }

    /// Consume into the successful results
    #[must_use]
    pub fn into_results(self) -> Vec<DelegationResult> {
        self.outcomes
            .into_iter()
            .filter_map(|o| o.result.ok())
            .collect()
    }
}

fn attribute(task: &Task, assignment_number: usize, response: AssignResponse) -> DelegationResult {
    DelegationResult {
        task_id: task.id.clone(),
        task_title: task.title.clone(),
        assignment_number,
        status: response
            .status_label()
            .unwrap_or(UNKNOWN_STATUS)
            .to_string(),
        agent: response.agent_name().map(str::to_string),
        message: response.message,
        session_url: response.session_url,
        repository_url: response.repository_url,
        issue_url: response.issue_url,
    }
}

/// Fan-out coordinator for task delegation
#[derive(Clone)]
pub struct DelegationCoordinator {
    backend: Arc<dyn SpecBackend>,
    timeout: Duration,
    policy: DelegationPolicy,
}

impl fmt::Debug for DelegationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegationCoordinator")
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DelegationCoordinator {
    /// Create new coordinator
    #[must_use]
    pub fn new(backend: Arc<dyn SpecBackend>, timeout: Duration, policy: DelegationPolicy) -> Self {
        Self {
            backend,
            timeout,
            policy,
        }
    }

    /// Batch failure policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> DelegationPolicy {
        self.policy
    }

    /// Delegate every selected task of `spec` concurrently
    ///
    /// # Arguments
    /// * `id` - Confirmed identity the requests are addressed to
    /// * `selection` - Task ids in selection order; defines assignment numbers
    ///
    /// # Errors
    /// - `Validation` before any request if the selection is empty, names an
    ///   unknown task, or the agent is missing
    /// - `DelegationFailure` for the first failing task in selection order,
    ///   under `AllOrNothing`
    #[tracing::instrument(skip(self, spec, agent, cancel), fields(tasks = selection.len()))]
    pub async fn delegate(
        &self,
        spec: &Spec,
        id: &SpecId,
        selection: &[TaskId],
        agent: &AgentConfig,
        mode: WorkflowMode,
        cancel: &CancellationToken,
    ) -> Result<DelegationReport, WorkbenchError> {
        if selection.is_empty() {
            return Err(ValidationError::NoTasksSelected.into());
        }
        agent.validate()?;
        let tasks = selection
            .iter()
            .map(|task_id| {
                spec.task(task_id)
                    .ok_or_else(|| ValidationError::UnknownTask(task_id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(%id, agent = %agent.agent_id, policy = ?self.policy, "issuing delegation requests");

        let requests = tasks.iter().enumerate().map(|(index, task)| {
            let request = agent.request_for(spec, task, mode);
            async move {
                let assignment_number = index + 1;
                let result = bounded(self.timeout, cancel, self.backend.assign_task(id, &request))
                    .await
                    .map(|response| attribute(task, assignment_number, response));
                if let Err(e) = &result {
                    tracing::warn!(task = %task.id, assignment_number, error = %e, "task delegation failed");
                }
                TaskOutcome {
                    task_id: task.id.clone(),
                    task_title: task.title.clone(),
                    assignment_number,
                    result,
                }
            }
        });

        // join_all keeps input order regardless of completion order.
        let report = DelegationReport {
            outcomes: join_all(requests).await,
        };

        if self.policy == DelegationPolicy::AllOrNothing {
            if let Some((task_id, source)) = report.failures().next() {
                tracing::error!(task = %task_id, error = %source, "delegation batch failed");
                return Err(WorkbenchError::DelegationFailure {
                    task_id: task_id.clone(),
                    source: source.clone(),
                });
            }
        }

        tracing::info!(
            delegated = report.results().count(),
            failed = report.failures().count(),
            "delegation batch complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockSpecBackend;
    use pretty_assertions::assert_eq;

    fn spec_with_tasks() -> Spec {
        let mut spec = Spec::new("Todo").with_description("A todo app");
        spec.tasks = vec![
            Task::new("A", "Scaffold").with_criteria(vec!["builds".to_string()]),
            Task::new("B", "Model"),
            Task::new("C", "API"),
        ];
        spec
    }

    fn ids(raw: &[&str]) -> Vec<TaskId> {
        raw.iter().map(|s| TaskId::from(*s)).collect()
    }

    fn coordinator(backend: MockSpecBackend, policy: DelegationPolicy) -> DelegationCoordinator {
        DelegationCoordinator::new(Arc::new(backend), Duration::from_secs(5), policy)
    }

    fn accepted(_: &SpecId, request: &AssignRequest) -> Result<AssignResponse, BackendError> {
        Ok(AssignResponse {
            status: Some("success".to_string()),
            agent: Some(request.agent_id.clone()),
            ..AssignResponse::default()
        })
    }

    #[test]
    fn agent_config_debug_redacts_secrets() {
        let agent = AgentConfig::new("devin", "sk-live-123").with_github_pat("ghp_abc");
        let shown = format!("{agent:?}");
        assert!(!shown.contains("sk-live-123"));
        assert!(!shown.contains("ghp_abc"));
        assert!(shown.contains("devin"));
    }

    #[test]
    fn request_carries_task_detail_and_defaults() {
        let spec = spec_with_tasks();
        let agent = AgentConfig::new("devin", "key").with_prefer_import(true);
        let request = agent.request_for(&spec, &spec.tasks[0], WorkflowMode::Breakdown);

        assert_eq!(request.selected_tasks, ids(&["A"]));
        assert_eq!(request.task_details.title, "Scaffold");
        assert_eq!(request.task_details.acceptance_criteria, vec!["builds"]);
        assert_eq!(request.customization.customer_scenario, "A todo app");
        assert_eq!(request.customization.title, "Todo");
        assert_eq!(request.api_key, "key");
        assert!(request.prefer_import);
    }

    #[tokio::test]
    async fn results_follow_selection_order() {
        let mut backend = MockSpecBackend::new();
        backend.expect_assign_task().times(2).returning(accepted);

        let report = coordinator(backend, DelegationPolicy::AllOrNothing)
            .delegate(
                &spec_with_tasks(),
                &SpecId::from("s1"),
                &ids(&["C", "A"]),
                &AgentConfig::new("devin", "key"),
                WorkflowMode::Breakdown,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let results = report.into_results();
        assert_eq!(results[0].task_id, TaskId::from("C"));
        assert_eq!(results[0].assignment_number, 1);
        assert_eq!(results[0].task_title, "API");
        assert_eq!(results[1].task_id, TaskId::from("A"));
        assert_eq!(results[1].assignment_number, 2);
        assert_eq!(results[1].status, "success");
    }

    #[tokio::test]
    async fn validation_precedes_any_request() {
        let mut backend = MockSpecBackend::new();
        backend.expect_assign_task().never();
        let coordinator = coordinator(backend, DelegationPolicy::AllOrNothing);
        let spec = spec_with_tasks();
        let cancel = CancellationToken::new();
        let agent = AgentConfig::new("devin", "key");

        let err = coordinator
            .delegate(&spec, &SpecId::from("s1"), &[], &agent, WorkflowMode::Breakdown, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkbenchError::Validation(ValidationError::NoTasksSelected)
        ));

        let err = coordinator
            .delegate(&spec, &SpecId::from("s1"), &ids(&["A", "Z"]), &agent, WorkflowMode::Breakdown, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkbenchError::Validation(ValidationError::UnknownTask(_))
        ));

        let err = coordinator
            .delegate(
                &spec,
                &SpecId::from("s1"),
                &ids(&["A"]),
                &AgentConfig::new(" ", "key"),
                WorkflowMode::Breakdown,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkbenchError::Validation(ValidationError::MissingAgent)
        ));
    }

    #[tokio::test]
    async fn all_or_nothing_reports_first_failure() {
        let mut backend = MockSpecBackend::new();
        backend.expect_assign_task().times(3).returning(|id, request| {
            if request.selected_tasks[0] == TaskId::from("B") {
                Err(BackendError::Transport("connection reset".to_string()))
            } else {
                accepted(id, request)
            }
        });

        let err = coordinator(backend, DelegationPolicy::AllOrNothing)
            .delegate(
                &spec_with_tasks(),
                &SpecId::from("s1"),
                &ids(&["A", "B", "C"]),
                &AgentConfig::new("devin", "key"),
                WorkflowMode::Breakdown,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            WorkbenchError::DelegationFailure { task_id, source } => {
                assert_eq!(task_id, TaskId::from("B"));
                assert!(matches!(source, BackendError::Transport(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn partial_success_keeps_successes() {
        let mut backend = MockSpecBackend::new();
        backend.expect_assign_task().times(3).returning(|id, request| {
            if request.selected_tasks[0] == TaskId::from("B") {
                Err(BackendError::Api {
                    status: 502,
                    message: "agent unavailable".to_string(),
                })
            } else {
                accepted(id, request)
            }
        });

        let report = coordinator(backend, DelegationPolicy::PartialSuccess)
            .delegate(
                &spec_with_tasks(),
                &SpecId::from("s1"),
                &ids(&["A", "B", "C"]),
                &AgentConfig::new("devin", "key"),
                WorkflowMode::Oneshot,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!report.is_complete());
        let failed: Vec<_> = report.failures().map(|(id, _)| id.clone()).collect();
        assert_eq!(failed, ids(&["B"]));
        let numbers: Vec<_> = report.results().map(|r| r.assignment_number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[tokio::test]
    async fn missing_status_is_unknown() {
        let mut backend = MockSpecBackend::new();
        backend
            .expect_assign_task()
            .returning(|_, _| Ok(AssignResponse::default()));

        let report = coordinator(backend, DelegationPolicy::AllOrNothing)
            .delegate(
                &spec_with_tasks(),
                &SpecId::from("s1"),
                &ids(&["A"]),
                &AgentConfig::new("devin", "key"),
                WorkflowMode::Breakdown,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.into_results()[0].status, UNKNOWN_STATUS);
    }
}
