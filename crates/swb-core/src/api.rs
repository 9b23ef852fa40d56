//! Request and response bodies of the backend REST surface

use crate::model::{
    ConstitutionalCompliance, DevelopmentOptions, Gates, Planning, Spec, Task, TaskId,
    TaskPriority, WorkflowMode,
};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// `POST /specs` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecDraft {
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Raw specification markdown
    pub content: String,
    /// Labels
    #[serde(default)]
    pub tags: IndexSet<String>,
}

impl From<&Spec> for SpecDraft {
    fn from(spec: &Spec) -> Self {
        Self {
            title: spec.title.clone(),
            description: spec.description.clone(),
            content: spec.content.clone(),
            tags: spec.tags.clone(),
        }
    }
}

/// `PUT /specs/{id}` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecUpdate {
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Raw specification markdown
    pub content: String,
    /// Labels
    pub tags: IndexSet<String>,
    /// Generated formal requirements
    pub specification: Option<String>,
    /// Generated plan
    pub plan: Option<String>,
    /// Generated tasks
    pub tasks: Vec<Task>,
    /// Current phase
    pub phase: crate::model::Phase,
}

impl From<&Spec> for SpecUpdate {
    fn from(spec: &Spec) -> Self {
        Self {
            title: spec.title.clone(),
            description: spec.description.clone(),
            content: spec.content.clone(),
            tags: spec.tags.clone(),
            specification: spec.specification.clone(),
            plan: spec.plan.clone(),
            tasks: spec.tasks.clone(),
            phase: spec.phase,
        }
    }
}

/// `POST /specs/{id}/specify` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecifyRequest {
    /// Requirements text the formal specification is derived from
    pub requirements: String,
    /// Title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Template the spec was started from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

/// `POST /specs/{id}/specify` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecifyResponse {
    /// Updated spec with `specification` populated
    pub spec: Spec,
    /// Status message
    #[serde(default)]
    pub message: Option<String>,
}

/// `POST /specs/{id}/plan` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    /// Technology stack
    pub tech_stack: String,
    /// Architecture notes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// Non-functional requirements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    /// Gate flags keyed by wire name
    pub constitution_gates: BTreeMap<String, bool>,
    /// Formal specification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specification: Option<String>,
    /// Development option
    pub use_mcp_tools: bool,
    /// Development option
    pub use_a2a: bool,
}

/// `POST /specs/{id}/plan` response; either `{spec}` or flat artifacts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanResponse {
    /// Updated spec
    #[serde(default)]
    pub spec: Option<Spec>,
    /// Plan text
    #[serde(default)]
    pub plan: Option<String>,
    /// Research notes
    #[serde(default)]
    pub research: Option<String>,
    /// Data model
    #[serde(default)]
    pub data_model: Option<String>,
    /// Contracts
    #[serde(default)]
    pub contracts: Option<String>,
    /// Governance result
    #[serde(default)]
    pub constitutional_compliance: Option<ConstitutionalCompliance>,
    /// Status message
    #[serde(default)]
    pub message: Option<String>,
}

/// Plan artifacts normalised from either response shape
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlanArtifacts {
    /// Plan text
    pub plan: Option<String>,
    /// Research notes
    pub research: Option<String>,
    /// Data model
    pub data_model: Option<String>,
    /// Contracts
    pub contracts: Option<String>,
    /// Governance result
    pub constitutional_compliance: Option<ConstitutionalCompliance>,
}

impl PlanArtifacts {
    /// Check if any artifact is non-empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        [&self.plan, &self.research, &self.data_model, &self.contracts]
            .into_iter()
            .all(|a| a.as_deref().map_or(true, |s| s.trim().is_empty()))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl From<PlanResponse> for PlanArtifacts {
    fn from(response: PlanResponse) -> Self {
        let PlanResponse {
            spec,
            plan,
            research,
            data_model,
            contracts,
            constitutional_compliance,
            ..
        } = response;

        // Flat fields take precedence over the nested spec.
        let nested = spec.unwrap_or_default();
        Self {
            plan: non_blank(plan).or_else(|| non_blank(nested.plan)),
            research: non_blank(research).or_else(|| non_blank(nested.research)),
            data_model: non_blank(data_model).or_else(|| non_blank(nested.data_model)),
            contracts: non_blank(contracts).or_else(|| non_blank(nested.contracts)),
            constitutional_compliance: constitutional_compliance
                .or(nested.constitutional_compliance),
        }
    }
}

/// Planning text and gates forwarded to task generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstitutionData {
    /// Technology stack
    pub tech_stack: String,
    /// Architecture notes
    pub architecture: String,
    /// Non-functional requirements
    pub constraints: String,
    /// Gate flags
    pub gates: Gates,
}

impl From<&Planning> for ConstitutionData {
    fn from(planning: &Planning) -> Self {
        Self {
            tech_stack: planning.tech_stack.clone(),
            architecture: planning.architecture.clone(),
            constraints: planning.non_functional_requirements.clone(),
            gates: planning.gates,
        }
    }
}

/// Template reference forwarded to task generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateContext {
    /// Template id
    pub id: String,
    /// Template title
    pub title: String,
    /// Template planning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planning: Option<Planning>,
}

/// `POST /specs/{id}/tasks` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasksRequest {
    /// Generation mode
    pub mode: WorkflowMode,
    /// Formal specification
    pub specification: String,
    /// Plan text
    pub plan: String,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Planning configuration
    pub constitution: ConstitutionData,
    /// Development options
    pub development_options: DevelopmentOptions,
    /// Originating template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_context: Option<TemplateContext>,
    /// Research notes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research: Option<String>,
    /// Data model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_model: Option<String>,
    /// Contracts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contracts: Option<String>,
}

/// `POST /specs/{id}/tasks` response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TasksResponse {
    /// Generated tasks, in backend order
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Scenario customisation forwarded to the coding agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customization {
    /// Spec title
    #[serde(default)]
    pub title: String,
    /// Customer scenario; defaults to the spec description
    pub customer_scenario: String,
    /// Brand theme
    pub brand_theme: String,
    /// Primary colour
    pub primary_color: String,
    /// Company name
    pub company_name: String,
    /// Industry
    pub industry: String,
    /// Use case
    pub use_case: String,
    /// Extra requirements; defaults to the spec content
    pub additional_requirements: String,
    /// Let the agent use MCP tools
    pub use_mcp_tools: bool,
    /// Let the agent use agent-to-agent calls
    pub use_a2a: bool,
}

impl Default for Customization {
    fn default() -> Self {
        Self {
            title: String::new(),
            customer_scenario: String::new(),
            brand_theme: String::new(),
            primary_color: "#3b82f6".to_string(),
            company_name: String::new(),
            industry: String::new(),
            use_case: String::new(),
            additional_requirements: String::new(),
            use_mcp_tools: false,
            use_a2a: false,
        }
    }
}

impl Customization {
    /// Fill blank fields from the spec being delegated
    #[must_use]
    pub fn for_spec(&self, spec: &Spec) -> Self {
        let mut out = self.clone();
        out.title.clone_from(&spec.title);
        if out.customer_scenario.trim().is_empty() {
            out.customer_scenario.clone_from(&spec.description);
        }
        if out.additional_requirements.trim().is_empty() {
            out.additional_requirements.clone_from(&spec.content);
        }
        out
    }
}

/// Per-task detail carried by a delegation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetails {
    /// Task id
    pub id: TaskId,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Acceptance criteria
    pub acceptance_criteria: Vec<String>,
    /// Time estimate
    pub estimated_time: String,
    /// Token estimate
    pub estimated_tokens: String,
    /// Priority
    pub priority: TaskPriority,
}

impl From<&Task> for TaskDetails {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            acceptance_criteria: task.acceptance_criteria.clone(),
            estimated_time: task.estimated_time.clone(),
            estimated_tokens: task.estimated_tokens.clone(),
            priority: task.priority,
        }
    }
}

/// `POST /specs/{id}/assign` body; one per delegated task
///
/// Carries credentials in the clear because it is the wire form.
/// `Debug` redacts them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignRequest {
    /// Coding agent identity
    pub agent_id: String,
    /// Agent credential
    pub api_key: String,
    /// Agent endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Scenario customisation
    pub customization: Customization,
    /// Repository credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_pat: Option<String>,
    /// Import the template repository instead of forking
    pub prefer_import: bool,
    /// The single task this request delegates
    pub selected_tasks: Vec<TaskId>,
    /// Task generation mode
    pub workflow_mode: WorkflowMode,
    /// Detail of the delegated task
    pub task_details: TaskDetails,
}

impl fmt::Debug for AssignRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssignRequest")
            .field("agent_id", &self.agent_id)
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("github_pat", &self.github_pat.as_ref().map(|_| "[REDACTED]"))
            .field("prefer_import", &self.prefer_import)
            .field("selected_tasks", &self.selected_tasks)
            .field("workflow_mode", &self.workflow_mode)
            .field("task_details", &self.task_details)
            .finish_non_exhaustive()
    }
}

/// `POST /specs/{id}/assign` response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssignResponse {
    /// Status label
    #[serde(default)]
    pub status: Option<String>,
    /// Agent session status
    #[serde(default)]
    pub session_status: Option<String>,
    /// Accepting agent
    #[serde(default)]
    pub agent: Option<String>,
    /// Accepting agent id, sent by some agents instead of `agent`
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Agent session id
    #[serde(default)]
    pub session_id: Option<String>,
    /// Message
    #[serde(default)]
    pub message: Option<String>,
    /// Agent session link
    #[serde(default)]
    pub session_url: Option<String>,
    /// Repository link
    #[serde(default, alias = "repo_url")]
    pub repository_url: Option<String>,
    /// Tracking issue link
    #[serde(default)]
    pub issue_url: Option<String>,
}

impl AssignResponse {
    /// Status label, falling back to the session status
    #[must_use]
    pub fn status_label(&self) -> Option<&str> {
        non_blank_str(self.status.as_deref()).or_else(|| non_blank_str(self.session_status.as_deref()))
    }

    /// Accepting agent, falling back to the agent id
    #[must_use]
    pub fn agent_name(&self) -> Option<&str> {
        non_blank_str(self.agent.as_deref()).or_else(|| non_blank_str(self.agent_id.as_deref()))
    }
}

fn non_blank_str(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// `POST /github/test-token` response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenCheck {
    /// Token accepted
    #[serde(default)]
    pub ok: bool,
    /// Account login
    #[serde(default)]
    pub login: Option<String>,
    /// Account display name
    #[serde(default)]
    pub name: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Error detail
    #[serde(default)]
    pub error: Option<String>,
    /// Upstream status on failure
    #[serde(default)]
    pub status: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;
    use pretty_assertions::assert_eq;

    #[test]
    fn plan_response_flat_shape() {
        let response: PlanResponse = serde_json::from_str(
            r##"{"plan":"# Plan","research":"","data_model":"User{id}","message":"ok"}"##,
        )
        .unwrap();
        let artifacts = PlanArtifacts::from(response);
        assert_eq!(artifacts.plan.as_deref(), Some("# Plan"));
        assert_eq!(artifacts.research, None);
        assert_eq!(artifacts.data_model.as_deref(), Some("User{id}"));
        assert!(!artifacts.is_empty());
    }

    #[test]
    fn plan_response_nested_shape() {
        let response: PlanResponse = serde_json::from_str(
            r#"{"spec":{"id":"s1","phase":"plan","contracts":"GET /todos","constitutional_compliance":{"is_compliant":false,"violations":[{"article":"Article VII","violation":"too many projects"}]}}}"#,
        )
        .unwrap();
        let artifacts = PlanArtifacts::from(response);
        assert_eq!(artifacts.contracts.as_deref(), Some("GET /todos"));
        assert_eq!(artifacts.plan, None);
        let compliance = artifacts.constitutional_compliance.unwrap();
        assert!(!compliance.is_compliant);
        assert_eq!(compliance.violations[0].article, "Article VII");
    }

    #[test]
    fn empty_plan_response_has_no_artifacts() {
        assert!(PlanArtifacts::from(PlanResponse::default()).is_empty());
    }

    #[test]
    fn customization_defaults_from_spec() {
        let spec = Spec::new("Todo")
            .with_description("A todo app")
            .with_content("Build a todo app");
        let custom = Customization {
            use_case: "demo".to_string(),
            ..Customization::default()
        }
        .for_spec(&spec);
        assert_eq!(custom.title, "Todo");
        assert_eq!(custom.customer_scenario, "A todo app");
        assert_eq!(custom.additional_requirements, "Build a todo app");
        assert_eq!(custom.primary_color, "#3b82f6");

        let explicit = Customization {
            customer_scenario: "retail".to_string(),
            ..Customization::default()
        }
        .for_spec(&spec);
        assert_eq!(explicit.customer_scenario, "retail");
    }

    #[test]
    fn assign_request_debug_redacts_secrets() {
        let request = AssignRequest {
            agent_id: "devin".to_string(),
            api_key: "sk-live-123".to_string(),
            endpoint: None,
            customization: Customization::default(),
            github_pat: Some("ghp_secret".to_string()),
            prefer_import: false,
            selected_tasks: vec![TaskId::from("t1")],
            workflow_mode: WorkflowMode::Breakdown,
            task_details: TaskDetails::from(&Task::new("t1", "Setup")),
        };
        let debug = format!("{request:?}");
        assert!(!debug.contains("sk-live-123"));
        assert!(!debug.contains("ghp_secret"));
        assert!(debug.contains("devin"));
    }

    #[test]
    fn assign_response_fallback_fields() {
        let response: AssignResponse = serde_json::from_str(
            r#"{"session_status":"running","agent_id":"codex-cli","repo_url":"https://github.com/o/r"}"#,
        )
        .unwrap();
        assert_eq!(response.status_label(), Some("running"));
        assert_eq!(response.agent_name(), Some("codex-cli"));
        assert_eq!(response.repository_url.as_deref(), Some("https://github.com/o/r"));
    }

    #[test]
    fn assign_response_devin_success_shape() {
        let response: AssignResponse = serde_json::from_str(
            r#"{"status":"success","agent":"devin","session_id":"abc","session_url":"https://app.devin.ai/sessions/abc","session_status":"created","repository_url":"https://github.com/o/r","message":"started"}"#,
        )
        .unwrap();
        assert_eq!(response.status_label(), Some("success"));
        assert_eq!(response.session_status.as_deref(), Some("created"));
        assert_eq!(response.agent_name(), Some("devin"));
        assert_eq!(response.session_id.as_deref(), Some("abc"));
        assert_eq!(response.message.as_deref(), Some("started"));
    }

    #[test]
    fn spec_update_carries_phase() {
        let mut spec = Spec::new("t");
        spec.phase = Phase::Tasks;
        let body = serde_json::to_value(SpecUpdate::from(&spec)).unwrap();
        assert_eq!(body["phase"], "tasks");
    }
}
