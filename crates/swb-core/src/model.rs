//! Spec record model
//!
//! Defines the data the workbench operates on:
//! - Specs, their phase and generated artifacts
//! - Planning configuration and governance gates
//! - Tasks and delegation results
//! - Templates supplying planning defaults
//!
//! Wire names follow the backend: snake_case for specs and planning,
//! camelCase for tasks.

use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Deserialize `null` as the type's default
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Opaque backend-assigned spec identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecId(pub String);

impl SpecId {
    /// Create from any string-like value
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpecId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Task identifier assigned by task generation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Persistence identity of the local record
///
/// Outgoing requests addressed by id only ever use `Confirmed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpecIdentity {
    /// Never persisted
    #[default]
    Absent,
    /// A create is in flight
    Pending,
    /// Backend acknowledged this id
    Confirmed(SpecId),
}

impl SpecIdentity {
    /// Confirmed id, if any
    #[inline]
    #[must_use]
    pub fn confirmed(&self) -> Option<&SpecId> {
        match self {
            Self::Confirmed(id) => Some(id),
            _ => None,
        }
    }

    /// Check if a create is in flight
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Workflow phase; only ever moves forward
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Requirements are being written
    #[default]
    Specification,
    /// Formal specification exists; planning
    Plan,
    /// Task generation succeeded
    Tasks,
    /// Non-empty task list available
    Completed,
}

impl Phase {
    /// All phases in order
    pub const ALL: [Phase; 4] = [
        Phase::Specification,
        Phase::Plan,
        Phase::Tasks,
        Phase::Completed,
    ];

    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Specification => "specification",
            Phase::Plan => "plan",
            Phase::Tasks => "tasks",
            Phase::Completed => "completed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Governance gates attached to planning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Gates {
    /// Simplicity gate
    #[serde(default, deserialize_with = "null_default")]
    pub simplicity: bool,
    /// Anti-abstraction gate
    #[serde(default, deserialize_with = "null_default")]
    pub anti_abstraction: bool,
    /// Integration-first gate
    #[serde(default, deserialize_with = "null_default")]
    pub integration_first: bool,
}

impl Gates {
    /// Gate flags keyed by wire name
    #[must_use]
    pub fn to_map(self) -> BTreeMap<String, bool> {
        BTreeMap::from([
            ("simplicity".to_string(), self.simplicity),
            ("anti_abstraction".to_string(), self.anti_abstraction),
            ("integration_first".to_string(), self.integration_first),
        ])
    }
}

/// Named gate, for single-flag edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    /// Simplicity gate
    Simplicity,
    /// Anti-abstraction gate
    AntiAbstraction,
    /// Integration-first gate
    IntegrationFirst,
}

/// Planning configuration supplied by the user or a template
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Planning {
    /// Technology stack
    #[serde(default, deserialize_with = "null_default")]
    pub tech_stack: String,
    /// Architecture notes
    #[serde(default, deserialize_with = "null_default")]
    pub architecture: String,
    /// Non-functional requirements
    #[serde(default, deserialize_with = "null_default")]
    pub non_functional_requirements: String,
    /// Gate flags
    #[serde(default, deserialize_with = "null_default")]
    pub gates: Gates,
}

/// Editable planning text field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanningField {
    /// `tech_stack`
    TechStack,
    /// `architecture`
    Architecture,
    /// `non_functional_requirements`
    NonFunctionalRequirements,
}

impl Planning {
    /// Mutable access to a text field
    #[inline]
    pub fn field_mut(&mut self, field: PlanningField) -> &mut String {
        match field {
            PlanningField::TechStack => &mut self.tech_stack,
            PlanningField::Architecture => &mut self.architecture,
            PlanningField::NonFunctionalRequirements => &mut self.non_functional_requirements,
        }
    }

    /// Mutable access to a gate flag
    #[inline]
    pub fn gate_mut(&mut self, gate: Gate) -> &mut bool {
        match gate {
            Gate::Simplicity => &mut self.gates.simplicity,
            Gate::AntiAbstraction => &mut self.gates.anti_abstraction,
            Gate::IntegrationFirst => &mut self.gates.integration_first,
        }
    }
}

/// Constitutional violation reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Violation {
    /// Article reference
    #[serde(default, deserialize_with = "null_default")]
    pub article: String,
    /// Human-readable violation
    #[serde(default, deserialize_with = "null_default")]
    pub violation: String,
}

/// Advisory governance result; never blocks a transition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConstitutionalCompliance {
    /// Overall verdict
    #[serde(default, deserialize_with = "null_default")]
    pub is_compliant: bool,
    /// Violations found
    #[serde(default, deserialize_with = "null_default")]
    pub violations: Vec<Violation>,
    /// Suggested remedies
    #[serde(default, deserialize_with = "null_default")]
    pub recommendations: Vec<String>,
    /// Per-gate verdicts
    #[serde(default, deserialize_with = "null_default")]
    pub gates_passed: BTreeMap<String, bool>,
}

/// Task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Low
    #[serde(alias = "Low")]
    Low,
    /// Medium
    #[default]
    #[serde(alias = "Medium")]
    Medium,
    /// High
    #[serde(alias = "High")]
    High,
}

/// Implementation stage a task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPhase {
    /// Project setup
    Setup,
    /// Test authoring
    Tests,
    /// Core implementation
    #[default]
    Core,
    /// Integration work
    Integration,
    /// Polish
    Polish,
}

/// Actionable task produced by task generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task id
    pub id: TaskId,
    /// Title
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    /// Description
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    /// Time estimate, free text
    #[serde(default, deserialize_with = "null_default", alias = "estimated_time")]
    pub estimated_time: String,
    /// Token estimate, free text
    #[serde(default, deserialize_with = "null_default", alias = "estimated_tokens")]
    pub estimated_tokens: String,
    /// Priority
    #[serde(default, deserialize_with = "null_default")]
    pub priority: TaskPriority,
    /// Backend status label
    #[serde(default, deserialize_with = "null_default")]
    pub status: String,
    /// Acceptance criteria
    #[serde(default, deserialize_with = "null_default", alias = "acceptance_criteria")]
    pub acceptance_criteria: Vec<String>,
    /// Stage
    #[serde(default, deserialize_with = "null_default")]
    pub phase: TaskPhase,
    /// May run in parallel with sibling tasks
    #[serde(default, deserialize_with = "null_default")]
    pub parallel: bool,
    /// Primary file touched
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "file_path")]
    pub file_path: Option<String>,
}

impl Task {
    /// Create new task
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            estimated_time: String::new(),
            estimated_tokens: String::new(),
            priority: TaskPriority::default(),
            status: "pending".to_string(),
            acceptance_criteria: Vec::new(),
            phase: TaskPhase::default(),
            parallel: false,
            file_path: None,
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// With priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// With acceptance criteria
    #[inline]
    #[must_use]
    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }
}

/// Specification document with its derived artifacts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Spec {
    /// Backend id; absent before first persistence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SpecId>,
    /// Title
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    /// Short description
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    /// Raw specification markdown
    #[serde(default, deserialize_with = "null_default")]
    pub content: String,
    /// Labels
    #[serde(default, deserialize_with = "null_default")]
    pub tags: IndexSet<String>,
    /// Workflow phase
    #[serde(default, deserialize_with = "null_default")]
    pub phase: Phase,
    /// Generated formal requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specification: Option<String>,
    /// Generated implementation plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// Generated research notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<String>,
    /// Generated data model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_model: Option<String>,
    /// Generated contracts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contracts: Option<String>,
    /// Generated tasks
    #[serde(default, deserialize_with = "null_default")]
    pub tasks: Vec<Task>,
    /// Planning configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning: Option<Planning>,
    /// Feature branch, set by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    /// Feature number, set by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_number: Option<String>,
    /// Record version, set by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Governance result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constitutional_compliance: Option<ConstitutionalCompliance>,
    /// Creation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last update timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Spec {
    /// Create new unsaved spec
    #[inline]
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// With content
    #[inline]
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check if any plan artifact is non-empty
    #[must_use]
    pub fn has_plan_artifacts(&self) -> bool {
        [&self.plan, &self.research, &self.data_model, &self.contracts]
            .into_iter()
            .any(|a| a.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }

    /// Look up a task by id
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Copy backend-owned provenance from a persisted copy
    ///
    /// User-editable fields are left untouched.
    pub fn absorb_provenance(&mut self, persisted: &Spec) {
        if persisted.id.is_some() {
            self.id.clone_from(&persisted.id);
        }
        if persisted.branch_name.is_some() {
            self.branch_name.clone_from(&persisted.branch_name);
        }
        if persisted.feature_number.is_some() {
            self.feature_number.clone_from(&persisted.feature_number);
        }
        if persisted.version.is_some() {
            self.version = persisted.version;
        }
        if persisted.created_at.is_some() {
            self.created_at.clone_from(&persisted.created_at);
        }
        if persisted.updated_at.is_some() {
            self.updated_at.clone_from(&persisted.updated_at);
        }
    }
}

/// Read-only catalog entry supplying planning defaults
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Template {
    /// Template id
    pub id: String,
    /// Title
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    /// Description
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    /// Planning defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning: Option<Planning>,
}

/// Outcome of delegating one task to a coding agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationResult {
    /// Originating task
    pub task_id: TaskId,
    /// Task title at issue time
    pub task_title: String,
    /// 1-based position in the selection
    pub assignment_number: usize,
    /// Backend status label
    pub status: String,
    /// Agent that accepted the task
    pub agent: Option<String>,
    /// Backend message
    pub message: Option<String>,
    /// Agent session link
    pub session_url: Option<String>,
    /// Repository link
    pub repository_url: Option<String>,
    /// Tracking issue link
    pub issue_url: Option<String>,
}

/// Task generation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    /// One task per unit of work
    #[default]
    Breakdown,
    /// Single all-in-one task
    Oneshot,
}

/// Development options forwarded to plan and task generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevelopmentOptions {
    /// Let agents use MCP tools
    pub use_mcp_tools: bool,
    /// Let agents use agent-to-agent calls
    pub use_a2a: bool,
    /// Preferred AI assistant
    pub ai_preference: String,
    /// Skip agent tool scaffolding
    pub ignore_agent_tools: bool,
}

impl Default for DevelopmentOptions {
    fn default() -> Self {
        Self {
            use_mcp_tools: false,
            use_a2a: false,
            ai_preference: "copilot".to_string(),
            ignore_agent_tools: false,
        }
    }
}
