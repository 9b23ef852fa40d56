//! Testing utilities for the Spec Workbench workspace
//!
//! Shared test helpers, fixtures, and an in-memory backend.

#![allow(missing_docs)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use secrecy::SecretString;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use swb_core::api::{
    AssignRequest, AssignResponse, PlanRequest, PlanResponse, SpecDraft, SpecUpdate,
    SpecifyRequest, SpecifyResponse, TasksRequest, TasksResponse, TokenCheck,
};
use swb_core::{
    AgentConfig, BackendError, Gates, Planning, Spec, SpecBackend, SpecId, StreamMethod, Task,
    TaskId, TaskPriority, Template, TextStream, WorkbenchConfig,
};

/// Install a test subscriber honouring `RUST_LOG`; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListSpecs,
    GetSpec(SpecId),
    CreateSpec,
    UpdateSpec(SpecId),
    Specify(SpecId),
    Plan(SpecId),
    Tasks(SpecId),
    Enhance(SpecId, StreamMethod),
    Assign(SpecId, TaskId),
    GetTemplate(String),
    TestToken,
}

/// Call kinds addressable by scripted failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    ListSpecs,
    GetSpec,
    CreateSpec,
    UpdateSpec,
    Specify,
    Plan,
    Tasks,
    Enhance,
    Assign,
    GetTemplate,
    TestToken,
}

impl Call {
    #[must_use]
    pub fn kind(&self) -> CallKind {
        match self {
            Call::ListSpecs => CallKind::ListSpecs,
            Call::GetSpec(_) => CallKind::GetSpec,
            Call::CreateSpec => CallKind::CreateSpec,
            Call::UpdateSpec(_) => CallKind::UpdateSpec,
            Call::Specify(_) => CallKind::Specify,
            Call::Plan(_) => CallKind::Plan,
            Call::Tasks(_) => CallKind::Tasks,
            Call::Enhance(..) => CallKind::Enhance,
            Call::Assign(..) => CallKind::Assign,
            Call::GetTemplate(_) => CallKind::GetTemplate,
            Call::TestToken => CallKind::TestToken,
        }
    }
}

/// Scripted enhancement stream
#[derive(Debug, Clone)]
pub struct EnhanceScript {
    /// Chunks delivered in order
    pub chunks: Vec<String>,
    /// Pause before each chunk
    pub delay: Duration,
    /// Error delivered after the chunks
    pub fail_after: Option<BackendError>,
    /// Never end after the chunks
    pub hang: bool,
}

impl EnhanceScript {
    #[must_use]
    pub fn chunks(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| (*c).to_string()).collect(),
            delay: Duration::ZERO,
            fail_after: None,
            hang: false,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn failing_with(mut self, error: BackendError) -> Self {
        self.fail_after = Some(error);
        self
    }

    #[must_use]
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    fn into_stream(self) -> TextStream {
        let delay = self.delay;
        let body = futures::stream::iter(self.chunks).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, BackendError>(chunk)
        });
        let tail = futures::stream::iter(self.fail_after.map(Err));
        if self.hang {
            body.chain(tail).chain(futures::stream::pending()).boxed()
        } else {
            body.chain(tail).boxed()
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    specs: HashMap<SpecId, Spec>,
    next_id: u64,
    calls: Vec<Call>,
    failures: HashMap<CallKind, VecDeque<BackendError>>,
    latency: HashMap<CallKind, Duration>,
    templates: HashMap<String, Template>,
    specify_planning: Option<Planning>,
    plan_response: Option<PlanResponse>,
    tasks: Option<Vec<Task>>,
    enhance: HashMap<StreamMethod, Result<EnhanceScript, BackendError>>,
    assign_delays: HashMap<TaskId, Duration>,
    assign_failures: HashMap<TaskId, BackendError>,
    completion_order: Vec<TaskId>,
    last_assign: Vec<AssignRequest>,
    last_plan: Option<PlanRequest>,
    last_tasks: Option<TasksRequest>,
    last_specify: Option<SpecifyRequest>,
}

/// In-memory [`SpecBackend`] with scripted behaviour
///
/// Ids are assigned sequentially: `s1`, `s2`, ...
#[derive(Debug, Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    #[must_use]
    pub fn new() -> Self {
        let backend = Self::default();
        backend.set_enhance(StreamMethod::Post, Ok(EnhanceScript::chunks(&["Enhanced."])));
        backend
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // ---- Seeding and inspection ----

    /// Store a spec under a fresh id
    pub fn seed_spec(&self, mut spec: Spec) -> SpecId {
        let mut state = self.state.lock();
        let id = Self::allocate(&mut state);
        spec.id = Some(id.clone());
        state.specs.insert(id.clone(), spec);
        id
    }

    /// Delete a spec server-side
    pub fn purge(&self, id: &SpecId) -> Option<Spec> {
        self.state.lock().specs.remove(id)
    }

    #[must_use]
    pub fn stored(&self, id: &SpecId) -> Option<Spec> {
        self.state.lock().specs.get(id).cloned()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    #[must_use]
    pub fn count(&self, kind: CallKind) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.kind() == kind)
            .count()
    }

    /// Task ids in the order their assignment completed
    #[must_use]
    pub fn completion_order(&self) -> Vec<TaskId> {
        self.state.lock().completion_order.clone()
    }

    #[must_use]
    pub fn assign_requests(&self) -> Vec<AssignRequest> {
        self.state.lock().last_assign.clone()
    }

    #[must_use]
    pub fn last_plan_request(&self) -> Option<PlanRequest> {
        self.state.lock().last_plan.clone()
    }

    #[must_use]
    pub fn last_tasks_request(&self) -> Option<TasksRequest> {
        self.state.lock().last_tasks.clone()
    }

    #[must_use]
    pub fn last_specify_request(&self) -> Option<SpecifyRequest> {
        self.state.lock().last_specify.clone()
    }

    // ---- Scripting ----

    /// Fail the next call of `kind` with `error`
    pub fn fail_next(&self, kind: CallKind, error: BackendError) {
        self.state
            .lock()
            .failures
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    /// Delay every call of `kind`
    pub fn set_latency(&self, kind: CallKind, latency: Duration) {
        self.state.lock().latency.insert(kind, latency);
    }

    pub fn add_template(&self, template: Template) {
        self.state
            .lock()
            .templates
            .insert(template.id.clone(), template);
    }

    /// Planning returned by the specify endpoint
    pub fn set_specify_planning(&self, planning: Planning) {
        self.state.lock().specify_planning = Some(planning);
    }

    pub fn set_plan_response(&self, response: PlanResponse) {
        self.state.lock().plan_response = Some(response);
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        self.state.lock().tasks = Some(tasks);
    }

    /// Behaviour of one enhance method; `Err` means the method cannot stream
    pub fn set_enhance(&self, method: StreamMethod, script: Result<EnhanceScript, BackendError>) {
        self.state.lock().enhance.insert(method, script);
    }

    pub fn set_assign_delay(&self, task: impl Into<TaskId>, delay: Duration) {
        self.state.lock().assign_delays.insert(task.into(), delay);
    }

    pub fn fail_assign(&self, task: impl Into<TaskId>, error: BackendError) {
        self.state.lock().assign_failures.insert(task.into(), error);
    }

    // ---- Internals ----

    fn allocate(state: &mut FakeState) -> SpecId {
        state.next_id += 1;
        SpecId::new(format!("s{}", state.next_id))
    }

    /// Record the call, then apply latency and any scripted failure
    async fn enter(&self, call: Call) -> Result<(), BackendError> {
        let kind = call.kind();
        let (latency, failure) = {
            let mut state = self.state.lock();
            state.calls.push(call);
            let failure = state.failures.get_mut(&kind).and_then(VecDeque::pop_front);
            (state.latency.get(&kind).copied(), failure)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        failure.map_or(Ok(()), Err)
    }

    fn lookup(&self, id: &SpecId) -> Result<Spec, BackendError> {
        self.state
            .lock()
            .specs
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("spec {id}")))
    }

    fn store(&self, spec: Spec) {
        if let Some(id) = spec.id.clone() {
            self.state.lock().specs.insert(id, spec);
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl SpecBackend for FakeBackend {
    async fn list_specs(&self) -> Result<Vec<Spec>, BackendError> {
        self.enter(Call::ListSpecs).await?;
        let mut specs: Vec<Spec> = self.state.lock().specs.values().cloned().collect();
        specs.sort_by(|a, b| a.id.as_ref().map(SpecId::as_str).cmp(&b.id.as_ref().map(SpecId::as_str)));
        Ok(specs)
    }

    async fn get_spec(&self, id: &SpecId) -> Result<Spec, BackendError> {
        self.enter(Call::GetSpec(id.clone())).await?;
        self.lookup(id)
    }

    async fn create_spec(&self, draft: &SpecDraft) -> Result<Spec, BackendError> {
        self.enter(Call::CreateSpec).await?;
        let mut state = self.state.lock();
        let id = Self::allocate(&mut state);
        let spec = Spec {
            id: Some(id.clone()),
            title: draft.title.clone(),
            description: draft.description.clone(),
            content: draft.content.clone(),
            tags: draft.tags.clone(),
            branch_name: Some(format!("{:03}-spec", state.next_id)),
            feature_number: Some(format!("{:03}", state.next_id)),
            version: Some(1),
            created_at: Some(now()),
            updated_at: Some(now()),
            ..Spec::default()
        };
        state.specs.insert(id, spec.clone());
        Ok(spec)
    }

    async fn update_spec(&self, id: &SpecId, update: &SpecUpdate) -> Result<Spec, BackendError> {
        self.enter(Call::UpdateSpec(id.clone())).await?;
        let mut spec = self.lookup(id)?;
        spec.title.clone_from(&update.title);
        spec.description.clone_from(&update.description);
        spec.content.clone_from(&update.content);
        spec.tags.clone_from(&update.tags);
        spec.specification.clone_from(&update.specification);
        spec.plan.clone_from(&update.plan);
        spec.tasks.clone_from(&update.tasks);
        spec.phase = update.phase;
        spec.version = Some(spec.version.unwrap_or(0) + 1);
        spec.updated_at = Some(now());
        self.store(spec.clone());
        Ok(spec)
    }

    async fn specify(
        &self,
        id: &SpecId,
        request: &SpecifyRequest,
    ) -> Result<SpecifyResponse, BackendError> {
        self.enter(Call::Specify(id.clone())).await?;
        let mut spec = self.lookup(id)?;
        spec.specification = Some(format!("# Specification\n\n{}", request.requirements));
        spec.phase = swb_core::Phase::Plan;
        let planning = {
            let mut state = self.state.lock();
            state.last_specify = Some(request.clone());
            state.specify_planning.clone()
        };
        if planning.is_some() {
            spec.planning = planning;
        }
        self.store(spec.clone());
        Ok(SpecifyResponse {
            spec,
            message: Some("specification generated".to_string()),
        })
    }

    async fn plan(&self, id: &SpecId, request: &PlanRequest) -> Result<PlanResponse, BackendError> {
        self.enter(Call::Plan(id.clone())).await?;
        let mut spec = self.lookup(id)?;
        let scripted = {
            let mut state = self.state.lock();
            state.last_plan = Some(request.clone());
            state.plan_response.clone()
        };
        let response = scripted.unwrap_or_else(|| PlanResponse {
            plan: Some(format!("# Plan\n\nStack: {}", request.tech_stack)),
            research: Some("# Research".to_string()),
            ..PlanResponse::default()
        });
        if let Some(plan) = &response.plan {
            spec.plan = Some(plan.clone());
            self.store(spec);
        }
        Ok(response)
    }

    async fn generate_tasks(
        &self,
        id: &SpecId,
        request: &TasksRequest,
    ) -> Result<TasksResponse, BackendError> {
        self.enter(Call::Tasks(id.clone())).await?;
        let mut spec = self.lookup(id)?;
        let tasks = {
            let mut state = self.state.lock();
            state.last_tasks = Some(request.clone());
            state.tasks.clone()
        }
        .unwrap_or_else(sample_tasks);
        spec.tasks.clone_from(&tasks);
        self.store(spec);
        Ok(TasksResponse { tasks })
    }

    async fn open_enhance_stream(
        &self,
        id: &SpecId,
        method: StreamMethod,
    ) -> Result<TextStream, BackendError> {
        self.enter(Call::Enhance(id.clone(), method)).await?;
        self.lookup(id)?;
        let script = self.state.lock().enhance.get(&method).cloned();
        match script {
            Some(Ok(script)) => Ok(script.into_stream()),
            Some(Err(e)) => Err(e),
            None => Err(BackendError::StreamUnavailable(format!(
                "{method} does not stream"
            ))),
        }
    }

    async fn assign_task(
        &self,
        id: &SpecId,
        request: &AssignRequest,
    ) -> Result<AssignResponse, BackendError> {
        let task = request
            .selected_tasks
            .first()
            .cloned()
            .unwrap_or_else(|| TaskId::from(""));
        self.enter(Call::Assign(id.clone(), task.clone())).await?;
        let (delay, failure) = {
            let mut state = self.state.lock();
            state.last_assign.push(request.clone());
            (
                state.assign_delays.get(&task).copied(),
                state.assign_failures.get(&task).cloned(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().completion_order.push(task.clone());
        if let Some(error) = failure {
            return Err(error);
        }
        self.lookup(id)?;
        Ok(AssignResponse {
            status: Some("success".to_string()),
            agent: Some(request.agent_id.clone()),
            message: Some(format!("task {task} assigned")),
            session_url: Some(format!("https://agents.example.com/sessions/{task}")),
            repository_url: Some(format!("https://github.com/example/{id}")),
            ..AssignResponse::default()
        })
    }

    async fn get_template(&self, template_id: &str) -> Result<Template, BackendError> {
        self.enter(Call::GetTemplate(template_id.to_string())).await?;
        self.state
            .lock()
            .templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("template {template_id}")))
    }

    async fn test_github_token(&self, token: &str) -> Result<TokenCheck, BackendError> {
        self.enter(Call::TestToken).await?;
        if token.starts_with("ghp_") {
            Ok(TokenCheck {
                ok: true,
                login: Some("octocat".to_string()),
                name: Some("The Octocat".to_string()),
                scopes: vec!["repo".to_string()],
                ..TokenCheck::default()
            })
        } else {
            Ok(TokenCheck {
                ok: false,
                error: Some("Bad credentials".to_string()),
                status: Some(401),
                ..TokenCheck::default()
            })
        }
    }
}

// ---- Fixtures ----

#[must_use]
pub fn sample_planning() -> Planning {
    Planning {
        tech_stack: "React, Node.js, PostgreSQL".to_string(),
        architecture: "Three-tier web application".to_string(),
        non_functional_requirements: "p95 latency under 200ms".to_string(),
        gates: Gates {
            simplicity: true,
            anti_abstraction: true,
            integration_first: false,
        },
    }
}

#[must_use]
pub fn sample_template() -> Template {
    Template {
        id: "web-app".to_string(),
        title: "Web application".to_string(),
        description: "Full-stack web application starter".to_string(),
        planning: Some(sample_planning()),
    }
}

#[must_use]
pub fn sample_tasks() -> Vec<Task> {
    vec![
        Task::new("T001", "Set up project structure")
            .with_description("Create the repository layout and tooling")
            .with_priority(TaskPriority::High)
            .with_criteria(vec!["project builds".to_string()]),
        Task::new("T002", "Implement data model")
            .with_description("Define entities and persistence")
            .with_criteria(vec!["entities persisted".to_string()]),
        Task::new("T003", "Expose REST API")
            .with_description("HTTP endpoints for the todo list")
            .with_priority(TaskPriority::Low),
    ]
}

#[must_use]
pub fn sample_spec() -> Spec {
    Spec::new("Todo")
        .with_description("A todo app")
        .with_content("Build a todo app")
}

#[must_use]
pub fn agent_config() -> AgentConfig {
    AgentConfig::new("devin", "sk-test-key")
        .with_endpoint("https://agents.example.com")
        .with_github_pat("ghp_testtoken")
}

#[must_use]
pub fn github_token() -> SecretString {
    SecretString::from("ghp_testtoken".to_string())
}

/// Configuration with short timeouts for tests
#[must_use]
pub fn test_config() -> WorkbenchConfig {
    WorkbenchConfig::new()
        .with_request_timeout_secs(5)
        .with_stream_idle_timeout_secs(5)
        .with_delegation_timeout_secs(10)
        .with_details_collapse_delay_ms(2000)
}
