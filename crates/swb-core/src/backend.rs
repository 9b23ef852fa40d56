//! Backend seam
//!
//! The workbench never performs I/O itself. Every network operation goes
//! through [`SpecBackend`], implemented over HTTP by `swb-http` and in
//! memory by `swb-test-utils`.

use crate::api::{
    AssignRequest, AssignResponse, PlanRequest, PlanResponse, SpecDraft, SpecUpdate,
    SpecifyRequest, SpecifyResponse, TasksRequest, TasksResponse, TokenCheck,
};
use crate::config::StreamMethod;
use crate::error::BackendError;
use crate::model::{Spec, SpecId, Template};
use futures::stream::BoxStream;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Incrementally delivered text body, in transport order
pub type TextStream = BoxStream<'static, Result<String, BackendError>>;

/// Backend REST surface consumed by the workbench
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SpecBackend: Send + Sync {
    /// `GET /specs`
    async fn list_specs(&self) -> Result<Vec<Spec>, BackendError>;

    /// `GET /specs/{id}`; `NotFound` if unknown
    async fn get_spec(&self, id: &SpecId) -> Result<Spec, BackendError>;

    /// `POST /specs`
    async fn create_spec(&self, draft: &SpecDraft) -> Result<Spec, BackendError>;

    /// `PUT /specs/{id}`; `NotFound` if unknown
    async fn update_spec(&self, id: &SpecId, update: &SpecUpdate) -> Result<Spec, BackendError>;

    /// `POST /specs/{id}/specify`
    async fn specify(
        &self,
        id: &SpecId,
        request: &SpecifyRequest,
    ) -> Result<SpecifyResponse, BackendError>;

    /// `POST /specs/{id}/plan`
    async fn plan(&self, id: &SpecId, request: &PlanRequest) -> Result<PlanResponse, BackendError>;

    /// `POST /specs/{id}/tasks`
    async fn generate_tasks(
        &self,
        id: &SpecId,
        request: &TasksRequest,
    ) -> Result<TasksResponse, BackendError>;

    /// `{POST|GET} /specs/{id}/enhance?stream=true`
    ///
    /// Resolves once the response head arrived and the body is streamable.
    async fn open_enhance_stream(
        &self,
        id: &SpecId,
        method: StreamMethod,
    ) -> Result<TextStream, BackendError>;

    /// `POST /specs/{id}/assign`
    async fn assign_task(
        &self,
        id: &SpecId,
        request: &AssignRequest,
    ) -> Result<AssignResponse, BackendError>;

    /// `GET /templates/{id}`
    async fn get_template(&self, template_id: &str) -> Result<Template, BackendError>;

    /// `POST /github/test-token`
    async fn test_github_token(&self, token: &str) -> Result<TokenCheck, BackendError>;
}

/// Run a backend call under a timeout and a cancellation token
///
/// Cancellation wins over a result that is ready in the same poll.
pub async fn bounded<T, F>(
    limit: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(BackendError::Cancelled),
        outcome = tokio::time::timeout(limit, call) => outcome.unwrap_or(Err(BackendError::Timeout {
            duration_secs: limit.as_secs(),
        })),
    }
}
