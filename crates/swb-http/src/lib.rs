//! REST backend for the Spec Workbench
//!
//! Implements [`SpecBackend`] over the backend's JSON API. Every path lives
//! under `{api_base_url}/api`. Error bodies of the form `{"detail": ...}`
//! are surfaced as the error message.
//!
//! No request timeout is set on the client itself; the workbench bounds
//! every call, and enhancement bodies stream for as long as chunks keep
//! arriving.

mod decode;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use swb_core::api::{
    AssignRequest, AssignResponse, PlanRequest, PlanResponse, SpecDraft, SpecUpdate,
    SpecifyRequest, SpecifyResponse, TasksRequest, TasksResponse, TokenCheck,
};
use swb_core::{
    BackendError, Spec, SpecBackend, SpecId, StreamMethod, Template, TextStream, WorkbenchConfig,
    WorkbenchError,
};

const USER_AGENT: &str = concat!("swb-http/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP implementation of [`SpecBackend`]
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    /// Create a backend for the given origin
    ///
    /// # Errors
    /// `Transport` if the URL is invalid or the client cannot be built
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(transport)?;
        Self::with_client(client, base_url)
    }

    /// Create a backend with a preconfigured client
    ///
    /// # Errors
    /// `Transport` if the URL is invalid or cannot carry a path
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, BackendError> {
        let base = Url::parse(base_url.trim())
            .map_err(|e| BackendError::Transport(format!("invalid base url {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::Transport(format!(
                "base url {base_url} cannot carry a path"
            )));
        }
        Ok(Self { client, base })
    }

    /// Create a backend from workbench configuration
    ///
    /// # Errors
    /// `Config` if `api_base_url` is unusable
    pub fn from_config(config: &WorkbenchConfig) -> Result<Self, WorkbenchError> {
        Self::new(&config.api_base_url).map_err(|e| WorkbenchError::Config(e.to_string()))
    }

    /// Backend origin
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `{base}/api/{segments...}`, each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        tracing::debug!(%method, %url, "backend request");
        self.client.request(method, url)
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = checked(request.send().await.map_err(transport)?).await?;
        let body = response.text().await.map_err(transport)?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, BackendError> {
        self.call(self.request(Method::GET, self.endpoint(segments)))
            .await
    }

    async fn send<B, T>(&self, method: Method, segments: &[&str], body: &B) -> Result<T, BackendError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        self.call(self.request(method, self.endpoint(segments)).json(body))
            .await
    }
}

fn transport(error: reqwest::Error) -> BackendError {
    if error.is_decode() {
        BackendError::Parse(error.to_string())
    } else {
        BackendError::Transport(error.to_string())
    }
}

/// Pass a success response through, otherwise turn it into an error
async fn checked(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    let message = error_detail(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    tracing::warn!(%url, status = status.as_u16(), %message, "backend rejected request");
    if status == StatusCode::NOT_FOUND {
        Err(BackendError::NotFound(message))
    } else {
        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Message carried by an error body; FastAPI uses `{"detail": ...}`
fn error_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            Some(detail) => Some(detail.to_string()),
            None => Some(body.to_string()),
        },
        _ => Some(body.to_string()),
    }
}

#[derive(Serialize)]
struct TokenBody<'a> {
    token: &'a str,
}

#[async_trait]
impl SpecBackend for HttpBackend {
    async fn list_specs(&self) -> Result<Vec<Spec>, BackendError> {
        self.get(&["specs"]).await
    }

    async fn get_spec(&self, id: &SpecId) -> Result<Spec, BackendError> {
        self.get(&["specs", id.as_str()]).await
    }

    async fn create_spec(&self, draft: &SpecDraft) -> Result<Spec, BackendError> {
        self.send(Method::POST, &["specs"], draft).await
    }

    async fn update_spec(&self, id: &SpecId, update: &SpecUpdate) -> Result<Spec, BackendError> {
        self.send(Method::PUT, &["specs", id.as_str()], update).await
    }

    async fn specify(
        &self,
        id: &SpecId,
        request: &SpecifyRequest,
    ) -> Result<SpecifyResponse, BackendError> {
        self.send(Method::POST, &["specs", id.as_str(), "specify"], request)
            .await
    }

    async fn plan(&self, id: &SpecId, request: &PlanRequest) -> Result<PlanResponse, BackendError> {
        self.send(Method::POST, &["specs", id.as_str(), "plan"], request)
            .await
    }

    async fn generate_tasks(
        &self,
        id: &SpecId,
        request: &TasksRequest,
    ) -> Result<TasksResponse, BackendError> {
        self.send(Method::POST, &["specs", id.as_str(), "tasks"], request)
            .await
    }

    async fn open_enhance_stream(
        &self,
        id: &SpecId,
        method: StreamMethod,
    ) -> Result<TextStream, BackendError> {
        let mut url = self.endpoint(&["specs", id.as_str(), "enhance"]);
        url.query_pairs_mut().append_pair("stream", "true");
        let method = match method {
            StreamMethod::Post => Method::POST,
            StreamMethod::Get => Method::GET,
        };
        let response = self
            .request(method.clone(), url)
            .send()
            .await
            .map_err(|e| BackendError::StreamUnavailable(format!("{method}: {e}")))?;
        let response = checked(response).await?;
        Ok(decode::text_stream(response.bytes_stream()))
    }

    async fn assign_task(
        &self,
        id: &SpecId,
        request: &AssignRequest,
    ) -> Result<AssignResponse, BackendError> {
        self.send(Method::POST, &["specs", id.as_str(), "assign"], request)
            .await
    }

    async fn get_template(&self, template_id: &str) -> Result<Template, BackendError> {
        self.get(&["templates", template_id]).await
    }

    async fn test_github_token(&self, token: &str) -> Result<TokenCheck, BackendError> {
        self.send(Method::POST, &["github", "test-token"], &TokenBody { token })
            .await
    }
}
