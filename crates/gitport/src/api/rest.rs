//! GitLab v4 REST implementation of the [`GitlabApi`] capability.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response};
use tokio::io::AsyncWriteExt;

use super::error::ApiError;
use super::types::{
    CreateGroupBody, ExportPayload, GroupPayload, ImportPayload, ProjectPayload, to_group_node,
    to_project_handle, to_project_ref,
};
use super::{
    ExportStatus, GitlabApi, GroupNode, ImportStatus, JobToken, ProjectHandle, ProjectRef,
    Visibility,
};
use crate::retry::ApiRateLimiter;

/// Page size for list endpoints.
const PAGE_SIZE: usize = 100;

/// GitLab REST client for a single instance.
///
/// Cheap to clone: the underlying `reqwest::Client` and the rate limiter are
/// both handle types, so jobs running in spawned tasks share one connection
/// pool and one request budget per instance.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    rate_limiter: Option<ApiRateLimiter>,
}

impl RestClient {
    /// Create a client for one instance.
    ///
    /// # Arguments
    ///
    /// * `url` - Instance URL, e.g. "https://gitlab.example.com"
    /// * `token` - Personal access token with `api` scope
    /// * `timeout` - Per-request timeout
    /// * `verify_ssl` - Disable only for instances with self-signed certificates
    /// * `rate_limiter` - Optional proactive request pacing
    pub fn new(
        url: &str,
        token: &str,
        timeout: Duration,
        verify_ssl: bool,
        rate_limiter: Option<ApiRateLimiter>,
    ) -> Result<Self, ApiError> {
        let base_url = url.trim_end_matches('/').to_string();

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(ApiError::from)?;

        Ok(Self {
            http,
            base_url,
            token: token.to_string(),
            rate_limiter,
        })
    }

    /// Instance base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.endpoint(path))
            .header("PRIVATE-TOKEN", &self.token)
    }

    /// Send a request, mapping non-success statuses into typed errors.
    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        if let Some(ref limiter) = self.rate_limiter {
            limiter.wait().await;
        }

        let response = builder.send().await.map_err(ApiError::from)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(
            status.as_u16(),
            body.trim(),
            retry_after,
        ))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        let body = response.bytes().await.map_err(ApiError::from)?;
        serde_json::from_slice(&body).map_err(ApiError::from)
    }

    /// GET that maps a 404 into `Ok(None)`.
    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, ApiError> {
        match self.get_json::<T>(path).await {
            Ok(value) => Ok(Some(value)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch every page of a list endpoint.
    async fn get_paged<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, ApiError> {
        let mut all = Vec::new();
        let mut page = 1usize;
        loop {
            let paged = format!("{path}?per_page={PAGE_SIZE}&page={page}");
            let batch: Vec<T> = self.get_json(&paged).await?;
            let len = batch.len();
            all.extend(batch);
            if len < PAGE_SIZE {
                return Ok(all);
            }
            page += 1;
        }
    }
}

/// Parse a `Retry-After` header (seconds form) from a response.
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get("Retry-After")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn encode_path(full_path: &str) -> String {
    urlencoding::encode(full_path).into_owned()
}

#[async_trait]
impl GitlabApi for RestClient {
    async fn get_group(&self, full_path: &str) -> Result<Option<GroupNode>, ApiError> {
        let path = format!("/groups/{}", encode_path(full_path));
        Ok(self
            .get_optional::<GroupPayload>(&path)
            .await?
            .map(to_group_node))
    }

    async fn create_group(
        &self,
        name: &str,
        path: &str,
        parent_id: Option<u64>,
        visibility: Visibility,
    ) -> Result<GroupNode, ApiError> {
        let body = CreateGroupBody {
            name,
            path,
            visibility: visibility.as_str(),
            parent_id,
        };
        // GitLab answers 400, not 409, when the path is already taken.
        let response = match self
            .send(self.request(Method::POST, "/groups").json(&body))
            .await
        {
            Ok(response) => response,
            Err(ApiError::Api { status: 400, message }) if message.contains("taken") => {
                return Err(ApiError::Conflict(message));
            }
            Err(e) => return Err(e),
        };
        let payload: GroupPayload = response.json().await.map_err(ApiError::from)?;
        Ok(to_group_node(payload))
    }

    async fn list_subgroups(&self, group_id: u64) -> Result<Vec<GroupNode>, ApiError> {
        let payloads: Vec<GroupPayload> = self
            .get_paged(&format!("/groups/{group_id}/subgroups"))
            .await?;
        Ok(payloads.into_iter().map(to_group_node).collect())
    }

    async fn list_projects(&self, group_id: u64) -> Result<Vec<ProjectRef>, ApiError> {
        let payloads: Vec<ProjectPayload> = self
            .get_paged(&format!("/groups/{group_id}/projects"))
            .await?;
        Ok(payloads.into_iter().map(to_project_ref).collect())
    }

    async fn find_project(&self, full_path: &str) -> Result<Option<ProjectHandle>, ApiError> {
        let path = format!("/projects/{}", encode_path(full_path));
        Ok(self
            .get_optional::<ProjectPayload>(&path)
            .await?
            .map(to_project_handle))
    }

    async fn delete_project(&self, project_id: u64) -> Result<(), ApiError> {
        self.send(self.request(Method::DELETE, &format!("/projects/{project_id}")))
            .await?;
        Ok(())
    }

    async fn start_export(&self, project_id: u64) -> Result<JobToken, ApiError> {
        self.send(self.request(Method::POST, &format!("/projects/{project_id}/export")))
            .await?;
        Ok(JobToken::new(project_id))
    }

    async fn poll_export(&self, token: JobToken) -> Result<ExportStatus, ApiError> {
        let payload: ExportPayload = self
            .get_json(&format!("/projects/{}/export", token.project_id()))
            .await?;
        let status = match payload.export_status.as_deref() {
            Some("finished") => ExportStatus::Ready,
            Some("failed") => ExportStatus::Failed("export failed on source instance".into()),
            // none / queued / started / regeneration_in_progress
            _ => ExportStatus::Pending,
        };
        Ok(status)
    }

    async fn download_export(&self, token: JobToken, dest: &Path) -> Result<u64, ApiError> {
        let path = format!("/projects/{}/export/download", token.project_id());
        let mut response = self.send(self.request(Method::GET, &path)).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(ApiError::from)? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn start_import(
        &self,
        namespace_id: u64,
        name: &str,
        path: &str,
        archive: &Path,
    ) -> Result<JobToken, ApiError> {
        let bytes = tokio::fs::read(archive).await?;
        let file_name = format!("{path}.tar.gz");
        let form = Form::new()
            .text("path", path.to_string())
            .text("name", name.to_string())
            .text("namespace", namespace_id.to_string())
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .send(
                self.request(Method::POST, "/projects/import")
                    .multipart(form),
            )
            .await?;
        let payload: ImportPayload = response.json().await.map_err(ApiError::from)?;
        Ok(JobToken::new(payload.id))
    }

    async fn poll_import(&self, token: JobToken) -> Result<ImportStatus, ApiError> {
        let payload: ImportPayload = self
            .get_json(&format!("/projects/{}/import", token.project_id()))
            .await?;
        let status = match payload.import_status.as_deref() {
            Some("finished") => ImportStatus::Ready,
            Some("failed") => ImportStatus::Failed(
                payload
                    .import_error
                    .unwrap_or_else(|| "import failed on target instance".into()),
            ),
            // none / scheduled / started
            _ => ImportStatus::Pending,
        };
        Ok(status)
    }
}
