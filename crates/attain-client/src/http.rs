//! REST grading backend.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use attain_core::error::BackendError;
use attain_core::model::{
    Capability, ClassId, ClassInfo, Discipline, DisciplineId, EvaluationRecord, FinalResult,
    LevelRule, RecordUpsert, SnapshotId, Student, StudentId,
};
use attain_core::traits::{BackendResult, GradingBackend};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Grading server reached over JSON/HTTPS with an optional bearer token.
pub struct HttpBackend {
    base_url: String,
    token: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: Option<String>, token: Option<String>, timeout_secs: Option<u64>) -> Result<Self> {
        let timeout_secs = timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            timeout_secs,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> BackendResult<Response> {
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(self.timeout_secs)
            } else {
                BackendError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status < 400 {
            return Ok(response);
        }
        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        debug!(status, %url, "error response");
        Err(match status {
            401 | 403 => BackendError::Unauthorized { status },
            404 => BackendError::NotFound(url),
            400 | 409 | 422 => BackendError::Rejected {
                status,
                message: body,
            },
            _ => BackendError::Server {
                status,
                message: body,
            },
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let response = self.send(self.request(Method::GET, path)).await?;
        Self::decode(response).await
    }
}

fn pair_query(student_id: StudentId, snapshot_id: SnapshotId) -> String {
    format!("studentId={student_id}&snapshotId={snapshot_id}")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSnapshot {
    snapshot_id: SnapshotId,
}

#[async_trait]
impl GradingBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self))]
    async fn class_info(&self, class_id: ClassId) -> BackendResult<ClassInfo> {
        self.get_json(&format!("/classes/{class_id}")).await
    }

    #[instrument(skip(self))]
    async fn students(&self, class_id: ClassId) -> BackendResult<Vec<Student>> {
        self.get_json(&format!("/classes/{class_id}/students")).await
    }

    #[instrument(skip(self))]
    async fn disciplines(&self, class_id: ClassId) -> BackendResult<Vec<Discipline>> {
        self.get_json(&format!("/classes/{class_id}/disciplines"))
            .await
    }

    #[instrument(skip(self))]
    async fn snapshot_status(
        &self,
        discipline_id: DisciplineId,
    ) -> BackendResult<Option<SnapshotId>> {
        match self
            .get_json::<Option<SnapshotId>>(&format!("/disciplines/{discipline_id}/snapshot-status"))
            .await
        {
            Err(BackendError::NotFound(_)) => Ok(None),
            other => other,
        }
    }

    #[instrument(skip(self))]
    async fn create_snapshot(
        &self,
        class_id: ClassId,
        discipline_id: DisciplineId,
    ) -> BackendResult<SnapshotId> {
        let response = self
            .send(self.request(
                Method::POST,
                &format!("/classes/{class_id}/snapshot/{discipline_id}"),
            ))
            .await?;
        let created: CreatedSnapshot = Self::decode(response).await?;
        Ok(created.snapshot_id)
    }

    #[instrument(skip(self))]
    async fn capabilities(&self, snapshot_id: SnapshotId) -> BackendResult<Vec<Capability>> {
        self.get_json(&format!("/structure/{snapshot_id}/capabilities"))
            .await
    }

    #[instrument(skip(self))]
    async fn level_rules(&self, snapshot_id: SnapshotId) -> BackendResult<Vec<LevelRule>> {
        self.get_json(&format!("/disciplines/levels/snapshot/{snapshot_id}"))
            .await
    }

    #[instrument(skip(self))]
    async fn evaluations(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<Vec<EvaluationRecord>> {
        self.get_json(&format!(
            "/evaluations?{}",
            pair_query(student_id, snapshot_id)
        ))
        .await
    }

    #[instrument(skip(self, record), fields(student = %record.student_id, criterion = %record.criterion_id))]
    async fn upsert_evaluation(&self, record: &RecordUpsert) -> BackendResult<()> {
        self.send(self.request(Method::POST, "/evaluations").json(record))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn finalize(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<FinalResult> {
        let response = self
            .send(self.request(
                Method::POST,
                &format!("/evaluations/finalize?{}", pair_query(student_id, snapshot_id)),
            ))
            .await?;
        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn reopen(&self, student_id: StudentId, snapshot_id: SnapshotId) -> BackendResult<()> {
        self.send(self.request(
            Method::POST,
            &format!("/evaluations/reopen?{}", pair_query(student_id, snapshot_id)),
        ))
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn final_result(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<FinalResult> {
        self.get_json(&format!(
            "/evaluations/result?{}",
            pair_query(student_id, snapshot_id)
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn class_results(
        &self,
        class_id: ClassId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<Vec<FinalResult>> {
        self.get_json(&format!(
            "/evaluations/result/class/{class_id}?snapshotId={snapshot_id}"
        ))
        .await
    }
}
