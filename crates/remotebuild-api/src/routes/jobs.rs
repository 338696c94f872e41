//! Job endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use remotebuild_core::{BuildJob, BuildSpec, Job, JobState, JobType, RecordId, UploadJob};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{ApiError, Envelope};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/job/add", post(add_job))
        .route("/job/cancel", post(cancel_job))
        .route("/job/info/{id}", get(job_info))
        .route("/job/logs/{id}", get(job_logs))
        .route("/jobs", get(list_jobs))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddJobResponse {
    pub id: RecordId,
    pub position: i64,
}

/// A job as reported to clients. Captured output is served separately.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub id: RecordId,
    pub job_type: JobType,
    pub state: JobState,
    pub build: BuildJob,
    pub upload: UploadJob,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            state: job.state(),
            build: job.build,
            upload: job.upload,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

async fn add_job(
    State(state): State<AppState>,
    body: Result<Json<BuildSpec>, JsonRejection>,
) -> Result<Json<Envelope<AddJobResponse>>, ApiError> {
    let Json(spec) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let item = state.service.submit_job(spec).await?;
    Ok(Envelope::success(
        "job added",
        Some(AddJobResponse {
            id: item.job_id,
            position: item.position,
        }),
    ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelJobRequest {
    pub id: RecordId,
}

async fn cancel_job(
    State(state): State<AppState>,
    body: Result<Json<CancelJobRequest>, JsonRejection>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    state.service.cancel_job(req.id).await?;
    Ok(Envelope::success("job cancelled", None))
}

async fn job_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<JobView>>, ApiError> {
    let id = parse_id(&id)?;
    match state.service.job_info(id).await? {
        Some(job) => Ok(Envelope::success("job found", Some(job.into()))),
        None => Ok(Envelope::success("job not found", None)),
    }
}

async fn job_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<String>>, ApiError> {
    let id = parse_id(&id)?;
    let logs = state.service.captured_logs(id).await?;
    Ok(Envelope::success("captured logs", Some(logs)))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    limit: Option<usize>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Envelope<Vec<JobView>>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let jobs = state.service.recent_jobs(limit).await?;
    let views = jobs.into_iter().map(JobView::from).collect();
    Ok(Envelope::success("recent jobs", Some(views)))
}

fn parse_id(raw: &str) -> Result<RecordId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid job id: {}", raw)))
}
