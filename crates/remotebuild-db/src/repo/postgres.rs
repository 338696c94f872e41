//! PostgreSQL job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use remotebuild_core::{
    BuildArgs, BuildJob, BuildResult, Job, JobState, JobType, QueueItem, RecordId, UploadJob,
    UploadType,
};
use sqlx::PgPool;

use super::{JobFilter, JobRepo};
use crate::{DbError, DbResult};

const JOB_SELECT: &str = r#"
    SELECT j.id, j.job_type, j.args, j.last_logs, j.created_at, j.updated_at,
           b.id AS build_id, b.state AS build_state, b.image, b.result,
           b.started_at, b.finished_at,
           u.id AS upload_id, u.state AS upload_state, u.upload_type
    FROM jobs j
    JOIN build_jobs b ON b.id = j.build_job_id
    JOIN upload_jobs u ON u.id = j.upload_job_id
"#;

/// A job row joined with both sub-job rows.
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: uuid::Uuid,
    job_type: String,
    args: serde_json::Value,
    last_logs: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    build_id: uuid::Uuid,
    build_state: String,
    image: Option<String>,
    result: Option<serde_json::Value>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    upload_id: uuid::Uuid,
    upload_state: String,
    upload_type: String,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        let corrupt = |e: remotebuild_core::Error| DbError::Corrupt(e.to_string());

        let args: BuildArgs = serde_json::from_value(row.args)
            .map_err(|e| DbError::Corrupt(format!("job args: {}", e)))?;
        let result: Option<BuildResult> = row
            .result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| DbError::Corrupt(format!("build result: {}", e)))?;

        let mut build = BuildJob::new();
        build.id = RecordId::from_uuid(row.build_id);
        build.state = row.build_state.parse::<JobState>().map_err(corrupt)?;
        build.image = row.image;
        build.result = result;
        build.started_at = row.started_at;
        build.finished_at = row.finished_at;

        let mut upload = UploadJob::new(row.upload_type.parse::<UploadType>().map_err(corrupt)?);
        upload.id = RecordId::from_uuid(row.upload_id);
        upload.state = row.upload_state.parse::<JobState>().map_err(corrupt)?;

        Ok(Job {
            id: RecordId::from_uuid(row.id),
            job_type: row.job_type.parse::<JobType>().map_err(corrupt)?,
            args,
            build,
            upload,
            last_logs: row.last_logs,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QueueItemRow {
    id: uuid::Uuid,
    job_id: uuid::Uuid,
    position: i64,
    done: bool,
    created_at: DateTime<Utc>,
}

impl From<QueueItemRow> for QueueItem {
    fn from(row: QueueItemRow) -> Self {
        QueueItem {
            id: RecordId::from_uuid(row.id),
            job_id: RecordId::from_uuid(row.job_id),
            position: row.position,
            done: row.done,
            created_at: row.created_at,
        }
    }
}

impl JobFilter {
    fn where_clause(&self) -> &'static str {
        match self {
            JobFilter::All => "TRUE",
            JobFilter::Settled => {
                "(b.state = 'failed' \
                  OR (b.state = 'done' AND u.state IN ('done', 'failed', 'cancelled')))"
            }
        }
    }
}

/// States from which `next` may be entered, as stored strings.
fn predecessor_names(next: JobState) -> Vec<String> {
    JobState::predecessors(next)
        .into_iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

/// PostgreSQL implementation of JobRepo.
pub struct PgJobRepo {
    pool: PgPool,
}

impl PgJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn touch(&self, column: &str, sub_job_id: RecordId) -> DbResult<()> {
        let sql = format!("UPDATE jobs SET updated_at = NOW() WHERE {} = $1", column);
        sqlx::query(&sql)
            .bind(sub_job_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_jobs(&self, sql: &str) -> DbResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }
}

#[async_trait]
impl JobRepo for PgJobRepo {
    async fn create_job(&self, job: &Job) -> DbResult<QueueItem> {
        let args = serde_json::to_value(&job.args)
            .map_err(|e| DbError::Corrupt(format!("job args: {}", e)))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO build_jobs (id, state, image, result, started_at, finished_at) \
             VALUES ($1, $2, NULL, NULL, NULL, NULL)",
        )
        .bind(job.build.id.as_uuid())
        .bind(job.build.state.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO upload_jobs (id, state, upload_type) VALUES ($1, $2, $3)")
            .bind(job.upload.id.as_uuid())
            .bind(job.upload.state.as_str())
            .bind(job.upload.upload_type.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, args, build_job_id, upload_job_id, last_logs, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, '', $6, $6)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.job_type.as_str())
        .bind(args)
        .bind(job.build.id.as_uuid())
        .bind(job.upload.id.as_uuid())
        .bind(job.created_at)
        .execute(&mut *tx)
        .await?;

        let item = sqlx::query_as::<_, QueueItemRow>(
            r#"
            INSERT INTO job_queue (id, job_id, done, created_at)
            VALUES ($1, $2, FALSE, NOW())
            RETURNING id, job_id, position, done, created_at
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(job.id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(item.into())
    }

    async fn get_job(&self, id: RecordId) -> DbResult<Option<Job>> {
        let sql = format!("{} WHERE j.id = $1", JOB_SELECT);
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn recent_jobs(&self, limit: usize, filter: JobFilter) -> DbResult<Vec<Job>> {
        let sql = format!(
            "{} WHERE {} ORDER BY j.created_at DESC, j.id DESC LIMIT $1",
            JOB_SELECT,
            filter.where_clause()
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn running_jobs(&self) -> DbResult<Vec<Job>> {
        let sql = format!(
            "{} WHERE b.state = 'running' OR u.state = 'running'",
            JOB_SELECT
        );
        self.fetch_jobs(&sql).await
    }

    async fn captured_logs(&self, id: RecordId) -> DbResult<Option<String>> {
        let logs = sqlx::query_scalar::<_, String>("SELECT last_logs FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(logs)
    }

    async fn set_captured_logs(&self, id: RecordId, logs: &str) -> DbResult<()> {
        sqlx::query("UPDATE jobs SET last_logs = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(logs)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_build(&self, build: &BuildJob) -> DbResult<bool> {
        let result = build
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| DbError::Corrupt(format!("build result: {}", e)))?;

        let updated = sqlx::query(
            r#"
            UPDATE build_jobs
            SET state = $2, image = $3, result = $4, started_at = $5, finished_at = $6
            WHERE id = $1 AND state = ANY($7)
            "#,
        )
        .bind(build.id.as_uuid())
        .bind(build.state.as_str())
        .bind(&build.image)
        .bind(result)
        .bind(build.started_at)
        .bind(build.finished_at)
        .bind(predecessor_names(build.state))
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if updated {
            self.touch("build_job_id", build.id).await?;
        }
        Ok(updated)
    }

    async fn save_upload(&self, upload: &UploadJob) -> DbResult<bool> {
        let updated = sqlx::query(
            "UPDATE upload_jobs SET state = $2 WHERE id = $1 AND state = ANY($3)",
        )
        .bind(upload.id.as_uuid())
        .bind(upload.state.as_str())
        .bind(predecessor_names(upload.state))
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if updated {
            self.touch("upload_job_id", upload.id).await?;
        }
        Ok(updated)
    }

    async fn pending_items(&self) -> DbResult<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueItemRow>(
            "SELECT id, job_id, position, done, created_at FROM job_queue \
             WHERE NOT done ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(QueueItem::from).collect())
    }

    async fn get_item(&self, id: RecordId) -> DbResult<Option<QueueItem>> {
        let row = sqlx::query_as::<_, QueueItemRow>(
            "SELECT id, job_id, position, done, created_at FROM job_queue WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(QueueItem::from))
    }

    async fn item_for_job(&self, job_id: RecordId) -> DbResult<Option<QueueItem>> {
        let row = sqlx::query_as::<_, QueueItemRow>(
            "SELECT id, job_id, position, done, created_at FROM job_queue \
             WHERE job_id = $1 ORDER BY position DESC LIMIT 1",
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(QueueItem::from))
    }

    async fn mark_item_done(&self, id: RecordId) -> DbResult<()> {
        sqlx::query("UPDATE job_queue SET done = TRUE WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
