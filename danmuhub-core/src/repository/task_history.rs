//! Task history repository backing the task manager and the tasks API.

use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Page, PageParams, QueueType, TaskInfo, TaskStatus};
use crate::Result;

#[derive(Clone)]
pub struct TaskHistoryRepository {
    pool: PgPool,
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> Result<TaskInfo> {
    let status: String = row.try_get("status")?;
    let queue: String = row.try_get("queue_type")?;
    Ok(TaskInfo {
        task_id: row.try_get("task_id")?,
        title: row.try_get("title")?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Failed),
        progress: row.try_get("progress")?,
        description: row.try_get("description")?,
        scheduled_task_id: row.try_get("scheduled_task_id")?,
        queue_type: QueueType::parse(&queue).unwrap_or(QueueType::Download),
        created_at: row.try_get("created_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

const TASK_COLUMNS: &str = "task_id, title, status, progress, description, scheduled_task_id, \
     queue_type, created_at, finished_at";

impl TaskHistoryRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        task_id: Uuid,
        title: &str,
        scheduled_task_id: Option<&str>,
        queue_type: QueueType,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO task_history (task_id, title, status, progress, description,
                                      scheduled_task_id, queue_type)
            VALUES ($1, $2, $3, 0, '等待执行...', $4, $5)
            ",
        )
        .bind(task_id)
        .bind(title)
        .bind(TaskStatus::Pending.as_str())
        .bind(scheduled_task_id)
        .bind(queue_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_progress(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        progress: i32,
        description: &str,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE task_history
            SET status = $2, progress = $3, description = $4
            WHERE task_id = $1
            ",
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(progress.clamp(0, 100))
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_status(&self, task_id: Uuid, status: TaskStatus) -> Result<()> {
        sqlx::query("UPDATE task_history SET status = $2 WHERE task_id = $1")
            .bind(task_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Terminal state write; stamps `finished_at` and forces progress to 100
    /// on success.
    pub async fn finalize(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        description: &str,
    ) -> Result<()> {
        let progress_sql = if status == TaskStatus::Completed {
            100
        } else {
            -1
        };
        sqlx::query(
            r"
            UPDATE task_history
            SET status = $2,
                description = $3,
                finished_at = $4,
                progress = CASE WHEN $5 >= 0 THEN $5 ELSE progress END
            WHERE task_id = $1
            ",
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(description)
        .bind(Utc::now())
        .bind(progress_sql)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cache `(task_type, task_parameters)` for restart recovery.
    pub async fn save_recovery_state(
        &self,
        task_id: Uuid,
        task_type: &str,
        task_parameters: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE task_history SET task_type = $2, task_parameters = $3 WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(task_type)
        .bind(task_parameters)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, task_id: Uuid) -> Result<Option<TaskInfo>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM task_history WHERE task_id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        params: PageParams,
    ) -> Result<Page<TaskInfo>> {
        let status_str = status.map(TaskStatus::as_str);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM task_history WHERE $1::text IS NULL OR status = $1",
        )
        .bind(status_str)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            r"
            SELECT {TASK_COLUMNS} FROM task_history
            WHERE $1::text IS NULL OR status = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "
        ))
        .bind(status_str)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows.iter().map(task_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, params))
    }

    pub async fn delete(&self, task_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM task_history WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Tasks left `running`/`paused` by a previous process, with their cached
    /// recovery state.
    pub async fn interrupted_tasks(&self) -> Result<Vec<(TaskInfo, Option<String>, Option<serde_json::Value>)>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {TASK_COLUMNS}, task_type, task_parameters
            FROM task_history
            WHERE status IN ('running', 'paused')
            "
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let info = task_from_row(row)?;
                let task_type: Option<String> = row.try_get("task_type")?;
                let params: Option<serde_json::Value> = row.try_get("task_parameters")?;
                Ok((info, task_type, params))
            })
            .collect()
    }

    /// Mark every interrupted row failed after the recovery scan.
    pub async fn mark_interrupted_failed(&self) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE task_history
            SET status = 'failed', description = '服务重启时任务被中断', finished_at = $1
            WHERE status IN ('running', 'paused')
            ",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
