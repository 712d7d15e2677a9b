//! The task manager: three single-consumer FIFO queues with pause, resume,
//! abort, dedup keys and restart recovery.
//!
//! Success and rate-limit pauses are result variants, not errors: a task body
//! resolves to a `TaskOutcome`, and only genuine failures travel the `Err`
//! path.

mod context;
pub mod import;
pub mod maintenance;
pub mod manual_import;
pub mod refresh;
pub mod webhook;

pub use context::TaskContext;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{QueueType, TaskStatus};
use crate::provider::{ProgressSink, ProviderError};
use crate::repository::TaskHistoryRepository;
use crate::{Error, Result};

/// Minimum spacing between progress persistence writes.
const PROGRESS_WRITE_INTERVAL: Duration = Duration::from_millis(500);

/// How a task body ended, short of an error.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// Done; the message is persisted as the terminal description.
    Completed(String),
    /// The rate limiter refused the next fetch. The manager persists
    /// `paused`, waits, and re-runs the (idempotent) body from the top.
    RateLimited {
        retry_after: Duration,
        message: String,
    },
}

/// Boxed task body future.
pub type TaskFuture = BoxFuture<'static, Result<TaskOutcome>>;

/// A task is a factory so the manager can re-run it after a rate-limit pause.
pub type TaskFactory = Arc<dyn Fn(ProgressReporter) -> TaskFuture + Send + Sync>;

/// Options for task submission.
#[derive(Default)]
pub struct SubmitOptions {
    /// Dedup by target resource, e.g. `delete-source-42`.
    pub unique_key: Option<String>,
    pub scheduled_task_id: Option<String>,
    /// Bypass the queue and start immediately (still dedup-checked).
    pub run_immediately: bool,
    /// Cached for restart recovery.
    pub task_type: Option<String>,
    pub task_parameters: Option<serde_json::Value>,
}

/// Handle returned by `submit`: the task id plus a completion signal.
pub struct TaskTicket {
    pub task_id: Uuid,
    pub done: oneshot::Receiver<()>,
}

struct TaskControl {
    /// true = paused. Checked at every progress checkpoint.
    pause: watch::Sender<bool>,
    /// Graceful cancel, observed at the checkpoint.
    cancel: CancellationToken,
    /// Force path: drops the body future outright.
    force: CancellationToken,
}

impl TaskControl {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            pause: watch::Sender::new(false),
            cancel: CancellationToken::new(),
            force: CancellationToken::new(),
        })
    }
}

struct QueuedTask {
    task_id: Uuid,
    title: String,
    unique_key: Option<String>,
    queue_type: QueueType,
    factory: TaskFactory,
    control: Arc<TaskControl>,
    task_type: Option<String>,
    task_parameters: Option<serde_json::Value>,
    done_tx: oneshot::Sender<()>,
}

struct CurrentTask {
    task_id: Uuid,
    title: String,
    control: Arc<TaskControl>,
}

#[derive(Default)]
struct ManagerState {
    pending_titles: HashSet<String>,
    active_unique_keys: HashSet<String>,
    current: HashMap<QueueType, CurrentTask>,
    /// Pending tasks cancelled before their worker picked them up.
    cancelled_pending: HashSet<Uuid>,
}

/// The task manager. One instance per process, owned by the server and passed
/// through construction.
pub struct TaskManager {
    history: TaskHistoryRepository,
    state: Mutex<ManagerState>,
    senders: HashMap<QueueType, mpsc::UnboundedSender<QueuedTask>>,
    receivers: Mutex<Vec<(QueueType, mpsc::UnboundedReceiver<QueuedTask>)>>,
}

impl TaskManager {
    #[must_use]
    pub fn new(history: TaskHistoryRepository) -> Arc<Self> {
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for queue in [QueueType::Download, QueueType::Management, QueueType::Fallback] {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(queue, tx);
            receivers.push((queue, rx));
        }
        Arc::new(Self {
            history,
            state: Mutex::new(ManagerState::default()),
            senders,
            receivers: Mutex::new(receivers),
        })
    }

    /// Spawn the three queue workers and run the interrupted-task scan.
    /// Call exactly once at startup.
    pub fn start(self: &Arc<Self>) {
        let receivers = std::mem::take(&mut *self.receivers.lock());
        for (queue, mut rx) in receivers {
            let manager = self.clone();
            tokio::spawn(async move {
                while let Some(task) = rx.recv().await {
                    let skip = {
                        let mut state = manager.state.lock();
                        if state.cancelled_pending.remove(&task.task_id) {
                            // Release the reservation of the cancelled task.
                            state.pending_titles.remove(&task.title);
                            if let Some(key) = &task.unique_key {
                                state.active_unique_keys.remove(key);
                            }
                            true
                        } else {
                            false
                        }
                    };
                    if skip {
                        continue;
                    }
                    {
                        let mut state = manager.state.lock();
                        state.current.insert(
                            queue,
                            CurrentTask {
                                task_id: task.task_id,
                                title: task.title.clone(),
                                control: task.control.clone(),
                            },
                        );
                    }
                    manager.run_task_wrapper(task).await;
                    manager.state.lock().current.remove(&queue);
                }
            });
        }

        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.recover_interrupted().await {
                error!("Interrupted-task recovery failed: {e}");
            }
        });
        info!("Task manager started (download + management + fallback queues)");
    }

    /// Submit a task. Fails synchronously with `Conflict` when another
    /// pending or running task shares the title or the unique key.
    pub async fn submit(
        self: &Arc<Self>,
        factory: TaskFactory,
        title: &str,
        queue_type: QueueType,
        options: SubmitOptions,
    ) -> Result<TaskTicket> {
        {
            let mut state = self.state.lock();
            if state.pending_titles.contains(title) {
                return Err(Error::Conflict(format!(
                    "任务 '{title}' 已在队列中，请勿重复提交。"
                )));
            }
            if state.current.values().any(|t| t.title == title) {
                return Err(Error::Conflict(format!(
                    "任务 '{title}' 已在运行中，请勿重复提交。"
                )));
            }
            if let Some(key) = &options.unique_key {
                if state.active_unique_keys.contains(key) {
                    return Err(Error::Conflict(
                        "一个针对此媒体的相似任务已在队列中或正在运行，请勿重复提交。".to_string(),
                    ));
                }
                state.active_unique_keys.insert(key.clone());
            }
            state.pending_titles.insert(title.to_string());
        }

        let task_id = Uuid::new_v4();
        if let Err(e) = self
            .history
            .create(task_id, title, options.scheduled_task_id.as_deref(), queue_type)
            .await
        {
            // Roll the reservation back so the title can be resubmitted.
            let mut state = self.state.lock();
            state.pending_titles.remove(title);
            if let Some(key) = &options.unique_key {
                state.active_unique_keys.remove(key);
            }
            return Err(e);
        }

        let (done_tx, done_rx) = oneshot::channel();
        let task = QueuedTask {
            task_id,
            title: title.to_string(),
            unique_key: options.unique_key,
            queue_type,
            factory,
            control: TaskControl::new(),
            task_type: options.task_type,
            task_parameters: options.task_parameters,
            done_tx,
        };

        if options.run_immediately {
            info!(task_id = %task_id, title, "Running task immediately, bypassing queue");
            let manager = self.clone();
            tokio::spawn(async move {
                manager.run_task_wrapper(task).await;
            });
        } else {
            let sender = self
                .senders
                .get(&queue_type)
                .ok_or_else(|| Error::Internal("unknown queue".into()))?;
            sender
                .send(task)
                .map_err(|_| Error::Internal("task queue closed".into()))?;
            info!(task_id = %task_id, title, queue = %queue_type, "Task submitted");
        }

        Ok(TaskTicket {
            task_id,
            done: done_rx,
        })
    }

    async fn run_task_wrapper(self: &Arc<Self>, task: QueuedTask) {
        info!(task_id = %task.task_id, title = %task.title, queue = %task.queue_type, "Task starting");

        // Single point of responsibility for leaving the pending set.
        self.state.lock().pending_titles.remove(&task.title);

        if let Err(e) = self
            .history
            .update_progress(task.task_id, TaskStatus::Running, 0, "正在初始化...")
            .await
        {
            warn!(task_id = %task.task_id, "Failed to persist running status: {e}");
        }
        if let (Some(task_type), Some(params)) = (&task.task_type, &task.task_parameters) {
            if let Err(e) = self
                .history
                .save_recovery_state(task.task_id, task_type, params)
                .await
            {
                warn!(task_id = %task.task_id, "Failed to cache recovery state: {e}");
            }
        }

        let reporter = ProgressReporter::new(
            task.task_id,
            self.history.clone(),
            task.control.clone(),
        );

        loop {
            let future = (task.factory)(reporter.clone());
            let result = tokio::select! {
                () = task.control.force.cancelled() => {
                    self.finalize(task.task_id, TaskStatus::Failed, "任务已被强制中止").await;
                    break;
                }
                result = future => result,
            };

            match result {
                Ok(TaskOutcome::Completed(message)) => {
                    let message = if message.is_empty() {
                        "任务成功完成".to_string()
                    } else {
                        message
                    };
                    self.finalize(task.task_id, TaskStatus::Completed, &message).await;
                    info!(task_id = %task.task_id, title = %task.title, "Task completed: {message}");
                    break;
                }
                Ok(TaskOutcome::RateLimited { retry_after, message }) => {
                    warn!(task_id = %task.task_id, "Task paused for rate limit: {message}");
                    if let Err(e) = self
                        .history
                        .update_progress(task.task_id, TaskStatus::Paused, 0, &message)
                        .await
                    {
                        warn!(task_id = %task.task_id, "Failed to persist paused status: {e}");
                    }
                    let interrupted = tokio::select! {
                        () = task.control.cancel.cancelled() => true,
                        () = task.control.force.cancelled() => true,
                        () = tokio::time::sleep(retry_after) => false,
                    };
                    if interrupted {
                        self.finalize(task.task_id, TaskStatus::Failed, "任务已被用户取消").await;
                        break;
                    }
                    // Scheduled resume: run the idempotent body again.
                    if let Err(e) = self
                        .history
                        .update_status(task.task_id, TaskStatus::Running)
                        .await
                    {
                        warn!(task_id = %task.task_id, "Failed to persist resumed status: {e}");
                    }
                }
                Err(Error::TaskCancelled) => {
                    info!(task_id = %task.task_id, title = %task.title, "Task cancelled by user");
                    self.finalize(task.task_id, TaskStatus::Failed, "任务已被用户取消").await;
                    break;
                }
                Err(e) => {
                    error!(task_id = %task.task_id, title = %task.title, "Task failed: {e}");
                    self.finalize(task.task_id, TaskStatus::Failed, &format!("任务执行失败 - {e}"))
                        .await;
                    break;
                }
            }
        }

        // The wrapper guarantees cleanup even on failure paths.
        {
            let mut state = self.state.lock();
            if let Some(key) = &task.unique_key {
                state.active_unique_keys.remove(key);
            }
            state.pending_titles.remove(&task.title);
        }
        let _ = task.done_tx.send(());
    }

    async fn finalize(&self, task_id: Uuid, status: TaskStatus, description: &str) {
        if let Err(e) = self.history.finalize(task_id, status, description).await {
            error!(task_id = %task_id, "Failed to finalize task row: {e}");
        }
    }

    /// Pause the currently running task with this id.
    pub async fn pause(&self, task_id: Uuid) -> Result<()> {
        let control = self.find_current(task_id)?;
        control.pause.send_replace(true);
        self.history.update_status(task_id, TaskStatus::Paused).await?;
        info!(task_id = %task_id, "Task paused");
        Ok(())
    }

    /// Resume the currently paused task with this id.
    pub async fn resume(&self, task_id: Uuid) -> Result<()> {
        let control = self.find_current(task_id)?;
        control.pause.send_replace(false);
        self.history.update_status(task_id, TaskStatus::Running).await?;
        info!(task_id = %task_id, "Task resumed");
        Ok(())
    }

    /// Graceful abort: the body observes the cancel at its next checkpoint.
    /// Also releases a pause so the checkpoint is reached.
    pub fn abort(&self, task_id: Uuid) -> Result<()> {
        let control = self.find_current(task_id)?;
        control.pause.send_replace(false);
        control.cancel.cancel();
        info!(task_id = %task_id, "Task abort requested");
        Ok(())
    }

    /// Force abort: drops the body future and marks the row failed even if
    /// the task would not unwind on its own.
    pub fn force_abort(&self, task_id: Uuid) -> Result<()> {
        let control = self.find_current(task_id)?;
        control.pause.send_replace(false);
        control.cancel.cancel();
        control.force.cancel();
        warn!(task_id = %task_id, "Task force-abort requested");
        Ok(())
    }

    /// Remove a still-pending task from its queue.
    pub async fn cancel_pending(&self, task_id: Uuid, title: &str, unique_key: Option<&str>) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.cancelled_pending.insert(task_id);
            state.pending_titles.remove(title);
            if let Some(key) = unique_key {
                state.active_unique_keys.remove(key);
            }
        }
        self.history
            .finalize(task_id, TaskStatus::Failed, "任务已被用户取消")
            .await?;
        Ok(())
    }

    fn find_current(&self, task_id: Uuid) -> Result<Arc<TaskControl>> {
        let state = self.state.lock();
        state
            .current
            .values()
            .find(|t| t.task_id == task_id)
            .map(|t| t.control.clone())
            .ok_or_else(|| Error::NotFound(format!("task {task_id} is not currently running")))
    }

    /// Whether a task id is the current task of any queue.
    #[must_use]
    pub fn is_running(&self, task_id: Uuid) -> bool {
        self.state.lock().current.values().any(|t| t.task_id == task_id)
    }

    /// Startup scan: every `running`/`paused` row belongs to a dead process.
    /// Log what was interrupted and mark the rows failed. Generic imports are
    /// never auto-resumed; idempotent fallback matches are safe to resubmit
    /// manually.
    async fn recover_interrupted(&self) -> Result<()> {
        let interrupted = self.history.interrupted_tasks().await?;
        if interrupted.is_empty() {
            info!("No interrupted tasks found");
            return Ok(());
        }
        info!("Found {} interrupted tasks", interrupted.len());
        for (task, task_type, parameters) in &interrupted {
            match task_type.as_deref() {
                Some("match_fallback") => info!(
                    task_id = %task.task_id,
                    title = %task.title,
                    ?parameters,
                    "Interrupted fallback match; idempotent, safe to resubmit"
                ),
                Some(other) => info!(
                    task_id = %task.task_id,
                    title = %task.title,
                    task_type = other,
                    ?parameters,
                    "Interrupted task marked failed"
                ),
                None => info!(
                    task_id = %task.task_id,
                    title = %task.title,
                    "Interrupted task without recovery state marked failed"
                ),
            }
        }
        let marked = self.history.mark_interrupted_failed().await?;
        info!("Marked {marked} interrupted tasks as failed");
        Ok(())
    }
}

/// Per-task progress callback, pause gate and cancellation checkpoint.
///
/// Persistence is throttled: writes go through at most every 500 ms unless
/// the update is the first, the last, or carries a status change.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: Uuid,
    history: TaskHistoryRepository,
    control: Arc<TaskControl>,
    last_write: Arc<Mutex<Option<Instant>>>,
}

impl ProgressReporter {
    fn new(task_id: Uuid, history: TaskHistoryRepository, control: Arc<TaskControl>) -> Self {
        Self {
            task_id,
            history,
            control,
            last_write: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub const fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// The pause/cancel checkpoint. Long-running bodies must call this at
    /// least every few seconds.
    pub async fn checkpoint(&self) -> Result<()> {
        if self.control.cancel.is_cancelled() || self.control.force.is_cancelled() {
            return Err(Error::TaskCancelled);
        }
        let mut rx = self.control.pause.subscribe();
        tokio::select! {
            () = self.control.cancel.cancelled() => Err(Error::TaskCancelled),
            result = rx.wait_for(|paused| !*paused) => {
                result.map_err(|_| Error::TaskCancelled)?;
                Ok(())
            }
        }
    }

    /// Report progress (0–100) with a description.
    pub async fn update(&self, progress: u32, description: &str) -> Result<()> {
        self.checkpoint().await?;

        let force = progress == 0 || progress >= 100;
        {
            let mut last = self.last_write.lock();
            if !force {
                if let Some(prev) = *last {
                    if prev.elapsed() < PROGRESS_WRITE_INTERVAL {
                        return Ok(());
                    }
                }
            }
            *last = Some(Instant::now());
        }

        if let Err(e) = self
            .history
            .update_progress(self.task_id, TaskStatus::Running, progress as i32, description)
            .await
        {
            warn!(task_id = %self.task_id, "Progress update failed: {e}");
        }
        Ok(())
    }

    /// Persist an explicit status (used by batch loops that self-pause).
    pub async fn update_status(
        &self,
        progress: u32,
        description: &str,
        status: TaskStatus,
    ) -> Result<()> {
        self.checkpoint().await?;
        *self.last_write.lock() = Some(Instant::now());
        if let Err(e) = self
            .history
            .update_progress(self.task_id, status, progress as i32, description)
            .await
        {
            warn!(task_id = %self.task_id, "Progress update failed: {e}");
        }
        Ok(())
    }

    /// Cancellable sleep, for in-body rate-limit waits.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            () = self.control.cancel.cancelled() => Err(Error::TaskCancelled),
            () = self.control.force.cancelled() => Err(Error::TaskCancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// View of this reporter that maps a percent range into `base..base+span`,
    /// for handing to provider comment fetches.
    #[must_use]
    pub fn sub_range(&self, base: u32, span: u32) -> SubProgress {
        SubProgress {
            reporter: self.clone(),
            base,
            span,
        }
    }
}

/// Scales provider-side 0–100 progress into a slice of the task's range.
pub struct SubProgress {
    reporter: ProgressReporter,
    base: u32,
    span: u32,
}

#[async_trait::async_trait]
impl ProgressSink for SubProgress {
    async fn report(&self, percent: u32, message: &str) -> std::result::Result<(), ProviderError> {
        let scaled = self.base + percent.min(100) * self.span / 100;
        self.reporter
            .update(scaled.min(99), message)
            .await
            .map_err(|_| ProviderError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_completed_carries_message() {
        let outcome = TaskOutcome::Completed("导入了 42 条弹幕".into());
        match outcome {
            TaskOutcome::Completed(msg) => assert!(msg.contains("42")),
            TaskOutcome::RateLimited { .. } => panic!("wrong variant"),
        }
    }
}
