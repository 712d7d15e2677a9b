//! Webhook pump: moves due webhook rows onto the task queues as generic
//! imports.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::import::{generic_import, GenericImportParams};
use super::{SubmitOptions, TaskContext, TaskManager};
use crate::models::QueueType;
use crate::Error;

const PUMP_INTERVAL: Duration = Duration::from_secs(30);
const CLAIM_BATCH: i64 = 10;

/// Spawn the background loop that dispatches due webhook rows. Returns the
/// join handle so the binary can keep it alive.
pub fn spawn_webhook_pump(
    ctx: TaskContext,
    manager: Arc<TaskManager>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PUMP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = pump_once(&ctx, &manager).await {
                error!("Webhook pump iteration failed: {e}");
            }
        }
    })
}

async fn pump_once(ctx: &TaskContext, manager: &Arc<TaskManager>) -> crate::Result<()> {
    if !ctx.config.get_bool("webhook_enabled", true).await {
        return Ok(());
    }

    let due = ctx.webhook_repo.claim_due(CLAIM_BATCH).await?;
    for row in due {
        let params: GenericImportParams = match serde_json::from_value(row.payload.clone()) {
            Ok(params) => params,
            Err(e) => {
                warn!(webhook_id = row.id, "Dropping webhook row with bad payload: {e}");
                continue;
            }
        };

        let title = format!("Webhook导入: {}", row.title);
        let unique_key = params.unique_key();
        let factory = generic_import(ctx.clone(), params);
        match manager
            .submit(
                factory,
                &title,
                QueueType::Download,
                SubmitOptions {
                    unique_key: Some(unique_key),
                    task_type: Some("generic_import".to_string()),
                    task_parameters: serde_json::to_value(&row.payload).ok(),
                    ..SubmitOptions::default()
                },
            )
            .await
        {
            Ok(ticket) => {
                info!(webhook_id = row.id, task_id = %ticket.task_id, "Webhook import dispatched");
            }
            Err(Error::Conflict(msg)) => {
                // An equivalent import is already queued; drop this row.
                info!(webhook_id = row.id, "Webhook import skipped: {msg}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
