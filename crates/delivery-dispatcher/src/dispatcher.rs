//! The batch dispatcher.

use crate::{CampaignReconciler, DispatchResult};
use chrono::{DateTime, Utc};
use maildrop_core::{
    CampaignStore, ContactTriggerStore, EligibleTask, EmailReceiptStore, MailTransport,
    NewEmailReceipt, OutboundEmail, ProjectStore, TaskStatus, TaskStore,
};
use send_rate_limiter::RateLimiter;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Dispatcher configuration.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Maximum tasks claimed per batch.
    pub batch_size: u64,
    /// Maximum tasks processed concurrently.
    pub max_parallelism: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_parallelism: 10,
        }
    }
}

/// The stores and transport the dispatcher operates through.
#[derive(Clone)]
pub struct DispatcherPorts {
    pub tasks: Arc<dyn TaskStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub triggers: Arc<dyn ContactTriggerStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub receipts: Arc<dyn EmailReceiptStore>,
    pub transport: Arc<dyn MailTransport>,
}

/// How one claimed task settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Rendered, sent and recorded; task completed.
    Sent { campaign_id: Option<String> },
    /// Completed without a send (suppression event already triggered, or an
    /// unsubscribed contact on a campaign). Counts as an attempt.
    Suppressed { campaign_id: Option<String> },
    /// Render/transport/store failure; task marked failed. Not retried.
    Failed,
    /// Reservation refused mid-batch; task left pending for a later pass.
    RateLimited,
    /// The task was no longer pending at claim time (a concurrent instance
    /// claimed it, or it already settled). Not an attempt; nothing sent.
    ClaimLost,
    /// The contact's project no longer exists; the project's tasks were
    /// bulk-failed and deleted. Not an attempt.
    ProjectVanished,
}

/// Result of one `run_batch` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    /// Attempted tasks: completed or failed, suppressions included.
    pub processed: u64,
    /// True when the initial budget was zero or any reservation was refused.
    pub rate_limited: bool,
    pub timestamp: DateTime<Utc>,
}

/// Stateless batch dispatcher.
///
/// Cheap to clone; clones share the ports and the limiter.
#[derive(Clone)]
pub struct Dispatcher {
    ports: DispatcherPorts,
    limiter: RateLimiter,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(ports: DispatcherPorts, limiter: RateLimiter, config: DispatcherConfig) -> Self {
        Self {
            ports,
            limiter,
            config,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Process one bounded batch of due tasks.
    ///
    /// Returns an error only when the claim itself fails (nothing was
    /// mutated). Everything after the claim settles per task.
    pub async fn run_batch(&self) -> DispatchResult<BatchSummary> {
        let budget = self
            .limiter
            .available_budget()
            .await
            .min(self.config.batch_size);
        if budget == 0 {
            debug!("No send budget available");
            return Ok(BatchSummary {
                processed: 0,
                rate_limited: true,
                timestamp: Utc::now(),
            });
        }

        let mut claimed = self.ports.tasks.list_eligible(budget).await?;
        if claimed.is_empty() {
            return Ok(BatchSummary {
                processed: 0,
                rate_limited: false,
                timestamp: Utc::now(),
            });
        }
        info!(claimed = claimed.len(), budget, "Dispatching batch");

        let mut outcomes: Vec<TaskOutcome> = Vec::with_capacity(claimed.len());
        while !claimed.is_empty() {
            let take = claimed.len().min(self.config.max_parallelism.max(1));
            let chunk: Vec<EligibleTask> = claimed.drain(..take).collect();
            self.settle_chunk(chunk, &mut outcomes).await;
        }

        let touched_campaigns: Vec<String> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                TaskOutcome::Sent { campaign_id } | TaskOutcome::Suppressed { campaign_id } => {
                    campaign_id.clone()
                }
                _ => None,
            })
            .collect();
        if !touched_campaigns.is_empty() {
            let reconciler =
                CampaignReconciler::new(self.ports.tasks.clone(), self.ports.campaigns.clone());
            reconciler.reconcile(&touched_campaigns).await;
        }

        let processed = outcomes
            .iter()
            .filter(|outcome| {
                matches!(
                    outcome,
                    TaskOutcome::Sent { .. } | TaskOutcome::Suppressed { .. } | TaskOutcome::Failed
                )
            })
            .count() as u64;
        let rate_limited = outcomes
            .iter()
            .any(|outcome| matches!(outcome, TaskOutcome::RateLimited));

        Ok(BatchSummary {
            processed,
            rate_limited,
            timestamp: Utc::now(),
        })
    }

    /// Run one chunk concurrently and gather every outcome - no
    /// short-circuit; a panic settles that task as failed.
    async fn settle_chunk(&self, chunk: Vec<EligibleTask>, outcomes: &mut Vec<TaskOutcome>) {
        let mut join_set = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, String> = HashMap::new();

        for item in chunk {
            let dispatcher = self.clone();
            let task_id = item.task.id.clone();
            let handle = join_set.spawn(async move { dispatcher.process_task(item).await });
            spawned.insert(handle.id(), task_id);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(join_error) => {
                    let task_id = spawned
                        .get(&join_error.id())
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string());
                    error!(task_id = %task_id, error = %join_error, "Task worker panicked");
                    if let Err(e) = self
                        .ports
                        .tasks
                        .update_status(&task_id, TaskStatus::Failed)
                        .await
                    {
                        warn!(task_id = %task_id, error = %e, "Failed to mark panicked task failed");
                    }
                    outcomes.push(TaskOutcome::Failed);
                }
            }
        }
    }

    /// Drive one claimed task through the per-task state machine.
    ///
    /// Reservation happens before the PROCESSING mark so a rate-refused task
    /// keeps its pending status (status moves forward only).
    async fn process_task(&self, item: EligibleTask) -> TaskOutcome {
        let task_id = item.task.id.clone();
        let campaign_id = item.task.origin.campaign_id().map(str::to_string);

        if !self.limiter.try_reserve().await {
            debug!(task_id = %task_id, "Reservation refused, task stays pending");
            return TaskOutcome::RateLimited;
        }

        // Exclusive claim: the listing is only a snapshot, so the task is
        // re-validated here. A concurrent instance (or a second trigger on
        // this one) that claimed it first makes this a no-op skip.
        match self.ports.tasks.claim(&task_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(task_id = %task_id, "Task no longer pending, skipping");
                return TaskOutcome::ClaimLost;
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Failed to claim task");
                return TaskOutcome::Failed;
            }
        }

        let project = match self.ports.projects.get(&item.contact.project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => {
                warn!(
                    task_id = %task_id,
                    project_id = %item.contact.project_id,
                    "Project vanished, cleaning up its tasks"
                );
                match self
                    .ports
                    .tasks
                    .bulk_fail_and_delete_for_project(&item.contact.project_id)
                    .await
                {
                    Ok(removed) => {
                        info!(
                            project_id = %item.contact.project_id,
                            removed,
                            "Removed tasks for vanished project"
                        );
                    }
                    Err(e) => {
                        error!(
                            project_id = %item.contact.project_id,
                            error = %e,
                            "Cleanup for vanished project failed"
                        );
                    }
                }
                return TaskOutcome::ProjectVanished;
            }
            Err(e) => {
                return self.fail_task(&task_id, "Project lookup failed", &e).await;
            }
        };

        // Suppression: an already-triggered event cancels an action send;
        // an unsubscribed contact cancels a campaign send.
        let suppression_events = item.content.suppression_events();
        if !suppression_events.is_empty() {
            match self.ports.triggers.triggers_for(&item.contact.id).await {
                Ok(triggers) => {
                    if triggers
                        .iter()
                        .any(|trigger| suppression_events.contains(&trigger.event_id))
                    {
                        return self
                            .complete_without_send(&task_id, campaign_id, "Suppression event triggered")
                            .await;
                    }
                }
                Err(e) => {
                    return self.fail_task(&task_id, "Trigger lookup failed", &e).await;
                }
            }
        }
        if campaign_id.is_some() && !item.contact.subscribed {
            return self
                .complete_without_send(&task_id, campaign_id, "Contact unsubscribed")
                .await;
        }

        let rendered = match message_renderer::render(&item.content, &item.contact, &project) {
            Ok(rendered) => rendered,
            Err(e) => {
                return self.fail_task(&task_id, "Render failed", &e).await;
            }
        };

        let email = OutboundEmail {
            from: rendered.from_header(),
            to: item.contact.email.clone(),
            subject: rendered.subject,
            html: rendered.body,
        };
        let receipt = match self.ports.transport.send(email).await {
            Ok(receipt) => receipt,
            Err(e) => {
                return self.fail_task(&task_id, "Send failed", &e).await;
            }
        };

        // At-least-once: the mail is out; a write failure past this point
        // can only mark the task failed and log.
        let new_receipt = NewEmailReceipt {
            id: Uuid::new_v4().to_string(),
            message_id: receipt.message_id,
            contact_id: item.contact.id.clone(),
            action_id: item.task.origin.action_id().map(str::to_string),
            campaign_id: campaign_id.clone(),
        };
        if let Err(e) = self.ports.receipts.create(new_receipt).await {
            return self
                .fail_task(&task_id, "Receipt write failed after send", &e)
                .await;
        }
        if let Err(e) = self
            .ports
            .tasks
            .update_status(&task_id, TaskStatus::Completed)
            .await
        {
            error!(task_id = %task_id, error = %e, "Failed to mark task completed after send");
            return TaskOutcome::Failed;
        }

        info!(task_id = %task_id, to = %item.contact.email, "Task completed");
        TaskOutcome::Sent { campaign_id }
    }

    async fn complete_without_send(
        &self,
        task_id: &str,
        campaign_id: Option<String>,
        reason: &str,
    ) -> TaskOutcome {
        debug!(task_id = %task_id, reason, "Completing task without send");
        if let Err(e) = self
            .ports
            .tasks
            .update_status(task_id, TaskStatus::Completed)
            .await
        {
            error!(task_id = %task_id, error = %e, "Failed to mark suppressed task completed");
            return TaskOutcome::Failed;
        }
        TaskOutcome::Suppressed { campaign_id }
    }

    async fn fail_task(
        &self,
        task_id: &str,
        context: &str,
        cause: &(dyn std::fmt::Display + Sync),
    ) -> TaskOutcome {
        warn!(task_id = %task_id, error = %cause, "{context}, marking task failed");
        if let Err(e) = self
            .ports
            .tasks
            .update_status(task_id, TaskStatus::Failed)
            .await
        {
            error!(task_id = %task_id, error = %e, "Failed to mark task failed");
        }
        TaskOutcome::Failed
    }
}
