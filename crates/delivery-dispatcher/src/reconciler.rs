//! Campaign completion reconciliation.

use chrono::Utc;
use maildrop_core::{CampaignStore, StoreResult, TaskStatus, TaskStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Flips campaigns to `delivered` once all their tasks have settled.
///
/// Runs after each dispatcher batch over the campaigns that batch touched,
/// keeping campaign status in step with actual completion without a separate
/// poller. Idempotent: the delivered flip is guarded in the store, so
/// concurrent dispatcher instances may reconcile the same campaign safely.
pub struct CampaignReconciler {
    tasks: Arc<dyn TaskStore>,
    campaigns: Arc<dyn CampaignStore>,
}

impl CampaignReconciler {
    pub fn new(tasks: Arc<dyn TaskStore>, campaigns: Arc<dyn CampaignStore>) -> Self {
        Self { tasks, campaigns }
    }

    /// Reconcile the given campaigns. Returns the ids flipped to delivered.
    ///
    /// Per-campaign store errors are logged and skipped; the next batch that
    /// touches the campaign will retry.
    pub async fn reconcile(&self, campaign_ids: &[String]) -> Vec<String> {
        let unique: BTreeSet<&String> = campaign_ids.iter().collect();
        let mut flipped = Vec::new();

        for campaign_id in unique {
            match self.outstanding(campaign_id).await {
                Ok(0) => match self.campaigns.mark_delivered(campaign_id, Utc::now()).await {
                    Ok(true) => {
                        info!(campaign_id = %campaign_id, "Campaign delivered");
                        flipped.push(campaign_id.clone());
                    }
                    // Already delivered, nothing to do
                    Ok(false) => {}
                    Err(e) => {
                        warn!(campaign_id = %campaign_id, error = %e, "Delivered flip failed");
                    }
                },
                Ok(_) => {}
                Err(e) => {
                    warn!(campaign_id = %campaign_id, error = %e, "Reconciliation count failed");
                }
            }
        }

        flipped
    }

    /// Tasks for the campaign that are not yet settled.
    async fn outstanding(&self, campaign_id: &str) -> StoreResult<u64> {
        let pending = self
            .tasks
            .count_by_campaign_and_status(campaign_id, TaskStatus::Pending)
            .await?;
        let processing = self
            .tasks
            .count_by_campaign_and_status(campaign_id, TaskStatus::Processing)
            .await?;
        Ok(pending + processing)
    }
}
