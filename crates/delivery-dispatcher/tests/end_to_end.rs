//! End-to-end dispatcher tests over an in-memory database.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use delivery_dispatcher::{Dispatcher, DispatcherConfig, DispatcherPorts};
use maildrop_core::{
    CampaignStatus, EligibleTask, MailTransport, OutboundEmail, SendReceipt, StoreResult,
    TaskOrigin, TaskStatus, TaskStore, TemplateKind, TransportError, TransportResult,
};
use maildrop_database::{
    queries, AsyncDatabase, NewAction, NewCampaign, NewContact, NewProject, NewTask, NewTemplate,
    SqliteStores,
};
use send_rate_limiter::{
    CounterResult, CounterStore, InMemoryCounterStore, RateLimiter, RateLimiterConfig,
    WindowReservation,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Transport fake that records every accepted send and can be told to fail
/// or panic for specific recipients.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutboundEmail>>,
    fail_for: Mutex<HashSet<String>>,
    panic_for: Mutex<HashSet<String>>,
    counter: AtomicU64,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }

    fn fail_recipient(&self, to: &str) {
        self.fail_for.lock().unwrap().insert(to.to_string());
    }

    fn panic_recipient(&self, to: &str) {
        self.panic_for.lock().unwrap().insert(to.to_string());
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, email: OutboundEmail) -> TransportResult<SendReceipt> {
        if self.panic_for.lock().unwrap().contains(&email.to) {
            panic!("transport panic for {}", email.to);
        }
        if self.fail_for.lock().unwrap().contains(&email.to) {
            return Err(TransportError::Network("connection reset".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(email);
        Ok(SendReceipt {
            message_id: format!("msg-{n}"),
        })
    }
}

/// Counter store that admits a fixed number of reservations, then refuses.
/// Reads report empty windows so the upfront budget stays open.
struct StingyCounterStore {
    remaining: AtomicU64,
}

#[async_trait]
impl CounterStore for StingyCounterStore {
    async fn reserve(&self, _windows: &[WindowReservation]) -> CounterResult<bool> {
        Ok(self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok())
    }

    async fn get(&self, _key: &str) -> CounterResult<u64> {
        Ok(0)
    }
}

/// Task store that hands out the eligible snapshot, then claims every listed
/// task through the inner store before returning. Models a second dispatcher
/// instance winning the race between the listing and the claim.
struct RivalTaskStore {
    inner: Arc<SqliteStores>,
}

#[async_trait]
impl TaskStore for RivalTaskStore {
    async fn list_eligible(&self, limit: u64) -> StoreResult<Vec<EligibleTask>> {
        let tasks = self.inner.list_eligible(limit).await?;
        for item in &tasks {
            self.inner.claim(&item.task.id).await?;
        }
        Ok(tasks)
    }

    async fn claim(&self, task_id: &str) -> StoreResult<bool> {
        self.inner.claim(task_id).await
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> StoreResult<bool> {
        self.inner.update_status(task_id, status).await
    }

    async fn bulk_fail_and_delete_for_project(&self, project_id: &str) -> StoreResult<u64> {
        self.inner.bulk_fail_and_delete_for_project(project_id).await
    }

    async fn count_by_campaign_and_status(
        &self,
        campaign_id: &str,
        status: TaskStatus,
    ) -> StoreResult<u64> {
        self.inner.count_by_campaign_and_status(campaign_id, status).await
    }
}

/// Ceilings high enough to never interfere.
fn open_limiter() -> RateLimiter {
    RateLimiter::new(
        Arc::new(InMemoryCounterStore::new()),
        RateLimiterConfig {
            per_second: 1000,
            per_minute: 1000,
        },
    )
}

struct Harness {
    db: AsyncDatabase,
    transport: Arc<RecordingTransport>,
    dispatcher: Dispatcher,
}

impl Harness {
    async fn new() -> Self {
        Self::with_limiter(open_limiter()).await
    }

    async fn with_limiter(limiter: RateLimiter) -> Self {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let stores = Arc::new(SqliteStores::new(db.clone()));
        Self::assemble(db, stores.clone(), stores, limiter)
    }

    async fn with_rival_claims() -> Self {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let stores = Arc::new(SqliteStores::new(db.clone()));
        let tasks = Arc::new(RivalTaskStore {
            inner: stores.clone(),
        });
        Self::assemble(db, tasks, stores, open_limiter())
    }

    fn assemble(
        db: AsyncDatabase,
        tasks: Arc<dyn TaskStore>,
        stores: Arc<SqliteStores>,
        limiter: RateLimiter,
    ) -> Self {
        let transport = Arc::new(RecordingTransport::default());
        let ports = DispatcherPorts {
            tasks,
            projects: stores.clone(),
            triggers: stores.clone(),
            campaigns: stores.clone(),
            receipts: stores,
            transport: transport.clone(),
        };
        let dispatcher = Dispatcher::new(ports, limiter, DispatcherConfig::default());
        Self {
            db,
            transport,
            dispatcher,
        }
    }

    async fn seed_project(&self, id: &str) {
        let project = NewProject {
            id: id.to_string(),
            name: "Acme".to_string(),
            verified_domain: true,
            default_from_name: Some("Acme".to_string()),
            default_sender_email: "hello@acme.test".to_string(),
        };
        self.db
            .call(move |conn| queries::insert_project(conn, &project))
            .await
            .unwrap();
    }

    async fn seed_contact(&self, id: &str, project_id: &str, email: &str, subscribed: bool) {
        let contact = NewContact {
            id: id.to_string(),
            project_id: project_id.to_string(),
            email: email.to_string(),
            fields: serde_json::Map::new(),
            subscribed,
        };
        self.db
            .call(move |conn| queries::insert_contact(conn, &contact))
            .await
            .unwrap();
    }

    async fn seed_action(
        &self,
        id: &str,
        project_id: &str,
        subject: &str,
        suppression_events: &[&str],
    ) {
        let template = NewTemplate {
            id: format!("template-{id}"),
            project_id: project_id.to_string(),
            subject: subject.to_string(),
            body: "Hello there".to_string(),
            from_name: None,
            sender_email: None,
            is_html: false,
            kind: TemplateKind::Transactional,
        };
        let action = NewAction {
            id: id.to_string(),
            template_id: template.id.clone(),
            suppression_events: suppression_events.iter().map(|s| s.to_string()).collect(),
        };
        self.db
            .call(move |conn| {
                queries::insert_template(conn, &template)?;
                queries::insert_action(conn, &action)
            })
            .await
            .unwrap();
    }

    async fn seed_campaign(&self, id: &str, project_id: &str) {
        let campaign = NewCampaign {
            id: id.to_string(),
            project_id: project_id.to_string(),
            subject: "Launch".to_string(),
            body: "We launched!".to_string(),
            from_name: None,
            sender_email: None,
            is_html: false,
        };
        let campaign_id = id.to_string();
        self.db
            .call(move |conn| {
                queries::insert_campaign(conn, &campaign)?;
                queries::update_campaign_status(conn, &campaign_id, CampaignStatus::Sending)?;
                Ok(())
            })
            .await
            .unwrap();
    }

    async fn seed_task(&self, id: &str, contact_id: &str, origin: TaskOrigin) {
        self.seed_task_due(id, contact_id, origin, -1).await;
    }

    async fn seed_task_due(
        &self,
        id: &str,
        contact_id: &str,
        origin: TaskOrigin,
        due_in_secs: i64,
    ) {
        let task = NewTask {
            id: id.to_string(),
            contact_id: contact_id.to_string(),
            origin,
            not_before: Utc::now() + Duration::seconds(due_in_secs),
        };
        self.db
            .call(move |conn| queries::insert_task(conn, &task))
            .await
            .unwrap();
    }

    async fn task_status(&self, id: &str) -> Option<TaskStatus> {
        let id = id.to_string();
        self.db
            .call(move |conn| queries::get_task(conn, &id))
            .await
            .unwrap()
            .map(|task| task.status)
    }

    async fn receipt_count(&self) -> u64 {
        self.db.call(|conn| queries::count_emails(conn)).await.unwrap()
    }

    fn action_origin(action_id: &str) -> TaskOrigin {
        TaskOrigin::Action {
            action_id: action_id.to_string(),
        }
    }

    fn campaign_origin(campaign_id: &str) -> TaskOrigin {
        TaskOrigin::Campaign {
            campaign_id: campaign_id.to_string(),
        }
    }
}

#[tokio::test]
async fn basic_batch_sends_and_completes() {
    let h = Harness::new().await;
    h.seed_project("project-1").await;
    h.seed_action("action-1", "project-1", "Welcome", &[]).await;
    for i in 0..3 {
        h.seed_contact(
            &format!("contact-{i}"),
            "project-1",
            &format!("c{i}@example.test"),
            true,
        )
        .await;
        h.seed_task(
            &format!("task-{i}"),
            &format!("contact-{i}"),
            Harness::action_origin("action-1"),
        )
        .await;
    }

    let summary = h.dispatcher.run_batch().await.unwrap();

    assert_eq!(summary.processed, 3);
    assert!(!summary.rate_limited);
    assert_eq!(h.transport.sent().len(), 3);
    assert_eq!(h.receipt_count().await, 3);
    for i in 0..3 {
        assert_eq!(
            h.task_status(&format!("task-{i}")).await,
            Some(TaskStatus::Completed)
        );
    }
}

#[tokio::test]
async fn zero_budget_short_circuits() {
    let limiter = RateLimiter::new(
        Arc::new(InMemoryCounterStore::new()),
        RateLimiterConfig {
            per_second: 1,
            per_minute: 1,
        },
    );
    // Consume the whole budget up front
    assert!(limiter.try_reserve().await);

    let h = Harness::with_limiter(limiter).await;
    h.seed_project("project-1").await;
    h.seed_contact("contact-1", "project-1", "a@example.test", true)
        .await;
    h.seed_action("action-1", "project-1", "Welcome", &[]).await;
    h.seed_task("task-1", "contact-1", Harness::action_origin("action-1"))
        .await;

    let summary = h.dispatcher.run_batch().await.unwrap();

    assert_eq!(summary.processed, 0);
    assert!(summary.rate_limited);
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.task_status("task-1").await, Some(TaskStatus::Pending));
}

#[tokio::test]
async fn mid_batch_refusal_leaves_tasks_pending() {
    // Budget looks open but only one reservation is admitted
    let limiter = RateLimiter::new(
        Arc::new(StingyCounterStore {
            remaining: AtomicU64::new(1),
        }),
        RateLimiterConfig {
            per_second: 100,
            per_minute: 100,
        },
    );

    let h = Harness::with_limiter(limiter).await;
    h.seed_project("project-1").await;
    h.seed_action("action-1", "project-1", "Welcome", &[]).await;
    for i in 0..3 {
        h.seed_contact(
            &format!("contact-{i}"),
            "project-1",
            &format!("c{i}@example.test"),
            true,
        )
        .await;
        h.seed_task(
            &format!("task-{i}"),
            &format!("contact-{i}"),
            Harness::action_origin("action-1"),
        )
        .await;
    }

    let summary = h.dispatcher.run_batch().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert!(summary.rate_limited);
    assert_eq!(h.transport.sent().len(), 1);

    let mut pending = 0;
    for i in 0..3 {
        if h.task_status(&format!("task-{i}")).await == Some(TaskStatus::Pending) {
            pending += 1;
        }
    }
    assert_eq!(pending, 2);
}

#[tokio::test]
async fn suppression_completes_without_send() {
    let h = Harness::new().await;
    h.seed_project("project-1").await;
    h.seed_contact("contact-1", "project-1", "a@example.test", true)
        .await;
    h.seed_action("action-1", "project-1", "Welcome", &["purchase"])
        .await;
    h.db
        .call(|conn| queries::insert_contact_trigger(conn, "purchase", "contact-1"))
        .await
        .unwrap();
    h.seed_task("task-1", "contact-1", Harness::action_origin("action-1"))
        .await;

    let summary = h.dispatcher.run_batch().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.receipt_count().await, 0);
    assert_eq!(h.task_status("task-1").await, Some(TaskStatus::Completed));
}

#[tokio::test]
async fn unsubscribed_contact_skips_campaign_send() {
    let h = Harness::new().await;
    h.seed_project("project-1").await;
    h.seed_contact("contact-1", "project-1", "a@example.test", false)
        .await;
    h.seed_campaign("campaign-1", "project-1").await;
    h.seed_task("task-1", "contact-1", Harness::campaign_origin("campaign-1"))
        .await;

    let summary = h.dispatcher.run_batch().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.task_status("task-1").await, Some(TaskStatus::Completed));

    // The campaign had no outstanding tasks left, so it was reconciled
    let campaign = h
        .db
        .call(|conn| queries::get_campaign(conn, "campaign-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Delivered);
}

#[tokio::test]
async fn vanished_project_cleans_up_and_is_not_an_attempt() {
    let h = Harness::new().await;
    h.seed_project("project-1").await;
    h.seed_contact("contact-1", "project-1", "a@example.test", true)
        .await;
    h.seed_action("action-1", "project-1", "Welcome", &[]).await;
    h.seed_task("task-1", "contact-1", Harness::action_origin("action-1"))
        .await;
    // A sibling task that is not yet due; cleanup must remove it too
    h.seed_task_due(
        "task-2",
        "contact-1",
        Harness::action_origin("action-1"),
        3600,
    )
    .await;

    h.db
        .call(|conn| queries::delete_project(conn, "project-1").map(|_| ()))
        .await
        .unwrap();

    let summary = h.dispatcher.run_batch().await.unwrap();

    assert_eq!(summary.processed, 0);
    assert!(h.transport.sent().is_empty());
    assert!(h.task_status("task-1").await.is_none());
    assert!(h.task_status("task-2").await.is_none());
}

#[tokio::test]
async fn render_failure_marks_task_failed() {
    let h = Harness::new().await;
    h.seed_project("project-1").await;
    h.seed_contact("contact-1", "project-1", "a@example.test", true)
        .await;
    // Empty subject cannot render
    h.seed_action("action-1", "project-1", "", &[]).await;
    h.seed_task("task-1", "contact-1", Harness::action_origin("action-1"))
        .await;

    let summary = h.dispatcher.run_batch().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.receipt_count().await, 0);
    assert_eq!(h.task_status("task-1").await, Some(TaskStatus::Failed));
}

#[tokio::test]
async fn transport_failure_settles_the_rest_of_the_batch() {
    let h = Harness::new().await;
    h.seed_project("project-1").await;
    h.seed_action("action-1", "project-1", "Welcome", &[]).await;
    for i in 0..3 {
        h.seed_contact(
            &format!("contact-{i}"),
            "project-1",
            &format!("c{i}@example.test"),
            true,
        )
        .await;
        h.seed_task(
            &format!("task-{i}"),
            &format!("contact-{i}"),
            Harness::action_origin("action-1"),
        )
        .await;
    }
    h.transport.fail_recipient("c1@example.test");

    let summary = h.dispatcher.run_batch().await.unwrap();

    assert_eq!(summary.processed, 3);
    assert!(!summary.rate_limited);
    assert_eq!(h.transport.sent().len(), 2);
    assert_eq!(h.receipt_count().await, 2);
    assert_eq!(h.task_status("task-0").await, Some(TaskStatus::Completed));
    assert_eq!(h.task_status("task-1").await, Some(TaskStatus::Failed));
    assert_eq!(h.task_status("task-2").await, Some(TaskStatus::Completed));
}

#[tokio::test]
async fn panic_in_one_task_settles_as_failed() {
    let h = Harness::new().await;
    h.seed_project("project-1").await;
    h.seed_action("action-1", "project-1", "Welcome", &[]).await;
    for i in 0..3 {
        h.seed_contact(
            &format!("contact-{i}"),
            "project-1",
            &format!("c{i}@example.test"),
            true,
        )
        .await;
        h.seed_task(
            &format!("task-{i}"),
            &format!("contact-{i}"),
            Harness::action_origin("action-1"),
        )
        .await;
    }
    h.transport.panic_recipient("c2@example.test");

    let summary = h.dispatcher.run_batch().await.unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(h.transport.sent().len(), 2);
    assert_eq!(h.task_status("task-2").await, Some(TaskStatus::Failed));
}

#[tokio::test]
async fn completed_campaign_is_marked_delivered() {
    let h = Harness::new().await;
    h.seed_project("project-1").await;
    h.seed_campaign("campaign-1", "project-1").await;
    for i in 0..2 {
        h.seed_contact(
            &format!("contact-{i}"),
            "project-1",
            &format!("c{i}@example.test"),
            true,
        )
        .await;
        h.seed_task(
            &format!("task-{i}"),
            &format!("contact-{i}"),
            Harness::campaign_origin("campaign-1"),
        )
        .await;
    }

    let summary = h.dispatcher.run_batch().await.unwrap();
    assert_eq!(summary.processed, 2);

    let campaign = h
        .db
        .call(|conn| queries::get_campaign(conn, "campaign-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Delivered);
    assert!(campaign.delivered_at.is_some());
}

#[tokio::test]
async fn campaign_with_outstanding_tasks_is_not_delivered() {
    let h = Harness::new().await;
    h.seed_project("project-1").await;
    h.seed_campaign("campaign-1", "project-1").await;
    h.seed_contact("contact-0", "project-1", "c0@example.test", true)
        .await;
    h.seed_contact("contact-1", "project-1", "c1@example.test", true)
        .await;
    h.seed_task("task-0", "contact-0", Harness::campaign_origin("campaign-1"))
        .await;
    // Second recipient is not due yet
    h.seed_task_due(
        "task-1",
        "contact-1",
        Harness::campaign_origin("campaign-1"),
        3600,
    )
    .await;

    let summary = h.dispatcher.run_batch().await.unwrap();
    assert_eq!(summary.processed, 1);

    let campaign = h
        .db
        .call(|conn| queries::get_campaign(conn, "campaign-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Sending);
    assert!(campaign.delivered_at.is_none());
}

#[tokio::test]
async fn empty_queue_returns_quiet_summary() {
    let h = Harness::new().await;

    let summary = h.dispatcher.run_batch().await.unwrap();

    assert_eq!(summary.processed, 0);
    assert!(!summary.rate_limited);
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn task_claimed_elsewhere_is_skipped_without_send() {
    let h = Harness::with_rival_claims().await;
    h.seed_project("project-1").await;
    h.seed_contact("contact-1", "project-1", "a@example.test", true)
        .await;
    h.seed_action("action-1", "project-1", "Welcome", &[]).await;
    h.seed_task("task-1", "contact-1", Harness::action_origin("action-1"))
        .await;

    let summary = h.dispatcher.run_batch().await.unwrap();

    // The rival won the claim between the listing and the claim: no attempt,
    // nothing sent, the task stays with its rival.
    assert_eq!(summary.processed, 0);
    assert!(!summary.rate_limited);
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.receipt_count().await, 0);
    assert_eq!(h.task_status("task-1").await, Some(TaskStatus::Processing));
}

#[tokio::test]
async fn overlapping_batches_send_each_task_once() {
    let h = Harness::new().await;
    h.seed_project("project-1").await;
    h.seed_action("action-1", "project-1", "Welcome", &[]).await;
    for i in 0..3 {
        h.seed_contact(
            &format!("contact-{i}"),
            "project-1",
            &format!("c{i}@example.test"),
            true,
        )
        .await;
        h.seed_task(
            &format!("task-{i}"),
            &format!("contact-{i}"),
            Harness::action_origin("action-1"),
        )
        .await;
    }

    let first = h.dispatcher.clone();
    let second = h.dispatcher.clone();
    let (a, b) = tokio::join!(first.run_batch(), second.run_batch());
    let (a, b) = (a.unwrap(), b.unwrap());

    // However the two invocations interleave, each task is claimed (and
    // therefore sent) exactly once.
    assert_eq!(a.processed + b.processed, 3);
    assert_eq!(h.transport.sent().len(), 3);
    assert_eq!(h.receipt_count().await, 3);
    for i in 0..3 {
        assert_eq!(
            h.task_status(&format!("task-{i}")).await,
            Some(TaskStatus::Completed)
        );
    }
}

#[tokio::test]
async fn minute_window_near_ceiling_processes_only_the_remainder() {
    let store = Arc::new(InMemoryCounterStore::new());
    // Seed the minute bucket to 99 of 100. The next bucket is seeded too so
    // a minute rollover mid-test cannot reopen the budget.
    let unix_min = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        / 60;
    for _ in 0..99 {
        let windows = [
            WindowReservation {
                key: format!("send:min:{unix_min}"),
                limit: u64::MAX,
                ttl: std::time::Duration::from_secs(180),
            },
            WindowReservation {
                key: format!("send:min:{}", unix_min + 1),
                limit: u64::MAX,
                ttl: std::time::Duration::from_secs(180),
            },
        ];
        assert!(store.reserve(&windows).await.unwrap());
    }
    let limiter = RateLimiter::new(
        store,
        RateLimiterConfig {
            per_second: 10,
            per_minute: 100,
        },
    );

    let h = Harness::with_limiter(limiter).await;
    h.seed_project("project-1").await;
    h.seed_action("action-1", "project-1", "Welcome", &[]).await;
    for i in 0..3 {
        h.seed_contact(
            &format!("contact-{i}"),
            "project-1",
            &format!("c{i}@example.test"),
            true,
        )
        .await;
        h.seed_task(
            &format!("task-{i}"),
            &format!("contact-{i}"),
            Harness::action_origin("action-1"),
        )
        .await;
    }

    let summary = h.dispatcher.run_batch().await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(h.transport.sent().len(), 1);
    assert_eq!(h.receipt_count().await, 1);

    let mut pending = 0;
    for i in 0..3 {
        if h.task_status(&format!("task-{i}")).await == Some(TaskStatus::Pending) {
            pending += 1;
        }
    }
    assert_eq!(pending, 2);
}

#[tokio::test]
async fn settled_tasks_are_never_reprocessed() {
    let h = Harness::new().await;
    h.seed_project("project-1").await;
    h.seed_contact("contact-1", "project-1", "a@example.test", true)
        .await;
    h.seed_action("action-1", "project-1", "Welcome", &[]).await;
    h.seed_task("task-1", "contact-1", Harness::action_origin("action-1"))
        .await;

    let first = h.dispatcher.run_batch().await.unwrap();
    assert_eq!(first.processed, 1);
    assert_eq!(h.task_status("task-1").await, Some(TaskStatus::Completed));

    // A second pass finds nothing to do; the task only ever moved forward.
    let second = h.dispatcher.run_batch().await.unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(h.transport.sent().len(), 1);
    assert_eq!(h.receipt_count().await, 1);
    assert_eq!(h.task_status("task-1").await, Some(TaskStatus::Completed));
}
