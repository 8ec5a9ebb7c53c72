use crate::dispatcher::{AdsPlatform, ObjectStatus, RevertRequest, RevertScheduler};
use crate::rule::ActionType;
use crate::sources::LabelSource;
use crate::{AutomationEngine, RunRequest};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Periodic tick loop over active rules. Enforces at-most-one concurrent
/// run per rule id; the engine itself relies on this serialization for its
/// execution-limit and cooldown invariants.
pub struct Scheduler {
    engine: Arc<AutomationEngine>,
    tick: Duration,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Scheduler {
    pub fn new(engine: Arc<AutomationEngine>, tick_seconds: u64) -> Self {
        Self {
            engine,
            tick: Duration::from_secs(tick_seconds),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(self) {
        info!(tick_secs = self.tick.as_secs(), "scheduler started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick_once().await {
                error!(error = %e, "scheduler tick failed");
            }
        }
    }

    async fn tick_once(&self) -> Result<()> {
        let now = Utc::now();
        let rules = self.engine.rule_source().list_active_rules(None).await?;
        let due: Vec<_> = rules.into_iter().filter(|r| r.is_due(now)).collect();
        if due.is_empty() {
            return Ok(());
        }
        debug!(due = due.len(), "scheduler tick");

        for rule in due {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(rule.id.clone()) {
                // Previous run of this rule still going; safeguard state
                // must not race.
                warn!(rule_id = %rule.id, "skipping tick, run already in flight");
                continue;
            }
            drop(in_flight);

            let engine = Arc::clone(&self.engine);
            let in_flight = Arc::clone(&self.in_flight);
            let rule_id = rule.id.clone();
            let user_id = rule.user_id.clone();
            tokio::spawn(async move {
                let request = RunRequest {
                    rule_id: rule_id.clone(),
                    user_id,
                    dry_run: false,
                    manual_run: false,
                };
                if let Err(e) = engine.run(request).await {
                    error!(rule_id = %rule_id, error = %e, "scheduled run failed");
                }
                in_flight.lock().await.remove(&rule_id);
            });
        }
        Ok(())
    }
}

/// In-process revert scheduler: sleeps until the fire time on a spawned
/// task, then applies the revert directly against the platform or label
/// store. Delivery is best-effort; a process restart drops pending reverts.
pub struct TokioRevertScheduler {
    platform: Arc<dyn AdsPlatform>,
    labels: Arc<dyn LabelSource>,
}

impl TokioRevertScheduler {
    pub fn new(platform: Arc<dyn AdsPlatform>, labels: Arc<dyn LabelSource>) -> Self {
        Self { platform, labels }
    }

    async fn fire(
        platform: Arc<dyn AdsPlatform>,
        labels: Arc<dyn LabelSource>,
        request: RevertRequest,
    ) -> Result<()> {
        match request.action {
            ActionType::TurnOff => {
                platform
                    .set_object_status(&request.object_id, ObjectStatus::Paused)
                    .await
            }
            ActionType::TurnOn => {
                platform
                    .set_object_status(&request.object_id, ObjectStatus::Active)
                    .await
            }
            ActionType::IncreaseBudget | ActionType::DecreaseBudget => {
                // Reverts reuse the original value and mode on the budget
                // the object holds at fire time. Percentage reverts are
                // approximate by nature (multiplicative rounding).
                let current = platform.get_object_budget(&request.object_id).await?;
                let spec = crate::rule::ActionSpec {
                    action: request.action,
                    value: request.value,
                    mode: request.mode,
                    label: None,
                    auto_revert: None,
                };
                let new_budget = crate::dispatcher::projected_budget(current, &spec);
                platform.set_object_budget(&request.object_id, new_budget).await
            }
            ActionType::AddLabel => {
                let label = Self::request_label(&request)?;
                labels.assign_label(&request.object_id, request.scope, label).await
            }
            ActionType::RemoveLabel => {
                let label = Self::request_label(&request)?;
                labels
                    .unassign_label(&request.object_id, request.scope, label)
                    .await
            }
            other => anyhow::bail!("action {:?} cannot be reverted", other),
        }
    }

    fn request_label(request: &RevertRequest) -> Result<&str> {
        request
            .label
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("label revert for {} has no label", request.object_id))
    }
}

#[async_trait]
impl RevertScheduler for TokioRevertScheduler {
    async fn schedule(&self, request: RevertRequest) -> Result<()> {
        // Reject actions with no revert path up front, in the run that
        // scheduled them, instead of hours later on the timer task.
        if matches!(
            request.action,
            ActionType::SendNotification | ActionType::Keep
        ) {
            anyhow::bail!("action {:?} cannot be reverted", request.action);
        }

        let delay = (request.fire_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        info!(
            object_id = %request.object_id,
            action = ?request.action,
            fire_at = %request.fire_at,
            "revert scheduled"
        );
        let platform = Arc::clone(&self.platform);
        let labels = Arc::clone(&self.labels);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = Self::fire(platform, labels, request).await {
                error!(error = %e, "revert failed");
            }
        });
        Ok(())
    }
}
