use crate::aggregator::AggregatedObject;
use crate::rule::{ActionSpec, ActionType, Rule, Scope, ValueMode};
use crate::sources::LabelSource;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectStatus {
    Active,
    Paused,
}

/// External ads platform mutations. Failures surface verbatim so the run
/// log carries the platform's own message.
#[async_trait]
pub trait AdsPlatform: Send + Sync {
    async fn set_object_status(&self, object_id: &str, status: ObjectStatus) -> Result<()>;

    /// Budget in minor currency units.
    async fn set_object_budget(&self, object_id: &str, budget: i64) -> Result<()>;

    /// Current daily budget in minor units. Used by budget reverts, which
    /// fire long after the aggregation pass that knew the old budget.
    async fn get_object_budget(&self, object_id: &str) -> Result<i64>;
}

/// Side-effect sink for send_notification actions.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, rule: &Rule, object: &AggregatedObject, message: &str) -> Result<()>;
}

/// Notifier that only writes a structured log line. Default sink when no
/// webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, rule: &Rule, object: &AggregatedObject, message: &str) -> Result<()> {
        info!(
            rule_id = %rule.id,
            rule_name = %rule.name,
            object_id = %object.id,
            spend = object.spend,
            results = object.results,
            "{}",
            message
        );
        Ok(())
    }
}

/// Follow-up action to undo a dispatched one. The dispatcher only emits the
/// descriptor; timer mechanics and delivery belong to the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct RevertRequest {
    pub rule_id: String,
    pub object_id: String,
    pub scope: Scope,
    pub action: ActionType,
    pub value: f64,
    pub mode: ValueMode,
    pub label: Option<String>,
    pub fire_at: DateTime<Utc>,
}

#[async_trait]
pub trait RevertScheduler: Send + Sync {
    /// Fire-and-forget; the dispatcher does not await the revert's outcome.
    async fn schedule(&self, request: RevertRequest) -> Result<()>;
}

/// Outcome of one action attempt against one object.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub action: ActionType,
    pub success: bool,
    /// Skip reason or the platform's raw error message.
    pub detail: Option<String>,
    /// Budget after the mutation, for budget actions.
    pub new_budget: Option<i64>,
    pub dry_run: bool,
}

/// New budget under the action's value mode, rounded to minor units.
/// Percentage mode is multiplicative, so increase-then-decrease by the same
/// percentage does not restore the original value.
pub fn projected_budget(current: i64, action: &ActionSpec) -> i64 {
    let signed = match action.action {
        ActionType::IncreaseBudget => action.value,
        ActionType::DecreaseBudget => -action.value,
        _ => 0.0,
    };
    match action.mode {
        ValueMode::Percentage => (current as f64 * (1.0 + signed / 100.0)).round() as i64,
        ValueMode::Absolute => current + signed.round() as i64,
    }
}

pub struct ActionDispatcher {
    platform: Arc<dyn AdsPlatform>,
    labels: Arc<dyn LabelSource>,
    notifier: Arc<dyn Notifier>,
    reverts: Arc<dyn RevertScheduler>,
}

impl ActionDispatcher {
    pub fn new(
        platform: Arc<dyn AdsPlatform>,
        labels: Arc<dyn LabelSource>,
        notifier: Arc<dyn Notifier>,
        reverts: Arc<dyn RevertScheduler>,
    ) -> Self {
        Self {
            platform,
            labels,
            notifier,
            reverts,
        }
    }

    /// Applies one action to one matched object. In dry-run mode the same
    /// outcome is computed but no platform, label, notification or revert
    /// call is made.
    pub async fn apply(
        &self,
        rule: &Rule,
        object: &AggregatedObject,
        action: &ActionSpec,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> ActionOutcome {
        let result = self.perform(rule, object, action, dry_run).await;

        match result {
            Ok(new_budget) => {
                info!(
                    rule_id = %rule.id,
                    object_id = %object.id,
                    action = ?action.action,
                    dry_run,
                    "action applied"
                );
                if !dry_run {
                    self.maybe_schedule_revert(rule, object, action, now).await;
                }
                ActionOutcome {
                    action: action.action,
                    success: true,
                    detail: None,
                    new_budget,
                    dry_run,
                }
            }
            Err(e) => {
                warn!(
                    rule_id = %rule.id,
                    object_id = %object.id,
                    action = ?action.action,
                    error = %e,
                    "action failed"
                );
                ActionOutcome {
                    action: action.action,
                    success: false,
                    detail: Some(e.to_string()),
                    new_budget: None,
                    dry_run,
                }
            }
        }
    }

    async fn perform(
        &self,
        rule: &Rule,
        object: &AggregatedObject,
        action: &ActionSpec,
        dry_run: bool,
    ) -> Result<Option<i64>> {
        match action.action {
            ActionType::TurnOff => {
                if !dry_run {
                    self.platform
                        .set_object_status(&object.id, ObjectStatus::Paused)
                        .await?;
                }
                Ok(None)
            }
            ActionType::TurnOn => {
                if !dry_run {
                    self.platform
                        .set_object_status(&object.id, ObjectStatus::Active)
                        .await?;
                }
                Ok(None)
            }
            ActionType::IncreaseBudget | ActionType::DecreaseBudget => {
                let current = object
                    .current_budget
                    .ok_or_else(|| anyhow!("no current budget known for {}", object.id))?;
                let new_budget = projected_budget(current, action);
                if !dry_run {
                    self.platform.set_object_budget(&object.id, new_budget).await?;
                }
                Ok(Some(new_budget))
            }
            ActionType::AddLabel => {
                let label = action
                    .label
                    .as_deref()
                    .ok_or_else(|| anyhow!("add_label action has no label"))?;
                if !dry_run {
                    self.labels.assign_label(&object.id, object.scope, label).await?;
                }
                Ok(None)
            }
            ActionType::RemoveLabel => {
                let label = action
                    .label
                    .as_deref()
                    .ok_or_else(|| anyhow!("remove_label action has no label"))?;
                if !dry_run {
                    self.labels
                        .unassign_label(&object.id, object.scope, label)
                        .await?;
                }
                Ok(None)
            }
            ActionType::SendNotification => {
                if !dry_run {
                    let message = format!(
                        "Rule '{}' matched {} ({})",
                        rule.name,
                        object.name.as_deref().unwrap_or(&object.id),
                        object.id
                    );
                    self.notifier.notify(rule, object, &message).await?;
                }
                Ok(None)
            }
            // Explicit no-op so the log shows the matched branch chose
            // inaction.
            ActionType::Keep => Ok(None),
        }
    }

    async fn maybe_schedule_revert(
        &self,
        rule: &Rule,
        object: &AggregatedObject,
        action: &ActionSpec,
        now: DateTime<Utc>,
    ) {
        let Some(revert) = &action.auto_revert else {
            return;
        };
        let Some(revert_action) = revert.action.or_else(|| action.action.inverse()) else {
            warn!(
                rule_id = %rule.id,
                action = ?action.action,
                "auto_revert set on an action with no inverse, skipping"
            );
            return;
        };

        let fire_at = if let Some(at) = revert.at_time {
            // Next occurrence of the wall-clock time, today or tomorrow.
            let today = now.date_naive().and_time(at).and_utc();
            if today > now {
                today
            } else {
                today + Duration::days(1)
            }
        } else if let Some(hours) = revert.after_hours {
            now + Duration::milliseconds((hours * 3_600_000.0) as i64)
        } else {
            warn!(rule_id = %rule.id, "auto_revert has neither at_time nor after_hours");
            return;
        };

        let request = RevertRequest {
            rule_id: rule.id.clone(),
            object_id: object.id.clone(),
            scope: object.scope,
            action: revert_action,
            value: action.value,
            mode: action.mode,
            label: action.label.clone(),
            fire_at,
        };

        // Best-effort: a scheduling failure must not fail the action that
        // already applied.
        if let Err(e) = self.reverts.schedule(request).await {
            warn!(
                rule_id = %rule.id,
                object_id = %object.id,
                error = %e,
                "failed to schedule auto-revert"
            );
        }
    }
}
