use crate::aggregator::AggregatedObject;
use crate::dispatcher::projected_budget;
use crate::rule::{ActionSpec, ActionType, Rule};
use crate::store::ExecutionStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

/// Why a matched action was blocked before dispatch. Serialized into the
/// execution record's reason field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ExecutionLimitReached,
    CooldownActive,
    BudgetCapExceeded,
    RoasBelowThreshold,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ExecutionLimitReached => "execution_limit_reached",
            SkipReason::CooldownActive => "cooldown_active",
            SkipReason::BudgetCapExceeded => "budget_cap_exceeded",
            SkipReason::RoasBelowThreshold => "roas_below_threshold",
        }
    }
}

/// Runs every safeguard for one (rule, object, action) attempt, in fixed
/// order: execution limit, cooldown, budget cap, ROAS. Returns the first
/// failing check; Ok(None) clears the action for dispatch.
pub async fn check(
    rule: &Rule,
    object: &AggregatedObject,
    action: &ActionSpec,
    store: &dyn ExecutionStore,
    now: DateTime<Utc>,
) -> Result<Option<SkipReason>> {
    if let Some(reason) = check_object(rule, object, store, now).await? {
        return Ok(Some(reason));
    }
    Ok(check_action(rule, object, action))
}

/// History-based gates for one (rule, object) pair: execution limit and
/// cooldown. Evaluated once per object per run, before any action fires;
/// records written during the run must not feed back into these checks, or
/// a multi-action rule would block itself after its first action.
pub async fn check_object(
    rule: &Rule,
    object: &AggregatedObject,
    store: &dyn ExecutionStore,
    now: DateTime<Utc>,
) -> Result<Option<SkipReason>> {
    let settings = &rule.settings;

    if let Some(limit) = settings.max_executions_per_object {
        // resetDaily counts from the most recent UTC midnight.
        let since = settings
            .reset_daily
            .then(|| now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc());
        let count = store.count_executions(&rule.id, &object.id, since).await?;
        if count >= limit {
            debug!(
                rule_id = %rule.id,
                object_id = %object.id,
                count,
                limit,
                "execution limit reached"
            );
            return Ok(Some(SkipReason::ExecutionLimitReached));
        }
    }

    if let Some(hours) = settings.cooldown_hours {
        if let Some(last) = store.last_successful_execution(&rule.id, &object.id).await? {
            let window = Duration::milliseconds((hours * 3_600_000.0) as i64);
            if now - last < window {
                debug!(
                    rule_id = %rule.id,
                    object_id = %object.id,
                    last_execution = %last,
                    cooldown_hours = hours,
                    "cooldown active"
                );
                return Ok(Some(SkipReason::CooldownActive));
            }
        }
    }

    Ok(None)
}

/// Action-level gates: budget cap and ROAS floor. Pure over the aggregated
/// object, so safe to re-run per action within one run.
pub fn check_action(
    rule: &Rule,
    object: &AggregatedObject,
    action: &ActionSpec,
) -> Option<SkipReason> {
    let settings = &rule.settings;

    // Budget cap and ROAS floor only gate budget increases.
    if action.action == ActionType::IncreaseBudget {
        if settings.enable_safeguards {
            if let (Some(cap), Some(current)) =
                (settings.max_budget_daily_spend, object.current_budget)
            {
                let projected = projected_budget(current, action);
                if projected > cap {
                    debug!(
                        rule_id = %rule.id,
                        object_id = %object.id,
                        projected,
                        cap,
                        "budget cap exceeded"
                    );
                    return Some(SkipReason::BudgetCapExceeded);
                }
            }
        }

        if let Some(threshold) = settings.min_roas_threshold {
            // roas is 0 when spend is 0: fails closed, no increase without
            // spend data.
            if object.roas < threshold {
                debug!(
                    rule_id = %rule.id,
                    object_id = %object.id,
                    roas = object.roas,
                    threshold,
                    "roas below threshold"
                );
                return Some(SkipReason::RoasBelowThreshold);
            }
        }
    }

    None
}
