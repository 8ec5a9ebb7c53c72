pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod evaluator;
pub mod http;
pub mod metrics;
pub mod rule;
pub mod safeguards;
pub mod scheduler;
pub mod server;
pub mod sources;
pub mod store;

use crate::aggregator::AggregatedObject;
use crate::dispatcher::{ActionDispatcher, ActionOutcome};
use crate::rule::Rule;
use crate::sources::{InsightsSource, LabelSource, RuleSource};
use crate::store::{ExecutionRecord, ExecutionStatus, ExecutionStore, RunRecord};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One run invocation: manual trigger, scheduler tick or dry-run request.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub rule_id: String,
    pub user_id: String,
    #[serde(default)]
    pub dry_run: bool,
    /// Manual runs (and dry runs) ignore the rule's active flag.
    #[serde(default)]
    pub manual_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every attempted action succeeded (a zero-match run is a success).
    Success,
    /// Some attempted actions failed.
    Partial,
    /// At least one action was attempted and none succeeded.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectResult {
    pub object_id: String,
    pub object_name: Option<String>,
    pub matched: bool,
    pub outcomes: Vec<ActionOutcome>,
}

/// Structured summary handed back to the invocation surface, sufficient to
/// answer "why didn't my rule fire".
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub rule_id: String,
    pub success: bool,
    pub status: RunStatus,
    pub matched_count: usize,
    pub executed_count: usize,
    pub dry_run: bool,
    pub results: Vec<ObjectResult>,
}

/// Runner phases, surfaced in logs. A run terminates in Done or Failed and
/// is never retried by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    FetchingRule,
    FetchingObjects,
    Evaluating,
    Dispatching,
    Logging,
    Done,
    Failed,
}

/// Ties rule lookup, aggregation, evaluation, safeguards, dispatch and
/// logging together per invocation. Holds no per-run state; concurrent runs
/// of distinct rules are independent. Callers serialize runs of the same
/// rule id to keep execution-limit and cooldown checks strict.
pub struct AutomationEngine {
    rules: Arc<dyn RuleSource>,
    insights: Arc<dyn InsightsSource>,
    labels: Arc<dyn LabelSource>,
    store: Arc<dyn ExecutionStore>,
    dispatcher: ActionDispatcher,
}

impl AutomationEngine {
    pub fn new(
        rules: Arc<dyn RuleSource>,
        insights: Arc<dyn InsightsSource>,
        labels: Arc<dyn LabelSource>,
        store: Arc<dyn ExecutionStore>,
        dispatcher: ActionDispatcher,
    ) -> Self {
        Self {
            rules,
            insights,
            labels,
            store,
            dispatcher,
        }
    }

    pub fn rule_source(&self) -> Arc<dyn RuleSource> {
        Arc::clone(&self.rules)
    }

    pub fn execution_store(&self) -> Arc<dyn ExecutionStore> {
        Arc::clone(&self.store)
    }

    /// Executes one rule run. Setup failures (rule missing, malformed
    /// configuration, insights unreachable) propagate as errors; per-object
    /// and per-action failures are captured in the returned summary.
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary> {
        let started = std::time::Instant::now();
        let mut phase = RunPhase::Idle;
        let result = self.run_inner(&request, &mut phase).await;
        metrics::METRICS.record_run_duration(started.elapsed().as_secs_f64());

        match &result {
            Ok(summary) => {
                info!(
                    rule_id = %request.rule_id,
                    matched = summary.matched_count,
                    executed = summary.executed_count,
                    status = ?summary.status,
                    dry_run = summary.dry_run,
                    "rule run finished"
                );
            }
            Err(e) => {
                metrics::METRICS.record_run_failure();
                warn!(
                    rule_id = %request.rule_id,
                    phase = ?phase,
                    error = %e,
                    "rule run failed"
                );
            }
        }
        result
    }

    async fn run_inner(&self, request: &RunRequest, phase: &mut RunPhase) -> Result<RunSummary> {
        let now = Utc::now();
        metrics::METRICS.record_run(&request.rule_id);

        *phase = RunPhase::FetchingRule;
        let rule = self
            .rules
            .get_rule(&request.rule_id)
            .await
            .context("rule source unreachable")?;
        let Some(rule) = rule else {
            *phase = RunPhase::Failed;
            bail!("rule '{}' not found", request.rule_id);
        };
        rule.validate()?;

        if !rule.active && !request.manual_run && !request.dry_run {
            *phase = RunPhase::Failed;
            bail!("rule '{}' is not active", rule.id);
        }

        *phase = RunPhase::FetchingObjects;
        let rows = self
            .insights
            .get_insights(&request.user_id, rule.scope, &rule.time_range)
            .await
            .context("insights source unreachable")?;
        let mut objects = aggregator::aggregate(&rows, rule.scope);
        debug!(rule_id = %rule.id, objects = objects.len(), "aggregated insight rows");

        if !rule.target_labels.is_empty() {
            let allowed: HashSet<String> = self
                .labels
                .get_label_assignments(&rule.target_labels, rule.scope)
                .await
                .context("label source unreachable")?
                .into_iter()
                .collect();
            objects.retain(|o| allowed.contains(&o.id));
        }

        // An empty object set is a valid zero-match outcome, not an error.
        *phase = RunPhase::Evaluating;
        let (matched, unmatched): (Vec<AggregatedObject>, Vec<AggregatedObject>) =
            objects.into_iter().partition(|o| {
                evaluator::evaluate_conditions(o, &rule.conditions, rule.condition_logic)
            });
        metrics::METRICS.record_matched(matched.len() as u64);

        *phase = RunPhase::Dispatching;
        let mut results = Vec::with_capacity(matched.len() + unmatched.len());
        let mut executed_count = 0usize;
        let mut failed_count = 0usize;

        for object in &matched {
            // History gates are read once per object, before any action
            // fires: the records this run appends must not block the
            // remaining actions of the same rule.
            let object_gate = safeguards::check_object(&rule, object, self.store.as_ref(), now)
                .await
                .context("execution store unreachable during safeguard check")?;

            let mut outcomes = Vec::with_capacity(rule.actions.len());
            for action in &rule.actions {
                let gate = object_gate.or_else(|| safeguards::check_action(&rule, object, action));

                let outcome = match gate {
                    Some(reason) => {
                        metrics::METRICS.record_skip(reason.as_str());
                        ActionOutcome {
                            action: action.action,
                            success: false,
                            detail: Some(reason.as_str().to_string()),
                            new_budget: None,
                            dry_run: request.dry_run,
                        }
                    }
                    None => {
                        let outcome = self
                            .dispatcher
                            .apply(&rule, object, action, request.dry_run, now)
                            .await;
                        if outcome.success {
                            executed_count += 1;
                            metrics::METRICS.record_action_executed();
                        } else {
                            failed_count += 1;
                            metrics::METRICS.record_action_failed();
                        }
                        outcome
                    }
                };

                if !request.dry_run {
                    self.log_outcome(&rule, object, &outcome, gate.is_some(), now)
                        .await;
                }
                outcomes.push(outcome);
            }
            results.push(ObjectResult {
                object_id: object.id.clone(),
                object_name: object.name.clone(),
                matched: true,
                outcomes,
            });
        }
        for object in &unmatched {
            results.push(ObjectResult {
                object_id: object.id.clone(),
                object_name: object.name.clone(),
                matched: false,
                outcomes: Vec::new(),
            });
        }

        let status = if failed_count == 0 {
            RunStatus::Success
        } else if executed_count > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        };

        let summary = RunSummary {
            rule_id: rule.id.clone(),
            success: status == RunStatus::Success,
            status,
            matched_count: matched.len(),
            executed_count,
            dry_run: request.dry_run,
            results,
        };

        *phase = RunPhase::Logging;
        if !request.dry_run {
            let run_record = RunRecord {
                id: uuid::Uuid::new_v4(),
                rule_id: rule.id.clone(),
                matched_count: summary.matched_count,
                executed_count: summary.executed_count,
                status: format!("{:?}", summary.status).to_lowercase(),
                dry_run: false,
                finished_at: Utc::now(),
            };
            if let Err(e) = self.store.append_summary(run_record).await {
                // Best-effort: the in-memory summary is still returned, but
                // a lost record weakens future safeguard checks.
                warn!(rule_id = %rule.id, error = %e, "failed to persist run summary");
            }
            if let Err(e) = self.rules.update_last_run_at(&rule.id, Utc::now()).await {
                warn!(rule_id = %rule.id, error = %e, "failed to update last_run_at");
            }
        }

        *phase = RunPhase::Done;
        Ok(summary)
    }

    async fn log_outcome(
        &self,
        rule: &Rule,
        object: &AggregatedObject,
        outcome: &ActionOutcome,
        skipped: bool,
        now: chrono::DateTime<Utc>,
    ) {
        let status = if skipped {
            ExecutionStatus::Skipped
        } else if outcome.success {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };

        let execution_count = if status == ExecutionStatus::Success {
            match self.store.count_executions(&rule.id, &object.id, None).await {
                Ok(prior) => prior + 1,
                Err(_) => 1,
            }
        } else {
            0
        };

        let record = ExecutionRecord {
            id: uuid::Uuid::new_v4(),
            rule_id: rule.id.clone(),
            object_id: object.id.clone(),
            action: outcome.action,
            status,
            reason: outcome.detail.clone(),
            executed_at: now,
            execution_count,
        };
        if let Err(e) = self.store.append(record).await {
            warn!(
                rule_id = %rule.id,
                object_id = %object.id,
                error = %e,
                "failed to persist execution record"
            );
        }
    }
}
