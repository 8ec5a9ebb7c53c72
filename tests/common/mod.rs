#![allow(dead_code)]

use adpilot::aggregator::{AggregatedObject, InsightRow};
use adpilot::dispatcher::{
    ActionDispatcher, AdsPlatform, Notifier, ObjectStatus, RevertRequest, RevertScheduler,
};
use adpilot::rule::{
    ActionSpec, ActionType, AdvancedSettings, Condition, ConditionLogic, Metric, Operator, Rule,
    Scope, ValueMode,
};
use adpilot::sources::{InsightsSource, LabelSource, RuleSource};
use adpilot::store::{ExecutionRecord, ExecutionStatus, ExecutionStore, RunRecord};
use adpilot::AutomationEngine;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MemoryRuleSource {
    pub rules: Mutex<HashMap<String, Rule>>,
}

impl MemoryRuleSource {
    pub fn with_rule(rule: Rule) -> Arc<Self> {
        let source = Self::default();
        source.rules.lock().unwrap().insert(rule.id.clone(), rule);
        Arc::new(source)
    }

    pub fn last_run_at(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.rules.lock().unwrap().get(rule_id).and_then(|r| r.last_run_at)
    }
}

#[async_trait]
impl RuleSource for MemoryRuleSource {
    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>> {
        Ok(self.rules.lock().unwrap().get(rule_id).cloned())
    }

    async fn list_active_rules(&self, user_id: Option<&str>) -> Result<Vec<Rule>> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.active)
            .filter(|r| user_id.map_or(true, |u| r.user_id == u))
            .cloned()
            .collect())
    }

    async fn update_last_run_at(&self, rule_id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(rule) = self.rules.lock().unwrap().get_mut(rule_id) {
            rule.last_run_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryInsights {
    pub rows: Vec<InsightRow>,
    pub unreachable: bool,
}

#[async_trait]
impl InsightsSource for MemoryInsights {
    async fn get_insights(
        &self,
        _user_id: &str,
        _scope: Scope,
        _time_range: &str,
    ) -> Result<Vec<InsightRow>> {
        if self.unreachable {
            bail!("connection refused");
        }
        Ok(self.rows.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LabelCall {
    Assign(String, String),
    Unassign(String, String),
}

#[derive(Default)]
pub struct MemoryLabels {
    /// label -> entity ids carrying it
    pub assignments: Mutex<HashMap<String, Vec<String>>>,
    pub calls: Mutex<Vec<LabelCall>>,
}

#[async_trait]
impl LabelSource for MemoryLabels {
    async fn get_label_assignments(
        &self,
        labels: &[String],
        _scope: Scope,
    ) -> Result<Vec<String>> {
        let map = self.assignments.lock().unwrap();
        let mut ids = Vec::new();
        for label in labels {
            if let Some(entities) = map.get(label) {
                ids.extend(entities.iter().cloned());
            }
        }
        Ok(ids)
    }

    async fn assign_label(&self, object_id: &str, _scope: Scope, label: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(LabelCall::Assign(object_id.to_string(), label.to_string()));
        Ok(())
    }

    async fn unassign_label(&self, object_id: &str, _scope: Scope, label: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(LabelCall::Unassign(object_id.to_string(), label.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    Status(String, ObjectStatus),
    Budget(String, i64),
}

#[derive(Default)]
pub struct MemoryPlatform {
    pub calls: Mutex<Vec<PlatformCall>>,
    pub budgets: Mutex<HashMap<String, i64>>,
    /// Object ids whose mutations are rejected.
    pub failing: Vec<String>,
}

impl MemoryPlatform {
    pub fn recorded(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdsPlatform for MemoryPlatform {
    async fn set_object_status(&self, object_id: &str, status: ObjectStatus) -> Result<()> {
        if self.failing.iter().any(|id| id == object_id) {
            bail!("(#100) Invalid parameter");
        }
        self.calls
            .lock()
            .unwrap()
            .push(PlatformCall::Status(object_id.to_string(), status));
        Ok(())
    }

    async fn set_object_budget(&self, object_id: &str, budget: i64) -> Result<()> {
        if self.failing.iter().any(|id| id == object_id) {
            bail!("(#100) Invalid parameter");
        }
        self.calls
            .lock()
            .unwrap()
            .push(PlatformCall::Budget(object_id.to_string(), budget));
        self.budgets
            .lock()
            .unwrap()
            .insert(object_id.to_string(), budget);
        Ok(())
    }

    async fn get_object_budget(&self, object_id: &str) -> Result<i64> {
        self.budgets
            .lock()
            .unwrap()
            .get(object_id)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown object {}", object_id))
    }
}

#[derive(Default)]
pub struct MemoryExecutionStore {
    pub records: Mutex<Vec<ExecutionRecord>>,
    pub summaries: Mutex<Vec<RunRecord>>,
    pub fail_writes: bool,
}

impl MemoryExecutionStore {
    pub fn seeded(records: Vec<ExecutionRecord>) -> Arc<Self> {
        let store = Self::default();
        *store.records.lock().unwrap() = records;
        Arc::new(store)
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn count_executions(
        &self,
        rule_id: &str,
        object_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<u32> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.rule_id == rule_id && r.object_id == object_id)
            .filter(|r| r.status == ExecutionStatus::Success)
            .filter(|r| since.map_or(true, |s| r.executed_at >= s))
            .count() as u32)
    }

    async fn last_successful_execution(
        &self,
        rule_id: &str,
        object_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.rule_id == rule_id && r.object_id == object_id)
            .filter(|r| r.status == ExecutionStatus::Success)
            .map(|r| r.executed_at)
            .max())
    }

    async fn append(&self, record: ExecutionRecord) -> Result<()> {
        if self.fail_writes {
            bail!("store write refused");
        }
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn append_summary(&self, record: RunRecord) -> Result<()> {
        if self.fail_writes {
            bail!("store write refused");
        }
        self.summaries.lock().unwrap().push(record);
        Ok(())
    }

    async fn recent_records(&self, rule_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let mut records: Vec<ExecutionRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.rule_id == rule_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[derive(Default)]
pub struct MemoryNotifier {
    pub messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, _rule: &Rule, _object: &AggregatedObject, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRevertScheduler {
    pub requests: Mutex<Vec<RevertRequest>>,
}

#[async_trait]
impl RevertScheduler for MemoryRevertScheduler {
    async fn schedule(&self, request: RevertRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

pub fn condition(metric: Metric, operator: Operator, threshold: f64) -> Condition {
    Condition {
        metric,
        operator,
        threshold,
    }
}

pub fn action(action_type: ActionType, value: f64, mode: ValueMode) -> ActionSpec {
    ActionSpec {
        action: action_type,
        value,
        mode,
        label: None,
        auto_revert: None,
    }
}

pub fn rule(id: &str, conditions: Vec<Condition>, actions: Vec<ActionSpec>) -> Rule {
    Rule {
        id: id.to_string(),
        name: format!("rule {}", id),
        user_id: "user-1".to_string(),
        scope: Scope::Campaign,
        time_range: "last_7d".to_string(),
        active: true,
        conditions,
        condition_logic: ConditionLogic::All,
        actions,
        settings: AdvancedSettings::default(),
        target_labels: Vec::new(),
        check_frequency_minutes: None,
        last_run_at: None,
    }
}

pub fn insight_row(campaign_id: &str, spend: i64, results: u64) -> InsightRow {
    InsightRow {
        campaign_id: Some(campaign_id.to_string()),
        adset_id: None,
        ad_id: None,
        entity_name: Some(format!("campaign {}", campaign_id)),
        date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        spend,
        impressions: 1000,
        clicks: 50,
        reach: 800,
        results,
        revenue: 0,
        daily_budget: Some(200_000),
    }
}

pub struct TestHarness {
    pub engine: AutomationEngine,
    pub rules: Arc<MemoryRuleSource>,
    pub platform: Arc<MemoryPlatform>,
    pub labels: Arc<MemoryLabels>,
    pub store: Arc<MemoryExecutionStore>,
    pub notifier: Arc<MemoryNotifier>,
    pub reverts: Arc<MemoryRevertScheduler>,
}

pub fn harness(rule: Rule, rows: Vec<InsightRow>) -> TestHarness {
    harness_with(rule, rows, Arc::new(MemoryExecutionStore::default()), Vec::new())
}

pub fn harness_with(
    rule: Rule,
    rows: Vec<InsightRow>,
    store: Arc<MemoryExecutionStore>,
    failing_objects: Vec<String>,
) -> TestHarness {
    let rules = MemoryRuleSource::with_rule(rule);
    let platform = Arc::new(MemoryPlatform {
        failing: failing_objects,
        ..Default::default()
    });
    let labels = Arc::new(MemoryLabels::default());
    let notifier = Arc::new(MemoryNotifier::default());
    let reverts = Arc::new(MemoryRevertScheduler::default());
    let insights = Arc::new(MemoryInsights {
        rows,
        unreachable: false,
    });

    let dispatcher = ActionDispatcher::new(
        platform.clone(),
        labels.clone(),
        notifier.clone(),
        reverts.clone(),
    );
    let engine = AutomationEngine::new(
        rules.clone(),
        insights,
        labels.clone(),
        store.clone(),
        dispatcher,
    );

    TestHarness {
        engine,
        rules,
        platform,
        labels,
        store,
        notifier,
        reverts,
    }
}
