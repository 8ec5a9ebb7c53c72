use anyhow::{bail, Result};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Granularity a rule operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Campaign,
    Adset,
    Ad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionLogic {
    All,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Spend,
    Impressions,
    Clicks,
    Reach,
    Results,
    Revenue,
    Ctr,
    Cpc,
    Cpm,
    CostPerResult,
    Frequency,
    Roas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    GreaterThan,
    LessThan,
    Equals,
    GreaterThanOrEqual,
    LessThanOrEqual,
    NotEquals,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub metric: Metric,
    pub operator: Operator,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    TurnOff,
    TurnOn,
    IncreaseBudget,
    DecreaseBudget,
    AddLabel,
    RemoveLabel,
    SendNotification,
    Keep,
}

impl ActionType {
    /// Semantic inverse, used as the default auto-revert action.
    pub fn inverse(&self) -> Option<ActionType> {
        match self {
            ActionType::TurnOff => Some(ActionType::TurnOn),
            ActionType::TurnOn => Some(ActionType::TurnOff),
            ActionType::IncreaseBudget => Some(ActionType::DecreaseBudget),
            ActionType::DecreaseBudget => Some(ActionType::IncreaseBudget),
            ActionType::AddLabel => Some(ActionType::RemoveLabel),
            ActionType::RemoveLabel => Some(ActionType::AddLabel),
            ActionType::SendNotification | ActionType::Keep => None,
        }
    }

    pub fn is_budget_action(&self) -> bool {
        matches!(self, ActionType::IncreaseBudget | ActionType::DecreaseBudget)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueMode {
    Percentage,
    #[serde(alias = "amount")]
    Absolute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRevert {
    /// Action applied on revert. None means the semantic inverse of the
    /// original action.
    pub action: Option<ActionType>,
    /// Fixed wall-clock time (UTC) the revert fires at.
    pub at_time: Option<NaiveTime>,
    /// Elapsed hours after the original execution.
    pub after_hours: Option<f64>,
}

/// A fully normalized action. Raw store records carry `valueType` and the
/// legacy `budgetMode`; both are resolved into `mode` exactly once when the
/// raw form is parsed, so the dispatcher never sees the fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action: ActionType,
    #[serde(default)]
    pub value: f64,
    pub mode: ValueMode,
    /// Label name for add_label / remove_label.
    pub label: Option<String>,
    pub auto_revert: Option<AutoRevert>,
}

/// Wire form of an action as the dashboard stores it, legacy budget-mode
/// field included. Parsed at the data-access boundary only.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAction {
    #[serde(alias = "type")]
    pub action: ActionType,
    #[serde(default)]
    pub value: f64,
    #[serde(default, alias = "valueType")]
    pub value_type: Option<ValueMode>,
    #[serde(default, alias = "budgetMode")]
    pub budget_mode: Option<ValueMode>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, alias = "autoRevert")]
    pub auto_revert: Option<RawAutoRevert>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAutoRevert {
    #[serde(default, alias = "revertAction")]
    pub action: Option<ActionType>,
    #[serde(default, alias = "revertAtTime")]
    pub at_time: Option<NaiveTime>,
    #[serde(default, alias = "revertAfterHours")]
    pub after_hours: Option<f64>,
}

impl RawAction {
    /// Normalization step: `valueType` wins, then legacy `budgetMode`,
    /// defaulting to percentage. The only place the fallback lives.
    pub fn normalize(self) -> ActionSpec {
        let mode = self
            .value_type
            .or(self.budget_mode)
            .unwrap_or(ValueMode::Percentage);
        ActionSpec {
            action: self.action,
            value: self.value,
            mode,
            label: self.label,
            auto_revert: self.auto_revert.map(|r| AutoRevert {
                action: r.action,
                at_time: r.at_time,
                after_hours: r.after_hours,
            }),
        }
    }
}

/// Safeguard and execution-limit settings. Every recognized option is
/// enumerated and defaulted rather than kept as a free-form map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    #[serde(alias = "maxExecutionsPerObject")]
    pub max_executions_per_object: Option<u32>,
    /// Count executions since the most recent UTC midnight instead of the
    /// full history.
    #[serde(alias = "resetDaily")]
    pub reset_daily: bool,
    #[serde(alias = "cooldownHours")]
    pub cooldown_hours: Option<f64>,
    #[serde(alias = "enableSafeGuards")]
    pub enable_safeguards: bool,
    /// Budget cap in minor currency units.
    #[serde(alias = "maxBudgetDailySpend")]
    pub max_budget_daily_spend: Option<i64>,
    #[serde(alias = "minRoasThreshold")]
    pub min_roas_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub scope: Scope,
    /// Insight lookback preset, e.g. "last_7d".
    pub time_range: String,
    pub active: bool,
    pub conditions: Vec<Condition>,
    pub condition_logic: ConditionLogic,
    /// Applied in declared order per matched object.
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub settings: AdvancedSettings,
    /// Restricts the rule to objects carrying one of these labels.
    #[serde(default)]
    pub target_labels: Vec<String>,
    pub check_frequency_minutes: Option<u32>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Rule {
    /// A rule is executable only with at least one condition and one action.
    pub fn validate(&self) -> Result<()> {
        if self.conditions.is_empty() {
            bail!("rule '{}' has no conditions", self.id);
        }
        if self.actions.is_empty() {
            bail!("rule '{}' has no actions", self.id);
        }
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let Some(freq) = self.check_frequency_minutes else {
            return false;
        };
        match self.last_run_at {
            None => true,
            Some(last) => now - last >= chrono::Duration::minutes(freq as i64),
        }
    }
}
