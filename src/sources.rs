use crate::aggregator::InsightRow;
use crate::rule::{Rule, Scope};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Rule configuration store.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Ok(None) when no rule exists under the id.
    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>>;

    async fn list_active_rules(&self, user_id: Option<&str>) -> Result<Vec<Rule>>;

    async fn update_last_run_at(&self, rule_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Per-day delivery insights for a user's ad account.
#[async_trait]
pub trait InsightsSource: Send + Sync {
    async fn get_insights(
        &self,
        user_id: &str,
        scope: Scope,
        time_range: &str,
    ) -> Result<Vec<InsightRow>>;
}

/// Label assignments scoping which objects a rule considers, plus the
/// mutations behind add_label / remove_label actions.
#[async_trait]
pub trait LabelSource: Send + Sync {
    /// Entity ids carrying any of the given labels at the given scope.
    async fn get_label_assignments(&self, labels: &[String], scope: Scope)
        -> Result<Vec<String>>;

    async fn assign_label(&self, object_id: &str, scope: Scope, label: &str) -> Result<()>;

    async fn unassign_label(&self, object_id: &str, scope: Scope, label: &str) -> Result<()>;
}
