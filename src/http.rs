//! reqwest-backed implementations of the external contracts: the ads
//! platform, the REST record store holding rules/insights/labels, and the
//! webhook notifier. JSON text blobs stored for conditions, actions and
//! advanced settings are parsed into typed structures here and nowhere else.

use crate::aggregator::{AggregatedObject, InsightRow};
use crate::dispatcher::{AdsPlatform, Notifier, ObjectStatus};
use crate::rule::{AdvancedSettings, Condition, ConditionLogic, RawAction, Rule, Scope};
use crate::sources::{InsightsSource, LabelSource, RuleSource};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

fn pooled_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")
}

fn scope_str(scope: Scope) -> &'static str {
    match scope {
        Scope::Campaign => "campaign",
        Scope::Adset => "adset",
        Scope::Ad => "ad",
    }
}

/// Graph-style ads platform client. Platform rejections surface verbatim so
/// execution records carry the platform's own message.
pub struct GraphPlatformClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GraphPlatformClient {
    pub fn new(base_url: String, access_token: String) -> Result<Self> {
        Ok(Self {
            client: pooled_client()?,
            base_url,
            access_token,
        })
    }

    async fn post_form(&self, object_id: &str, fields: &[(&str, String)]) -> Result<()> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), object_id);
        let mut form: Vec<(&str, String)> = fields.to_vec();
        form.push(("access_token", self.access_token.clone()));

        let response = self.client.post(&url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("platform rejected mutation ({}): {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl AdsPlatform for GraphPlatformClient {
    async fn set_object_status(&self, object_id: &str, status: ObjectStatus) -> Result<()> {
        let value = match status {
            ObjectStatus::Active => "ACTIVE",
            ObjectStatus::Paused => "PAUSED",
        };
        debug!(object_id, status = value, "setting object status");
        self.post_form(object_id, &[("status", value.to_string())]).await
    }

    async fn set_object_budget(&self, object_id: &str, budget: i64) -> Result<()> {
        debug!(object_id, budget, "setting object budget");
        self.post_form(object_id, &[("daily_budget", budget.to_string())])
            .await
    }

    async fn get_object_budget(&self, object_id: &str) -> Result<i64> {
        #[derive(Deserialize)]
        struct BudgetResponse {
            #[serde(default, deserialize_with = "crate::http::string_or_int")]
            daily_budget: Option<i64>,
        }

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), object_id);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("fields", "daily_budget".to_string()),
                ("access_token", self.access_token.clone()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("platform budget read failed ({}): {}", status, body);
        }
        let body: BudgetResponse = response.json().await?;
        body.daily_budget
            .ok_or_else(|| anyhow::anyhow!("object {} reports no daily budget", object_id))
    }
}

/// The platform returns numeric fields as strings; accept both forms.
pub(crate) fn string_or_int<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    let raw: Option<Raw> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None => None,
        Some(Raw::Int(v)) => Some(v),
        Some(Raw::Text(s)) => s.parse().ok(),
    })
}

/// Rule record as the table store returns it: conditions, actions and
/// settings arrive as serialized JSON text columns.
#[derive(Debug, Deserialize)]
struct RawRuleRecord {
    id: String,
    name: String,
    user_id: String,
    scope: Scope,
    time_range: String,
    active: bool,
    conditions: String,
    condition_logic: ConditionLogic,
    actions: String,
    #[serde(default)]
    advanced_settings: Option<String>,
    #[serde(default)]
    target_labels: Vec<String>,
    #[serde(default)]
    check_frequency_minutes: Option<u32>,
    #[serde(default)]
    last_run_at: Option<DateTime<Utc>>,
}

impl RawRuleRecord {
    fn into_rule(self) -> Result<Rule> {
        let conditions: Vec<Condition> = serde_json::from_str(&self.conditions)
            .with_context(|| format!("rule '{}' has malformed conditions", self.id))?;
        let raw_actions: Vec<RawAction> = serde_json::from_str(&self.actions)
            .with_context(|| format!("rule '{}' has malformed actions", self.id))?;
        let settings: AdvancedSettings = match &self.advanced_settings {
            Some(text) if !text.is_empty() => serde_json::from_str(text)
                .with_context(|| format!("rule '{}' has malformed advanced settings", self.id))?,
            _ => AdvancedSettings::default(),
        };

        Ok(Rule {
            id: self.id,
            name: self.name,
            user_id: self.user_id,
            scope: self.scope,
            time_range: self.time_range,
            active: self.active,
            conditions,
            condition_logic: self.condition_logic,
            actions: raw_actions.into_iter().map(RawAction::normalize).collect(),
            settings,
            target_labels: self.target_labels,
            check_frequency_minutes: self.check_frequency_minutes,
            last_run_at: self.last_run_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RecordList<T> {
    records: Vec<T>,
}

/// REST table-store client for rules, insights and label assignments.
pub struct RecordStoreClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl RecordStoreClient {
    pub fn new(base_url: String, api_token: String) -> Result<Self> {
        Ok(Self {
            client: pooled_client()?,
            base_url,
            api_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .header("xc-token", &self.api_token)
            .query(query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("record store request failed ({}): {}", status, body);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RuleSource for RecordStoreClient {
    async fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>> {
        let response = self
            .client
            .get(self.url(&format!("rules/{}", rule_id)))
            .header("xc-token", &self.api_token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("record store request failed ({}): {}", status, body);
        }
        let record: RawRuleRecord = response.json().await?;
        Ok(Some(record.into_rule()?))
    }

    async fn list_active_rules(&self, user_id: Option<&str>) -> Result<Vec<Rule>> {
        let mut query = vec![("active", "true".to_string())];
        if let Some(user) = user_id {
            query.push(("user_id", user.to_string()));
        }
        let list: RecordList<RawRuleRecord> = self.get_json("rules", &query).await?;
        list.records.into_iter().map(RawRuleRecord::into_rule).collect()
    }

    async fn update_last_run_at(&self, rule_id: &str, at: DateTime<Utc>) -> Result<()> {
        let response = self
            .client
            .patch(self.url(&format!("rules/{}", rule_id)))
            .header("xc-token", &self.api_token)
            .json(&serde_json::json!({ "last_run_at": at }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("failed to update last_run_at ({}): {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl InsightsSource for RecordStoreClient {
    async fn get_insights(
        &self,
        user_id: &str,
        scope: Scope,
        time_range: &str,
    ) -> Result<Vec<InsightRow>> {
        let query = vec![
            ("user_id", user_id.to_string()),
            ("scope", scope_str(scope).to_string()),
            ("time_range", time_range.to_string()),
        ];
        let list: RecordList<InsightRow> = self.get_json("insights", &query).await?;
        Ok(list.records)
    }
}

#[derive(Debug, Deserialize)]
struct LabelAssignmentRecord {
    entity_id: String,
}

#[async_trait]
impl LabelSource for RecordStoreClient {
    async fn get_label_assignments(
        &self,
        labels: &[String],
        scope: Scope,
    ) -> Result<Vec<String>> {
        let query = vec![
            ("labels", labels.join(",")),
            ("entity_type", scope_str(scope).to_string()),
        ];
        let list: RecordList<LabelAssignmentRecord> =
            self.get_json("label_assignments", &query).await?;
        Ok(list.records.into_iter().map(|r| r.entity_id).collect())
    }

    async fn assign_label(&self, object_id: &str, scope: Scope, label: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("label_assignments"))
            .header("xc-token", &self.api_token)
            .json(&serde_json::json!({
                "entity_id": object_id,
                "entity_type": scope_str(scope),
                "label": label,
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("failed to assign label ({}): {}", status, body);
        }
        Ok(())
    }

    async fn unassign_label(&self, object_id: &str, scope: Scope, label: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url("label_assignments"))
            .header("xc-token", &self.api_token)
            .json(&serde_json::json!({
                "entity_id": object_id,
                "entity_type": scope_str(scope),
                "label": label,
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("failed to unassign label ({}): {}", status, body);
        }
        Ok(())
    }
}

/// Posts notification payloads to a configured webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self> {
        Ok(Self {
            client: pooled_client()?,
            url,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, rule: &Rule, object: &AggregatedObject, message: &str) -> Result<()> {
        let payload = serde_json::json!({
            "rule_id": rule.id,
            "rule_name": rule.name,
            "object_id": object.id,
            "object_name": object.name,
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
        });
        debug!(url = %self.url, rule_id = %rule.id, "sending notification webhook");
        self.client.post(&self.url).json(&payload).send().await?;
        Ok(())
    }
}
