use crate::rule::{Metric, Scope};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One raw insight row: one day of delivery stats for one ad, carrying the
/// ids of its parent adset and campaign so any scope can group over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightRow {
    pub campaign_id: Option<String>,
    pub adset_id: Option<String>,
    pub ad_id: Option<String>,
    pub entity_name: Option<String>,
    pub date: NaiveDate,
    /// Minor currency units.
    #[serde(default)]
    pub spend: i64,
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub clicks: u64,
    #[serde(default)]
    pub reach: u64,
    #[serde(default)]
    pub results: u64,
    /// Attributed conversion value, minor units.
    #[serde(default)]
    pub revenue: i64,
    /// Current daily budget of the owning object, when the source reports it.
    #[serde(default)]
    pub daily_budget: Option<i64>,
}

impl InsightRow {
    fn scope_id(&self, scope: Scope) -> Option<&str> {
        match scope {
            Scope::Campaign => self.campaign_id.as_deref(),
            Scope::Adset => self.adset_id.as_deref(),
            Scope::Ad => self.ad_id.as_deref(),
        }
    }
}

/// Per-run aggregate of all insight rows for one campaign/adset/ad.
/// Lives for a single evaluation pass; consumers must not rely on ordering.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedObject {
    pub id: String,
    pub name: Option<String>,
    pub scope: Scope,
    pub spend: i64,
    pub impressions: u64,
    pub clicks: u64,
    pub reach: u64,
    pub results: u64,
    pub revenue: i64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpm: f64,
    pub cost_per_result: f64,
    pub frequency: f64,
    pub roas: f64,
    pub current_budget: Option<i64>,
}

impl AggregatedObject {
    pub fn metric_value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Spend => self.spend as f64,
            Metric::Impressions => self.impressions as f64,
            Metric::Clicks => self.clicks as f64,
            Metric::Reach => self.reach as f64,
            Metric::Results => self.results as f64,
            Metric::Revenue => self.revenue as f64,
            Metric::Ctr => self.ctr,
            Metric::Cpc => self.cpc,
            Metric::Cpm => self.cpm,
            Metric::CostPerResult => self.cost_per_result,
            Metric::Frequency => self.frequency,
            Metric::Roas => self.roas,
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    name: Option<String>,
    spend: i64,
    impressions: u64,
    clicks: u64,
    reach: u64,
    results: u64,
    revenue: i64,
    daily_budget: Option<i64>,
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Groups raw per-day rows by the entity id matching `scope` and computes
/// derived ratios. Entities with zero spend or zero results are still
/// emitted as long as one row references them, so "0 results" rules can
/// match. Rows without an id for the scope are dropped.
pub fn aggregate(rows: &[InsightRow], scope: Scope) -> Vec<AggregatedObject> {
    let mut groups: HashMap<String, Accumulator> = HashMap::new();

    for row in rows {
        let Some(id) = row.scope_id(scope) else {
            continue;
        };
        let acc = groups.entry(id.to_string()).or_default();
        acc.spend += row.spend;
        acc.impressions += row.impressions;
        acc.clicks += row.clicks;
        acc.reach += row.reach;
        acc.results += row.results;
        acc.revenue += row.revenue;
        if acc.name.is_none() {
            acc.name = row.entity_name.clone();
        }
        if acc.daily_budget.is_none() {
            acc.daily_budget = row.daily_budget;
        }
    }

    groups
        .into_iter()
        .map(|(id, acc)| {
            let spend = acc.spend as f64;
            let impressions = acc.impressions as f64;
            let clicks = acc.clicks as f64;
            AggregatedObject {
                id,
                name: acc.name,
                scope,
                spend: acc.spend,
                impressions: acc.impressions,
                clicks: acc.clicks,
                reach: acc.reach,
                results: acc.results,
                revenue: acc.revenue,
                ctr: ratio(clicks, impressions) * 100.0,
                cpc: ratio(spend, clicks),
                cpm: ratio(spend, impressions) * 1000.0,
                cost_per_result: ratio(spend, acc.results as f64),
                frequency: ratio(impressions, acc.reach as f64),
                roas: ratio(acc.revenue as f64, spend),
                current_budget: acc.daily_budget,
            }
        })
        .collect()
}
