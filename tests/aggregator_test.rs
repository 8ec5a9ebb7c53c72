mod common;

use adpilot::aggregator::{aggregate, InsightRow};
use adpilot::rule::Scope;
use chrono::NaiveDate;
use common::insight_row;

fn adset_row(adset_id: &str, date: u32, spend: i64, results: u64) -> InsightRow {
    InsightRow {
        campaign_id: Some("c1".to_string()),
        adset_id: Some(adset_id.to_string()),
        ad_id: None,
        entity_name: None,
        date: NaiveDate::from_ymd_opt(2025, 6, date).unwrap(),
        spend,
        impressions: 0,
        clicks: 0,
        reach: 0,
        results,
        revenue: 0,
        daily_budget: None,
    }
}

#[test]
fn sums_rows_per_adset() {
    let rows = vec![
        adset_row("a1", 1, 30_000, 1),
        adset_row("a1", 2, 20_000, 1),
        adset_row("a2", 1, 5_000, 0),
    ];
    let mut objects = aggregate(&rows, Scope::Adset);
    objects.sort_by(|a, b| a.id.cmp(&b.id));

    assert_eq!(objects.len(), 2);
    let a1 = &objects[0];
    assert_eq!(a1.id, "a1");
    assert_eq!(a1.spend, 50_000);
    assert_eq!(a1.results, 2);
    assert_eq!(a1.cost_per_result, 25_000.0);
}

#[test]
fn grouping_follows_scope() {
    let rows = vec![
        adset_row("a1", 1, 30_000, 1),
        adset_row("a2", 1, 20_000, 1),
    ];
    // Same rows roll up to one campaign at campaign scope.
    let campaigns = aggregate(&rows, Scope::Campaign);
    assert_eq!(campaigns.len(), 1);
    assert_eq!(campaigns[0].spend, 50_000);

    // Ad scope drops rows without an ad id.
    let ads = aggregate(&rows, Scope::Ad);
    assert!(ads.is_empty());
}

#[test]
fn derived_ratios() {
    let rows = vec![InsightRow {
        campaign_id: Some("c1".to_string()),
        adset_id: None,
        ad_id: None,
        entity_name: None,
        date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        spend: 10_000,
        impressions: 2_000,
        clicks: 40,
        reach: 1_000,
        results: 4,
        revenue: 15_000,
        daily_budget: None,
    }];
    let objects = aggregate(&rows, Scope::Campaign);
    let o = &objects[0];
    assert_eq!(o.ctr, 2.0); // 40/2000*100
    assert_eq!(o.cpc, 250.0); // 10000/40
    assert_eq!(o.cpm, 5_000.0); // 10000/2000*1000
    assert_eq!(o.cost_per_result, 2_500.0); // 10000/4
    assert_eq!(o.frequency, 2.0); // 2000/1000
    assert_eq!(o.roas, 1.5); // 15000/10000
}

#[test]
fn zero_denominators_yield_zero() {
    let rows = vec![InsightRow {
        campaign_id: Some("c1".to_string()),
        adset_id: None,
        ad_id: None,
        entity_name: None,
        date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        spend: 10_000,
        impressions: 0,
        clicks: 0,
        reach: 0,
        results: 0,
        revenue: 0,
        daily_budget: None,
    }];
    let objects = aggregate(&rows, Scope::Campaign);
    let o = &objects[0];
    assert_eq!(o.ctr, 0.0);
    assert_eq!(o.cpc, 0.0);
    assert_eq!(o.cpm, 0.0);
    assert_eq!(o.cost_per_result, 0.0);
    assert_eq!(o.frequency, 0.0);
    assert_eq!(o.roas, 0.0);
}

#[test]
fn zero_activity_entities_are_included() {
    // An entity with no spend and no results still aggregates, so
    // "turn off campaigns with 0 results" rules can see it.
    let rows = vec![insight_row("idle", 0, 0)];
    let objects = aggregate(&rows, Scope::Campaign);
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].id, "idle");
}

#[test]
fn first_reported_budget_wins() {
    let mut first = insight_row("c1", 100, 1);
    first.daily_budget = Some(500);
    let mut second = insight_row("c1", 100, 1);
    second.daily_budget = Some(900);
    let objects = aggregate(&[first, second], Scope::Campaign);
    assert_eq!(objects[0].current_budget, Some(500));
}
