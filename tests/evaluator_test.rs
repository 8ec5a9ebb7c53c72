mod common;

use adpilot::aggregator::aggregate;
use adpilot::evaluator::{evaluate_conditions, evaluate_single_condition};
use adpilot::rule::{ConditionLogic, Metric, Operator};
use common::{condition, insight_row};

fn sample_object() -> adpilot::aggregator::AggregatedObject {
    let rows = vec![insight_row("c1", 60_000, 3)];
    aggregate(&rows, adpilot::rule::Scope::Campaign)
        .into_iter()
        .next()
        .unwrap()
}

#[test]
fn operator_semantics() {
    assert!(evaluate_single_condition(10.0, Operator::GreaterThan, 5.0));
    assert!(!evaluate_single_condition(5.0, Operator::GreaterThan, 10.0));
    assert!(evaluate_single_condition(1.0, Operator::LessThan, 5.0));
    assert!(evaluate_single_condition(5.0, Operator::Equals, 5.0));
    assert!(!evaluate_single_condition(5.1, Operator::Equals, 5.0));
    assert!(evaluate_single_condition(5.0, Operator::GreaterThanOrEqual, 5.0));
    assert!(evaluate_single_condition(5.0, Operator::LessThanOrEqual, 5.0));
    assert!(evaluate_single_condition(5.1, Operator::NotEquals, 5.0));
    assert!(!evaluate_single_condition(5.0, Operator::NotEquals, 5.0));
}

#[test]
fn non_finite_values_never_match() {
    for op in [
        Operator::GreaterThan,
        Operator::LessThan,
        Operator::Equals,
        Operator::GreaterThanOrEqual,
        Operator::LessThanOrEqual,
        Operator::NotEquals,
    ] {
        assert!(!evaluate_single_condition(f64::NAN, op, 0.0));
        assert!(!evaluate_single_condition(f64::INFINITY, op, 0.0));
        assert!(!evaluate_single_condition(f64::NEG_INFINITY, op, 0.0));
    }
}

#[test]
fn all_logic_requires_every_condition() {
    let object = sample_object();
    let all_true = vec![
        condition(Metric::Spend, Operator::GreaterThan, 50_000.0),
        condition(Metric::Results, Operator::GreaterThan, 2.0),
    ];
    assert!(evaluate_conditions(&object, &all_true, ConditionLogic::All));

    let one_false = vec![
        condition(Metric::Spend, Operator::GreaterThan, 50_000.0),
        condition(Metric::Results, Operator::GreaterThan, 100.0),
    ];
    assert!(!evaluate_conditions(&object, &one_false, ConditionLogic::All));
}

#[test]
fn any_logic_requires_one_condition() {
    let object = sample_object();
    let all_false = vec![
        condition(Metric::Spend, Operator::LessThan, 1.0),
        condition(Metric::Results, Operator::GreaterThan, 100.0),
    ];
    assert!(!evaluate_conditions(&object, &all_false, ConditionLogic::Any));

    let one_true = vec![
        condition(Metric::Spend, Operator::LessThan, 1.0),
        condition(Metric::Results, Operator::GreaterThan, 2.0),
    ];
    assert!(evaluate_conditions(&object, &one_true, ConditionLogic::Any));
}

#[test]
fn empty_condition_lists() {
    let object = sample_object();
    assert!(evaluate_conditions(&object, &[], ConditionLogic::All));
    assert!(!evaluate_conditions(&object, &[], ConditionLogic::Any));
}

#[test]
fn zero_results_matches_less_than_one() {
    let rows = vec![insight_row("c1", 100_000, 0)];
    let object = aggregate(&rows, adpilot::rule::Scope::Campaign)
        .into_iter()
        .next()
        .unwrap();
    let conditions = vec![condition(Metric::Results, Operator::LessThan, 1.0)];
    assert!(evaluate_conditions(&object, &conditions, ConditionLogic::All));
}
