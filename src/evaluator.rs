use crate::aggregator::AggregatedObject;
use crate::rule::{Condition, ConditionLogic, Operator};

/// Compares one metric value against a threshold. Never panics; NaN and
/// infinite values evaluate false for every operator, so missing data can
/// never satisfy a condition (not even not_equals).
///
/// Equality is exact. Rules built against derived floating-point ratios may
/// therefore never match on equals; kept as-is for parity with rules users
/// already configured.
pub fn evaluate_single_condition(value: f64, operator: Operator, threshold: f64) -> bool {
    if !value.is_finite() {
        return false;
    }
    match operator {
        Operator::GreaterThan => value > threshold,
        Operator::LessThan => value < threshold,
        Operator::Equals => value == threshold,
        Operator::GreaterThanOrEqual => value >= threshold,
        Operator::LessThanOrEqual => value <= threshold,
        Operator::NotEquals => value != threshold,
    }
}

/// Combines the rule's conditions over one aggregated object. Evaluation is
/// pure and order-independent; short-circuiting is an optimization only.
/// An empty list is true under All and false under Any.
pub fn evaluate_conditions(
    object: &AggregatedObject,
    conditions: &[Condition],
    logic: ConditionLogic,
) -> bool {
    let mut check = conditions.iter().map(|c| {
        evaluate_single_condition(object.metric_value(c.metric), c.operator, c.threshold)
    });
    match logic {
        ConditionLogic::All => check.all(|m| m),
        ConditionLogic::Any => check.any(|m| m),
    }
}
