use log::warn;
use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::eval::{
    DecisionReason, EvaluationContext, EvaluatorRequest, EvaluatorType, ExperimentEvaluation,
    ExperimentEvaluator, ExperimentRequest, DEFAULT_VARIATION_KEY,
};
use crate::target::{Condition, KeyType, Operator, Target, TargetMatch};
use crate::user::HackleUser;
use crate::value::{HackleValue, ValueType};
use crate::workspace::Segment;

/// Reasons under which an A/B test outcome may be used by another experiment's targeting.
const AB_TEST_MATCHED_REASONS: [DecisionReason; 4] = [
    DecisionReason::Overridden,
    DecisionReason::TrafficAllocated,
    DecisionReason::ExperimentCompleted,
    DecisionReason::TrafficAllocatedByTargeting,
];

/// Matches targets against the user of a request.
///
/// Conditions on A/B tests and feature flags evaluate the referenced experiment through the
/// [ExperimentEvaluator], sharing the request's [EvaluationContext].
#[derive(Clone, Copy, Debug, Default)]
pub struct TargetMatcher;

impl TargetMatcher {
    pub fn new() -> Self {
        TargetMatcher
    }

    /// True when every condition of `target` matches. A target without conditions matches.
    pub fn matches<'a>(
        &self,
        request: &dyn EvaluatorRequest<'a>,
        context: &mut EvaluationContext,
        target: &Target,
        evaluator: &dyn ExperimentEvaluator,
    ) -> Result<bool> {
        for condition in &target.conditions {
            if !self.condition_matches(request, context, condition, evaluator)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// True when any of `targets` matches. An empty slice never matches.
    pub fn any_matches<'a>(
        &self,
        request: &dyn EvaluatorRequest<'a>,
        context: &mut EvaluationContext,
        targets: &[Target],
        evaluator: &dyn ExperimentEvaluator,
    ) -> Result<bool> {
        for target in targets {
            if self.matches(request, context, target, evaluator)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn condition_matches<'a>(
        &self,
        request: &dyn EvaluatorRequest<'a>,
        context: &mut EvaluationContext,
        condition: &Condition,
        evaluator: &dyn ExperimentEvaluator,
    ) -> Result<bool> {
        match condition.key.key_type {
            KeyType::UserId | KeyType::UserProperty | KeyType::HackleProperty => {
                Ok(user_condition_matches(request.user(), condition))
            }
            KeyType::Segment => segment_condition_matches(request, condition),
            KeyType::AbTest | KeyType::FeatureFlag => {
                experiment_condition_matches(request, context, condition, evaluator)
            }
            KeyType::Unknown => Err(invalid_condition_key(condition)),
        }
    }
}

fn invalid_condition_key(condition: &Condition) -> Error {
    Error::InvalidConditionKey {
        key_type: condition.key.key_type.as_str().to_string(),
        name: condition.key.name.clone(),
    }
}

/// Matches conditions that only read the user: identifiers and properties. Other key types never
/// match here.
fn user_condition_matches(user: &HackleUser, condition: &Condition) -> bool {
    let name = condition.key.name.as_str();
    match condition.key.key_type {
        KeyType::UserId => {
            let identifier = user
                .identifier(name)
                .map(|identifier| Value::String(identifier.to_string()));
            match_value(identifier.as_ref(), &condition.target_match)
        }
        KeyType::UserProperty => match_value(user.property(name), &condition.target_match),
        KeyType::HackleProperty => {
            match_value(user.hackle_property(name), &condition.target_match)
        }
        _ => false,
    }
}

fn segment_condition_matches<'a>(
    request: &dyn EvaluatorRequest<'a>,
    condition: &Condition,
) -> Result<bool> {
    let mut is_matched = false;
    for value in &condition.target_match.values {
        let segment_key = value
            .as_str()
            .ok_or_else(|| invalid_condition_key(condition))?;
        let segment = request
            .workspace()
            .segment(segment_key)
            .ok_or_else(|| Error::SegmentNotFound(segment_key.to_string()))?;
        if user_in_segment(request.user(), segment) {
            is_matched = true;
            break;
        }
    }
    Ok(condition.target_match.match_type.matches(is_matched))
}

fn user_in_segment(user: &HackleUser, segment: &Segment) -> bool {
    segment.targets.iter().any(|target| {
        target
            .conditions
            .iter()
            .all(|condition| user_condition_matches(user, condition))
    })
}

fn experiment_condition_matches<'a>(
    request: &dyn EvaluatorRequest<'a>,
    context: &mut EvaluationContext,
    condition: &Condition,
    evaluator: &dyn ExperimentEvaluator,
) -> Result<bool> {
    let key_type = condition.key.key_type;
    let experiment_key: i64 = condition
        .key
        .name
        .parse()
        .map_err(|_| invalid_condition_key(condition))?;

    let workspace = request.workspace();
    let experiment = match key_type {
        KeyType::AbTest => workspace.experiment(experiment_key),
        _ => workspace.feature_flag(experiment_key),
    };
    let experiment = match experiment {
        Some(experiment) => experiment,
        None => return Ok(false),
    };

    let evaluation = match context.get(experiment.id) {
        Some(evaluation) => evaluation.clone(),
        None => {
            let nested = ExperimentRequest::of(request, experiment);
            let evaluation = evaluator.evaluate_experiment(&nested, context)?;
            let evaluation = as_target_evaluation(request, key_type, evaluation);
            context.add_target_evaluation(evaluation.clone());
            evaluation
        }
    };

    let user_value = match key_type {
        KeyType::AbTest => {
            if !AB_TEST_MATCHED_REASONS.contains(&evaluation.reason) {
                return Ok(false);
            }
            Value::String(evaluation.variation_key)
        }
        _ => Value::Bool(evaluation.variation_key != DEFAULT_VARIATION_KEY),
    };
    Ok(match_value(Some(&user_value), &condition.target_match))
}

fn as_target_evaluation<'a>(
    request: &dyn EvaluatorRequest<'a>,
    key_type: KeyType,
    evaluation: ExperimentEvaluation,
) -> ExperimentEvaluation {
    if request.key().evaluator_type == EvaluatorType::Experiment
        && key_type == KeyType::AbTest
        && evaluation.reason == DecisionReason::TrafficAllocated
    {
        evaluation.with_reason(DecisionReason::TrafficAllocatedByTargeting)
    } else {
        evaluation
    }
}

/// Matches a user value against a condition's operands, applying the match type.
///
/// A missing or null user value never matches, except under [Operator::Exists] where it is the
/// negative case. An array matches if any of its non-null elements matches.
pub fn match_value(user_value: Option<&Value>, target_match: &TargetMatch) -> bool {
    let is_matched = if target_match.operator == Operator::Exists {
        matches!(user_value, Some(value) if !value.is_null())
    } else {
        match user_value {
            None | Some(Value::Null) => false,
            Some(Value::Array(values)) => values
                .iter()
                .filter(|value| !value.is_null())
                .any(|value| matches_any_operand(&HackleValue::from(value), target_match)),
            Some(value) => matches_any_operand(&HackleValue::from(value), target_match),
        }
    };
    target_match.match_type.matches(is_matched)
}

fn matches_any_operand(user_value: &HackleValue, target_match: &TargetMatch) -> bool {
    target_match.values.iter().any(|operand| {
        value_matches(
            target_match.value_type,
            target_match.operator,
            user_value,
            operand,
        )
    })
}

fn value_matches(
    value_type: ValueType,
    operator: Operator,
    lhs: &HackleValue,
    rhs: &HackleValue,
) -> bool {
    match value_type {
        ValueType::String | ValueType::Json => {
            match (lhs.to_string_value(), rhs.to_string_value()) {
                (Some(l), Some(r)) => string_op(operator, &l, &r),
                _ => false,
            }
        }
        ValueType::Number => match (lhs.to_f64(), rhs.to_f64()) {
            (Some(l), Some(r)) => ordered_op(operator, l, r),
            _ => false,
        },
        ValueType::Bool => match (lhs.to_bool(), rhs.to_bool()) {
            (Some(l), Some(r)) => operator == Operator::In && l == r,
            _ => false,
        },
        ValueType::Version => match (lhs.to_version(), rhs.to_version()) {
            (Some(l), Some(r)) => ordered_op(operator, l, r),
            _ => false,
        },
        ValueType::Null | ValueType::Unknown => false,
    }
}

fn string_op(operator: Operator, lhs: &str, rhs: &str) -> bool {
    match operator {
        Operator::Contains => lhs.contains(rhs),
        Operator::StartsWith => lhs.starts_with(rhs),
        Operator::EndsWith => lhs.ends_with(rhs),
        Operator::Regex => match Regex::new(rhs) {
            Ok(re) => re.is_match(lhs),
            Err(e) => {
                warn!("Invalid regex for 'REGEX' operator ({}): {}", e, rhs);
                false
            }
        },
        _ => ordered_op(operator, lhs, rhs),
    }
}

fn ordered_op<T: PartialOrd>(operator: Operator, lhs: T, rhs: T) -> bool {
    match operator {
        Operator::In => lhs == rhs,
        Operator::Gt => lhs > rhs,
        Operator::Gte => lhs >= rhs,
        Operator::Lt => lhs < rhs,
        Operator::Lte => lhs <= rhs,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Evaluator;
    use crate::target::MatchType;
    use crate::test_common::{workspace, InMemoryManualOverrideStorage};
    use crate::workspace::Workspace;
    use serde_json::json;
    use spectral::prelude::*;
    use std::sync::Arc;
    use test_case::test_case;

    fn target_match(
        operator: Operator,
        value_type: ValueType,
        values: Vec<HackleValue>,
    ) -> TargetMatch {
        TargetMatch {
            match_type: MatchType::Match,
            operator,
            value_type,
            values,
        }
    }

    fn astring(s: &str) -> HackleValue {
        HackleValue::from(s)
    }

    fn anumber(f: f64) -> HackleValue {
        HackleValue::from(f)
    }

    fn matches(user_value: Value, tm: &TargetMatch) -> bool {
        match_value(Some(&user_value), tm)
    }

    fn condition(json: Value) -> Condition {
        serde_json::from_value(json).unwrap()
    }

    #[test_case(Operator::In, "foo", "foo", true)]
    #[test_case(Operator::In, "Foo", "foo", false)]
    #[test_case(Operator::Contains, "food", "oo", true)]
    #[test_case(Operator::Contains, "oo", "food", false)]
    #[test_case(Operator::StartsWith, "food", "foo", true)]
    #[test_case(Operator::StartsWith, "foo", "food", false)]
    #[test_case(Operator::EndsWith, "food", "ood", true)]
    #[test_case(Operator::EndsWith, "FOOD", "ood", false)]
    #[test_case(Operator::Gt, "b", "a", true)]
    #[test_case(Operator::Lte, "a", "a", true)]
    #[test_case(Operator::Lt, "b", "a", false)]
    fn string_operators(operator: Operator, user: &str, operand: &str, expected: bool) {
        let tm = target_match(operator, ValueType::String, vec![astring(operand)]);
        assert_that!(matches(json!(user), &tm)).is_equal_to(expected);
    }

    #[test]
    fn regex_operator() {
        fn should_match(text: &str, pattern: &str) {
            let tm = target_match(Operator::Regex, ValueType::String, vec![astring(pattern)]);
            assert!(matches(json!(text), &tm), "`{}` should match `{}`", text, pattern);
        }

        fn should_not_match(text: &str, pattern: &str) {
            let tm = target_match(Operator::Regex, ValueType::String, vec![astring(pattern)]);
            assert!(!matches(json!(text), &tm), "`{}` should not match `{}`", text, pattern);
        }

        should_match("a", "");
        should_match("hello world", "hello.*rld");
        should_match("hello world", "(world|planet)");
        should_not_match("", ".");
        should_not_match("hello world", "aloha");
        should_not_match("hello world", "***bad regex");
    }

    #[test_case(Operator::In, json!(42), 42.0, true; "in with number")]
    #[test_case(Operator::In, json!("42"), 42.0, true; "in with numeric string")]
    #[test_case(Operator::Gt, json!(43), 42.0, true)]
    #[test_case(Operator::Gte, json!(42.0), 42.0, true)]
    #[test_case(Operator::Lt, json!(41.5), 42.0, true)]
    #[test_case(Operator::Lte, json!(43), 42.0, false)]
    #[test_case(Operator::In, json!("abc"), 42.0, false)]
    #[test_case(Operator::Contains, json!(42), 42.0, false)]
    fn number_operators(operator: Operator, user: Value, operand: f64, expected: bool) {
        let tm = target_match(operator, ValueType::Number, vec![anumber(operand)]);
        assert_that!(matches(user, &tm)).is_equal_to(expected);
    }

    #[test]
    fn numbers_match_as_strings() {
        let tm = target_match(Operator::In, ValueType::String, vec![astring("42")]);
        assert_that!(matches(json!(42), &tm)).is_true();
    }

    #[test_case(json!(true), HackleValue::Bool(true), true)]
    #[test_case(json!("false"), HackleValue::Bool(false), true)]
    #[test_case(json!(false), HackleValue::Bool(true), false)]
    #[test_case(json!(1), HackleValue::Bool(true), false)]
    fn bool_operator(user: Value, operand: HackleValue, expected: bool) {
        let tm = target_match(Operator::In, ValueType::Bool, vec![operand]);
        assert_that!(matches(user, &tm)).is_equal_to(expected);
    }

    #[test_case(Operator::In, "1.0.0", "1", true)]
    #[test_case(Operator::Gt, "1.10.0", "1.9.0", true)]
    #[test_case(Operator::Lt, "1.0.0-beta", "1.0.0", true)]
    #[test_case(Operator::Gte, "2.0", "2.0.0+build", true)]
    #[test_case(Operator::In, "not-a-version", "1.0.0", false)]
    fn version_operators(operator: Operator, user: &str, operand: &str, expected: bool) {
        let tm = target_match(operator, ValueType::Version, vec![astring(operand)]);
        assert_that!(matches(json!(user), &tm)).is_equal_to(expected);
    }

    #[test]
    fn any_operand_matches() {
        let tm = target_match(
            Operator::In,
            ValueType::String,
            vec![astring("SILVER"), astring("GOLD")],
        );
        assert_that!(matches(json!("GOLD"), &tm)).is_true();
    }

    #[test]
    fn array_user_values_match_any_element() {
        let tm = target_match(Operator::In, ValueType::String, vec![astring("b")]);
        assert_that!(matches(json!(["a", null, "b"]), &tm)).is_true();
        assert_that!(matches(json!(["a", null]), &tm)).is_false();
        assert_that!(matches(json!([]), &tm)).is_false();
    }

    #[test]
    fn missing_values_never_match() {
        let tm = target_match(Operator::In, ValueType::String, vec![astring("a")]);
        assert_that!(match_value(None, &tm)).is_false();
        assert_that!(matches(Value::Null, &tm)).is_false();

        let tm = target_match(Operator::In, ValueType::Null, vec![HackleValue::Null]);
        assert_that!(matches(json!("a"), &tm)).is_false();
    }

    #[test]
    fn exists_operator() {
        let tm = target_match(Operator::Exists, ValueType::String, vec![]);
        assert_that!(matches(json!("anything"), &tm)).is_true();
        assert_that!(match_value(None, &tm)).is_false();
        assert_that!(matches(Value::Null, &tm)).is_false();
    }

    #[test]
    fn not_match_negates() {
        let mut tm = target_match(Operator::In, ValueType::String, vec![astring("GOLD")]);
        tm.match_type = MatchType::NotMatch;
        assert_that!(matches(json!("GOLD"), &tm)).is_false();
        assert_that!(matches(json!("SILVER"), &tm)).is_true();
        assert_that!(match_value(None, &tm)).is_true();
    }

    struct Fixture {
        workspace: crate::workspace::DefaultWorkspace,
        evaluator: Evaluator,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                workspace: workspace(),
                evaluator: Evaluator::new(Arc::new(InMemoryManualOverrideStorage::new())),
            }
        }

        fn matches(&self, user: &HackleUser, condition: Condition) -> Result<bool> {
            self.matches_in(user, condition, &mut EvaluationContext::new())
        }

        fn matches_in(
            &self,
            user: &HackleUser,
            condition: Condition,
            context: &mut EvaluationContext,
        ) -> Result<bool> {
            let experiment = self.workspace.experiment(9).unwrap();
            let request = ExperimentRequest::new(&self.workspace, user, experiment, "A");
            let target = Target {
                conditions: vec![condition],
            };
            TargetMatcher::new().matches(&request, context, &target, &self.evaluator)
        }
    }

    #[test]
    fn empty_target_matches() {
        let fixture = Fixture::new();
        let user = HackleUser::with_id("user-1").build();
        let experiment = fixture.workspace.experiment(1).unwrap();
        let request = ExperimentRequest::new(&fixture.workspace, &user, experiment, "A");
        let target = Target { conditions: vec![] };

        let matched = TargetMatcher::new().matches(
            &request,
            &mut EvaluationContext::new(),
            &target,
            &fixture.evaluator,
        );
        assert_that!(matched).is_equal_to(Ok(true));
        let any = TargetMatcher::new().any_matches(
            &request,
            &mut EvaluationContext::new(),
            &[],
            &fixture.evaluator,
        );
        assert_that!(any).is_equal_to(Ok(false));
    }

    #[test]
    fn user_id_and_hackle_property_conditions() {
        let fixture = Fixture::new();
        let user = HackleUser::with_id("user-1")
            .device_id("device-1")
            .hackle_property("platform", "iOS")
            .build();

        let by_device = condition(json!({
            "key": {"type": "USER_ID", "name": "$deviceId"},
            "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["device-1"]}
        }));
        assert_that!(fixture.matches(&user, by_device)).is_equal_to(Ok(true));

        let by_platform = condition(json!({
            "key": {"type": "HACKLE_PROPERTY", "name": "platform"},
            "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["Android"]}
        }));
        assert_that!(fixture.matches(&user, by_platform)).is_equal_to(Ok(false));
    }

    #[test]
    fn segment_condition() {
        let fixture = Fixture::new();
        let in_gold = condition(json!({
            "key": {"type": "SEGMENT", "name": "SEGMENT"},
            "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING",
                      "values": ["internal_users", "gold_members"]}
        }));

        let gold = HackleUser::with_id("user-1").property("grade", "GOLD").build();
        assert_that!(fixture.matches(&gold, in_gold.clone())).is_equal_to(Ok(true));

        let tester = HackleUser::with_id("tester").build();
        assert_that!(fixture.matches(&tester, in_gold.clone())).is_equal_to(Ok(true));

        let other = HackleUser::with_id("user-1").build();
        assert_that!(fixture.matches(&other, in_gold)).is_equal_to(Ok(false));
    }

    #[test]
    fn segment_condition_errors() {
        let fixture = Fixture::new();
        let user = HackleUser::with_id("user-1").build();

        let missing = condition(json!({
            "key": {"type": "SEGMENT", "name": "SEGMENT"},
            "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["nope"]}
        }));
        assert_that!(fixture.matches(&user, missing))
            .is_equal_to(Err(Error::SegmentNotFound("nope".to_string())));

        let not_a_key = condition(json!({
            "key": {"type": "SEGMENT", "name": "SEGMENT"},
            "match": {"type": "MATCH", "operator": "IN", "valueType": "NUMBER", "values": [1]}
        }));
        assert_that!(fixture.matches(&user, not_a_key).is_err()).is_true();
    }

    #[test]
    fn ab_test_condition() {
        // "user-1" is allocated to B of experiment 1.
        let fixture = Fixture::new();
        let user = HackleUser::with_id("user-1").build();
        let in_b = condition(json!({
            "key": {"type": "AB_TEST", "name": "1"},
            "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["B"]}
        }));

        let mut context = EvaluationContext::new();
        assert_that!(fixture.matches_in(&user, in_b, &mut context)).is_equal_to(Ok(true));
        assert_that!(context.get(1001).map(|e| e.reason))
            .is_equal_to(Some(DecisionReason::TrafficAllocatedByTargeting));
    }

    #[test]
    fn ab_test_condition_ignores_unallocated_outcomes() {
        // Experiment 8 does not allocate "user-1"; its default "A" must not match.
        let fixture = Fixture::new();
        let user = HackleUser::with_id("user-1").build();
        let in_a = condition(json!({
            "key": {"type": "AB_TEST", "name": "8"},
            "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["A"]}
        }));
        assert_that!(fixture.matches(&user, in_a)).is_equal_to(Ok(false));
    }

    #[test]
    fn experiment_condition_reuses_context_evaluations() {
        let fixture = Fixture::new();
        let user = HackleUser::with_id("user-1").build();
        let in_b = condition(json!({
            "key": {"type": "AB_TEST", "name": "1"},
            "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["B"]}
        }));

        let mut context = EvaluationContext::new();
        fixture.matches_in(&user, in_b.clone(), &mut context).unwrap();
        fixture.matches_in(&user, in_b, &mut context).unwrap();
        assert_that!(context.target_evaluations().len()).is_equal_to(1);
    }

    #[test]
    fn feature_flag_condition() {
        let fixture = Fixture::new();
        let on = condition(json!({
            "key": {"type": "FEATURE_FLAG", "name": "1"},
            "match": {"type": "MATCH", "operator": "IN", "valueType": "BOOLEAN", "values": [true]}
        }));

        let user = HackleUser::with_id("user-1").build();
        assert_that!(fixture.matches(&user, on.clone())).is_equal_to(Ok(false));

        let gold = HackleUser::with_id("user-1").property("grade", "GOLD").build();
        assert_that!(fixture.matches(&gold, on)).is_equal_to(Ok(true));
    }

    #[test]
    fn unknown_experiment_condition_does_not_match() {
        let fixture = Fixture::new();
        let user = HackleUser::with_id("user-1").build();
        let unknown = condition(json!({
            "key": {"type": "AB_TEST", "name": "404"},
            "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["A"]}
        }));
        assert_that!(fixture.matches(&user, unknown)).is_equal_to(Ok(false));
    }

    #[test_case("AB_TEST", "not-a-number")]
    #[test_case("COHORT", "1")]
    fn invalid_condition_keys(key_type: &str, name: &str) {
        let fixture = Fixture::new();
        let user = HackleUser::with_id("user-1").build();
        let invalid = condition(json!({
            "key": {"type": key_type, "name": name},
            "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["A"]}
        }));
        assert_that!(matches!(
            fixture.matches(&user, invalid),
            Err(Error::InvalidConditionKey { .. })
        ))
        .is_true();
    }
}
