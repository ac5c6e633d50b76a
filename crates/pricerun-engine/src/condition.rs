//! Condition node evaluation.
//!
//! Each comparison resolves its `field` through the variable resolver
//! and compares the resulting text against `value`. Ordering and
//! equality operators compare numerically when both sides parse as
//! numbers, otherwise as strings. `AND` stops at the first false
//! comparison and `OR` at the first true one; comparisons past the
//! short-circuit point are never resolved.

use pricerun_config::{Condition, ConditionAction, ConditionConfig, ConditionOperator, LogicOperator};
use pricerun_resolver::{ResolveError, VariableResolver};
use pricerun_workflow::ResolveWarning;

/// The decided outcome of one condition node.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionOutcome {
  pub matched: bool,
  pub action: ConditionAction,
  pub warnings: Vec<ResolveWarning>,
}

pub fn evaluate(
  config: &ConditionConfig,
  resolver: &VariableResolver<'_>,
) -> Result<ConditionOutcome, ResolveError> {
  let mut warnings = Vec::new();
  // An empty condition list matches; the node is then a pure router.
  let mut matched = true;

  for condition in &config.conditions {
    let holds = check(condition, resolver, &mut warnings)?;
    match config.logic_operator {
      LogicOperator::And if !holds => {
        matched = false;
        break;
      }
      LogicOperator::Or => {
        matched = holds;
        if holds {
          break;
        }
      }
      _ => {}
    }
  }

  let action = if matched {
    config.on_match
  } else {
    config.on_no_match
  };

  Ok(ConditionOutcome {
    matched,
    action,
    warnings,
  })
}

fn check(
  condition: &Condition,
  resolver: &VariableResolver<'_>,
  warnings: &mut Vec<ResolveWarning>,
) -> Result<bool, ResolveError> {
  let actual = resolve_field(&condition.field, resolver, warnings)?;
  let expected = if condition.value.contains("{{") {
    let r = resolver.resolve(&condition.value)?;
    warnings.extend(r.warnings);
    r.text
  } else {
    condition.value.clone()
  };

  Ok(compare(condition.operator, &actual, &expected))
}

/// A bare name is shorthand for `{{previous_output.<name>}}`; a dotted
/// path or an explicit placeholder is taken as written.
fn resolve_field(
  field: &str,
  resolver: &VariableResolver<'_>,
  warnings: &mut Vec<ResolveWarning>,
) -> Result<String, ResolveError> {
  let template = if field.contains("{{") {
    field.to_string()
  } else if field.contains('.') {
    format!("{{{{{field}}}}}")
  } else {
    format!("{{{{previous_output.{field}}}}}")
  };

  let r = resolver.resolve(&template)?;
  warnings.extend(r.warnings);
  Ok(r.text)
}

fn compare(operator: ConditionOperator, actual: &str, expected: &str) -> bool {
  use ConditionOperator::*;

  match operator {
    IsEmpty => return actual.is_empty(),
    IsNotEmpty => return !actual.is_empty(),
    Contains => return actual.contains(expected),
    NotContains => return !actual.contains(expected),
    StartsWith => return actual.starts_with(expected),
    EndsWith => return actual.ends_with(expected),
    _ => {}
  }

  if let (Ok(a), Ok(b)) = (actual.parse::<f64>(), expected.parse::<f64>()) {
    return match operator {
      Eq => a == b,
      Ne => a != b,
      Gt => a > b,
      Lt => a < b,
      Ge => a >= b,
      Le => a <= b,
      _ => unreachable!(),
    };
  }

  match operator {
    Eq => actual == expected,
    Ne => actual != expected,
    Gt => actual > expected,
    Lt => actual < expected,
    Ge => actual >= expected,
    Le => actual <= expected,
    _ => unreachable!(),
  }
}
