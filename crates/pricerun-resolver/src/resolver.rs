use minijinja::Environment;
use pricerun_workflow::{ExecutionContext, ResolveWarning};
use serde_json::Value;

use crate::error::ResolveError;

/// The outcome of resolving one template: the substituted text plus any
/// missing-variable warnings gathered along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
  pub text: String,
  pub warnings: Vec<ResolveWarning>,
}

/// Resolves placeholders for one node against the run's accumulated
/// context. Pure: resolving the same template twice against the same
/// context yields the same result.
pub struct VariableResolver<'a> {
  node_id: &'a str,
  predecessors: &'a [String],
  trigger_id: &'a str,
  context: &'a ExecutionContext,
}

impl<'a> VariableResolver<'a> {
  pub fn new(
    node_id: &'a str,
    predecessors: &'a [String],
    trigger_id: &'a str,
    context: &'a ExecutionContext,
  ) -> Self {
    Self {
      node_id,
      predecessors,
      trigger_id,
      context,
    }
  }

  /// Substitute every `{{source.path}}` placeholder. Plain dotted paths
  /// are looked up directly; anything else (filters, expressions) is
  /// rendered through minijinja against the same scope.
  pub fn resolve(&self, template: &str) -> Result<Resolution, ResolveError> {
    let mut text = String::with_capacity(template.len());
    let mut warnings = Vec::new();

    let mut rest = template;
    while let Some(start) = rest.find("{{") {
      text.push_str(&rest[..start]);
      let after = &rest[start + 2..];
      let Some(end) = after.find("}}") else {
        // Unterminated placeholder; leave the tail as-is.
        text.push_str(&rest[start..]);
        rest = "";
        break;
      };
      let expr = after[..end].trim();
      self.substitute(expr, &mut text, &mut warnings)?;
      rest = &after[end + 2..];
    }
    text.push_str(rest);

    Ok(Resolution { text, warnings })
  }

  /// Substitute SQL-style `:name` binds. Names look up in the sole
  /// predecessor's output object first, then the trigger output.
  pub fn resolve_sql(&self, sql: &str) -> Result<Resolution, ResolveError> {
    let mut text = String::with_capacity(sql.len());
    let mut warnings = Vec::new();

    let mut prev: Option<char> = None;
    let mut chars = sql.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
      if c != ':' {
        text.push(c);
        prev = Some(c);
        continue;
      }

      // `::` (type casts) and binds embedded in identifiers pass through.
      let boundary = !matches!(prev, Some(p) if p.is_alphanumeric() || p == '_' || p == ':');
      let name = Self::bind_name(&sql[i + 1..]);
      if !boundary || name.is_empty() {
        text.push(c);
        prev = Some(c);
        continue;
      }

      match self.bind_value(&name) {
        Some(value) => text.push_str(&value_to_string(value)),
        None => warnings.push(ResolveWarning {
          path: format!(":{name}"),
        }),
      }
      for _ in 0..name.len() {
        chars.next();
      }
      prev = name.chars().last();
    }

    Ok(Resolution { text, warnings })
  }

  /// Resolve every string inside a node config, recursing into arrays
  /// and objects. A value that is a single placeholder re-materializes
  /// as the referenced JSON value rather than its string form; values
  /// under a `sql` key additionally get `:name` binds substituted.
  pub fn resolve_config(
    &self,
    config: &serde_json::Map<String, Value>,
  ) -> Result<(serde_json::Map<String, Value>, Vec<ResolveWarning>), ResolveError> {
    let mut warnings = Vec::new();
    let mut resolved = serde_json::Map::new();
    for (key, value) in config {
      let value = self.resolve_value(key, value, &mut warnings)?;
      resolved.insert(key.clone(), value);
    }
    Ok((resolved, warnings))
  }

  fn resolve_value(
    &self,
    key: &str,
    value: &Value,
    warnings: &mut Vec<ResolveWarning>,
  ) -> Result<Value, ResolveError> {
    match value {
      Value::String(s) => {
        if key != "sql" && is_pure_placeholder(s) {
          let expr = s.trim();
          let expr = expr[2..expr.len() - 2].trim();
          if let Some(segments) = plain_path(expr) {
            return match self.lookup(&segments)? {
              Some(found) => Ok(found.clone()),
              None => {
                warnings.push(ResolveWarning {
                  path: expr.to_string(),
                });
                Ok(Value::String(String::new()))
              }
            };
          }
        }

        let mut resolution = self.resolve(s)?;
        if key == "sql" {
          let binds = self.resolve_sql(&resolution.text)?;
          resolution.text = binds.text;
          resolution.warnings.extend(binds.warnings);
        }
        warnings.extend(resolution.warnings);
        Ok(Value::String(resolution.text))
      }
      Value::Array(items) => {
        let resolved: Result<Vec<Value>, ResolveError> = items
          .iter()
          .map(|v| self.resolve_value(key, v, warnings))
          .collect();
        Ok(Value::Array(resolved?))
      }
      Value::Object(map) => {
        let mut resolved = serde_json::Map::new();
        for (k, v) in map {
          resolved.insert(k.clone(), self.resolve_value(k, v, warnings)?);
        }
        Ok(Value::Object(resolved))
      }
      other => Ok(other.clone()),
    }
  }

  fn substitute(
    &self,
    expr: &str,
    text: &mut String,
    warnings: &mut Vec<ResolveWarning>,
  ) -> Result<(), ResolveError> {
    if let Some(segments) = plain_path(expr) {
      match self.lookup(&segments)? {
        Some(value) => text.push_str(&value_to_string(value)),
        None => warnings.push(ResolveWarning {
          path: expr.to_string(),
        }),
      }
      return Ok(());
    }

    // Not a plain path: hand the expression to minijinja. Undefined
    // values render as empty strings there too.
    if expr.starts_with("previous_output") && self.predecessors.len() > 1 {
      return Err(ResolveError::AmbiguousPredecessor {
        node_id: self.node_id.to_string(),
        count: self.predecessors.len(),
      });
    }

    let mut env = Environment::new();
    env.set_undefined_behavior(minijinja::UndefinedBehavior::Chainable);
    let scope = minijinja::Value::from_serialize(self.scope());
    let rendered = env
      .render_str(&format!("{{{{ {expr} }}}}"), scope)
      .map_err(|e| ResolveError::Template {
        node_id: self.node_id.to_string(),
        message: e.to_string(),
      })?;
    text.push_str(&rendered);
    Ok(())
  }

  /// Walk a dotted path against the context. `None` means the path is
  /// missing somewhere; the caller records a warning and substitutes "".
  fn lookup(&self, segments: &[String]) -> Result<Option<&Value>, ResolveError> {
    let head = segments[0].as_str();
    let root = match head {
      "previous_output" => match self.predecessors {
        [only] => self.context.output(only),
        [] => None,
        many => {
          return Err(ResolveError::AmbiguousPredecessor {
            node_id: self.node_id.to_string(),
            count: many.len(),
          });
        }
      },
      "trigger" => self.context.output(self.trigger_id),
      node_id => self.context.output(node_id),
    };

    let Some(mut current) = root else {
      return Ok(None);
    };
    for segment in &segments[1..] {
      let next = match current {
        Value::Object(map) => map.get(segment.as_str()),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
      };
      match next {
        Some(value) => current = value,
        None => return Ok(None),
      }
    }
    Ok(Some(current))
  }

  /// Full template scope for minijinja expressions: every recorded node
  /// output by id, plus the `trigger` and `previous_output` roots.
  fn scope(&self) -> serde_json::Map<String, Value> {
    let mut scope = serde_json::Map::new();
    for (node_id, result) in self.context.results() {
      scope.insert(node_id.clone(), result.output.clone());
    }
    if let Some(trigger) = self.context.output(self.trigger_id) {
      scope.insert("trigger".to_string(), trigger.clone());
    }
    if let [only] = self.predecessors {
      if let Some(output) = self.context.output(only) {
        scope.insert("previous_output".to_string(), output.clone());
      }
    }
    scope
  }

  fn bind_value(&self, name: &str) -> Option<&Value> {
    let from_pred = match self.predecessors {
      [only] => self
        .context
        .output(only)
        .and_then(|v| v.as_object())
        .and_then(|map| map.get(name)),
      _ => None,
    };
    from_pred.or_else(|| {
      self
        .context
        .output(self.trigger_id)
        .and_then(|v| v.as_object())
        .and_then(|map| map.get(name))
    })
  }

  fn bind_name(rest: &str) -> String {
    let mut chars = rest.chars();
    match chars.next() {
      Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
      _ => return String::new(),
    }
    rest
      .chars()
      .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
      .collect()
  }
}

/// A dotted path of identifier-like segments (`a.b.c`); hyphens are
/// allowed so node ids like `fetch-price` resolve without minijinja.
fn plain_path(expr: &str) -> Option<Vec<String>> {
  if expr.is_empty() {
    return None;
  }
  let segments: Vec<String> = expr.split('.').map(str::to_string).collect();
  for segment in &segments {
    if segment.is_empty()
      || !segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
      return None;
    }
  }
  Some(segments)
}

fn is_pure_placeholder(s: &str) -> bool {
  let trimmed = s.trim();
  trimmed.starts_with("{{")
    && trimmed.ends_with("}}")
    && trimmed.matches("{{").count() == 1
    && trimmed.matches("}}").count() == 1
}

fn value_to_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    Value::Number(n) => n.to_string(),
    Value::Bool(b) => b.to_string(),
    other => serde_json::to_string(other).unwrap_or_default(),
  }
}
