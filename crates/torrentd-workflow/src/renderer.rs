//! Expression renderer: `{{ <expr> }}` interpolation in text mode, or a
//! single `<expr>` evaluated whole in raw mode.
//!
//! `<expr>` is a dotted/bracketed path rooted at a named context provider,
//! optionally followed by `| filter` pipe stages. Path resolution that
//! misses a key or index yields the absent value (JSON null) rather than
//! an error.

use std::sync::Arc;

use serde_json::Value;

/// Supplies a structured value for one name in a [`RenderContext`].
pub trait ContextProvider: Send + Sync {
    /// The provider's current value, recomputed on every access.
    fn value(&self) -> Value;
}

/// Ordered mapping from provider name to the value it supplies. Order does
/// not affect evaluation (lookup is by name) but is preserved for callers
/// that want to inspect or display the context.
#[derive(Clone, Default)]
pub struct RenderContext {
    providers: Vec<(String, Arc<dyn ContextProvider>)>,
}

impl RenderContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a name to a provider, replacing any existing binding for that name.
    pub fn bind(&mut self, name: impl Into<String>, provider: Arc<dyn ContextProvider>) {
        let name = name.into();
        if let Some(existing) = self.providers.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = provider;
        } else {
            self.providers.push((name, provider));
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.providers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, provider)| provider.value())
    }
}

/// Whether a rendered value counts as falsy for a workflow condition:
/// boolean `false`, JSON null (the absent value), or the integer `0`.
#[must_use]
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => !b,
        Value::Null => true,
        Value::Number(n) => n.as_i64() == Some(0) || n.as_u64() == Some(0),
        _ => false,
    }
}

/// Evaluates `expr` as a single raw expression against `context`.
#[must_use]
pub fn render_raw(expr: &str, context: &RenderContext) -> Value {
    let parsed = ParsedExpr::parse(expr.trim());
    parsed.evaluate(context)
}

/// Interpolates every `{{ <expr> }}` marker in `template` against `context`,
/// returning the assembled string.
#[must_use]
pub fn render_text(template: &str, context: &RenderContext) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            output.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let expr = after_open[..end].trim();
        let value = render_raw(expr, context);
        output.push_str(&value_to_display(&value));
        rest = &after_open[end + 2..];
    }
    output.push_str(rest);
    output
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone)]
struct FilterCall {
    name: String,
    args: Vec<Value>,
}

struct ParsedExpr {
    provider: String,
    path: Vec<PathSegment>,
    filters: Vec<FilterCall>,
}

impl ParsedExpr {
    fn parse(expr: &str) -> Self {
        let mut stages = split_top_level(expr, '|');
        let path_expr = if stages.is_empty() {
            String::new()
        } else {
            stages.remove(0)
        };
        let (provider, path) = parse_path(path_expr.trim());
        let filters = stages.iter().map(|stage| parse_filter(stage.trim())).collect();
        Self {
            provider,
            path,
            filters,
        }
    }

    fn evaluate(&self, context: &RenderContext) -> Value {
        let mut current = context.lookup(&self.provider).unwrap_or(Value::Null);
        for segment in &self.path {
            current = navigate(&current, segment);
        }
        for filter in &self.filters {
            current = apply_filter(filter, current);
        }
        current
    }
}

fn navigate(value: &Value, segment: &PathSegment) -> Value {
    match (value, segment) {
        (Value::Object(map), PathSegment::Key(key)) => map.get(key).cloned().unwrap_or(Value::Null),
        (Value::Array(items), PathSegment::Index(index)) => items.get(*index).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn apply_filter(filter: &FilterCall, value: Value) -> Value {
    match filter.name.as_str() {
        "default" => {
            if is_falsy(&value) {
                filter.args.first().cloned().unwrap_or(Value::Null)
            } else {
                value
            }
        }
        "json" => Value::String(serde_json::to_string(&value).unwrap_or_default()),
        _ => value,
    }
}

fn parse_path(expr: &str) -> (String, Vec<PathSegment>) {
    let mut provider_end = expr.len();
    for (index, ch) in expr.char_indices() {
        if ch == '.' || ch == '[' {
            provider_end = index;
            break;
        }
    }
    let provider = expr[..provider_end].to_string();
    let mut rest = &expr[provider_end..];
    let mut segments = Vec::new();

    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('.') {
            let end = stripped
                .find(['.', '['])
                .unwrap_or(stripped.len());
            segments.push(PathSegment::Key(stripped[..end].to_string()));
            rest = &stripped[end..];
        } else if let Some(stripped) = rest.strip_prefix('[') {
            let Some(close) = stripped.find(']') else {
                break;
            };
            let inner = stripped[..close].trim();
            if let Some(literal) = inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                segments.push(PathSegment::Key(literal.to_string()));
            } else if let Ok(index) = inner.parse::<usize>() {
                segments.push(PathSegment::Index(index));
            }
            rest = &stripped[close + 1..];
        } else {
            break;
        }
    }
    (provider, segments)
}

fn parse_filter(stage: &str) -> FilterCall {
    let Some(open) = stage.find('(') else {
        return FilterCall {
            name: stage.to_string(),
            args: Vec::new(),
        };
    };
    let name = stage[..open].trim().to_string();
    let close = stage.rfind(')').unwrap_or(stage.len());
    let args_src = &stage[open + 1..close];
    let args = split_top_level(args_src, ',')
        .into_iter()
        .filter(|arg| !arg.trim().is_empty())
        .map(|arg| parse_literal(arg.trim()))
        .collect();
    FilterCall { name, args }
}

fn parse_literal(text: &str) -> Value {
    if let Some(inner) = text.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Value::String(inner.to_string());
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => text
            .parse::<i64>()
            .map_or_else(|_| Value::String(text.to_string()), Value::from),
    }
}

fn split_top_level(text: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut in_quotes = false;
    let mut current = String::new();
    for ch in text.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '(' if !in_quotes => {
                depth += 1;
                current.push(ch);
            }
            ')' if !in_quotes => {
                depth -= 1;
                current.push(ch);
            }
            c if c == separator && !in_quotes && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// A context provider wrapping an in-memory JSON value, used for the
/// trigger-event provider and similar fixed snapshots.
pub struct ValueProvider(Value);

impl ValueProvider {
    /// Wraps `value` as a context provider.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }
}

impl ContextProvider for ValueProvider {
    fn value(&self) -> Value {
        self.0.clone()
    }
}

/// A context provider over an appending list of step outputs. Cloning the
/// handle shares the same underlying list.
#[derive(Clone, Default)]
pub struct StepsProvider {
    outputs: Arc<std::sync::Mutex<Vec<Value>>>,
}

impl StepsProvider {
    /// A fresh, empty steps provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one step's output.
    pub fn push(&self, output: Value) {
        self.outputs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(output);
    }
}

impl ContextProvider for StepsProvider {
    fn value(&self) -> Value {
        Value::Array(
            self.outputs
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context_with_event(event: Value) -> RenderContext {
        let mut context = RenderContext::new();
        context.bind("event", Arc::new(ValueProvider::new(event)));
        context
    }

    #[test]
    fn renders_dotted_path() {
        let context = context_with_event(json!({"torrent_id": "abc"}));
        assert_eq!(render_raw("event.torrent_id", &context), json!("abc"));
    }

    #[test]
    fn renders_bracketed_index() {
        let mut context = RenderContext::new();
        let steps = StepsProvider::new();
        steps.push(json!({"a": 1}));
        steps.push(json!({"a": 2}));
        context.bind("steps", Arc::new(steps));
        assert_eq!(render_raw("steps[1].a", &context), json!(2));
    }

    #[test]
    fn missing_key_yields_null_not_error() {
        let context = context_with_event(json!({"torrent_id": "abc"}));
        assert_eq!(render_raw("event.missing", &context), Value::Null);
        assert_eq!(render_raw("nonexistent_provider.x", &context), Value::Null);
    }

    #[test]
    fn default_filter_substitutes_on_falsy() {
        let context = context_with_event(json!({"name": null}));
        assert_eq!(
            render_raw(r#"event.name | default("unnamed")"#, &context),
            json!("unnamed")
        );
        let context = context_with_event(json!({"name": "real"}));
        assert_eq!(render_raw(r#"event.name | default("unnamed")"#, &context), json!("real"));
    }

    #[test]
    fn json_filter_serializes_value() {
        let context = context_with_event(json!({"a": 1}));
        assert_eq!(render_raw("event | json", &context), json!(r#"{"a":1}"#));
    }

    #[test]
    fn text_mode_interpolates_multiple_markers() {
        let context = context_with_event(json!({"torrent_id": "abc", "name": "Demo"}));
        let rendered = render_text("torrent {{ event.torrent_id }} named {{ event.name }}", &context);
        assert_eq!(rendered, "torrent abc named Demo");
    }

    #[test]
    fn falsy_contract_matches_false_null_and_zero() {
        assert!(is_falsy(&Value::Bool(false)));
        assert!(is_falsy(&Value::Null));
        assert!(is_falsy(&json!(0)));
        assert!(!is_falsy(&Value::Bool(true)));
        assert!(!is_falsy(&json!(1)));
        assert!(!is_falsy(&json!("")));
    }
}
