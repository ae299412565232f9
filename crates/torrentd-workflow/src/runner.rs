//! Workflow runner: trigger matching and sequential step execution with a
//! shared, growing context tree.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::document::WorkflowDocument;
use crate::error::{WorkflowError, WorkflowResult};
use crate::renderer::{is_falsy, render_raw, render_text, ContextProvider, RenderContext, StepsProvider};

/// Parameters passed to one action invocation: its raw `with` value, plus a
/// renderer closure scoped to the run's context-so-far.
pub struct ActionParams<'a> {
    input: serde_json::Value,
    context: &'a RenderContext,
}

impl<'a> ActionParams<'a> {
    /// Builds parameters directly, for actions tested outside a full run.
    #[must_use]
    pub const fn new(input: serde_json::Value, context: &'a RenderContext) -> Self {
        Self { input, context }
    }

    /// The step's raw, unrendered `with` value.
    #[must_use]
    pub const fn input(&self) -> &serde_json::Value {
        &self.input
    }

    /// Renders `text` against the run's current context. `raw` selects raw
    /// expression mode (whole input is one expression) over text
    /// interpolation mode.
    #[must_use]
    pub fn render(&self, text: &str, raw: bool) -> serde_json::Value {
        if raw {
            render_raw(text, self.context)
        } else {
            serde_json::Value::String(render_text(text, self.context))
        }
    }
}

/// One runnable workflow action, resolved by name via [`ActionFactory`].
#[async_trait]
pub trait Action: Send + Sync {
    /// Runs the action to completion, returning its output value.
    ///
    /// Implementations may fail; the runner logs the failure and halts the
    /// workflow rather than propagating it to the caller.
    async fn invoke(&self, params: ActionParams<'_>) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>>;
}

/// Resolves action names (a workflow step's `uses` field) to live [`Action`]s.
pub trait ActionFactory: Send + Sync {
    /// Constructs the action named `uses`, or `None` if no such action exists.
    fn construct(&self, uses: &str) -> Option<Arc<dyn Action>>;
}

/// Evaluates whether `document` should run for `event_name` given `context`.
#[must_use]
pub fn should_execute(document: &WorkflowDocument, event_name: &str, context: &RenderContext) -> bool {
    if !document.trigger_events.contains(event_name) {
        return false;
    }
    match &document.condition {
        Some(condition) => !is_falsy(&render_raw(condition, context)),
        None => true,
    }
}

/// Resolves every step's action up front; if any name is unknown, no step
/// runs and the first missing name is reported.
fn resolve_steps(
    document: &WorkflowDocument,
    factory: &dyn ActionFactory,
) -> WorkflowResult<Vec<(Arc<dyn Action>, serde_json::Value)>> {
    let mut resolved = Vec::with_capacity(document.steps.len());
    for step in &document.steps {
        let Some(action) = factory.construct(&step.uses) else {
            warn!(uses = %step.uses, "invalid action name");
            return Err(WorkflowError::UnknownAction {
                uses: step.uses.clone(),
            });
        };
        resolved.push((action, step.with.clone()));
    }
    Ok(resolved)
}

/// Runs `document`'s steps in order against `base_context`, threading each
/// step's output into a fresh `steps` provider that subsequent renders see.
///
/// Matches at most one step in flight at a time. A step that returns an
/// error halts the workflow after logging; it is not reported to the
/// caller, matching the source's "log and stop" contract. An action that
/// never completes leaks the run — no timeout is applied (see the module's
/// design notes).
pub async fn execute(
    document: &WorkflowDocument,
    factory: &dyn ActionFactory,
    base_context: &RenderContext,
) -> WorkflowResult<()> {
    let resolved = resolve_steps(document, factory)?;

    let mut context = base_context.clone();
    let steps_provider = StepsProvider::new();
    let steps_handle: Arc<dyn ContextProvider> = Arc::new(steps_provider.clone());
    context.bind("steps", steps_handle);

    for (action, with) in resolved {
        let params = ActionParams {
            input: with,
            context: &context,
        };
        match action.invoke(params).await {
            Ok(output) => steps_provider.push(output),
            Err(source) => {
                error!(error = %source, "error when invoking action");
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::ValueProvider;
    use serde_json::json;
    use std::sync::Mutex;

    struct EchoAction;

    #[async_trait]
    impl Action for EchoAction {
        async fn invoke(&self, params: ActionParams<'_>) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
            Ok(params.input().clone())
        }
    }

    struct RenderingAction;

    #[async_trait]
    impl Action for RenderingAction {
        async fn invoke(&self, params: ActionParams<'_>) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
            let text = params.input().as_str().unwrap_or_default();
            Ok(params.render(text, true))
        }
    }

    struct FailingAction;

    #[async_trait]
    impl Action for FailingAction {
        async fn invoke(&self, _params: ActionParams<'_>) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
            Err("boom".into())
        }
    }

    struct TestFactory;

    impl ActionFactory for TestFactory {
        fn construct(&self, uses: &str) -> Option<Arc<dyn Action>> {
            match uses {
                "echo" => Some(Arc::new(EchoAction)),
                "render" => Some(Arc::new(RenderingAction)),
                "fail" => Some(Arc::new(FailingAction)),
                _ => None,
            }
        }
    }

    fn base_context(event: serde_json::Value) -> RenderContext {
        let mut context = RenderContext::new();
        context.bind("event", Arc::new(ValueProvider::new(event)));
        context
    }

    #[test]
    fn should_execute_false_for_wrong_event() {
        let doc = WorkflowDocument::parse("on: torrent-added\nsteps: []\n").unwrap();
        let context = base_context(json!({}));
        assert!(!should_execute(&doc, "torrent-removed", &context));
    }

    #[test]
    fn should_execute_respects_condition() {
        let yaml = "on: torrent-finished\nif: \"event.ok\"\nsteps: []\n";
        let doc = WorkflowDocument::parse(yaml).unwrap();
        assert!(should_execute(&doc, "torrent-finished", &base_context(json!({"ok": true}))));
        assert!(!should_execute(
            &doc,
            "torrent-finished",
            &base_context(json!({"ok": false}))
        ));
    }

    #[tokio::test]
    async fn execute_threads_step_outputs_into_later_renders() {
        let yaml = r#"
on: torrent-added
steps:
  - uses: echo
    with:
      value: 1
  - uses: render
    with: "steps[0].value"
"#;
        let doc = WorkflowDocument::parse(yaml).unwrap();
        let context = base_context(json!({}));
        execute(&doc, &TestFactory, &context).await.unwrap();
    }

    #[tokio::test]
    async fn execute_aborts_on_unknown_action() {
        let yaml = "on: torrent-added\nsteps:\n  - uses: nonexistent\n";
        let doc = WorkflowDocument::parse(yaml).unwrap();
        let context = base_context(json!({}));
        let result = execute(&doc, &TestFactory, &context).await;
        assert!(matches!(result, Err(WorkflowError::UnknownAction { .. })));
    }

    #[tokio::test]
    async fn execute_halts_after_failing_step_without_propagating() {
        let yaml = "on: torrent-added\nsteps:\n  - uses: fail\n  - uses: echo\n    with: 1\n";
        let doc = WorkflowDocument::parse(yaml).unwrap();
        let ran_second = Arc::new(Mutex::new(false));
        struct TrackingFactory(Arc<Mutex<bool>>);
        struct TrackingEcho(Arc<Mutex<bool>>);
        #[async_trait]
        impl Action for TrackingEcho {
            async fn invoke(&self, _params: ActionParams<'_>) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
                *self.0.lock().unwrap() = true;
                Ok(serde_json::Value::Null)
            }
        }
        impl ActionFactory for TrackingFactory {
            fn construct(&self, uses: &str) -> Option<Arc<dyn Action>> {
                match uses {
                    "fail" => Some(Arc::new(FailingAction)),
                    "echo" => Some(Arc::new(TrackingEcho(Arc::clone(&self.0)))),
                    _ => None,
                }
            }
        }

        let context = base_context(json!({}));
        let result = execute(&doc, &TrackingFactory(Arc::clone(&ran_second)), &context).await;
        assert!(result.is_ok());
        assert!(!*ran_second.lock().unwrap());
    }
}
