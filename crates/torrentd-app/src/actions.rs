//! Minimal default workflow action.
//!
//! The action catalog itself is out of scope: call sites supply whatever
//! `ActionFactory` fits their deployment. This module exists only so the
//! binary has something to execute steps against; it is not a catalog.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use torrentd_workflow::{Action, ActionFactory, ActionParams};

/// Renders its `with` value against the run's context and logs the result.
#[derive(Debug, Default)]
pub(crate) struct LogAction;

#[async_trait]
impl Action for LogAction {
    async fn invoke(
        &self,
        params: ActionParams<'_>,
    ) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
        let rendered = match params.input().as_str() {
            Some(text) => params.render(text, true),
            None => params.input().clone(),
        };
        info!(output = %rendered, "log action");
        Ok(rendered)
    }
}

/// Resolves only the built-in `log` action.
#[derive(Debug, Default)]
pub(crate) struct LogActionFactory;

impl ActionFactory for LogActionFactory {
    fn construct(&self, uses: &str) -> Option<Arc<dyn Action>> {
        match uses {
            "log" => Some(Arc::new(LogAction)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrentd_workflow::{RenderContext, ValueProvider};

    #[tokio::test]
    async fn log_action_renders_raw_input() {
        let action = LogAction;
        let mut context = RenderContext::new();
        context.bind("value", Arc::new(ValueProvider::new(serde_json::json!("hello"))));
        let params = ActionParams::new(serde_json::Value::String("value".to_string()), &context);
        let output = action.invoke(params).await.unwrap();
        assert_eq!(output, serde_json::Value::String("hello".to_string()));
    }

    #[tokio::test]
    async fn log_action_passes_through_non_string_input() {
        let action = LogAction;
        let context = RenderContext::new();
        let params = ActionParams::new(serde_json::json!({"a": 1}), &context);
        let output = action.invoke(params).await.unwrap();
        assert_eq!(output, serde_json::json!({"a": 1}));
    }

    #[test]
    fn factory_resolves_log_and_rejects_others() {
        let factory = LogActionFactory;
        assert!(factory.construct("log").is_some());
        assert!(factory.construct("nonexistent").is_none());
    }
}
