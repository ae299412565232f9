//! Parsed workflow documents: trigger set, optional condition, and the
//! ordered step list.

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::{WorkflowError, WorkflowResult};

#[derive(Deserialize)]
struct RawDocument {
    on: String,
    #[serde(rename = "if")]
    condition: Option<String>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    uses: String,
    #[serde(default)]
    with: serde_json::Value,
}

/// One action invocation within a workflow.
#[derive(Debug, Clone)]
pub struct Step {
    /// Name of the action to construct and invoke.
    pub uses: String,
    /// Raw, unrendered parameters passed to the action.
    pub with: serde_json::Value,
}

/// A parsed workflow: the set of trigger event names it fires on, an
/// optional gating condition, and its ordered steps.
#[derive(Debug, Clone)]
pub struct WorkflowDocument {
    /// Event names this workflow runs in response to.
    pub trigger_events: HashSet<String>,
    /// Raw expression gating execution, rendered in raw mode.
    pub condition: Option<String>,
    /// Steps to execute in order.
    pub steps: Vec<Step>,
}

impl WorkflowDocument {
    /// Parses a workflow document from its YAML source.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Parse`] if the document is not valid YAML or
    /// is missing required fields.
    pub fn parse(yaml: &str) -> WorkflowResult<Self> {
        let raw: RawDocument = serde_yaml::from_str(yaml).map_err(WorkflowError::Parse)?;
        Ok(Self {
            trigger_events: HashSet::from([raw.on]),
            condition: raw.condition,
            steps: raw
                .steps
                .into_iter()
                .map(|step| Step {
                    uses: step.uses,
                    with: step.with,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let doc = WorkflowDocument::parse("on: torrent-added\nsteps: []\n").unwrap();
        assert_eq!(doc.trigger_events, HashSet::from(["torrent-added".to_string()]));
        assert!(doc.condition.is_none());
        assert!(doc.steps.is_empty());
    }

    #[test]
    fn parses_document_with_condition_and_steps() {
        let yaml = r#"
on: torrent-finished
if: "{{ event.total_download }}"
steps:
  - uses: notify
    with:
      message: "done"
  - uses: log
"#;
        let doc = WorkflowDocument::parse(yaml).unwrap();
        assert_eq!(doc.condition.as_deref(), Some("{{ event.total_download }}"));
        assert_eq!(doc.steps.len(), 2);
        assert_eq!(doc.steps[0].uses, "notify");
        assert_eq!(doc.steps[1].with, serde_json::Value::Null);
    }

    #[test]
    fn missing_on_field_fails_to_parse() {
        assert!(WorkflowDocument::parse("steps: []\n").is_err());
    }
}
