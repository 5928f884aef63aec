//! JSON command API.
//!
//! ```text
//! {"action": "evaluate" | "check_facts", "payload": {...}}
//!     └──> {"status": "ok" | "error", "message"?, "data"?}
//! ```

use anyhow::{Context as AnyhowContext, Result};
use configurator_engine::{Engine, EngineProfile};
use configurator_facts::{CompletenessWarning, FactStoreFactory, GraphStats, RequestContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub action: CommandAction,
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Evaluate,
    CheckFacts,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluatePayload {
    pub facts: PathBuf,
    #[serde(default)]
    pub context: RequestContext,
    /// Builtin profile name or profile file; overrides the process profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckFactsPayload {
    pub facts: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct CheckFactsOutput {
    pub facts: PathBuf,
    pub stats: GraphStats,
    pub warnings: Vec<CompletenessWarning>,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Ok,
    Error,
}

impl CommandResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: None,
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Error,
            message: Some(message.into()),
            data: Value::Null,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == CommandStatus::Error
    }
}

pub struct CommandHandler {
    factory: FactStoreFactory,
    profile: EngineProfile,
}

impl CommandHandler {
    pub fn new(profile: EngineProfile) -> Self {
        Self {
            factory: FactStoreFactory::new(),
            profile,
        }
    }

    pub fn execute(&self, request: CommandRequest) -> CommandResponse {
        let action = request.action;
        match self.dispatch(request) {
            Ok(data) => CommandResponse::ok(data),
            Err(err) => {
                log::warn!("{action:?} failed: {err:#}");
                CommandResponse::error(format!("{err:#}"))
            }
        }
    }

    fn dispatch(&self, request: CommandRequest) -> Result<Value> {
        match request.action {
            CommandAction::Evaluate => {
                let payload: EvaluatePayload = serde_json::from_value(request.payload)
                    .context("Invalid evaluate payload")?;
                self.evaluate(payload)
            }
            CommandAction::CheckFacts => {
                let payload: CheckFactsPayload = serde_json::from_value(request.payload)
                    .context("Invalid check_facts payload")?;
                self.check_facts(payload)
            }
        }
    }

    fn evaluate(&self, payload: EvaluatePayload) -> Result<Value> {
        let profile = match payload.profile.as_deref() {
            Some(spec) => EngineProfile::resolve(spec)?,
            None => self.profile.clone(),
        };
        let accessor = self
            .factory
            .connect(&payload.facts)
            .with_context(|| format!("Failed to load facts from {}", payload.facts.display()))?;
        let verdict = Engine::new(profile).evaluate_with(&accessor, &payload.context)?;
        Ok(serde_json::to_value(verdict)?)
    }

    fn check_facts(&self, payload: CheckFactsPayload) -> Result<Value> {
        let accessor = self
            .factory
            .connect(&payload.facts)
            .with_context(|| format!("Failed to load facts from {}", payload.facts.display()))?;
        let graph = accessor.graph();
        let output = CheckFactsOutput {
            stats: graph.stats(),
            warnings: graph.warnings().to_vec(),
            facts: payload.facts,
        };
        Ok(serde_json::to_value(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn demo_facts() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos/facts.json")
    }

    #[test]
    fn unknown_payload_fields_are_errors() {
        let handler = CommandHandler::new(EngineProfile::default());
        let request: CommandRequest = serde_json::from_value(json!({
            "action": "check_facts",
            "payload": {"facts": demo_facts(), "verbose": true}
        }))
        .unwrap();

        let response = handler.execute(request);
        assert!(response.is_error());
        assert!(response
            .message
            .unwrap()
            .contains("Invalid check_facts payload"));
    }

    #[test]
    fn evaluate_returns_verdict_data() {
        let handler = CommandHandler::new(EngineProfile::default());
        let request: CommandRequest = serde_json::from_value(json!({
            "action": "evaluate",
            "payload": {
                "facts": demo_facts(),
                "context": {"application": "office", "throughput": 1000, "product": "standard_cabinet"}
            }
        }))
        .unwrap();

        let response = handler.execute(request);
        assert_eq!(response.status, CommandStatus::Ok);
        assert_eq!(
            response.data["recommendation"]["candidate"],
            json!("standard_cabinet")
        );
    }

    #[test]
    fn missing_payload_defaults_to_empty_object() {
        let request: CommandRequest =
            serde_json::from_value(json!({"action": "check_facts"})).unwrap();
        assert_eq!(request.payload, json!({}));
    }
}
