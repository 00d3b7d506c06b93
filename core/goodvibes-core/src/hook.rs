//! Hook protocol types.
//!
//! The host runs one hook process per lifecycle event, writing a JSON object
//! on stdin and reading exactly one JSON object back from stdout. Every input
//! field is optional: hosts omit fields that do not apply to an event, and a
//! missing field must never fail the parse.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::guard::GuardVerdict;

/// Tools whose `tool_input` carries a file that was written.
const FILE_WRITING_TOOLS: [&str; 4] = ["Write", "Edit", "MultiEdit", "NotebookEdit"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookInput {
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub hook_event_name: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_response: Option<Value>,
    pub transcript_path: Option<String>,
    pub permission_mode: Option<String>,
    pub error: Option<String>,
    pub source: Option<String>,
    pub trigger: Option<String>,
    pub stop_hook_active: Option<bool>,
    /// User prompt text (UserPromptSubmit).
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    SessionStart,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    PreCompact,
    Stop,
    SessionEnd,
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::PostToolUseFailure => "PostToolUseFailure",
            Self::PreCompact => "PreCompact",
            Self::Stop => "Stop",
            Self::SessionEnd => "SessionEnd",
        }
    }
}

impl HookInput {
    pub fn parse(raw: &str) -> crate::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|e| crate::VibesError::HookInputMalformed(e.to_string()))
    }

    /// `None` for events this hook does not act on.
    pub fn to_event(&self) -> Option<HookEvent> {
        let event = match self.hook_event_name.as_deref()? {
            "SessionStart" => HookEvent::SessionStart,
            "UserPromptSubmit" => HookEvent::UserPromptSubmit,
            "PreToolUse" => HookEvent::PreToolUse,
            "PostToolUse" => HookEvent::PostToolUse,
            "PostToolUseFailure" => HookEvent::PostToolUseFailure,
            "PreCompact" => HookEvent::PreCompact,
            "Stop" | "SubagentStop" => HookEvent::Stop,
            "SessionEnd" => HookEvent::SessionEnd,
            _ => return None,
        };
        Some(event)
    }

    fn tool_input_str(&self, key: &str) -> Option<&str> {
        self.tool_input
            .as_ref()?
            .get(key)?
            .as_str()
            .filter(|s| !s.is_empty())
    }

    /// Path written by a file tool: `file_path`, `path`, or `notebook_path`.
    pub fn file_path(&self) -> Option<&str> {
        self.tool_input_str("file_path")
            .or_else(|| self.tool_input_str("path"))
            .or_else(|| self.tool_input_str("notebook_path"))
    }

    /// Shell command of a `Bash` tool call.
    pub fn command(&self) -> Option<&str> {
        match self.tool_name.as_deref() {
            Some("Bash") => self.tool_input_str("command"),
            _ => None,
        }
    }

    pub fn writes_file(&self) -> bool {
        self.tool_name
            .as_deref()
            .is_some_and(|tool| FILE_WRITING_TOOLS.contains(&tool))
    }

    /// Whether a PostToolUse write created its file.
    ///
    /// Trusts `tool_response.type` when the host reports it; otherwise a
    /// `Write` to a path not yet seen this session counts as a creation.
    pub fn is_creation(&self, seen_this_session: bool) -> bool {
        let reported = self
            .tool_response
            .as_ref()
            .and_then(|r| r.get("type"))
            .and_then(Value::as_str);
        match reported {
            Some(kind) => kind == "create",
            None => self.tool_name.as_deref() == Some("Write") && !seen_this_session,
        }
    }

    /// Failure text of a PostToolUseFailure event.
    pub fn failure_message(&self) -> Option<String> {
        if let Some(error) = self.error.as_deref().filter(|e| !e.trim().is_empty()) {
            return Some(error.to_string());
        }
        let response = self.tool_response.as_ref()?;
        ["error", "stderr", "output"]
            .iter()
            .filter_map(|key| response.get(*key).and_then(Value::as_str))
            .find(|text| !text.trim().is_empty())
            .map(str::to_string)
            .or_else(|| response.as_str().map(str::to_string))
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref().filter(|p| !p.trim().is_empty())
    }

    pub fn stop_hook_active(&self) -> bool {
        self.stop_hook_active.unwrap_or(false)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response
// ─────────────────────────────────────────────────────────────────────────────

/// Only a block is ever decided here; anything else leaves the host's own
/// permission flow in charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    pub hook_event_name: String,
    pub permission_decision: PermissionDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResponse {
    #[serde(rename = "continue")]
    pub should_continue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl Default for HookResponse {
    fn default() -> Self {
        Self::proceed()
    }
}

impl HookResponse {
    pub fn proceed() -> Self {
        Self {
            should_continue: true,
            system_message: None,
            additional_context: None,
            hook_specific_output: None,
        }
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        if !message.is_empty() {
            self.system_message = Some(message);
        }
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        if !context.is_empty() {
            self.additional_context = Some(context);
        }
        self
    }

    /// PreToolUse answer for a guard verdict.
    ///
    /// Allow emits nothing and Warn only a system message, so the host still
    /// applies its own permission prompt. Deny blocks the call.
    pub fn from_verdict(event: HookEvent, verdict: &GuardVerdict) -> Self {
        match verdict {
            GuardVerdict::Allow => Self::proceed(),
            GuardVerdict::Warn(reason) => {
                Self::proceed().with_system_message(format!("Warning: {reason}"))
            }
            GuardVerdict::Deny(reason) => Self {
                hook_specific_output: Some(HookSpecificOutput {
                    hook_event_name: event.as_str().to_string(),
                    permission_decision: PermissionDecision::Deny,
                    permission_decision_reason: Some(reason.clone()),
                }),
                ..Self::proceed()
            },
        }
    }

    pub fn is_deny(&self) -> bool {
        self.hook_specific_output
            .as_ref()
            .is_some_and(|out| out.permission_decision == PermissionDecision::Deny)
    }

    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self)
            .map_err(|e| crate::VibesError::json("serializing hook response", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> HookInput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_empty_stdin_yields_default_input() {
        let parsed = HookInput::parse("  \n").unwrap();
        assert!(parsed.hook_event_name.is_none());
        assert!(parsed.to_event().is_none());
    }

    #[test]
    fn test_malformed_stdin_is_an_error() {
        assert!(matches!(
            HookInput::parse("{not json"),
            Err(crate::VibesError::HookInputMalformed(_))
        ));
    }

    #[test]
    fn test_unknown_fields_and_events_are_tolerated() {
        let parsed = input(json!({"hook_event_name": "Notification", "extra": 1}));
        assert!(parsed.to_event().is_none());
        let parsed = input(json!({"hook_event_name": "SubagentStop"}));
        assert_eq!(parsed.to_event(), Some(HookEvent::Stop));
    }

    #[test]
    fn test_file_path_extraction_order() {
        let parsed = input(json!({"tool_input": {"path": "b.ts", "file_path": "a.ts"}}));
        assert_eq!(parsed.file_path(), Some("a.ts"));

        let parsed = input(json!({"tool_input": {"notebook_path": "n.ipynb"}}));
        assert_eq!(parsed.file_path(), Some("n.ipynb"));

        let parsed = input(json!({"tool_input": {"file_path": ""}}));
        assert_eq!(parsed.file_path(), None);
    }

    #[test]
    fn test_command_only_for_bash() {
        let bash = input(json!({"tool_name": "Bash", "tool_input": {"command": "ls"}}));
        assert_eq!(bash.command(), Some("ls"));
        let edit = input(json!({"tool_name": "Edit", "tool_input": {"command": "ls"}}));
        assert_eq!(edit.command(), None);
    }

    #[test]
    fn test_creation_detection() {
        let reported = input(json!({"tool_name": "Write", "tool_response": {"type": "update"}}));
        assert!(!reported.is_creation(false));

        let reported = input(json!({"tool_name": "Edit", "tool_response": {"type": "create"}}));
        assert!(reported.is_creation(true));

        let inferred = input(json!({"tool_name": "Write"}));
        assert!(inferred.is_creation(false));
        assert!(!inferred.is_creation(true));

        let edit = input(json!({"tool_name": "Edit"}));
        assert!(!edit.is_creation(false));
    }

    #[test]
    fn test_failure_message_sources() {
        let direct = input(json!({"error": "boom"}));
        assert_eq!(direct.failure_message().as_deref(), Some("boom"));

        let nested = input(json!({"tool_response": {"stderr": "tsc failed", "output": ""}}));
        assert_eq!(nested.failure_message().as_deref(), Some("tsc failed"));

        assert_eq!(input(json!({})).failure_message(), None);
    }

    #[test]
    fn test_response_shape() {
        let json = serde_json::to_value(HookResponse::proceed()).unwrap();
        assert_eq!(json, json!({"continue": true}));

        let json = serde_json::to_value(
            HookResponse::proceed()
                .with_system_message("Created checkpoint")
                .with_context(""),
        )
        .unwrap();
        assert_eq!(json, json!({"continue": true, "systemMessage": "Created checkpoint"}));
    }

    #[test]
    fn test_deny_response_shape() {
        let verdict = GuardVerdict::Deny("no".into());
        let response = HookResponse::from_verdict(HookEvent::PreToolUse, &verdict);
        assert!(response.is_deny());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "continue": true,
                "hookSpecificOutput": {
                    "hookEventName": "PreToolUse",
                    "permissionDecision": "deny",
                    "permissionDecisionReason": "no"
                }
            })
        );
    }

    #[test]
    fn test_warn_allows_with_message() {
        let verdict = GuardVerdict::Warn("careful".into());
        let response = HookResponse::from_verdict(HookEvent::PreToolUse, &verdict);
        assert!(!response.is_deny());
        assert_eq!(response.system_message.as_deref(), Some("Warning: careful"));
        assert!(response.hook_specific_output.is_none());
    }

    #[test]
    fn test_allow_leaves_permission_to_host() {
        let response = HookResponse::from_verdict(HookEvent::PreToolUse, &GuardVerdict::Allow);
        assert_eq!(response, HookResponse::proceed());
        assert_eq!(serde_json::to_value(&response).unwrap(), json!({"continue": true}));
    }
}
