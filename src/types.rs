use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AgentMessage {
    pub(crate) role: String,
    #[serde(default)]
    pub(crate) content: Option<String>,
    #[serde(default)]
    pub(crate) tool_calls: Vec<AgentToolCall>,
    #[serde(default)]
    pub(crate) tool_call_id: Option<String>,
    #[serde(default)]
    pub(crate) is_error: Option<bool>,
}

impl AgentMessage {
    pub(crate) fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub(crate) fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        AgentMessage {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: None,
        }
    }

    pub(crate) fn tool_result(call_id: &str, content: String, is_error: bool) -> Self {
        AgentMessage {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.to_string()),
            is_error: if is_error { Some(true) } else { None },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AgentToolCall {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ModelRequest {
    pub(crate) messages: Vec<AgentMessage>,
    pub(crate) tools: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelResponse {
    pub(crate) message: AgentMessage,
}

/// Successful tool execution: a short text summary for the model plus the
/// structured adapter payload.
#[derive(Debug, Clone)]
pub(crate) struct ToolOutcome {
    pub(crate) output: String,
    pub(crate) details: serde_json::Value,
}

/// Typed failure shape shared by the credential store, the invoker, and the
/// delivery path. Returned, never panicked or thrown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ToolError {
    /// The user has not (or no longer) authorized the required scope set.
    /// Carries the URL the user must visit; callers relay it verbatim.
    AuthorizationRequired { url: String },
    /// Unknown tool name or malformed arguments. Never retried.
    ContractViolation(String),
    /// Network-level or upstream failure that may clear on its own.
    Transient(String),
    /// The outbound channel rejected a message after the side effect
    /// already completed.
    Delivery(String),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::AuthorizationRequired { url } => {
                write!(f, "authorization required: {url}")
            }
            ToolError::ContractViolation(msg) => write!(f, "contract violation: {msg}"),
            ToolError::Transient(msg) => write!(f, "transient failure: {msg}"),
            ToolError::Delivery(msg) => write!(f, "delivery failure: {msg}"),
        }
    }
}

impl std::error::Error for ToolError {}

impl ToolError {
    /// User-facing phrasing. Authorization keeps the URL as a guided next
    /// step; everything else stays generic.
    pub(crate) fn user_text(&self) -> String {
        match self {
            ToolError::AuthorizationRequired { url } => format!(
                "⚠️ I need your permission first. Please authorize access here: {url}"
            ),
            ToolError::ContractViolation(_) => {
                "Sorry, something went wrong with that request.".to_string()
            }
            ToolError::Transient(_) => {
                "That service is not responding right now. Please try again in a moment."
                    .to_string()
            }
            ToolError::Delivery(_) => {
                "I finished the task but could not send the confirmation message.".to_string()
            }
        }
    }
}

/// Result of one full engine turn.
#[derive(Debug)]
pub(crate) struct TurnOutcome {
    pub(crate) final_text: Option<String>,
    pub(crate) steps_used: usize,
    pub(crate) tools_executed: Vec<String>,
}
