use std::sync::Arc;

use crate::{
    tool_definitions_json, truncate_chars, AgentMessage, AgentToolCall, ModelClient, ModelRequest,
    ToolError, ToolInvoker, ToolOutcome, TurnOutcome,
};

pub(crate) const DEFAULT_MAX_STEPS: usize = 8;
const MAX_CONSECUTIVE_MODEL_FAILURES: usize = 3;
const MAX_TOOL_OUTPUT_CHARS: usize = 8000;

const GENERIC_FAILURE_TEXT: &str =
    "Sorry, I wasn't able to finish that. Could you try asking again?";

/// Main persona prompt. The follow-up path has its own, shorter prompt.
pub(crate) const PERSONA_PROMPT: &str = "You are Sheryl, a sharp and warm \
personal assistant chatting with your user over WhatsApp. You manage their \
Gmail, their Google Calendar, and their WhatsApp messages through the tools \
you are given. Act, don't speculate: when the user asks for something a tool \
can do, call the tool and answer from its result. Never invent emails, \
events, or message ids. If a tool result says authorization is required, \
relay the authorization link to the user exactly as given and explain in one \
sentence why you need it. Keep replies short and conversational, the way \
people write on WhatsApp. No markdown.";

/// Seam between the step loop and tool execution.
pub(crate) trait ToolRunner: Send + Sync {
    fn invoke(
        &self,
        call: &AgentToolCall,
        notify_target: Option<&str>,
    ) -> Result<ToolOutcome, ToolError>;
}

impl ToolRunner for ToolInvoker {
    fn invoke(
        &self,
        call: &AgentToolCall,
        notify_target: Option<&str>,
    ) -> Result<ToolOutcome, ToolError> {
        ToolInvoker::invoke(self, call, notify_target)
    }
}

/// Drives one conversation turn: model call, sequential tool execution, model
/// call again, until the model answers in plain text or the step budget runs
/// out.
pub(crate) struct ConversationEngine {
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolRunner>,
    system_prompt: String,
    max_steps: usize,
}

impl ConversationEngine {
    pub(crate) fn new(
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolRunner>,
        system_prompt: impl Into<String>,
        max_steps: usize,
    ) -> Self {
        ConversationEngine {
            model,
            tools,
            system_prompt: system_prompt.into(),
            max_steps: max_steps.max(1),
        }
    }

    /// `notify_target` rides along to the invoker so completed actions can be
    /// confirmed out of band; a turn from the CLI has none.
    pub(crate) fn run_turn(&self, utterance: &str, notify_target: Option<&str>) -> TurnOutcome {
        let mut messages = vec![
            AgentMessage::system(&self.system_prompt),
            AgentMessage::user(utterance),
        ];
        let tool_defs = tool_definitions_json();
        let mut tools_executed: Vec<String> = Vec::new();
        let mut consecutive_failures = 0usize;
        let mut steps_used = 0usize;

        while steps_used < self.max_steps {
            steps_used += 1;
            let request = ModelRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
            };
            let message = match self.model.complete(&request) {
                Ok(message) => {
                    consecutive_failures = 0;
                    message
                }
                Err(e) => {
                    consecutive_failures += 1;
                    eprintln!(
                        "[engine] model call failed \
                         ({consecutive_failures}/{MAX_CONSECUTIVE_MODEL_FAILURES}): {e}"
                    );
                    if consecutive_failures >= MAX_CONSECUTIVE_MODEL_FAILURES {
                        return TurnOutcome {
                            final_text: Some(GENERIC_FAILURE_TEXT.to_string()),
                            steps_used,
                            tools_executed,
                        };
                    }
                    continue;
                }
            };

            let tool_calls = message.tool_calls.clone();
            messages.push(message.clone());
            if tool_calls.is_empty() {
                return TurnOutcome {
                    final_text: message.content,
                    steps_used,
                    tools_executed,
                };
            }

            for call in &tool_calls {
                let (content, is_error) = match self.tools.invoke(call, notify_target) {
                    Ok(outcome) => {
                        (truncate_chars(&outcome.output, MAX_TOOL_OUTPUT_CHARS), false)
                    }
                    Err(e @ ToolError::AuthorizationRequired { .. }) => {
                        // Nothing useful can happen until the user grants
                        // access; answer with the guided link right away.
                        tools_executed.push(call.name.clone());
                        return TurnOutcome {
                            final_text: Some(e.user_text()),
                            steps_used,
                            tools_executed,
                        };
                    }
                    Err(e) => {
                        eprintln!("[engine] tool {} failed: {e}", call.name);
                        (e.to_string(), true)
                    }
                };
                tools_executed.push(call.name.clone());
                messages.push(AgentMessage::tool_result(&call.id, content, is_error));
            }
        }

        eprintln!("[engine] step budget exhausted after {steps_used} steps");
        TurnOutcome {
            final_text: Some(GENERIC_FAILURE_TEXT.to_string()),
            steps_used,
            tools_executed,
        }
    }
}
