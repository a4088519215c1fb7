use serde::Deserialize;

use crate::{Capability, ToolError};

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WhatsAppSendArgs {
    pub(crate) to: String,
    pub(crate) body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WhatsAppReactArgs {
    pub(crate) to: String,
    pub(crate) emoji: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WhatsAppSendFileArgs {
    pub(crate) to: String,
    pub(crate) file_url: String,
    #[serde(default)]
    pub(crate) caption: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GmailListArgs {
    #[serde(default)]
    pub(crate) query: Option<String>,
    #[serde(default)]
    pub(crate) max_results: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GmailSendArgs {
    pub(crate) to: String,
    pub(crate) subject: String,
    pub(crate) body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GmailReplyArgs {
    pub(crate) message_id: String,
    pub(crate) body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GmailFlagArgs {
    pub(crate) message_id: String,
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GmailDeleteArgs {
    pub(crate) message_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GmailMarkReadArgs {
    pub(crate) message_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GcalListArgs {
    #[serde(default)]
    pub(crate) max_results: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GcalCreateArgs {
    pub(crate) summary: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    pub(crate) start: String,
    pub(crate) end: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GcalUpdateArgs {
    pub(crate) event_id: String,
    #[serde(default)]
    pub(crate) summary: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GcalDeleteArgs {
    pub(crate) event_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GcalSearchArgs {
    #[serde(default)]
    pub(crate) keyword: Option<String>,
    #[serde(default)]
    pub(crate) attendee_email: Option<String>,
    #[serde(default)]
    pub(crate) max_results: Option<usize>,
}

/// The closed set of tools. Name strings exist only at this boundary; past
/// it, every invocation is a checked variant with typed arguments.
#[derive(Debug, Clone)]
pub(crate) enum ToolRequest {
    WhatsAppSend(WhatsAppSendArgs),
    WhatsAppReact(WhatsAppReactArgs),
    WhatsAppSendFile(WhatsAppSendFileArgs),
    GmailList(GmailListArgs),
    GmailSend(GmailSendArgs),
    GmailReply(GmailReplyArgs),
    GmailFlag(GmailFlagArgs),
    GmailDelete(GmailDeleteArgs),
    GmailMarkRead(GmailMarkReadArgs),
    GcalList(GcalListArgs),
    GcalCreate(GcalCreateArgs),
    GcalUpdate(GcalUpdateArgs),
    GcalDelete(GcalDeleteArgs),
    GcalSearch(GcalSearchArgs),
}

fn parse_args<T: serde::de::DeserializeOwned>(
    name: &str,
    args: serde_json::Value,
) -> Result<T, ToolError> {
    serde_json::from_value(args)
        .map_err(|e| ToolError::ContractViolation(format!("{name} args: {e}")))
}

impl ToolRequest {
    pub(crate) fn parse(name: &str, args: serde_json::Value) -> Result<ToolRequest, ToolError> {
        match name {
            "whatsapp_send" => Ok(ToolRequest::WhatsAppSend(parse_args(name, args)?)),
            "whatsapp_react" => Ok(ToolRequest::WhatsAppReact(parse_args(name, args)?)),
            "whatsapp_send_file" => Ok(ToolRequest::WhatsAppSendFile(parse_args(name, args)?)),
            "gmail_list" => Ok(ToolRequest::GmailList(parse_args(name, args)?)),
            "gmail_send" => Ok(ToolRequest::GmailSend(parse_args(name, args)?)),
            "gmail_reply" => Ok(ToolRequest::GmailReply(parse_args(name, args)?)),
            "gmail_flag" => Ok(ToolRequest::GmailFlag(parse_args(name, args)?)),
            "gmail_delete" => Ok(ToolRequest::GmailDelete(parse_args(name, args)?)),
            "gmail_mark_read" => Ok(ToolRequest::GmailMarkRead(parse_args(name, args)?)),
            "gcal_list" => Ok(ToolRequest::GcalList(parse_args(name, args)?)),
            "gcal_create" => Ok(ToolRequest::GcalCreate(parse_args(name, args)?)),
            "gcal_update" => Ok(ToolRequest::GcalUpdate(parse_args(name, args)?)),
            "gcal_delete" => Ok(ToolRequest::GcalDelete(parse_args(name, args)?)),
            "gcal_search" => Ok(ToolRequest::GcalSearch(parse_args(name, args)?)),
            other => Err(ToolError::ContractViolation(format!(
                "unknown tool: {other}"
            ))),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            ToolRequest::WhatsAppSend(_) => "whatsapp_send",
            ToolRequest::WhatsAppReact(_) => "whatsapp_react",
            ToolRequest::WhatsAppSendFile(_) => "whatsapp_send_file",
            ToolRequest::GmailList(_) => "gmail_list",
            ToolRequest::GmailSend(_) => "gmail_send",
            ToolRequest::GmailReply(_) => "gmail_reply",
            ToolRequest::GmailFlag(_) => "gmail_flag",
            ToolRequest::GmailDelete(_) => "gmail_delete",
            ToolRequest::GmailMarkRead(_) => "gmail_mark_read",
            ToolRequest::GcalList(_) => "gcal_list",
            ToolRequest::GcalCreate(_) => "gcal_create",
            ToolRequest::GcalUpdate(_) => "gcal_update",
            ToolRequest::GcalDelete(_) => "gcal_delete",
            ToolRequest::GcalSearch(_) => "gcal_search",
        }
    }

    pub(crate) fn capability(&self) -> Capability {
        match self {
            ToolRequest::WhatsAppSend(_)
            | ToolRequest::WhatsAppReact(_)
            | ToolRequest::WhatsAppSendFile(_) => Capability::WhatsApp,
            ToolRequest::GmailList(_)
            | ToolRequest::GmailSend(_)
            | ToolRequest::GmailReply(_)
            | ToolRequest::GmailFlag(_)
            | ToolRequest::GmailDelete(_)
            | ToolRequest::GmailMarkRead(_) => Capability::GoogleMail,
            ToolRequest::GcalList(_)
            | ToolRequest::GcalCreate(_)
            | ToolRequest::GcalUpdate(_)
            | ToolRequest::GcalDelete(_)
            | ToolRequest::GcalSearch(_) => Capability::GoogleCalendar,
        }
    }

    /// Read-only tools may be retried once on a transient failure; anything
    /// with a side effect never is.
    pub(crate) fn is_read_only(&self) -> bool {
        matches!(
            self,
            ToolRequest::GmailList(_) | ToolRequest::GcalList(_) | ToolRequest::GcalSearch(_)
        )
    }
}
