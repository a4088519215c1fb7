use serde_json;

/// Which external system a tool talks to. Drives the credential a tool
/// invocation must hold before its adapter is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Capability {
    GoogleMail,
    GoogleCalendar,
    WhatsApp,
}

impl Capability {
    /// WhatsApp goes through the provider account token, not OAuth, so it
    /// needs no stored credential.
    pub(crate) fn needs_credential(&self) -> bool {
        matches!(self, Capability::GoogleMail | Capability::GoogleCalendar)
    }
}

pub(crate) fn tool_definitions_json() -> Vec<serde_json::Value> {
    vec![
        serde_json::json!({
            "name": "whatsapp_send",
            "description": "Send a text message to a user via WhatsApp.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "The WhatsApp user's number" },
                    "body": { "type": "string", "description": "The message text to send" }
                },
                "required": ["to", "body"]
            }
        }),
        serde_json::json!({
            "name": "whatsapp_react",
            "description": "React to a WhatsApp conversation with an emoji.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "The WhatsApp user's number" },
                    "emoji": { "type": "string", "description": "The emoji reaction" }
                },
                "required": ["to", "emoji"]
            }
        }),
        serde_json::json!({
            "name": "whatsapp_send_file",
            "description": "Send a file, document, or image to the user via WhatsApp.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "The WhatsApp user's number" },
                    "file_url": { "type": "string", "description": "URL of the file to send" },
                    "caption": { "type": "string", "description": "Optional caption for the file" }
                },
                "required": ["to", "file_url"]
            }
        }),
        serde_json::json!({
            "name": "gmail_list",
            "description": "List Gmail messages matching a search query (e.g. 'is:unread', 'from:boss@example.com', 'subject:meeting').",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Gmail search query; defaults to 'is:unread'" },
                    "max_results": { "type": "integer", "description": "Maximum messages to return (default 10)" }
                }
            }
        }),
        serde_json::json!({
            "name": "gmail_send",
            "description": "Send an email to someone using Gmail.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "Recipient email address" },
                    "subject": { "type": "string", "description": "Email subject" },
                    "body": { "type": "string", "description": "Email body text" }
                },
                "required": ["to", "subject", "body"]
            }
        }),
        serde_json::json!({
            "name": "gmail_reply",
            "description": "Reply to an existing email using its message ID.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "message_id": { "type": "string", "description": "Message ID to reply to" },
                    "body": { "type": "string", "description": "Reply body text" }
                },
                "required": ["message_id", "body"]
            }
        }),
        serde_json::json!({
            "name": "gmail_flag",
            "description": "Star a Gmail message that needs the user's attention.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "message_id": { "type": "string", "description": "Message ID to flag" },
                    "reason": { "type": "string", "description": "Reason for flagging" }
                },
                "required": ["message_id"]
            }
        }),
        serde_json::json!({
            "name": "gmail_delete",
            "description": "Delete a Gmail message permanently.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "message_id": { "type": "string", "description": "Message ID to delete" }
                },
                "required": ["message_id"]
            }
        }),
        serde_json::json!({
            "name": "gmail_mark_read",
            "description": "Mark a Gmail message as read.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "message_id": { "type": "string", "description": "Message ID to mark as read" }
                },
                "required": ["message_id"]
            }
        }),
        serde_json::json!({
            "name": "gcal_list",
            "description": "List upcoming calendar events or meetings.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "max_results": { "type": "integer", "description": "Maximum events to return (default 10)" }
                }
            }
        }),
        serde_json::json!({
            "name": "gcal_create",
            "description": "Create a new calendar event.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "summary": { "type": "string", "description": "Event title" },
                    "description": { "type": "string", "description": "Event description" },
                    "start": { "type": "string", "description": "Start time in RFC3339 format" },
                    "end": { "type": "string", "description": "End time in RFC3339 format" }
                },
                "required": ["summary", "start", "end"]
            }
        }),
        serde_json::json!({
            "name": "gcal_update",
            "description": "Update an existing calendar event's title or description.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "event_id": { "type": "string", "description": "Event ID" },
                    "summary": { "type": "string", "description": "New event title" },
                    "description": { "type": "string", "description": "New event description" }
                },
                "required": ["event_id"]
            }
        }),
        serde_json::json!({
            "name": "gcal_delete",
            "description": "Delete a calendar event by ID.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "event_id": { "type": "string", "description": "Event ID to delete" }
                },
                "required": ["event_id"]
            }
        }),
        serde_json::json!({
            "name": "gcal_search",
            "description": "Search calendar events by keyword or attendee email.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "keyword": { "type": "string", "description": "Keyword to match in title or description" },
                    "attendee_email": { "type": "string", "description": "Attendee email to match" },
                    "max_results": { "type": "integer", "description": "Maximum events to return (default 20)" }
                }
            }
        }),
    ]
}
