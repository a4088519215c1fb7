use std::sync::Arc;

use crate::{
    encode_raw_message, filter_events, message_header, reply_headers, reply_subject,
    AgentToolCall, CalendarApi, CredentialStore, MailApi, Messenger, Notifier, ToolError,
    ToolOutcome, ToolRequest,
};

const DEFAULT_LIST_RESULTS: usize = 10;
const DEFAULT_GMAIL_QUERY: &str = "is:unread";
const SEARCH_SCAN_WINDOW: usize = 250;

/// Executes one validated tool call against the right adapter. The credential
/// gate runs before any adapter is touched; a missing grant short-circuits
/// with the authorization URL and zero network traffic.
pub(crate) struct ToolInvoker {
    credentials: Arc<CredentialStore>,
    mail: Arc<dyn MailApi>,
    calendar: Arc<dyn CalendarApi>,
    messenger: Arc<dyn Messenger>,
    notifier: Arc<dyn Notifier>,
}

impl ToolInvoker {
    pub(crate) fn new(
        credentials: Arc<CredentialStore>,
        mail: Arc<dyn MailApi>,
        calendar: Arc<dyn CalendarApi>,
        messenger: Arc<dyn Messenger>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        ToolInvoker {
            credentials,
            mail,
            calendar,
            messenger,
            notifier,
        }
    }

    /// `notify_target` is the conversation peer, supplied by the engine from
    /// the inbound message. The model never chooses where follow-ups go.
    pub(crate) fn invoke(
        &self,
        call: &AgentToolCall,
        notify_target: Option<&str>,
    ) -> Result<ToolOutcome, ToolError> {
        let request = ToolRequest::parse(&call.name, call.args.clone())?;
        let token = if request.capability().needs_credential() {
            let scopes = self.credentials.default_scopes().to_string();
            Some(self.credentials.get_credential(&scopes)?.access_token)
        } else {
            None
        };
        let outcome = self.dispatch(&request, token.as_deref())?;
        if let (Some(target), Some(summary)) = (notify_target, action_summary(&request)) {
            self.notifier.enqueue(target, &summary);
        }
        Ok(outcome)
    }

    fn dispatch(
        &self,
        request: &ToolRequest,
        token: Option<&str>,
    ) -> Result<ToolOutcome, ToolError> {
        match request {
            ToolRequest::WhatsAppSend(args) => {
                self.messenger.send(&args.to, &args.body)?;
                Ok(outcome(
                    format!("message sent to {}", args.to),
                    serde_json::json!({ "to": args.to, "sent": true }),
                ))
            }
            ToolRequest::WhatsAppReact(args) => {
                self.messenger.react(&args.to, &args.emoji)?;
                Ok(outcome(
                    format!("reaction {} sent to {}", args.emoji, args.to),
                    serde_json::json!({ "to": args.to, "sent": true }),
                ))
            }
            ToolRequest::WhatsAppSendFile(args) => {
                let caption = args.caption.as_deref().unwrap_or("");
                self.messenger.send_file(&args.to, &args.file_url, caption)?;
                Ok(outcome(
                    format!("file sent to {}", args.to),
                    serde_json::json!({ "to": args.to, "sent": true }),
                ))
            }
            ToolRequest::GmailList(args) => {
                let token = require_token(token)?;
                let query = args
                    .query
                    .as_deref()
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .unwrap_or(DEFAULT_GMAIL_QUERY);
                let max = args.max_results.unwrap_or(DEFAULT_LIST_RESULTS);
                let payload = with_read_retry(request.name(), request.is_read_only(), || {
                    self.mail.list(&token, query, max)
                })?;
                Ok(payload_outcome(payload))
            }
            ToolRequest::GmailSend(args) => {
                let token = require_token(token)?;
                let raw = encode_raw_message(&args.to, &args.subject, &args.body, None);
                let payload = self.mail.send_raw(&token, &raw, None)?;
                Ok(payload_outcome(payload))
            }
            ToolRequest::GmailReply(args) => {
                let token = require_token(token)?;
                let original = self.mail.read(&token, &args.message_id)?;
                let to = message_header(&original, "Reply-To")
                    .or_else(|| message_header(&original, "From"))
                    .ok_or_else(|| {
                        ToolError::Transient("original message has no sender header".to_string())
                    })?;
                let subject = message_header(&original, "Subject").unwrap_or_default();
                let thread_id = original.get("threadId").and_then(|v| v.as_str());
                let raw = encode_raw_message(
                    &to,
                    &reply_subject(&subject),
                    &args.body,
                    Some(&reply_headers(&args.message_id)),
                );
                let payload = self.mail.send_raw(&token, &raw, thread_id)?;
                Ok(payload_outcome(payload))
            }
            ToolRequest::GmailFlag(args) => {
                let token = require_token(token)?;
                let payload =
                    self.mail
                        .modify_labels(&token, &args.message_id, &["STARRED"], &[])?;
                Ok(payload_outcome(payload))
            }
            ToolRequest::GmailDelete(args) => {
                let token = require_token(token)?;
                let payload = self.mail.delete(&token, &args.message_id)?;
                Ok(payload_outcome(payload))
            }
            ToolRequest::GmailMarkRead(args) => {
                let token = require_token(token)?;
                let payload =
                    self.mail
                        .modify_labels(&token, &args.message_id, &[], &["UNREAD"])?;
                Ok(payload_outcome(payload))
            }
            ToolRequest::GcalList(args) => {
                let token = require_token(token)?;
                let max = args.max_results.unwrap_or(DEFAULT_LIST_RESULTS);
                let payload = with_read_retry(request.name(), request.is_read_only(), || {
                    self.calendar.list(&token, max)
                })?;
                Ok(payload_outcome(payload))
            }
            ToolRequest::GcalCreate(args) => {
                let token = require_token(token)?;
                let mut event = serde_json::json!({
                    "summary": args.summary,
                    "start": { "dateTime": args.start },
                    "end": { "dateTime": args.end },
                });
                if let Some(description) = &args.description {
                    event["description"] = serde_json::json!(description);
                }
                let payload = self.calendar.create(&token, event)?;
                Ok(payload_outcome(payload))
            }
            ToolRequest::GcalUpdate(args) => {
                let token = require_token(token)?;
                let mut event = self.calendar.get(&token, &args.event_id)?;
                if let Some(summary) = &args.summary {
                    event["summary"] = serde_json::json!(summary);
                }
                if let Some(description) = &args.description {
                    event["description"] = serde_json::json!(description);
                }
                let payload = self.calendar.update(&token, &args.event_id, event)?;
                Ok(payload_outcome(payload))
            }
            ToolRequest::GcalDelete(args) => {
                let token = require_token(token)?;
                let payload = self.calendar.delete(&token, &args.event_id)?;
                Ok(payload_outcome(payload))
            }
            ToolRequest::GcalSearch(args) => {
                let token = require_token(token)?;
                let listing = with_read_retry(request.name(), request.is_read_only(), || {
                    self.calendar.list(&token, SEARCH_SCAN_WINDOW)
                })?;
                let matches = filter_events(
                    &listing,
                    args.keyword.as_deref(),
                    args.attendee_email.as_deref(),
                    args.max_results.unwrap_or(DEFAULT_LIST_RESULTS),
                );
                Ok(payload_outcome(serde_json::json!({ "items": matches })))
            }
        }
    }
}

/// The gate in `invoke` hands out a token exactly when the capability needs
/// one, so this only trips on a wiring bug.
fn require_token(token: Option<&str>) -> Result<String, ToolError> {
    token.map(str::to_string).ok_or_else(|| {
        ToolError::ContractViolation("missing credential for google tool".to_string())
    })
}

fn outcome(output: String, details: serde_json::Value) -> ToolOutcome {
    ToolOutcome { output, details }
}

fn payload_outcome(payload: serde_json::Value) -> ToolOutcome {
    ToolOutcome {
        output: payload.to_string(),
        details: payload,
    }
}

/// Side effects are non-idempotent upstream, so only read paths get a second
/// chance on a transient failure, and only one.
fn with_read_retry<F>(name: &str, read_only: bool, mut call: F) -> Result<serde_json::Value, ToolError>
where
    F: FnMut() -> Result<serde_json::Value, ToolError>,
{
    match call() {
        Err(ToolError::Transient(e)) if read_only => {
            eprintln!("[tools] {name}: transient failure on read, retrying once: {e}");
            call()
        }
        other => other,
    }
}

/// What the continuation relays after a successful call. Reads and direct
/// WhatsApp sends are already visible to the user, so only mutating Google
/// actions notify.
fn action_summary(request: &ToolRequest) -> Option<String> {
    match request {
        ToolRequest::WhatsAppSend(_)
        | ToolRequest::WhatsAppReact(_)
        | ToolRequest::WhatsAppSendFile(_)
        | ToolRequest::GmailList(_)
        | ToolRequest::GcalList(_)
        | ToolRequest::GcalSearch(_) => None,
        ToolRequest::GmailSend(args) => Some(format!(
            "Sent an email to {} with the subject \"{}\".",
            args.to, args.subject
        )),
        ToolRequest::GmailReply(args) => {
            Some(format!("Replied to email {}.", args.message_id))
        }
        ToolRequest::GmailFlag(args) => {
            Some(format!("Starred email {}.", args.message_id))
        }
        ToolRequest::GmailDelete(args) => {
            Some(format!("Deleted email {}.", args.message_id))
        }
        ToolRequest::GmailMarkRead(args) => {
            Some(format!("Marked email {} as read.", args.message_id))
        }
        ToolRequest::GcalCreate(args) => Some(format!(
            "Created the calendar event \"{}\" from {} to {}.",
            args.summary, args.start, args.end
        )),
        ToolRequest::GcalUpdate(args) => {
            Some(format!("Updated calendar event {}.", args.event_id))
        }
        ToolRequest::GcalDelete(args) => {
            Some(format!("Deleted calendar event {}.", args.event_id))
        }
    }
}
