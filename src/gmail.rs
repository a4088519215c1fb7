use std::time::Duration;

use base64::Engine;

use crate::ToolError;

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const HTTP_TIMEOUT_SECS: u64 = 60;

/// Gmail operations the invoker needs. A trait seam so tests can substitute
/// a recording stub for the live REST adapter.
pub(crate) trait MailApi: Send + Sync {
    fn list(
        &self,
        token: &str,
        query: &str,
        max_results: usize,
    ) -> Result<serde_json::Value, ToolError>;
    fn read(&self, token: &str, id: &str) -> Result<serde_json::Value, ToolError>;
    fn send_raw(
        &self,
        token: &str,
        raw: &str,
        thread_id: Option<&str>,
    ) -> Result<serde_json::Value, ToolError>;
    fn modify_labels(
        &self,
        token: &str,
        id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<serde_json::Value, ToolError>;
    fn delete(&self, token: &str, id: &str) -> Result<serde_json::Value, ToolError>;
}

/// RFC 822 message with optional reply headers, base64url-encoded without
/// padding the way the Gmail API expects `raw`.
pub(crate) fn encode_raw_message(
    to: &str,
    subject: &str,
    body: &str,
    reply_headers: Option<&str>,
) -> String {
    let mut raw = format!("To: {to}\r\nSubject: {subject}\r\n");
    if let Some(headers) = reply_headers {
        raw.push_str(headers);
    }
    raw.push_str("\r\n");
    raw.push_str(body);
    raw.push_str("\r\n");
    base64::engine::general_purpose::STANDARD
        .encode(raw.as_bytes())
        .replace('+', "-")
        .replace('/', "_")
        .trim_end_matches('=')
        .to_string()
}

pub(crate) fn reply_headers(original_id: &str) -> String {
    format!("In-Reply-To: {original_id}\r\nReferences: {original_id}\r\n")
}

/// Subject beginning a reply thread: prepend "Re: " unless already present.
pub(crate) fn reply_subject(subject: &str) -> String {
    if subject.to_ascii_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

/// Pull a named header out of a full-format Gmail message payload.
pub(crate) fn message_header(message: &serde_json::Value, name: &str) -> Option<String> {
    message
        .get("payload")?
        .get("headers")?
        .as_array()?
        .iter()
        .find(|h| {
            h.get("name")
                .and_then(|n| n.as_str())
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
        .and_then(|h| h.get("value"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

fn http_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .timeout_read(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .timeout_write(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
}

fn decode_response(tag: &str, resp: ureq::Response) -> Result<serde_json::Value, ToolError> {
    resp.into_json::<serde_json::Value>()
        .map_err(|e| ToolError::Transient(format!("{tag} decode: {e}")))
}

fn map_http_error(tag: &str, err: ureq::Error) -> ToolError {
    match err {
        ureq::Error::Status(code, resp) => {
            let text = resp.into_string().unwrap_or_default();
            ToolError::Transient(format!("{tag} error {code}: {text}"))
        }
        ureq::Error::Transport(e) => ToolError::Transient(format!("{tag} failed: {e}")),
    }
}

pub(crate) struct GmailHttp;

impl MailApi for GmailHttp {
    fn list(
        &self,
        token: &str,
        query: &str,
        max_results: usize,
    ) -> Result<serde_json::Value, ToolError> {
        let mut url = format!("{GMAIL_BASE}/messages?maxResults={max_results}");
        if !query.trim().is_empty() {
            url.push_str("&q=");
            url.push_str(&urlencoding::encode(query));
        }
        let resp = http_agent()
            .get(&url)
            .set("authorization", &format!("Bearer {token}"))
            .call()
            .map_err(|e| map_http_error("gmail_list", e))?;
        decode_response("gmail_list", resp)
    }

    fn read(&self, token: &str, id: &str) -> Result<serde_json::Value, ToolError> {
        let url = format!("{GMAIL_BASE}/messages/{id}?format=full");
        let resp = http_agent()
            .get(&url)
            .set("authorization", &format!("Bearer {token}"))
            .call()
            .map_err(|e| map_http_error("gmail_read", e))?;
        decode_response("gmail_read", resp)
    }

    fn send_raw(
        &self,
        token: &str,
        raw: &str,
        thread_id: Option<&str>,
    ) -> Result<serde_json::Value, ToolError> {
        let mut payload = serde_json::json!({ "raw": raw });
        if let Some(thread_id) = thread_id {
            payload["threadId"] = serde_json::json!(thread_id);
        }
        let resp = http_agent()
            .post(&format!("{GMAIL_BASE}/messages/send"))
            .set("authorization", &format!("Bearer {token}"))
            .set("content-type", "application/json")
            .send_json(payload)
            .map_err(|e| map_http_error("gmail_send", e))?;
        decode_response("gmail_send", resp)
    }

    fn modify_labels(
        &self,
        token: &str,
        id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<serde_json::Value, ToolError> {
        let payload = serde_json::json!({
            "addLabelIds": add,
            "removeLabelIds": remove,
        });
        let resp = http_agent()
            .post(&format!("{GMAIL_BASE}/messages/{id}/modify"))
            .set("authorization", &format!("Bearer {token}"))
            .set("content-type", "application/json")
            .send_json(payload)
            .map_err(|e| map_http_error("gmail_modify", e))?;
        decode_response("gmail_modify", resp)
    }

    fn delete(&self, token: &str, id: &str) -> Result<serde_json::Value, ToolError> {
        http_agent()
            .delete(&format!("{GMAIL_BASE}/messages/{id}"))
            .set("authorization", &format!("Bearer {token}"))
            .call()
            .map_err(|e| map_http_error("gmail_delete", e))?;
        // Gmail returns an empty body on delete.
        Ok(serde_json::json!({ "id": id, "deleted": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_message_is_urlsafe_and_unpadded() {
        let encoded = encode_raw_message("jane@example.com", "Report", "Here it is.", None);
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.ends_with('='));
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&encoded)
            .unwrap();
        let text = String::from_utf8(decoded).unwrap();
        assert!(text.starts_with("To: jane@example.com\r\nSubject: Report\r\n\r\n"));
        assert!(text.contains("Here it is."));
    }

    #[test]
    fn reply_headers_reference_the_original() {
        let encoded = encode_raw_message(
            "boss@example.com",
            "Re: Plan",
            "Agreed.",
            Some(&reply_headers("msg-123")),
        );
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&encoded)
            .unwrap();
        let text = String::from_utf8(decoded).unwrap();
        assert!(text.contains("In-Reply-To: msg-123\r\n"));
        assert!(text.contains("References: msg-123\r\n"));
    }

    #[test]
    fn reply_subject_prefixes_once() {
        assert_eq!(reply_subject("Plan"), "Re: Plan");
        assert_eq!(reply_subject("Re: Plan"), "Re: Plan");
        assert_eq!(reply_subject("RE: Plan"), "RE: Plan");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let message = serde_json::json!({
            "payload": {
                "headers": [
                    {"name": "From", "value": "jane@example.com"},
                    {"name": "Subject", "value": "Report"}
                ]
            }
        });
        assert_eq!(
            message_header(&message, "subject").as_deref(),
            Some("Report")
        );
        assert_eq!(
            message_header(&message, "From").as_deref(),
            Some("jane@example.com")
        );
        assert!(message_header(&message, "Cc").is_none());
    }

    #[test]
    fn header_lookup_tolerates_missing_payload() {
        assert!(message_header(&serde_json::json!({"id": "x"}), "From").is_none());
    }
}
