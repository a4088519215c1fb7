use std::time::Duration;

use chrono::Utc;

use crate::ToolError;

const CALENDAR_BASE: &str = "https://www.googleapis.com/calendar/v3/calendars/primary";
const HTTP_TIMEOUT_SECS: u64 = 60;

/// Calendar operations the invoker needs, behind a seam for test stubs.
pub(crate) trait CalendarApi: Send + Sync {
    /// Upcoming events from now, expanded and ordered by start time.
    fn list(&self, token: &str, max_results: usize) -> Result<serde_json::Value, ToolError>;
    fn get(&self, token: &str, event_id: &str) -> Result<serde_json::Value, ToolError>;
    fn create(&self, token: &str, event: serde_json::Value) -> Result<serde_json::Value, ToolError>;
    fn update(
        &self,
        token: &str,
        event_id: &str,
        event: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
    fn delete(&self, token: &str, event_id: &str) -> Result<serde_json::Value, ToolError>;
}

/// Client-side search filter: keyword against summary/description, attendee
/// against the attendee email list. Empty criteria match everything.
pub(crate) fn event_matches(
    event: &serde_json::Value,
    keyword: Option<&str>,
    attendee_email: Option<&str>,
) -> bool {
    let matches_keyword = match keyword.map(str::trim).filter(|k| !k.is_empty()) {
        None => true,
        Some(keyword) => {
            let needle = keyword.to_lowercase();
            ["summary", "description"].iter().any(|field| {
                event
                    .get(field)
                    .and_then(|v| v.as_str())
                    .map(|text| text.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
        }
    };
    let matches_attendee = match attendee_email.map(str::trim).filter(|a| !a.is_empty()) {
        None => true,
        Some(email) => event
            .get("attendees")
            .and_then(|v| v.as_array())
            .map(|attendees| {
                attendees.iter().any(|a| {
                    a.get("email")
                        .and_then(|e| e.as_str())
                        .map(|e| e.eq_ignore_ascii_case(email))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false),
    };
    matches_keyword && matches_attendee
}

pub(crate) fn filter_events(
    listing: &serde_json::Value,
    keyword: Option<&str>,
    attendee_email: Option<&str>,
    max_results: usize,
) -> Vec<serde_json::Value> {
    listing
        .get("items")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|e| event_matches(e, keyword, attendee_email))
                .take(max_results)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
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

pub(crate) struct CalendarHttp;

impl CalendarApi for CalendarHttp {
    fn list(&self, token: &str, max_results: usize) -> Result<serde_json::Value, ToolError> {
        let time_min = Utc::now().to_rfc3339();
        let url = format!(
            "{CALENDAR_BASE}/events?maxResults={max_results}&timeMin={}&orderBy=startTime&singleEvents=true",
            urlencoding::encode(&time_min)
        );
        let resp = http_agent()
            .get(&url)
            .set("authorization", &format!("Bearer {token}"))
            .call()
            .map_err(|e| map_http_error("gcal_list", e))?;
        decode_response("gcal_list", resp)
    }

    fn get(&self, token: &str, event_id: &str) -> Result<serde_json::Value, ToolError> {
        let resp = http_agent()
            .get(&format!("{CALENDAR_BASE}/events/{event_id}"))
            .set("authorization", &format!("Bearer {token}"))
            .call()
            .map_err(|e| map_http_error("gcal_get", e))?;
        decode_response("gcal_get", resp)
    }

    fn create(
        &self,
        token: &str,
        event: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let resp = http_agent()
            .post(&format!("{CALENDAR_BASE}/events"))
            .set("authorization", &format!("Bearer {token}"))
            .set("content-type", "application/json")
            .send_json(event)
            .map_err(|e| map_http_error("gcal_create", e))?;
        decode_response("gcal_create", resp)
    }

    fn update(
        &self,
        token: &str,
        event_id: &str,
        event: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let resp = http_agent()
            .put(&format!("{CALENDAR_BASE}/events/{event_id}"))
            .set("authorization", &format!("Bearer {token}"))
            .set("content-type", "application/json")
            .send_json(event)
            .map_err(|e| map_http_error("gcal_update", e))?;
        decode_response("gcal_update", resp)
    }

    fn delete(&self, token: &str, event_id: &str) -> Result<serde_json::Value, ToolError> {
        http_agent()
            .delete(&format!("{CALENDAR_BASE}/events/{event_id}"))
            .set("authorization", &format!("Bearer {token}"))
            .call()
            .map_err(|e| map_http_error("gcal_delete", e))?;
        Ok(serde_json::json!({ "id": event_id, "deleted": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_listing() -> serde_json::Value {
        serde_json::json!({
            "items": [
                {
                    "id": "e1",
                    "summary": "Quarterly review",
                    "description": "Numbers and plans",
                    "attendees": [{"email": "jane@example.com"}]
                },
                {
                    "id": "e2",
                    "summary": "Dentist",
                    "attendees": [{"email": "me@example.com"}]
                },
                {
                    "id": "e3",
                    "summary": "Planning sync",
                    "description": "quarterly roadmap"
                }
            ]
        })
    }

    #[test]
    fn keyword_matches_summary_or_description_case_insensitive() {
        let events = filter_events(&sample_listing(), Some("QUARTERLY"), None, 20);
        let ids: Vec<&str> = events.iter().map(|e| e["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["e1", "e3"]);
    }

    #[test]
    fn attendee_filter_requires_attendee_list() {
        let events = filter_events(&sample_listing(), None, Some("jane@example.com"), 20);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["id"], "e1");
    }

    #[test]
    fn empty_criteria_match_everything() {
        assert_eq!(filter_events(&sample_listing(), None, None, 20).len(), 3);
        assert_eq!(filter_events(&sample_listing(), Some("  "), Some(""), 20).len(), 3);
    }

    #[test]
    fn combined_criteria_intersect() {
        let events = filter_events(
            &sample_listing(),
            Some("quarterly"),
            Some("jane@example.com"),
            20,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["id"], "e1");
    }

    #[test]
    fn max_results_caps_matches() {
        assert_eq!(filter_events(&sample_listing(), None, None, 2).len(), 2);
    }

    #[test]
    fn missing_items_yields_empty() {
        assert!(filter_events(&serde_json::json!({}), None, None, 10).is_empty());
    }
}
