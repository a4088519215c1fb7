use std::time::Duration;

use crate::{env_required, ToolError};

const HTTP_TIMEOUT_SECS: u64 = 30;

/// The outbound messaging channel. Fire-and-forget from the caller's side;
/// no delivery receipt is consumed.
pub(crate) trait Messenger: Send + Sync {
    fn send(&self, to: &str, body: &str) -> Result<(), ToolError>;
    fn react(&self, to: &str, emoji: &str) -> Result<(), ToolError>;
    fn send_file(&self, to: &str, file_url: &str, caption: &str) -> Result<(), ToolError>;
}

/// Qualify a number for the Twilio WhatsApp channel.
pub(crate) fn whatsapp_addr(number: &str) -> String {
    let number = number.trim();
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

/// Twilio Messages API adapter (SID + auth token over basic auth).
pub(crate) struct TwilioMessenger {
    account_sid: String,
    auth_token: String,
    from: String,
    client: reqwest::blocking::Client,
}

impl TwilioMessenger {
    pub(crate) fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(TwilioMessenger {
            account_sid: env_required("TWILIO_ACCOUNT_SID")?,
            auth_token: env_required("TWILIO_AUTH_TOKEN")?,
            from: env_required("TWILIO_WHATSAPP_FROM")?,
            client,
        })
    }

    fn post_message(&self, params: &[(&str, String)]) -> Result<(), ToolError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(params)
            .send()
            .map_err(|e| ToolError::Delivery(format!("twilio request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(ToolError::Delivery(format!(
                "twilio error {}: {text}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

impl Messenger for TwilioMessenger {
    fn send(&self, to: &str, body: &str) -> Result<(), ToolError> {
        self.post_message(&[
            ("To", whatsapp_addr(to)),
            ("From", whatsapp_addr(&self.from)),
            ("Body", body.to_string()),
        ])
    }

    fn react(&self, to: &str, emoji: &str) -> Result<(), ToolError> {
        self.post_message(&[
            ("To", whatsapp_addr(to)),
            ("From", whatsapp_addr(&self.from)),
            ("Body", emoji.to_string()),
        ])
    }

    fn send_file(&self, to: &str, file_url: &str, caption: &str) -> Result<(), ToolError> {
        self.post_message(&[
            ("To", whatsapp_addr(to)),
            ("From", whatsapp_addr(&self.from)),
            ("Body", caption.to_string()),
            ("MediaUrl", file_url.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whatsapp_addr_prefixes_bare_numbers() {
        assert_eq!(whatsapp_addr("+15551234"), "whatsapp:+15551234");
        assert_eq!(whatsapp_addr("  +15551234 "), "whatsapp:+15551234");
    }

    #[test]
    fn whatsapp_addr_keeps_existing_prefix() {
        assert_eq!(whatsapp_addr("whatsapp:+15551234"), "whatsapp:+15551234");
    }
}
