//! Emergency notification.

use async_trait::async_trait;
use safespace_common::{Result, SafeSpaceError};
use serde::Deserialize;
use tracing::{info, warn};

const TWILIO_API_URL: &str = "https://api.twilio.com";

/// Spoken to the emergency contact when the call connects.
pub const EMERGENCY_TWIML: &str =
    r#"<Response><Say voice="alice">Emergency. Please assist immediately.</Say></Response>"#;

/// Alerts an emergency contact.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, contact: &str) -> Result<()>;
}

/// Places an outbound voice call through the Twilio REST API.
pub struct TwilioNotifier {
    client: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    sid: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorResponse {
    message: Option<String>,
}

impl TwilioNotifier {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: TWILIO_API_URL.into(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.base_url, self.account_sid
        )
    }
}

#[async_trait]
impl Notifier for TwilioNotifier {
    async fn notify(&self, contact: &str) -> Result<()> {
        let form = [
            ("To", contact),
            ("From", self.from_number.as_str()),
            ("Twiml", EMERGENCY_TWIML),
        ];

        let response = self
            .client
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| SafeSpaceError::Notification(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<TwilioErrorResponse>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| status.to_string());
            return Err(SafeSpaceError::Notification(format!(
                "Twilio returned {status}: {detail}"
            )));
        }

        let call: CallResponse = response
            .json()
            .await
            .map_err(|e| SafeSpaceError::Notification(format!("Invalid response: {e}")))?;

        info!(
            call_sid = call.sid.as_deref().unwrap_or("unknown"),
            status = call.status.as_deref().unwrap_or("unknown"),
            "Emergency call placed"
        );
        Ok(())
    }
}

/// Used when no telephony credentials are configured. Records the alert in
/// the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, contact: &str) -> Result<()> {
        let contact = if contact.is_empty() { "<unset>" } else { contact };
        warn!(
            contact = %contact,
            "Emergency notification requested but telephony is not configured"
        );
        Ok(())
    }
}
