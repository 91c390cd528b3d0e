//! Outbound billing emails.
//!
//! Emails are rendered by a single EmailJS template; the message kind and its
//! data travel as template parameters.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use lingo_billing_core::Plan;

use crate::config::EmailJsConfig;

/// Timeout for EmailJS requests.
const EMAILJS_TIMEOUT: Duration = Duration::from_secs(10);

/// Kind of billing email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EmailKind {
    /// A payment succeeded.
    PaymentSuccess,
    /// A payment failed.
    PaymentFailed,
    /// The subscription ends within a few days.
    SubscriptionExpiring,
    /// The subscription lapsed.
    SubscriptionExpired,
}

/// An email to send.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    /// Recipient address.
    pub to_email: String,
    /// Subject line.
    pub subject: String,
    /// Template selector.
    pub kind: EmailKind,
    /// Extra template parameters.
    pub params: Map<String, Value>,
}

impl EmailMessage {
    fn new(to_email: &str, subject: &str, kind: EmailKind, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            to_email: to_email.to_string(),
            subject: subject.to_string(),
            kind,
            params,
        }
    }

    /// Payment receipt email.
    #[must_use]
    pub fn payment_success(
        to_email: &str,
        name: Option<&str>,
        plan: Plan,
        amount: &str,
        app_url: &str,
    ) -> Self {
        Self::new(
            to_email,
            "Payment Successful",
            EmailKind::PaymentSuccess,
            json!({
                "name": name.unwrap_or("there"),
                "plan": plan.display_name(),
                "amount": amount,
                "dashboard_url": format!("{app_url}/dashboard"),
            }),
        )
    }

    /// Payment failure email.
    #[must_use]
    pub fn payment_failed(to_email: &str, name: Option<&str>, settings_url: &str) -> Self {
        Self::new(
            to_email,
            "Payment Failed",
            EmailKind::PaymentFailed,
            json!({
                "name": name.unwrap_or("there"),
                "update_payment_url": settings_url,
            }),
        )
    }

    /// Upcoming expiry reminder.
    #[must_use]
    pub fn subscription_expiring(
        to_email: &str,
        name: Option<&str>,
        plan: Plan,
        days_left: i64,
        renew_url: &str,
    ) -> Self {
        Self::new(
            to_email,
            "Your subscription is expiring soon",
            EmailKind::SubscriptionExpiring,
            json!({
                "name": name.unwrap_or("there"),
                "plan": plan.display_name(),
                "days_left": days_left,
                "renew_url": renew_url,
            }),
        )
    }

    /// Expiry notice.
    #[must_use]
    pub fn subscription_expired(
        to_email: &str,
        name: Option<&str>,
        plan: Plan,
        renew_url: &str,
    ) -> Self {
        Self::new(
            to_email,
            "Your subscription has expired",
            EmailKind::SubscriptionExpired,
            json!({
                "name": name.unwrap_or("there"),
                "plan": plan.display_name(),
                "renew_url": renew_url,
            }),
        )
    }
}

/// Errors from the mail transport.
#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider refused the message.
    #[error("email rejected ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

/// Sends billing emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one email.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails or the provider rejects it.
    async fn send(&self, message: &EmailMessage) -> Result<(), MailerError>;
}

/// EmailJS REST API request body.
#[derive(Debug, Serialize)]
struct EmailJsRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    #[serde(rename = "accessToken", skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
    template_params: Map<String, Value>,
}

/// [`Mailer`] backed by the EmailJS REST API.
pub struct EmailJsMailer {
    client: reqwest::Client,
    config: EmailJsConfig,
}

impl EmailJsMailer {
    /// Create a new mailer.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: EmailJsConfig) -> Result<Self, MailerError> {
        let client = reqwest::Client::builder()
            .timeout(EMAILJS_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    fn send_url(&self) -> String {
        format!(
            "{}/api/v1.0/email/send",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Mailer for EmailJsMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailerError> {
        let mut template_params = Map::new();
        template_params.insert("to_email".into(), Value::String(message.to_email.clone()));
        template_params.insert("subject".into(), Value::String(message.subject.clone()));
        template_params.insert("email_type".into(), json!(message.kind));
        for (key, value) in &message.params {
            template_params.insert(key.clone(), value.clone());
        }

        let body = EmailJsRequest {
            service_id: &self.config.service_id,
            template_id: &self.config.template_id,
            user_id: &self.config.public_key,
            access_token: self.config.private_key.as_deref(),
            template_params,
        };

        let response = self.client.post(self.send_url()).json(&body).send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(kind = ?message.kind, "Email sent");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(MailerError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> EmailJsConfig {
        EmailJsConfig {
            service_id: "service_lingo".into(),
            template_id: "template_billing".into(),
            public_key: "public_key".into(),
            private_key: Some("private_key".into()),
            base_url,
        }
    }

    #[tokio::test]
    async fn sends_template_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1.0/email/send"))
            .and(body_partial_json(json!({
                "service_id": "service_lingo",
                "template_id": "template_billing",
                "user_id": "public_key",
                "accessToken": "private_key",
                "template_params": {
                    "to_email": "student@example.com",
                    "subject": "Payment Successful",
                    "email_type": "paymentSuccess",
                    "plan": "Premium"
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let mailer = EmailJsMailer::new(config(server.uri())).unwrap();
        let message = EmailMessage::payment_success(
            "student@example.com",
            Some("Student"),
            Plan::Premium,
            "$49.00",
            "https://app.example.com",
        );
        mailer.send(&message).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_send_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("The template ID is invalid"))
            .mount(&server)
            .await;

        let mailer = EmailJsMailer::new(config(server.uri())).unwrap();
        let message = EmailMessage::payment_failed("a@example.com", None, "/settings");
        let err = mailer.send(&message).await.unwrap_err();
        assert!(matches!(err, MailerError::Rejected { status: 400, .. }));
    }
}
