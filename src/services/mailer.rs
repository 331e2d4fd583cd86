use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::MailConfig;
use crate::error::{AppError, Result};

/// A rendered email ready for dispatch.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Outbound email dispatcher.
///
/// The registration and OTP flows depend on this trait only, so tests swap in
/// recording or failing implementations without network traffic.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutboundEmail) -> Result<()>;
}

/// Transactional email API payload (Brevo wire format).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailPayload<'a> {
    sender: Party<'a>,
    to: Vec<Party<'a>>,
    subject: &'a str,
    html_content: &'a str,
    text_content: &'a str,
}

#[derive(Debug, Serialize)]
struct Party<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

/// Mailer backed by a transactional email HTTP API.
pub struct ApiMailer {
    config: MailConfig,
    client: reqwest::Client,
}

impl ApiMailer {
    pub fn new(config: MailConfig) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl Mailer for ApiMailer {
    async fn send(&self, mail: &OutboundEmail) -> Result<()> {
        if !self.config.is_configured() {
            return Err(AppError::EmailDispatch(
                "Mail delivery is not configured".to_string(),
            ));
        }

        let payload = EmailPayload {
            sender: Party {
                email: &self.config.sender_email,
                name: Some(&self.config.sender_name),
            },
            to: vec![Party {
                email: &mail.to_email,
                name: mail.to_name.as_deref(),
            }],
            subject: &mail.subject,
            html_content: &mail.html,
            text_content: &mail.text,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .header("api-key", &self.config.api_key)
            .header("accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::EmailDispatch(format!("Mail API request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.chars().take(200).collect();
            tracing::warn!("Mail API rejected message ({}): {}", status, detail);
            return Err(AppError::EmailDispatch(format!("Mail API returned {}", status)));
        }

        tracing::debug!("Email dispatched to {}", mail.to_email);
        Ok(())
    }
}

/// Render the activation email for a freshly issued code.
pub fn activation_email(to_email: &str, to_name: &str, code: &str, ttl_minutes: u64) -> OutboundEmail {
    let text = format!(
        "Hello {to_name},\n\n\
         Your Item Retriever verification code is {code}. \
         It expires in {ttl_minutes} minutes.\n\n\
         If you did not request this code you can ignore this email.\n"
    );

    let html = format!(
        "<div style=\"font-family: sans-serif; max-width: 480px; margin: 0 auto;\">\
         <h2>Verify your email</h2>\
         <p>Hello {to_name},</p>\
         <p>Use this code to activate your Item Retriever account:</p>\
         <p style=\"font-size: 28px; letter-spacing: 6px; font-weight: bold;\">{code}</p>\
         <p>The code expires in {ttl_minutes} minutes.</p>\
         <p>If you did not request this code you can ignore this email.</p>\
         </div>"
    );

    OutboundEmail {
        to_email: to_email.to_string(),
        to_name: Some(to_name.to_string()),
        subject: "Item Retriever verification code".to_string(),
        html,
        text,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Captures outbound mail instead of sending it.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<OutboundEmail>>,
    }

    impl RecordingMailer {
        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        /// The code is the only six-digit run in the rendered text body.
        pub fn last_code(&self) -> Option<String> {
            let sent = self.sent.lock().unwrap();
            let text = sent.last()?.text.clone();
            drop(sent);

            let bytes = text.as_bytes();
            let mut run = 0usize;
            for (i, b) in bytes.iter().enumerate() {
                if b.is_ascii_digit() {
                    run += 1;
                    if run == 6 {
                        return Some(text[i + 1 - 6..=i].to_string());
                    }
                } else {
                    run = 0;
                }
            }
            None
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, mail: &OutboundEmail) -> Result<()> {
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    /// Always fails, for exercising dispatch-failure paths.
    pub struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _mail: &OutboundEmail) -> Result<()> {
            Err(AppError::EmailDispatch("mail API unreachable".to_string()))
        }
    }
}
