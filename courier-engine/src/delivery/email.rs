//! SMTP email delivery.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::SinglePart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use courier_core::{SmtpConfig, Subscription};

use super::{DeliveryOutcome, DeliveryProvider, ProviderError};
use crate::aggregate::{ContentKind, RenderedMessage};

/// SMTP reply codes that indicate an authentication problem. Auth failures
/// are treated as transient (credentials may be rotated) even though the
/// codes sit in the permanent 5xx range.
const AUTH_FAILURE_CODES: [&str; 4] = ["530", "534", "535", "538"];

/// Email delivery over SMTP.
///
/// The transport is selected once at construction: TLS-on-connect for
/// `use_ssl` with port 465, STARTTLS for `use_ssl` on any other port,
/// plaintext otherwise. Sessions are per-send and not pooled.
pub struct SmtpProvider {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    server: String,
}

impl SmtpProvider {
    /// Builds the provider from SMTP configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::SmtpSetup`] when the relay hostname is not
    /// usable for the selected transport.
    pub fn new(config: &SmtpConfig) -> Result<Self, ProviderError> {
        let setup = |e: lettre::transport::smtp::Error| ProviderError::SmtpSetup {
            reason: e.to_string(),
        };

        let builder = if config.use_ssl && config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server).map_err(setup)?
        } else if config.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server).map_err(setup)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
        };

        let mut builder = builder.port(config.port);
        if !config.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            mailer: builder.build(),
            server: config.server.clone(),
        })
    }

    fn build_email(
        recipient: &str,
        message: &RenderedMessage,
        sender: &str,
    ) -> Result<Message, String> {
        let builder = Message::builder()
            .from(sender
                .parse()
                .map_err(|e| format!("invalid sender address '{sender}': {e}"))?)
            .to(recipient
                .parse()
                .map_err(|e| format!("invalid recipient address '{recipient}': {e}"))?)
            .subject(&message.subject);

        let result = match &message.content {
            ContentKind::Plain => builder.singlepart(SinglePart::plain(message.body.clone())),
            ContentKind::Html => builder.singlepart(SinglePart::html(message.body.clone())),
            // Pre-rendered multipart passes through with its boundary intact.
            ContentKind::Multipart { .. } => {
                let content_type = ContentType::parse(&message.content.mime_type())
                    .map_err(|e| format!("invalid multipart content type: {e}"))?;
                builder.singlepart(
                    SinglePart::builder()
                        .header(content_type)
                        .body(message.body.clone()),
                )
            }
        };
        result.map_err(|e| format!("failed to build email: {e}"))
    }
}

#[async_trait]
impl DeliveryProvider for SmtpProvider {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(
        &self,
        subscription: &Subscription,
        message: &RenderedMessage,
        sender: &str,
    ) -> DeliveryOutcome {
        let Some(recipient) = subscription.email_address.as_deref() else {
            return DeliveryOutcome::Permanent(
                "email address not configured for subscription".to_string(),
            );
        };

        let email = match Self::build_email(recipient, message, sender) {
            Ok(email) => email,
            Err(reason) => return DeliveryOutcome::Permanent(reason),
        };

        debug!(
            recipient = %recipient,
            subject = %message.subject,
            server = %self.server,
            "sending email"
        );

        match self.mailer.send(email).await {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) => {
                let code = e.status().map(|c| c.to_string());
                classify_smtp_failure(code.as_deref(), e.to_string())
            }
        }
    }
}

/// Maps an SMTP failure to an outcome: 4xx replies, connection problems and
/// auth failures are transient; other 5xx replies are permanent.
fn classify_smtp_failure(code: Option<&str>, reason: String) -> DeliveryOutcome {
    match code {
        Some(code) if code.starts_with('5') && !AUTH_FAILURE_CODES.contains(&code) => {
            DeliveryOutcome::Permanent(reason)
        }
        _ => DeliveryOutcome::Transient(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_message() -> RenderedMessage {
        RenderedMessage {
            subject: "Subject".to_string(),
            body: "body".to_string(),
            content: ContentKind::Plain,
        }
    }

    #[test]
    fn test_transport_selection() {
        let mut config = SmtpConfig::default();

        config.use_ssl = true;
        config.port = 465;
        assert!(SmtpProvider::new(&config).is_ok());

        config.port = 587;
        assert!(SmtpProvider::new(&config).is_ok());

        config.use_ssl = false;
        config.port = 25;
        assert!(SmtpProvider::new(&config).is_ok());
    }

    #[test]
    fn test_classify_5xx_permanent() {
        let outcome = classify_smtp_failure(Some("550"), "mailbox unavailable".to_string());
        assert_eq!(
            outcome,
            DeliveryOutcome::Permanent("mailbox unavailable".to_string())
        );
    }

    #[test]
    fn test_classify_4xx_transient() {
        let outcome = classify_smtp_failure(Some("451"), "try again".to_string());
        assert!(outcome.is_transient());
    }

    #[test]
    fn test_classify_auth_transient() {
        for code in AUTH_FAILURE_CODES {
            let outcome = classify_smtp_failure(Some(code), "auth failed".to_string());
            assert!(outcome.is_transient(), "code {code} should be transient");
        }
    }

    #[test]
    fn test_classify_connection_failure_transient() {
        let outcome = classify_smtp_failure(None, "connection refused".to_string());
        assert!(outcome.is_transient());
    }

    #[test]
    fn test_build_email_plain() {
        let email = SmtpProvider::build_email("to@example.org", &plain_message(), "from@example.org")
            .unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("From: from@example.org"));
        assert!(formatted.contains("To: to@example.org"));
        assert!(formatted.contains("Subject: Subject"));
        assert!(formatted.contains("body"));
    }

    #[test]
    fn test_build_email_html_content_type() {
        let message = RenderedMessage {
            subject: "s".to_string(),
            body: "<html><body>hi</body></html>".to_string(),
            content: ContentKind::Html,
        };
        let email = SmtpProvider::build_email("to@example.org", &message, "from@example.org")
            .unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("Content-Type: text/html; charset=utf-8"));
    }

    #[test]
    fn test_build_email_multipart_preserves_boundary() {
        let message = RenderedMessage {
            subject: "s".to_string(),
            body: "--b1\r\n\r\npart\r\n--b1--\r\n".to_string(),
            content: ContentKind::Multipart {
                boundary: "b1".to_string(),
            },
        };
        let email = SmtpProvider::build_email("to@example.org", &message, "from@example.org")
            .unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("multipart/mixed"));
        assert!(formatted.contains("boundary=\"b1\""));
        assert!(formatted.contains("--b1--"));
    }

    #[test]
    fn test_build_email_invalid_recipient() {
        let result = SmtpProvider::build_email("not an address", &plain_message(), "from@example.org");
        assert!(result.is_err());
    }
}
