//! SMTP mail transport
//!
//! Both delivery channels ride on this transport: the direct channel mails the
//! owner, the gateway-relay channel mails an SMS gateway address.

use crate::config::DeliverySettings;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::response::{Category, Code, Severity as SmtpSeverity};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// failure classes recorded on every dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Authentication,
    Connectivity,
    Timeout,
    Rejected,
}

impl FailureKind {
    /// Failures an operator has to fix in the settings (logged at error level)
    pub fn is_configuration(self) -> bool {
        matches!(self, FailureKind::Authentication)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Authentication => "authentication",
            FailureKind::Connectivity => "connectivity",
            FailureKind::Timeout => "timeout",
            FailureKind::Rejected => "rejected",
        };
        f.write_str(label)
    }
}

/// Channel-level transport failures. All of them make a fallback eligible.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("SMTP authentication failed: {0}")]
    Authentication(String),

    #[error("SMTP connection failed: {0}")]
    Connectivity(String),

    #[error("SMTP operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Message rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransportError::Authentication(_) => FailureKind::Authentication,
            TransportError::Connectivity(_) => FailureKind::Connectivity,
            TransportError::Timeout(_) => FailureKind::Timeout,
            TransportError::InvalidAddress(_) | TransportError::Rejected(_) => {
                FailureKind::Rejected
            }
        }
    }
}

impl From<lettre::transport::smtp::Error> for TransportError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        classify_smtp_error(err.is_timeout(), err.status(), err.is_permanent(), err.to_string())
    }
}

/// Map an SMTP failure onto a transport error.
/// 530 / 534 / 535 (5.3.x) are the authentication replies; any other permanent
/// reply is a rejection; transient replies and I/O failures are connectivity.
pub fn classify_smtp_error(
    is_timeout: bool,
    status: Option<Code>,
    is_permanent: bool,
    detail: String,
) -> TransportError {
    if is_timeout {
        return TransportError::Timeout(Duration::ZERO);
    }
    match status {
        Some(code)
            if code.severity == SmtpSeverity::PermanentNegativeCompletion
                && code.category == Category::Unspecified3 =>
        {
            TransportError::Authentication(detail)
        }
        Some(_) if is_permanent => TransportError::Rejected(detail),
        _ => TransportError::Connectivity(detail),
    }
}

// one outgoing mail
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Sends a mail. Implementations bound every network operation by a timeout.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError>;

    /// Transport name for logs
    fn describe(&self) -> String;
}

/// Authenticated STARTTLS SMTP client
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    endpoint: String,
    timeout: Duration,
}

impl SmtpMailer {
    // create a mailer, None when sender or password is missing
    pub fn from_settings(settings: &DeliverySettings) -> Result<Option<Self>, TransportError> {
        let (Some(sender), Some(password)) = (&settings.sender, &settings.password) else {
            return Ok(None);
        };

        let mailbox: Mailbox = sender
            .parse()
            .map_err(|_| TransportError::InvalidAddress(sender.clone()))?;

        let timeout = settings.timeout();
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_server)
            .map_err(|e| TransportError::Connectivity(e.to_string()))?
            .port(settings.smtp_port)
            .credentials(Credentials::new(sender.clone(), password.clone()))
            .timeout(Some(timeout))
            .build();

        Ok(Some(Self {
            transport,
            sender: mailbox,
            endpoint: format!("{}:{}", settings.smtp_server, settings.smtp_port),
            timeout,
        }))
    }

    // Build the MIME message
    fn build_message(&self, mail: &OutgoingMail) -> Result<Message, TransportError> {
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|_| TransportError::InvalidAddress(mail.to.clone()))?;

        Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(format!("🚨 {}", mail.subject))
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        let message = self.build_message(mail)?;

        tracing::debug!(to = %mail.to, endpoint = %self.endpoint, "Sending mail");

        // handshake, login and send share one deadline on top of the socket timeout
        match tokio::time::timeout(self.timeout, self.transport.send(message)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(match TransportError::from(e) {
                TransportError::Timeout(_) => TransportError::Timeout(self.timeout),
                other => other,
            }),
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }

    fn describe(&self) -> String {
        format!("smtp://{}", self.endpoint)
    }
}
