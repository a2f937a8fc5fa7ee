//! Alert dispatch with primary / fallback channels
//!
//! Per alert: Idle -> Attempting(primary) -> Succeeded, or on a channel-level
//! failure -> Attempting(fallback) -> Succeeded | Failed. Failed is terminal;
//! re-raising a failed alert is the caller's decision.

use crate::alerting::Alert;
use crate::config::DeliverySettings;
use crate::mailer::{FailureKind, MailTransport, OutgoingMail};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

// delivery channel kinds, in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Direct,
    GatewayRelay,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Direct => f.write_str("email"),
            ChannelKind::GatewayRelay => f.write_str("sms-gateway"),
        }
    }
}

/// A configured channel: kind plus destination address
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryChannel {
    pub kind: ChannelKind,
    pub destination: String,
}

impl DeliveryChannel {
    pub fn direct(destination: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::Direct,
            destination: destination.into(),
        }
    }

    pub fn gateway_relay(destination: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::GatewayRelay,
            destination: destination.into(),
        }
    }

    // render the alert for this channel
    fn compose(&self, alert: &Alert) -> OutgoingMail {
        match self.kind {
            ChannelKind::Direct => OutgoingMail {
                to: self.destination.clone(),
                subject: format!("Vehicle Alert: {}", alert.subject),
                body: format!(
                    "{}\n\nSeverity: {}\nSource: {}\nRaised at: {}\nAlert ID: {}",
                    alert.message,
                    alert.severity,
                    alert.source,
                    alert.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    alert.id
                ),
            },
            ChannelKind::GatewayRelay => OutgoingMail {
                to: self.destination.clone(),
                subject: "Vehicle Alert".to_string(),
                body: format!("🚨 Vehicle Alert: {}", alert.summary()),
            },
        }
    }
}

// Dispatch state for one alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Attempting(ChannelKind),
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered,
    Failed(FailureKind),
}

/// One delivery attempt, kept only until the alert is resolved
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchAttempt {
    pub channel: ChannelKind,
    pub destination: String,
    pub outcome: AttemptOutcome,
}

/// Terminal state plus the attempts that led there
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub alert_id: Uuid,
    pub state: DispatchState,
    pub attempts: Vec<DispatchAttempt>,
}

impl DispatchReport {
    /// Delivered, but not on the first channel tried
    pub fn used_fallback(&self) -> bool {
        self.state == DispatchState::Succeeded && self.attempts.len() > 1
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No alert channels configured")]
    NotConfigured,

    #[error("All {} configured channels failed", .0.attempts.len())]
    Exhausted(DispatchReport),
}

/// Routes alerts to the configured channels in order, falling back on failure
pub struct AlertDispatcher {
    transport: Option<Arc<dyn MailTransport>>,
    channels: Vec<DeliveryChannel>,
}

impl AlertDispatcher {
    /// Channels in preference order over one transport
    pub fn new(transport: Arc<dyn MailTransport>, channels: Vec<DeliveryChannel>) -> Self {
        Self {
            transport: Some(transport),
            channels,
        }
    }

    /// Dispatcher that rejects every alert
    pub fn unconfigured() -> Self {
        Self {
            transport: None,
            channels: Vec::new(),
        }
    }

    /// Resolve channels from delivery settings. Without a transport (missing
    /// credentials) neither channel can work.
    pub fn from_settings(
        settings: &DeliverySettings,
        transport: Option<Arc<dyn MailTransport>>,
    ) -> Self {
        let Some(transport) = transport else {
            if settings.has_credentials() {
                error!("No mail transport available, alert delivery disabled");
            } else {
                let status = |present: bool| if present { "set" } else { "missing" };
                error!(
                    sender = status(settings.sender.is_some()),
                    password = status(settings.password.is_some()),
                    "Email credentials not fully configured, alert delivery disabled"
                );
            }
            return Self::unconfigured();
        };

        let mut channels = Vec::new();
        match settings.direct_recipient() {
            Some(recipient) => channels.push(DeliveryChannel::direct(recipient)),
            None => error!("No recipient configured, email channel disabled"),
        }
        match settings.gateway_address() {
            Some(address) => channels.push(DeliveryChannel::gateway_relay(address)),
            None => warn!("Recipient phone or SMS gateway not configured, SMS fallback disabled"),
        }

        info!(
            transport = %transport.describe(),
            channels = ?channels.iter().map(|c| c.kind).collect::<Vec<_>>(),
            "Alert dispatcher ready"
        );
        Self::new(transport, channels)
    }

    pub fn channels(&self) -> &[DeliveryChannel] {
        &self.channels
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some() && !self.channels.is_empty()
    }

    /// Deliver one alert. Consumes the alert; the attempt history is returned
    /// with the terminal state and then dropped by the caller.
    pub async fn dispatch(&self, alert: Alert) -> Result<DispatchReport, DispatchError> {
        let transport = match &self.transport {
            Some(t) if !self.channels.is_empty() => t,
            _ => {
                error!(alert_id = %alert.id, "Cannot dispatch alert: no channels configured");
                return Err(DispatchError::NotConfigured);
            }
        };

        let mut attempts = Vec::with_capacity(self.channels.len());
        let mut remaining = self.channels.iter();
        let mut current = remaining.next();
        let mut state = DispatchState::Idle;

        while let Some(channel) = current {
            state = DispatchState::Attempting(channel.kind);
            let mail = channel.compose(&alert);

            match transport.send(&mail).await {
                Ok(()) => {
                    info!(
                        alert_id = %alert.id,
                        channel = %channel.kind,
                        destination = %channel.destination,
                        "Alert delivered"
                    );
                    attempts.push(DispatchAttempt {
                        channel: channel.kind,
                        destination: channel.destination.clone(),
                        outcome: AttemptOutcome::Delivered,
                    });
                    state = DispatchState::Succeeded;
                    break;
                }
                Err(e) => {
                    if e.kind().is_configuration() {
                        error!(
                            alert_id = %alert.id,
                            channel = %channel.kind,
                            destination = %channel.destination,
                            error = %e,
                            "Alert delivery failed: SMTP credentials rejected"
                        );
                    } else {
                        warn!(
                            alert_id = %alert.id,
                            channel = %channel.kind,
                            destination = %channel.destination,
                            failure = %e.kind(),
                            error = %e,
                            "Alert delivery failed"
                        );
                    }
                    attempts.push(DispatchAttempt {
                        channel: channel.kind,
                        destination: channel.destination.clone(),
                        outcome: AttemptOutcome::Failed(e.kind()),
                    });
                    current = remaining.next();
                    if let Some(next) = current {
                        info!(alert_id = %alert.id, fallback = %next.kind, "Trying fallback channel");
                    }
                }
            }
        }

        // channels exhausted while still attempting
        if state != DispatchState::Succeeded {
            state = DispatchState::Failed;
        }
        let report = DispatchReport {
            alert_id: alert.id,
            state,
            attempts,
        };

        if report.state == DispatchState::Succeeded {
            if report.used_fallback() {
                warn!(alert_id = %alert.id, "Alert delivered on fallback channel");
            }
            Ok(report)
        } else {
            error!(
                alert_id = %alert.id,
                attempts = report.attempts.len(),
                "Alert delivery failed on every channel"
            );
            Err(DispatchError::Exhausted(report))
        }
    }
}
