//! Outbound transport adapter
//!
//! The worker sees delivery as a `Transport` capability: an envelope in,
//! success (with provider message id and optional preview URL) or an
//! error string out. The SMTP implementation pools one lettre transport
//! per unique `(host, port, user)` tuple.

use async_trait::async_trait;
use chrono::Utc;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use mailcade_common::config::TransportConfig;
use mailcade_common::{Error, Result};
use mailcade_storage::models::Sender;
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Connection settings for one outbound hop
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl SmtpSettings {
    /// The process-wide default transport from configuration
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            secure: config.secure,
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }

    /// A sender's private transport configuration when it carries one,
    /// otherwise the default.
    pub fn for_sender(sender: &Sender, default: &SmtpSettings) -> Self {
        match &sender.smtp_host {
            Some(host) => Self {
                host: host.clone(),
                port: sender.smtp_port.map(|p| p as u16).unwrap_or(default.port),
                secure: default.secure,
                user: sender.smtp_user.clone(),
                password: sender.smtp_password.clone(),
            },
            None => default.clone(),
        }
    }

    fn pool_key(&self) -> (String, u16, String) {
        (
            self.host.clone(),
            self.port,
            self.user.clone().unwrap_or_default(),
        )
    }
}

/// Transport envelope
#[derive(Debug, Clone)]
pub struct Envelope {
    /// `"<name>" <email>` form
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

/// Successful delivery result
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    pub message_id: Option<String>,
    pub preview_url: Option<String>,
}

/// Outbound mail capability
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, settings: &SmtpSettings, envelope: &Envelope) -> Result<SendOutcome>;

    /// Flush and drop all pooled connections
    async fn close(&self);
}

/// SMTP transport over lettre with per-`(host, port, user)` pooling
pub struct SmtpTransport {
    pool: Mutex<HashMap<(String, u16, String), AsyncSmtpTransport<Tokio1Executor>>>,
}

impl SmtpTransport {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch or build the pooled mailer for these settings. New entries
    /// are verified with an SMTP handshake before first use.
    async fn mailer_for(
        &self,
        settings: &SmtpSettings,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let key = settings.pool_key();

        let mut pool = self.pool.lock().await;
        if let Some(mailer) = pool.get(&key) {
            return Ok(mailer.clone());
        }

        let builder = if settings.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| Error::TransportFailure(format!("Failed to create transport: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };

        let mut builder = builder.port(settings.port);

        if let (Some(user), Some(password)) = (&settings.user, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        let mailer = builder
            .timeout(Some(StdDuration::from_secs(30)))
            .build();

        match mailer.test_connection().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(Error::TransportFailure(format!(
                    "SMTP connection to {}:{} could not be verified",
                    settings.host, settings.port
                )))
            }
            Err(e) => {
                return Err(Error::TransportFailure(format!(
                    "SMTP connection to {}:{} failed: {}",
                    settings.host, settings.port, e
                )))
            }
        }

        debug!(
            host = %settings.host,
            port = settings.port,
            "Opened pooled SMTP connection"
        );

        pool.insert(key, mailer.clone());
        Ok(mailer)
    }
}

impl Default for SmtpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn build_message(envelope: &Envelope) -> Result<Message> {
    let from: Mailbox = envelope
        .from
        .parse()
        .map_err(|e| Error::TransportFailure(format!("Invalid from address: {}", e)))?;

    let to: Mailbox = envelope
        .to
        .parse()
        .map_err(|e| Error::TransportFailure(format!("Invalid recipient address: {}", e)))?;

    let builder = Message::builder()
        .from(from)
        .to(to)
        .subject(&envelope.subject);

    let message = match &envelope.text {
        Some(text) => builder.multipart(
            MultiPart::alternative()
                .singlepart(SinglePart::plain(text.clone()))
                .singlepart(SinglePart::html(envelope.html.clone())),
        ),
        None => builder
            .header(ContentType::TEXT_HTML)
            .body(envelope.html.clone()),
    };

    message.map_err(|e| Error::TransportFailure(format!("Failed to build email: {}", e)))
}

fn generate_message_id() -> String {
    format!("<{}.{}@mailcade>", Uuid::new_v4(), Utc::now().timestamp())
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, settings: &SmtpSettings, envelope: &Envelope) -> Result<SendOutcome> {
        let email = build_message(envelope)?;
        let mailer = self.mailer_for(settings).await?;
        let message_id = generate_message_id();

        mailer
            .send(email)
            .await
            .map_err(|e| Error::TransportFailure(e.to_string()))?;

        Ok(SendOutcome {
            message_id: Some(message_id),
            preview_url: None,
        })
    }

    async fn close(&self) {
        // Dropping a lettre transport closes its connection pool.
        let mut pool = self.pool.lock().await;
        let drained = pool.len();
        pool.clear();
        debug!(connections = drained, "Transport pool drained");
    }
}

/// Diagnostic transport that delivers nowhere and surfaces a preview URL
/// per message. Used when no real SMTP credentials are configured.
pub struct PreviewTransport;

#[async_trait]
impl Transport for PreviewTransport {
    async fn send(&self, _settings: &SmtpSettings, envelope: &Envelope) -> Result<SendOutcome> {
        let id = Uuid::new_v4();
        info!(to = %envelope.to, subject = %envelope.subject, %id, "Preview send");

        Ok(SendOutcome {
            message_id: Some(format!("<{}@preview.mailcade>", id)),
            preview_url: Some(format!("preview://mailcade/{}", id)),
        })
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope {
            from: "\"Jane Doe\" <jane@example.com>".to_string(),
            to: "rcpt@example.com".to_string(),
            subject: "Hello".to_string(),
            html: "<p>Hi</p>".to_string(),
            text: Some("Hi".to_string()),
        }
    }

    #[test]
    fn test_build_message_accepts_display_name_from() {
        assert!(build_message(&envelope()).is_ok());
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let mut env = envelope();
        env.to = "not-an-address".to_string();
        assert!(build_message(&env).is_err());
    }

    #[test]
    fn test_html_only_message() {
        let mut env = envelope();
        env.text = None;
        assert!(build_message(&env).is_ok());
    }

    #[test]
    fn test_message_id_shape() {
        let id = generate_message_id();
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@mailcade>"));
    }

    #[tokio::test]
    async fn test_preview_transport_surfaces_preview_url() {
        let transport = PreviewTransport;
        let settings = SmtpSettings {
            host: "localhost".into(),
            port: 1025,
            secure: false,
            user: None,
            password: None,
        };

        let outcome = transport.send(&settings, &envelope()).await.unwrap();
        assert!(outcome.message_id.is_some());
        assert!(outcome.preview_url.unwrap().starts_with("preview://"));
    }

    #[test]
    fn test_sender_settings_override_default() {
        let default = SmtpSettings {
            host: "smtp.default".into(),
            port: 587,
            secure: false,
            user: Some("default-user".into()),
            password: Some("default-pass".into()),
        };

        let mut sender = Sender {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email: "s@example.com".into(),
            name: "S".into(),
            smtp_host: Some("smtp.private".into()),
            smtp_port: Some(2525),
            smtp_user: Some("private-user".into()),
            smtp_password: Some("private-pass".into()),
            is_default: true,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let settings = SmtpSettings::for_sender(&sender, &default);
        assert_eq!(settings.host, "smtp.private");
        assert_eq!(settings.port, 2525);
        assert_eq!(settings.user.as_deref(), Some("private-user"));

        sender.smtp_host = None;
        let settings = SmtpSettings::for_sender(&sender, &default);
        assert_eq!(settings.host, "smtp.default");
        assert_eq!(settings.pool_key(), ("smtp.default".into(), 587, "default-user".into()));
    }
}
