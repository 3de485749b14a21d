use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use common::Configuration;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// An HTML email ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    /// One or more comma separated addresses.
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl SmtpSettings {
    pub fn from_config(c: &Configuration) -> Self {
        Self {
            host: c.email_host.clone(),
            username: c.email_user_name.clone(),
            password: c.email_password.clone(),
        }
    }
}

/// Delivers one email, synchronously from the caller's point of view.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: Email, smtp: SmtpSettings) -> Result<()>;
}

/// SMTP over implicit TLS (port 465).
pub struct SmtpMailer;

impl SmtpMailer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SmtpMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: Email, smtp: SmtpSettings) -> Result<()> {
        let message = build_message(&email)?;
        if smtp.host.is_empty() {
            return Err(anyhow!("SMTP host not configured"));
        }
        // lettre's SmtpTransport blocks; keep it off the runtime threads.
        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(smtp.username, smtp.password);
            let mailer = SmtpTransport::relay(&smtp.host)?.credentials(creds).build();
            mailer.send(&message)?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .context("SMTP send task failed")??;
        log::info!("Email '{}' sent to {}", email.subject, email.to);
        Ok(())
    }
}

pub fn build_message(email: &Email) -> Result<Message> {
    let from: Mailbox = email
        .from
        .parse()
        .with_context(|| format!("Invalid from address '{}'", email.from))?;
    let mut builder = Message::builder().from(from).subject(&email.subject);

    let mut recipients = 0;
    for to in email.to.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let to: Mailbox = to.parse().with_context(|| format!("Invalid to address '{}'", to))?;
        builder = builder.to(to);
        recipients += 1;
    }
    if recipients == 0 {
        return Err(anyhow!("No recipient configured"));
    }

    Ok(builder.header(ContentType::TEXT_HTML).body(email.html_body.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &str) -> Email {
        Email {
            from: "box@example.com".into(),
            to: to.into(),
            subject: "Backup status".into(),
            html_body: "<p>ok</p>".into(),
        }
    }

    #[test]
    fn test_build_message_with_several_recipients() {
        let message = build_message(&email("a@example.com, b@example.com")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("a@example.com"));
        assert!(raw.contains("b@example.com"));
        assert!(raw.contains("Subject: Backup status"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn test_build_message_rejects_bad_addresses() {
        assert!(build_message(&email("")).is_err());
        assert!(build_message(&email("not an address")).is_err());
        let mut bad_from = email("a@example.com");
        bad_from.from = "nobody".into();
        assert!(build_message(&bad_from).is_err());
    }

    #[tokio::test]
    async fn test_missing_host_is_an_error() {
        let smtp = SmtpSettings {
            host: String::new(),
            username: "u".into(),
            password: "p".into(),
        };
        let err = SmtpMailer::new().send(email("a@example.com"), smtp).await.unwrap_err();
        assert!(err.to_string().contains("SMTP host"));
    }
}
