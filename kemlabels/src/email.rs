//! Transactional email: account verification, passcodes and label order receipts.

use async_trait::async_trait;
use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use rust_decimal::Decimal;
use std::path::Path;
use tracing::instrument;

use crate::{config::Config, errors::Error, labels::Courier, types::mask_email};

/// A file attached to an outgoing email
#[derive(Debug, Clone, PartialEq)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl EmailAttachment {
    pub fn pdf(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: "application/pdf".to_string(),
            bytes,
        }
    }

    pub fn zip(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: "application/zip".to_string(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<EmailAttachment>,
}

/// Sends transactional email
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), Error>;
}

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
    reply_to: Option<String>,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            crate::config::EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
                timeout,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .timeout(Some(*timeout))
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            crate::config::EmailTransportConfig::File { path } => {
                // Use file transport for development/testing
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            reply_to: email_config.reply_to.clone(),
        })
    }

    fn build_message(&self, email: OutgoingEmail) -> Result<Message, Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to = email.to.parse::<Mailbox>().map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;

        let mut builder = Message::builder().from(from).to(to).subject(email.subject);
        if let Some(reply_to) = &self.reply_to {
            let reply_to = reply_to.parse::<Mailbox>().map_err(|e| Error::Internal {
                operation: format!("parse reply-to email: {e}"),
            })?;
            builder = builder.reply_to(reply_to);
        }

        let message = if email.attachments.is_empty() {
            builder.header(ContentType::TEXT_HTML).body(email.html)
        } else {
            let mut multipart = MultiPart::mixed().singlepart(SinglePart::html(email.html));
            for attachment in email.attachments {
                let content_type = ContentType::parse(&attachment.content_type).map_err(|e| Error::Internal {
                    operation: format!("parse attachment content type: {e}"),
                })?;
                multipart = multipart.singlepart(Attachment::new(attachment.filename).body(attachment.bytes, content_type));
            }
            builder.multipart(multipart)
        };

        message.map_err(|e| Error::Internal {
            operation: format!("build email message: {e}"),
        })
    }
}

#[async_trait]
impl Notifier for EmailService {
    #[instrument(skip_all, fields(to = %mask_email(&email.to), subject = %email.subject, attachments = email.attachments.len()), err)]
    async fn send(&self, email: OutgoingEmail) -> Result<(), Error> {
        let message = self.build_message(email)?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }
}

/// Label order details shared by the customer and admin receipts
#[derive(Debug, Clone)]
pub struct OrderSummary<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub courier: Courier,
    pub service_class: &'a str,
    pub label_count: usize,
    pub total: Decimal,
    pub balance_after: Decimal,
    /// Present for single orders
    pub tracking_number: Option<&'a str>,
}

fn layout(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .code {{ font-size: 28px; letter-spacing: 6px; font-weight: bold; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>{title}</h2>
{content}
        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
    )
}

fn minutes(ttl: std::time::Duration) -> u64 {
    ttl.as_secs().div_ceil(60)
}

impl OutgoingEmail {
    /// Link to confirm a new account's address
    pub fn verification(to: &str, username: &str, link: &str, ttl: std::time::Duration) -> Self {
        let content = format!(
            r#"        <p>Hello {username},</p>
        <p>Thanks for signing up for KEMLabels. Please confirm your email address:</p>
        <p><a href="{link}">Verify your email</a></p>
        <p>Or copy and paste this link into your browser:</p>
        <p>{link}</p>
        <p>This link will expire in {} minutes.</p>"#,
            minutes(ttl)
        );
        Self {
            to: to.to_string(),
            subject: "Verify your KEMLabels email".to_string(),
            html: layout("Verify your email", &content),
            attachments: Vec::new(),
        }
    }

    /// Passcode for a password reset or email change
    pub fn otp(to: &str, code: &str, ttl: std::time::Duration) -> Self {
        let content = format!(
            r#"        <p>Your KEMLabels passcode is:</p>
        <p class="code">{code}</p>
        <p>It expires in {} minutes. If you didn't request it, you can safely ignore this email.</p>"#,
            minutes(ttl)
        );
        Self {
            to: to.to_string(),
            subject: "Your KEMLabels passcode".to_string(),
            html: layout("Your passcode", &content),
            attachments: Vec::new(),
        }
    }

    /// Receipt for the customer, labels attached
    pub fn order_confirmation(summary: &OrderSummary<'_>, attachments: Vec<EmailAttachment>) -> Self {
        let tracking = summary
            .tracking_number
            .map(|t| format!("\n        <p>Tracking number: <strong>{t}</strong></p>"))
            .unwrap_or_default();
        let content = format!(
            r#"        <p>Hello {},</p>
        <p>Your order of {} {} label(s) ({}) is ready and attached to this email.</p>{tracking}
        <p>Charged: ${} &middot; Remaining balance: ${}</p>"#,
            summary.username, summary.label_count, summary.courier, summary.service_class, summary.total, summary.balance_after
        );
        Self {
            to: summary.email.to_string(),
            subject: "Your KEMLabels order".to_string(),
            html: layout("Your labels are ready", &content),
            attachments,
        }
    }

    /// Copy of the order for the operator mailbox
    pub fn order_admin_notice(admin_email: &str, summary: &OrderSummary<'_>, attachment: EmailAttachment) -> Self {
        let tracking = summary
            .tracking_number
            .map(|t| format!("\n        <p>Tracking number: {t}</p>"))
            .unwrap_or_default();
        let content = format!(
            r#"        <p>User {} ({}) placed an order.</p>
        <p>Courier: {} &middot; Class: {} &middot; Labels: {}</p>{tracking}
        <p>Total: ${}</p>"#,
            summary.username, summary.email, summary.courier, summary.service_class, summary.label_count, summary.total
        );
        Self {
            to: admin_email.to_string(),
            subject: format!("New label order from {}", summary.username),
            html: layout("New label order", &content),
            attachments: vec![attachment],
        }
    }
}
