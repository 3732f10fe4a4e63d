//! 邮件传输
//!
//! `SmtpEmailTransport` 通过 lettre 的异步 SMTP（STARTTLS）发信；
//! 未配置 SMTP 时使用 `LogEmailTransport` 只记录日志。

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use notify_shared::config::EmailConfig;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// 邮件发送错误
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("SMTP 传输错误: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("邮件地址解析失败: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("邮件构建失败: {0}")]
    Build(String),
}

/// 邮件传输接口
///
/// 成功时返回外部消息 ID
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<String, EmailError>;
}

/// 按配置选择传输：配置了 smtp_host 用 SMTP，否则只写日志
pub fn from_config(config: &EmailConfig) -> Arc<dyn EmailTransport> {
    match SmtpEmailTransport::new(config) {
        Ok(Some(transport)) => Arc::new(transport),
        Ok(None) => {
            info!("未配置 SMTP，邮件仅记录日志");
            Arc::new(LogEmailTransport)
        }
        Err(e) => {
            warn!(error = %e, "SMTP 配置无效，邮件仅记录日志");
            Arc::new(LogEmailTransport)
        }
    }
}

/// SMTP 邮件传输
pub struct SmtpEmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailTransport {
    /// 未配置 smtp_host 时返回 None
    pub fn new(config: &EmailConfig) -> Result<Option<Self>, EmailError> {
        let Some(host) = config.smtp_host.as_deref() else {
            return Ok(None);
        };

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let address: Address = config.from_address.parse()?;
        let from = Mailbox::new(Some(config.from_name.clone()), address);

        Ok(Some(Self {
            mailer: builder.build(),
            from,
        }))
    }

    fn message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<String, EmailError> {
        let message_id = self.message_id();
        let email = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject(subject)
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| EmailError::Build(e.to_string()))?;

        self.mailer.send(email).await?;

        info!(to = %to, message_id = %message_id, "邮件发送成功");
        Ok(message_id)
    }
}

/// 日志邮件传输，用于开发环境
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailTransport;

#[async_trait]
impl EmailTransport for LogEmailTransport {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<String, EmailError> {
        let message_id = format!("log-{}", Uuid::new_v4());
        info!(
            to = %to,
            subject = %subject,
            content_length = html.len(),
            message_id = %message_id,
            "邮件（仅日志）"
        );
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_not_configured() {
        let config = EmailConfig::default();
        assert!(SmtpEmailTransport::new(&config).unwrap().is_none());
    }

    #[test]
    fn test_invalid_from_address_rejected() {
        let config = EmailConfig {
            smtp_host: Some("smtp.example.com".to_string()),
            from_address: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            SmtpEmailTransport::new(&config),
            Err(EmailError::Address(_))
        ));
    }

    #[tokio::test]
    async fn test_log_transport_returns_id() {
        let id = LogEmailTransport
            .send("user@example.com", "subject", "<p>hi</p>")
            .await
            .unwrap();
        assert!(id.starts_with("log-"));
    }
}
