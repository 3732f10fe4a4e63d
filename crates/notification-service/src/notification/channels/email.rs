//! Email 邮件通知渠道
//!
//! 通过身份服务解析收件地址，渲染 HTML 邮件后交给邮件传输发送。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ChannelResult, NotificationChannel};
use crate::error::Result;
use crate::identity::IdentityProvider;
use crate::models::{DeliveryChannel, Notification};
use crate::transport::EmailTransport;

pub const RECIPIENT_NOT_FOUND: &str = "recipient address not found";

/// Email 邮件通知渠道
pub struct EmailChannel {
    identity: Arc<dyn IdentityProvider>,
    transport: Arc<dyn EmailTransport>,
    /// 页脚署名
    from_name: String,
}

impl EmailChannel {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        transport: Arc<dyn EmailTransport>,
        from_name: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            transport,
            from_name: from_name.into(),
        }
    }

    /// 构建 HTML 邮件内容
    ///
    /// metadata 中有 actionUrl 时附带操作按钮，按钮文字取 actionText
    pub fn build_html_content(&self, notification: &Notification) -> String {
        let action = notification
            .metadata_str("actionUrl")
            .map(|url| {
                let text = notification.metadata_str("actionText").unwrap_or("查看详情");
                format!(
                    r#"<p style="margin-top: 24px;"><a class="button" href="{}">{}</a></p>"#,
                    escape_html(url),
                    escape_html(text)
                )
            })
            .unwrap_or_default();

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .header {{ background: #4f46e5; color: white; padding: 20px; border-radius: 8px 8px 0 0; }}
        .content {{ background: #f9f9f9; padding: 20px; border-radius: 0 0 8px 8px; }}
        .button {{ background: #4f46e5; color: white; padding: 10px 18px; border-radius: 6px; text-decoration: none; }}
        .footer {{ text-align: center; color: #888; font-size: 12px; margin-top: 20px; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>{title}</h1>
        </div>
        <div class="content">
            <p>{message}</p>{action}
        </div>
        <div class="footer">
            <p>此邮件由 {from} 自动发送，请勿回复。</p>
        </div>
    </div>
</body>
</html>"#,
            title = escape_html(&notification.title),
            message = escape_html(&notification.message),
            action = action,
            from = escape_html(&self.from_name),
        )
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn channel_type(&self) -> DeliveryChannel {
        DeliveryChannel::Email
    }

    fn name(&self) -> &str {
        "邮件"
    }

    async fn send(&self, notification: &Notification) -> Result<ChannelResult> {
        let start = Instant::now();

        let Some(address) = self.identity.resolve_email(&notification.user_id).await? else {
            debug!(user_id = %notification.user_id, "用户没有邮箱地址");
            return Ok(ChannelResult::failed(
                DeliveryChannel::Email,
                RECIPIENT_NOT_FOUND,
                start.elapsed().as_millis() as u64,
            ));
        };

        let html = self.build_html_content(notification);
        let elapsed = || start.elapsed().as_millis() as u64;

        match self
            .transport
            .send(&address, &notification.title, &html)
            .await
        {
            Ok(message_id) => Ok(ChannelResult::delivered(
                DeliveryChannel::Email,
                Some(message_id),
                elapsed(),
            )),
            Err(e) => {
                warn!(
                    notification_id = %notification.id,
                    error = %e,
                    "邮件发送失败"
                );
                Ok(ChannelResult::failed(DeliveryChannel::Email, e.to_string(), elapsed()))
            }
        }
    }
}
