//! 外部投递传输层
//!
//! 邮件与推送渠道通过这里的窄接口访问外部服务，
//! 每种传输都提供一个真实实现和一个只写日志的实现。

pub mod email;
pub mod push;

pub use email::{EmailError, EmailTransport, LogEmailTransport, SmtpEmailTransport};
pub use push::{HttpPushTransport, LogPushTransport, PushError, PushPayload, PushTransport};
