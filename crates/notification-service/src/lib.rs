//! 学习通知投递引擎
//!
//! 接收通知请求，根据用户偏好与免打扰时段决定投递渠道，
//! 渲染模板内容，并通过站内信、实时推送、邮件、移动推送、短信等渠道
//! 独立投递与记录结果。支持免打扰延后、定时/周期通知与批量发送。

pub mod error;
pub mod identity;
pub mod models;
pub mod notification;
pub mod realtime;
pub mod repository;
pub mod service;
pub mod transport;
pub mod worker;

pub use error::{NotificationError, Result};
pub use service::{Adapters, NotificationEngine, Stores};
