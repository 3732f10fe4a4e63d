//! 用户身份
//!
//! 实时连接握手时把 Bearer Token 解析为用户 ID，
//! 邮件渠道投递时把用户 ID 解析为邮箱地址。

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use notify_shared::config::AuthConfig;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{NotificationError, Result};

/// 身份接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Token 无效时返回 Unauthorized
    async fn authenticate(&self, token: &str) -> Result<String>;

    /// 用户无邮箱或不存在时返回 None
    async fn resolve_email(&self, user_id: &str) -> Result<Option<String>>;
}

/// JWT 载荷
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// 用户 ID
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    pub iss: String,
}

/// HS256 Token 校验
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.jwt_issuer]);

        Self {
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }

    /// 校验签名、过期时间与签发者，返回 sub
    pub fn verify(&self, token: &str) -> Result<String> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    NotificationError::Unauthorized("Token 已过期".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidToken => {
                    NotificationError::Unauthorized("无效的 Token".to_string())
                }
                _ => NotificationError::Unauthorized(format!("Token 验证失败: {e}")),
            }
        })?;

        if data.claims.sub.is_empty() {
            return Err(NotificationError::Unauthorized("Token 缺少用户 ID".to_string()));
        }
        Ok(data.claims.sub)
    }
}

/// JWT + users 表的身份实现
pub struct JwtIdentityProvider {
    verifier: JwtVerifier,
    pool: PgPool,
}

impl JwtIdentityProvider {
    pub fn new(config: &AuthConfig, pool: PgPool) -> Self {
        Self {
            verifier: JwtVerifier::new(config),
            pool,
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<String> {
        self.verifier.verify(token)
    }

    async fn resolve_email(&self, user_id: &str) -> Result<Option<String>> {
        let email: Option<Option<String>> =
            sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(email.flatten().filter(|e| !e.is_empty()))
    }
}

/// 静态身份表，用于测试与本地开发
#[derive(Default)]
pub struct StaticIdentityProvider {
    tokens: DashMap<String, String>,
    emails: DashMap<String, String>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }

    pub fn with_email(self, user_id: impl Into<String>, email: impl Into<String>) -> Self {
        self.emails.insert(user_id.into(), email.into());
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<String> {
        self.tokens
            .get(token)
            .map(|user| user.value().clone())
            .ok_or_else(|| NotificationError::Unauthorized("无效的 Token".to_string()))
    }

    async fn resolve_email(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.emails.get(user_id).map(|e| e.value().clone()))
    }
}
