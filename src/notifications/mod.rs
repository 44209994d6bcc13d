use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// An outbound email message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub queued_at: DateTime<Utc>,
}

impl EmailMessage {
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            queued_at: Utc::now(),
        }
    }

    /// Verification-code delivery template
    pub fn otp_code(to: &str, resource_type: &str, code: &str) -> Self {
        Self::new(
            to,
            format!("Your PawMart {} verification code", resource_type),
            format!(
                "Your verification code is {}. It expires in 5 minutes. \
                 If you did not request this, you can ignore this email.",
                code
            ),
        )
    }
}

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Trait for outbound email delivery
#[async_trait]
pub trait EmailSink: Send + Sync {
    async fn deliver(&self, message: EmailMessage) -> Result<(), NotificationError>;
}

/// Logs the message instead of delivering it. Used in dev and tests.
#[derive(Debug, Default, Clone)]
pub struct LogEmailSink;

#[async_trait]
impl EmailSink for LogEmailSink {
    async fn deliver(&self, message: EmailMessage) -> Result<(), NotificationError> {
        info!(to = %message.to, subject = %message.subject, "Email delivered to log sink");
        debug!("Email body: {}", message.body);
        Ok(())
    }
}

/// Pushes messages onto a Redis list for an external mailer process to drain
#[derive(Clone)]
pub struct RedisEmailSink {
    client: Arc<redis::Client>,
    queue_key: String,
}

impl RedisEmailSink {
    pub fn new(redis_url: &str) -> Result<Self, NotificationError> {
        let client = redis::Client::open(redis_url).map_err(NotificationError::Redis)?;
        Ok(Self {
            client: Arc::new(client),
            queue_key: "pawmart:outbox:email".to_string(),
        })
    }

    pub fn with_queue_key(mut self, key: impl Into<String>) -> Self {
        self.queue_key = key.into();
        self
    }
}

#[async_trait]
impl EmailSink for RedisEmailSink {
    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn deliver(&self, message: EmailMessage) -> Result<(), NotificationError> {
        let mut conn = self.client.get_async_connection().await?;
        let json = serde_json::to_string(&message)?;

        conn.lpush::<_, _, ()>(&self.queue_key, json).await?;

        info!("Email queued for delivery");
        Ok(())
    }
}
