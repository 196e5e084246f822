//! Push dispatch and the outbox drain pass.
//!
//! The state machine enqueues outbox rows inside its own transactions; the
//! scheduler calls [`dispatch_pending`] afterwards. Delivery failures are
//! logged and the row is still marked handled; transport is best-effort by
//! contract.

#[cfg(not(feature = "mock-push"))]
use anyhow::Context;
#[cfg(not(feature = "mock-push"))]
use secrecy::ExposeSecret;
use secrecy::SecretBox;
use sqlx::PgPool;

use crate::email::EmailService;
use crate::store::{self, notification};
use payloads::NotificationType;

/// How many outbox rows one dispatch pass claims.
const DISPATCH_BATCH: i64 = 100;

/// A push message delivered to one device token set.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

pub struct PushService {
    #[cfg(not(feature = "mock-push"))]
    client: reqwest::Client,
    #[cfg(not(feature = "mock-push"))]
    server_key: SecretBox<String>,
    /// Messages captured instead of sent, for test assertions.
    #[cfg(feature = "mock-push")]
    pub sent: std::sync::Mutex<Vec<(Vec<String>, PushMessage)>>,
}

#[cfg(not(feature = "mock-push"))]
const FCM_SEND_URL: &str = "https://fcm.googleapis.com/fcm/send";

impl PushService {
    #[cfg(not(feature = "mock-push"))]
    pub fn new(server_key: SecretBox<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_key,
        }
    }

    #[cfg(feature = "mock-push")]
    pub fn new(_server_key: SecretBox<String>) -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Send one message to every token. Tokens are opaque strings; a
    /// failed token is reported back so the caller can prune it.
    #[cfg(not(feature = "mock-push"))]
    #[tracing::instrument(skip(self, message), fields(tokens = tokens.len()))]
    pub async fn send_multicast(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> anyhow::Result<Vec<String>> {
        let mut dead_tokens = Vec::new();
        for token in tokens {
            let payload = serde_json::json!({
                "to": token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
            });
            let response = self
                .client
                .post(FCM_SEND_URL)
                .bearer_auth(self.server_key.expose_secret())
                .json(&payload)
                .send()
                .await
                .context("Failed to reach the push gateway")?;

            if response.status() == reqwest::StatusCode::NOT_FOUND
                || response.status() == reqwest::StatusCode::GONE
            {
                dead_tokens.push(token.clone());
            } else if !response.status().is_success() {
                tracing::warn!(
                    status = %response.status(),
                    "push gateway rejected message"
                );
            }
        }
        Ok(dead_tokens)
    }

    #[cfg(feature = "mock-push")]
    pub async fn send_multicast(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> anyhow::Result<Vec<String>> {
        tracing::info!(
            tokens = tokens.len(),
            title = %message.title,
            "Test mode: mock push multicast"
        );
        self.sent
            .lock()
            .unwrap()
            .push((tokens.to_vec(), message.clone()));
        Ok(Vec::new())
    }
}

/// Drain the notification outbox: claim a batch, then push to each
/// recipient's registered devices and email on cancellations.
///
/// The claim commits before any delivery happens; sends never hold a
/// transaction. A crash after the claim loses that batch, which the
/// best-effort contract allows.
pub async fn dispatch_pending(
    pool: &PgPool,
    push: &PushService,
    email: &EmailService,
) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await?;
    let batch = notification::claim_unsent(DISPATCH_BATCH, &mut tx).await?;
    for entry in &batch {
        notification::mark_sent(entry.id, &mut tx).await?;
    }
    tx.commit().await?;
    if batch.is_empty() {
        return Ok(0);
    }

    let mut dispatched = 0;
    let mut dead_tokens = Vec::new();
    for entry in &batch {
        let tokens =
            notification::fcm_tokens_for_user(&entry.recipient_id, pool)
                .await?;

        if !tokens.is_empty() {
            let message = PushMessage {
                title: entry
                    .title
                    .clone()
                    .unwrap_or_else(|| entry.notification_type.as_str().into()),
                body: entry.message.clone(),
                data: serde_json::json!({
                    "type": entry.notification_type.as_str(),
                    "reservation_id": entry.reservation_id,
                    "submitter_id": entry.submitter_id,
                }),
            };
            match push.send_multicast(&tokens, &message).await {
                Ok(dead) => dead_tokens.extend(dead),
                Err(e) => tracing::error!(
                    notification_id = %entry.id,
                    "push dispatch failed: {e:#}"
                ),
            }
        }

        if entry.notification_type == NotificationType::ReservationCancelled {
            match store::get_user(&entry.recipient_id, pool).await {
                Ok(user) => {
                    let coder = match entry.reservation_id {
                        Some(id) => sqlx::query_scalar::<_, String>(
                            "SELECT coder FROM reservations WHERE id = $1",
                        )
                        .bind(id)
                        .fetch_optional(pool)
                        .await?
                        .unwrap_or_default(),
                        None => String::new(),
                    };
                    if let Err(e) = email
                        .send_reservation_cancelled_email(
                            &user.email,
                            &user.username,
                            &coder,
                        )
                        .await
                    {
                        tracing::error!(
                            notification_id = %entry.id,
                            "cancellation email failed: {e:#}"
                        );
                    }
                }
                Err(e) => tracing::error!(
                    notification_id = %entry.id,
                    "recipient lookup failed: {e:#}"
                ),
            }
        }

        dispatched += 1;
    }

    for token in dead_tokens {
        let _ = notification::remove_fcm_token(&token, pool)
            .await
            .map_err(|e| {
                tracing::warn!("failed to prune dead push token: {e:#}")
            });
    }

    Ok(dispatched)
}
