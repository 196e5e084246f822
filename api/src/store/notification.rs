//! Notification outbox.
//!
//! State-machine transitions enqueue rows here inside their own
//! transaction; the scheduler's dispatch pass delivers them afterwards.
//! Delivery is fire-and-forget and never holds a booking transaction.

use payloads::{NotificationType, ReservationId, UserId};

use super::{Notification, StoreError, Tx};
use crate::time::TimeSource;

/// An outbox entry to enqueue.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: UserId,
    pub reservation_id: Option<ReservationId>,
    pub submitter_id: Option<UserId>,
    pub notification_type: NotificationType,
    pub title: Option<String>,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl NewNotification {
    pub fn reservation(
        recipient_id: UserId,
        reservation_id: ReservationId,
        notification_type: NotificationType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id,
            reservation_id: Some(reservation_id),
            submitter_id: None,
            notification_type,
            title: None,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_submitter(mut self, submitter_id: UserId) -> Self {
        self.submitter_id = Some(submitter_id);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Enqueue one outbox row in the caller's transaction.
pub async fn enqueue(
    notification: &NewNotification,
    time_source: &TimeSource,
    tx: &mut Tx<'_>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO notifications (
            recipient_id,
            reservation_id,
            submitter_id,
            notification_type,
            title,
            message,
            data,
            created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(notification.recipient_id)
    .bind(notification.reservation_id)
    .bind(notification.submitter_id)
    .bind(notification.notification_type)
    .bind(&notification.title)
    .bind(&notification.message)
    .bind(notification.data.as_ref().map(sqlx::types::Json))
    .bind(time_source.now_sqlx())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Enqueue the same notification for several recipients.
pub async fn enqueue_for_all(
    recipients: impl IntoIterator<Item = UserId>,
    template: NewNotification,
    time_source: &TimeSource,
    tx: &mut Tx<'_>,
) -> Result<(), StoreError> {
    for recipient_id in recipients {
        let notification = NewNotification {
            recipient_id,
            ..template.clone()
        };
        enqueue(&notification, time_source, tx).await?;
    }
    Ok(())
}

/// Claim a batch of undelivered notifications. Locked with SKIP LOCKED so
/// concurrent dispatchers don't double-send; caller must mark them sent in
/// the same transaction.
pub async fn claim_unsent(
    limit: i64,
    tx: &mut Tx<'_>,
) -> Result<Vec<Notification>, StoreError> {
    let notifications = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications
        WHERE sent = FALSE
        ORDER BY id
        LIMIT $1
        FOR UPDATE SKIP LOCKED",
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await?;

    Ok(notifications)
}

pub async fn mark_sent(
    notification_id: payloads::NotificationId,
    tx: &mut Tx<'_>,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE notifications SET sent = TRUE WHERE id = $1")
        .bind(notification_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Push tokens registered for a user. Read-only.
pub async fn fcm_tokens_for_user(
    user_id: &UserId,
    pool: &sqlx::PgPool,
) -> Result<Vec<String>, StoreError> {
    let tokens: Vec<String> = sqlx::query_scalar(
        "SELECT token FROM fcm_tokens WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(tokens)
}

/// Register a push token; re-registration refreshes the timestamp.
pub async fn register_fcm_token(
    user_id: &UserId,
    token: &str,
    time_source: &TimeSource,
    pool: &sqlx::PgPool,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO fcm_tokens (user_id, token, created_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, token) DO UPDATE SET created_at = $3",
    )
    .bind(user_id)
    .bind(token)
    .bind(time_source.now_sqlx())
    .execute(pool)
    .await?;

    Ok(())
}

/// Drop a token the push dispatcher reported as dead.
pub async fn remove_fcm_token(
    token: &str,
    pool: &sqlx::PgPool,
) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM fcm_tokens WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}
