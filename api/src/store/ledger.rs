//! Credit ledger operations
//!
//! The ledger is the only mutator of `users.credit_balance`. Every delta
//! appends a `credit_transactions` row; `(user_id, type_key)` is unique and
//! doubles as the refund idempotence gate. All operations run inside the
//! caller's transaction with the user row locked.

use payloads::{ReservationId, UserId};
use rust_decimal::Decimal;

use super::{CreditTransaction, StoreError, Tx};
use crate::time::TimeSource;

/// Type key for the creator's booking debit.
pub fn creator_debit_key(
    reservation_id: ReservationId,
    user_id: UserId,
) -> String {
    format!("debit:reservation:R{reservation_id}:U{user_id}:creator")
}

/// Type key for a joiner's seat debit.
pub fn join_debit_key(
    reservation_id: ReservationId,
    user_id: UserId,
    team: i16,
) -> String {
    format!("debit:join:R{reservation_id}:U{user_id}:T{team}")
}

/// Type key for refunding one participant on cancellation.
pub fn participant_refund_key(
    reservation_id: ReservationId,
    user_id: UserId,
    participant_id: payloads::ParticipantId,
) -> String {
    format!("refund:R{reservation_id}:U{user_id}:P{participant_id}")
}

/// Type key for refunding the creator when the system cancels a
/// reservation (sibling displacement, excess-pending sweep).
pub fn cancel_refund_key(reservation_id: ReservationId) -> String {
    format!("refund:cancel:R{reservation_id}")
}

/// Atomically decrement a user's balance and append the debit row.
///
/// The user row is locked before the balance is read, so a concurrent
/// debit cannot overdraw.
pub async fn debit(
    user_id: &UserId,
    amount: Decimal,
    type_key: &str,
    time_source: &TimeSource,
    tx: &mut Tx<'_>,
) -> Result<CreditTransaction, StoreError> {
    if amount <= Decimal::ZERO {
        return Err(StoreError::InvalidAmount);
    }

    let balance: Decimal = sqlx::query_scalar(
        "SELECT credit_balance FROM users WHERE id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StoreError::UserNotFound)?;

    if balance < amount {
        return Err(StoreError::InsufficientFunds);
    }

    sqlx::query(
        "UPDATE users SET credit_balance = credit_balance - $2 WHERE id = $1",
    )
    .bind(user_id)
    .bind(amount)
    .execute(&mut **tx)
    .await?;

    let txn = sqlx::query_as::<_, CreditTransaction>(
        "INSERT INTO credit_transactions (user_id, amount, type_key, created_at)
        VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(user_id)
    .bind(-amount.abs())
    .bind(type_key)
    .bind(time_source.now_sqlx())
    .fetch_one(&mut **tx)
    .await?;

    tracing::info!(
        user_id = %user_id,
        amount = %txn.amount,
        type_key,
        "ledger debit"
    );
    Ok(txn)
}

/// Refund a user once per type key.
///
/// Returns whether a refund actually occurred: `false` means a transaction
/// with this `(user, type_key)` already exists and the balance was left
/// untouched. A concurrent duplicate resolves through the unique
/// constraint and also reports `false`.
pub async fn refund(
    user_id: &UserId,
    amount: Decimal,
    type_key: &str,
    time_source: &TimeSource,
    tx: &mut Tx<'_>,
) -> Result<bool, StoreError> {
    if amount <= Decimal::ZERO {
        return Err(StoreError::InvalidAmount);
    }

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM credit_transactions
        WHERE user_id = $1 AND type_key = $2",
    )
    .bind(user_id)
    .bind(type_key)
    .fetch_optional(&mut **tx)
    .await?;

    if existing.is_some() {
        tracing::info!(user_id = %user_id, type_key, "refund already applied");
        return Ok(false);
    }

    sqlx::query("SELECT 1 FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    let inserted = sqlx::query(
        "INSERT INTO credit_transactions (user_id, amount, type_key, created_at)
        VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(amount.abs())
    .bind(type_key)
    .bind(time_source.now_sqlx())
    .execute(&mut **tx)
    .await;

    match inserted.map_err(StoreError::from) {
        Ok(_) => {}
        Err(StoreError::NotUnique(_)) => return Ok(false),
        Err(e) => return Err(e),
    }

    sqlx::query(
        "UPDATE users SET credit_balance = credit_balance + $2 WHERE id = $1",
    )
    .bind(user_id)
    .bind(amount.abs())
    .execute(&mut **tx)
    .await?;

    tracing::info!(
        user_id = %user_id,
        amount = %amount.abs(),
        type_key,
        "ledger refund"
    );
    Ok(true)
}

/// Locate the most recent debit this user made for a reservation, whether
/// as creator or joiner. Cancellation refunds exactly this amount rather
/// than the slot's current price.
pub async fn find_debit_for(
    user_id: &UserId,
    reservation_id: &ReservationId,
    tx: &mut Tx<'_>,
) -> Result<Option<CreditTransaction>, StoreError> {
    let creator_pattern =
        format!("debit:reservation:R{reservation_id}:U{user_id}:%");
    let join_pattern = format!("debit:join:R{reservation_id}:U{user_id}:%");

    let txn = sqlx::query_as::<_, CreditTransaction>(
        "SELECT * FROM credit_transactions
        WHERE user_id = $1
          AND (type_key LIKE $2 OR type_key LIKE $3)
        ORDER BY created_at DESC, id DESC
        LIMIT 1",
    )
    .bind(user_id)
    .bind(creator_pattern)
    .bind(join_pattern)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(txn)
}
