//! Reservation state machine: booking, joining, and cancellation.
//!
//! Every entry point runs one transaction and takes explicit row locks in
//! a fixed order: acting user, target slot, sibling slots (ascending id),
//! reservation rows, then participants. Refunds go through the ledger's
//! idempotent `refund`, so a retried cancellation can never pay twice.

use jiff::SignedDuration;
use jiff::civil::Date;
use payloads::{
    MATCH_SEATS, NotificationType, PaymentChannel, PaymentState,
    ReservationId, ReservationState, ReservationType, UserId, requests,
};
use rust_decimal::Decimal;
use sqlx::{Acquire, PgPool};
use uuid::Uuid;

use super::{
    CourtSlot, Participant, Reservation, StoreError, Tx, date_sqlx,
    get_reservation_tx, ledger, lock_participants_tx, lock_reservation_tx,
    lock_user_tx, notification, notification::NewNotification, slot,
};
use crate::pricing;
use crate::time::TimeSource;

const CODER_LEN: usize = 6;
const CODER_MAX_ATTEMPTS: u32 = 10;

/// Booking code printed on confirmations and shown at the desk.
fn generate_coder() -> String {
    Uuid::new_v4().simple().to_string()[..CODER_LEN].to_uppercase()
}

/// Rating window for open matches: bounds must be finite and ordered.
fn validate_rating_window(
    min: Option<f64>,
    max: Option<f64>,
) -> Result<(), StoreError> {
    if min.is_some_and(|v| !v.is_finite())
        || max.is_some_and(|v| !v.is_finite())
    {
        return Err(StoreError::InvalidRange);
    }
    if let (Some(min), Some(max)) = (min, max)
        && min > max
    {
        return Err(StoreError::InvalidRange);
    }
    Ok(())
}

fn rating_in_window(
    rating: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> bool {
    min.is_none_or(|v| rating >= v) && max.is_none_or(|v| rating <= v)
}

/// Whether the creator already consumed their Infinity free seat on this
/// date.
async fn infinity_used_on_date(
    user_id: &UserId,
    date: Date,
    tx: &mut Tx<'_>,
) -> Result<bool, StoreError> {
    let used: bool = sqlx::query_scalar(
        "SELECT EXISTS(
            SELECT 1 FROM reservations
            WHERE creator_user_id = $1
              AND date = $2
              AND used_infinity_discount
              AND is_cancel = FALSE
        )",
    )
    .bind(user_id)
    .bind(date_sqlx(date))
    .fetch_one(&mut **tx)
    .await?;

    Ok(used)
}

/// Draw the reservation id before inserting the row, so the creator debit
/// can carry the final `R{id}` type key.
async fn next_reservation_id(
    tx: &mut Tx<'_>,
) -> Result<ReservationId, StoreError> {
    let id: i64 = sqlx::query_scalar(
        "SELECT nextval(pg_get_serial_sequence('reservations', 'id'))",
    )
    .fetch_one(&mut **tx)
    .await?;

    Ok(ReservationId(id))
}

#[allow(clippy::too_many_arguments)]
async fn insert_reservation(
    id: ReservationId,
    details: &requests::CreateReservation,
    slot: &CourtSlot,
    etat: ReservationState,
    charge: &pricing::ChargeBreakdown,
    time_source: &TimeSource,
    tx: &mut Tx<'_>,
) -> Result<Reservation, StoreError> {
    let mut last_collision = None;
    for attempt in 0..CODER_MAX_ATTEMPTS {
        let coder = generate_coder();
        // Savepoint per attempt: a unique violation must not poison the
        // outer transaction.
        let mut sp = tx.begin().await?;
        let inserted = sqlx::query_as::<_, Reservation>(
            "INSERT INTO reservations (
                id,
                slot_id,
                date,
                creator_user_id,
                reservation_type,
                etat,
                coder,
                unit_total_price,
                is_prepaid_for_all,
                used_infinity_discount,
                rating_min,
                rating_max,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            RETURNING *",
        )
        .bind(id)
        .bind(slot.id)
        .bind(date_sqlx(details.date))
        .bind(details.user_id)
        .bind(details.reservation_type)
        .bind(etat)
        .bind(&coder)
        .bind(charge.recorded_total)
        .bind(details.pay_for_all)
        .bind(charge.used_infinity)
        .bind(details.rating_min)
        .bind(details.rating_max)
        .bind(time_source.now_sqlx())
        .fetch_one(&mut *sp)
        .await;

        match inserted.map_err(StoreError::from) {
            Ok(reservation) => {
                sp.commit().await?;
                return Ok(reservation);
            }
            // Only the coder carries a unique constraint this insert can
            // trip; regenerate and try again.
            Err(StoreError::NotUnique(e)) => {
                sp.rollback().await?;
                tracing::warn!(
                    reservation_id = %id,
                    attempt,
                    "booking code collision, regenerating"
                );
                last_collision = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::NotUnique(last_collision.expect(
        "collision loop always records an error before exhausting",
    )))
}

async fn insert_participant(
    reservation_id: ReservationId,
    user_id: UserId,
    is_creator: bool,
    payment_state: PaymentState,
    payment_channel: PaymentChannel,
    team: i16,
    time_source: &TimeSource,
    tx: &mut Tx<'_>,
) -> Result<Participant, StoreError> {
    let participant = sqlx::query_as::<_, Participant>(
        "INSERT INTO participants (
            reservation_id,
            user_id,
            is_creator,
            payment_state,
            payment_channel,
            team,
            created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(reservation_id)
    .bind(user_id)
    .bind(is_creator)
    .bind(payment_state)
    .bind(payment_channel)
    .bind(team)
    .bind(time_source.now_sqlx())
    .fetch_one(&mut **tx)
    .await?;

    Ok(participant)
}

/// Which type key a system-side cancellation refund uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefundStyle {
    /// Explicit user cancellation: one key per `(reservation, user,
    /// participant)`.
    PerParticipant,
    /// Automatic displacement: the creator's key is `refund:cancel:R{id}`.
    BulkCancel,
}

/// Shared cancellation: refund every paid participant exactly what they
/// were debited, drop the participant rows, mark the reservation
/// cancelled, and notify everyone except `notify_except`.
async fn cancel_reservation_rows(
    reservation: &Reservation,
    style: RefundStyle,
    notify_except: Option<UserId>,
    time_source: &TimeSource,
    tx: &mut Tx<'_>,
) -> Result<(), StoreError> {
    let participants = lock_participants_tx(&reservation.id, tx).await?;

    for participant in &participants {
        if participant.payment_state != PaymentState::Paid {
            continue;
        }
        // No debit row means the seat was free (Infinity, on-site, or
        // covered by a prepaid creator); nothing to refund.
        let Some(debit) =
            ledger::find_debit_for(&participant.user_id, &reservation.id, tx)
                .await?
        else {
            continue;
        };
        let key = match style {
            RefundStyle::BulkCancel if participant.is_creator => {
                ledger::cancel_refund_key(reservation.id)
            }
            _ => ledger::participant_refund_key(
                reservation.id,
                participant.user_id,
                participant.id,
            ),
        };
        ledger::refund(
            &participant.user_id,
            debit.amount.abs(),
            &key,
            time_source,
            tx,
        )
        .await?;
    }

    sqlx::query("DELETE FROM participants WHERE reservation_id = $1")
        .bind(reservation.id)
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        "UPDATE reservations SET etat = $2, is_cancel = TRUE WHERE id = $1",
    )
    .bind(reservation.id)
    .bind(ReservationState::Cancelled)
    .execute(&mut **tx)
    .await?;

    let recipients = participants
        .iter()
        .map(|p| p.user_id)
        .filter(|id| Some(*id) != notify_except);
    notification::enqueue_for_all(
        recipients,
        NewNotification::reservation(
            reservation.creator_user_id,
            reservation.id,
            NotificationType::ReservationCancelled,
            format!("Reservation {} has been cancelled", reservation.coder),
        ),
        time_source,
        tx,
    )
    .await?;

    tracing::info!(
        reservation_id = %reservation.id,
        operation = "cancel",
        ?style,
        "reservation cancelled"
    );
    Ok(())
}

/// When the sibling group is saturated with VALID reservations, pending
/// reservations on the same time can no longer win a court; sweep them.
async fn cancel_excess_pending(
    slot: &CourtSlot,
    date: Date,
    time_source: &TimeSource,
    tx: &mut Tx<'_>,
) -> Result<(), StoreError> {
    let group = slot::lock_sibling_group(slot, tx).await?;
    let capacity = slot::group_capacity(&group);
    let valid = slot::group_valid_count(&group, date, tx).await?;
    if valid < capacity {
        return Ok(());
    }

    let slot_ids: Vec<i64> = group.iter().map(|s| s.id.0).collect();
    let pending = sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations
        WHERE slot_id = ANY($1)
          AND date = $2
          AND etat = $3
          AND is_cancel = FALSE
        ORDER BY id
        FOR UPDATE",
    )
    .bind(&slot_ids)
    .bind(date_sqlx(date))
    .bind(ReservationState::Pending)
    .fetch_all(&mut **tx)
    .await?;

    for reservation in &pending {
        cancel_reservation_rows(
            reservation,
            RefundStyle::BulkCancel,
            None,
            time_source,
            tx,
        )
        .await?;
    }

    if !pending.is_empty() {
        tracing::info!(
            slot_id = %slot.id,
            %date,
            swept = pending.len(),
            "cancelled pending reservations on saturated group"
        );
    }
    Ok(())
}

/// A reservation just became VALID: displace competing VALID reservations
/// on sibling slots. An OPEN match only displaces other OPEN matches; a
/// PRIVATE one displaces any type. PENDING siblings are left alone; they
/// stay eligible for remaining capacity.
async fn cancel_valid_siblings(
    new_valid: &Reservation,
    slot: &CourtSlot,
    time_source: &TimeSource,
    tx: &mut Tx<'_>,
) -> Result<(), StoreError> {
    let group = slot::lock_sibling_group(slot, tx).await?;
    for sibling in group.iter().filter(|s| s.id != slot.id) {
        let valids = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations
            WHERE slot_id = $1
              AND date = $2
              AND etat = $3
              AND is_cancel = FALSE
            ORDER BY id
            FOR UPDATE",
        )
        .bind(sibling.id)
        .bind(date_sqlx(new_valid.date))
        .bind(ReservationState::Valid)
        .fetch_all(&mut **tx)
        .await?;

        for reservation in valids {
            if reservation.id == new_valid.id {
                continue;
            }
            if new_valid.reservation_type == ReservationType::Open
                && reservation.reservation_type != ReservationType::Open
            {
                continue;
            }
            cancel_reservation_rows(
                &reservation,
                RefundStyle::BulkCancel,
                None,
                time_source,
                tx,
            )
            .await?;
            slot::set_available(&sibling.id, true, tx).await?;
        }
    }
    Ok(())
}

/// Book a slot.
///
/// Runs one transaction: lock creator and slot, fall back to a free
/// sibling when the requested slot is full, charge the creator through the
/// ledger, re-check capacity, insert the reservation and the creator's
/// participant row.
#[tracing::instrument(skip(pool, time_source), fields(user_id = %details.user_id, slot_id = %details.slot_id))]
pub async fn create_reservation(
    details: &requests::CreateReservation,
    pool: &PgPool,
    time_source: &TimeSource,
) -> Result<Reservation, StoreError> {
    let mut tx = pool.begin().await?;

    let user = lock_user_tx(&details.user_id, &mut tx).await?;
    let mut slot = slot::lock_slot(&details.slot_id, &mut tx).await?;

    if !slot::has_available_capacity(&slot.id, details.date, &mut tx).await? {
        match slot::find_free_sibling(&slot, details.date, &mut tx).await? {
            Some(sibling) => {
                tracing::info!(
                    requested = %slot.id,
                    reassigned = %sibling.id,
                    "requested slot full, reassigned to sibling"
                );
                slot = sibling;
            }
            None => return Err(StoreError::SlotFull),
        }
    }

    if details.reservation_type == ReservationType::Open {
        validate_rating_window(details.rating_min, details.rating_max)?;
    }

    let infinity_available =
        !infinity_used_on_date(&user.id, details.date, &mut tx).await?;
    let charge = pricing::effective_charge(
        user.membership_tier,
        slot.unit_price,
        details.reservation_type,
        details.payment_channel,
        details.pay_for_all,
        infinity_available,
    );

    let reservation_id = next_reservation_id(&mut tx).await?;

    if charge.amount_due > Decimal::ZERO {
        ledger::debit(
            &user.id,
            charge.amount_due,
            &ledger::creator_debit_key(reservation_id, user.id),
            time_source,
            &mut tx,
        )
        .await?;
        notification::enqueue(
            &NewNotification::reservation(
                user.id,
                reservation_id,
                NotificationType::CreditDeduction,
                format!("{} credits deducted for your booking", charge.amount_due),
            ),
            time_source,
            &mut tx,
        )
        .await?;
    }

    // Defense against a concurrent inserter between slot selection and
    // now: the finally selected slot must still have room.
    if !slot::has_available_capacity(&slot.id, details.date, &mut tx).await? {
        return Err(StoreError::SlotJustTaken);
    }

    let instantly_valid = details.reservation_type == ReservationType::Private
        && details.payment_channel == PaymentChannel::Credit;
    let etat = if instantly_valid {
        ReservationState::Valid
    } else {
        ReservationState::Pending
    };

    let reservation = insert_reservation(
        reservation_id,
        details,
        &slot,
        etat,
        &charge,
        time_source,
        &mut tx,
    )
    .await?;

    if instantly_valid {
        cancel_excess_pending(&slot, details.date, time_source, &mut tx)
            .await?;
    }

    let at_capacity =
        !slot::has_available_capacity(&slot.id, details.date, &mut tx)
            .await?;
    if instantly_valid || at_capacity {
        slot::set_available(&slot.id, false, &mut tx).await?;
    }

    let skip_deduction = details.reservation_type == ReservationType::Private
        && details.payment_channel == PaymentChannel::Onsite;
    let payment_state = if skip_deduction {
        PaymentState::Unpaid
    } else {
        PaymentState::Paid
    };
    insert_participant(
        reservation.id,
        user.id,
        true,
        payment_state,
        details.payment_channel,
        0,
        time_source,
        &mut tx,
    )
    .await?;

    if instantly_valid {
        notification::enqueue(
            &NewNotification::reservation(
                user.id,
                reservation.id,
                NotificationType::ReservationConfirmed,
                format!("Reservation {} is confirmed", reservation.coder),
            ),
            time_source,
            &mut tx,
        )
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        reservation_id = %reservation.id,
        slot_id = %slot.id,
        operation = "create",
        etat = %reservation.etat,
        "reservation created"
    );
    Ok(reservation)
}

/// Seat a player on an existing reservation. The fourth seat promotes an
/// OPEN match to VALID and displaces competing VALID siblings.
#[tracing::instrument(skip(pool, time_source), fields(user_id = %details.user_id, reservation_id = %details.reservation_id))]
pub async fn join_reservation(
    details: &requests::JoinReservation,
    pool: &PgPool,
    time_source: &TimeSource,
) -> Result<Reservation, StoreError> {
    if !(0..MATCH_SEATS as i16).contains(&details.team) {
        return Err(StoreError::InvalidRange);
    }

    let mut tx = pool.begin().await?;

    let user = lock_user_tx(&details.user_id, &mut tx).await?;
    let reservation =
        lock_reservation_tx(&details.reservation_id, &mut tx).await?;
    if reservation.is_cancel {
        return Err(StoreError::ReservationCancelled);
    }
    let slot = slot::lock_slot(&reservation.slot_id, &mut tx).await?;

    if reservation.reservation_type == ReservationType::Open
        && !rating_in_window(
            user.rating,
            reservation.rating_min,
            reservation.rating_max,
        )
    {
        return Err(StoreError::RatingOutOfRange);
    }

    let participants = lock_participants_tx(&reservation.id, &mut tx).await?;
    if participants.iter().any(|p| p.user_id == user.id) {
        return Err(StoreError::AlreadyJoined);
    }
    if participants.len() >= MATCH_SEATS {
        return Err(StoreError::ReservationFull);
    }
    if participants.iter().any(|p| p.team == details.team) {
        return Err(StoreError::SeatTaken);
    }

    let payment_state = if reservation.is_prepaid_for_all {
        // The creator's debit covers this seat.
        PaymentState::Paid
    } else {
        match details.payment_channel {
            PaymentChannel::Credit => {
                if slot.unit_price > Decimal::ZERO {
                    ledger::debit(
                        &user.id,
                        slot.unit_price,
                        &ledger::join_debit_key(
                            reservation.id,
                            user.id,
                            details.team,
                        ),
                        time_source,
                        &mut tx,
                    )
                    .await?;
                    notification::enqueue(
                        &NewNotification::reservation(
                            user.id,
                            reservation.id,
                            NotificationType::CreditDeduction,
                            format!(
                                "{} credits deducted for joining match {}",
                                slot.unit_price, reservation.coder
                            ),
                        ),
                        time_source,
                        &mut tx,
                    )
                    .await?;
                }
                PaymentState::Paid
            }
            PaymentChannel::Onsite => PaymentState::Unpaid,
        }
    };

    insert_participant(
        reservation.id,
        user.id,
        false,
        payment_state,
        details.payment_channel,
        details.team,
        time_source,
        &mut tx,
    )
    .await?;

    let filled = participants.len() + 1;
    let promotes = filled == MATCH_SEATS
        && reservation.etat == ReservationState::Pending
        && reservation.reservation_type == ReservationType::Open;

    if promotes {
        sqlx::query("UPDATE reservations SET etat = $2 WHERE id = $1")
            .bind(reservation.id)
            .bind(ReservationState::Valid)
            .execute(&mut *tx)
            .await?;

        cancel_valid_siblings(&reservation, &slot, time_source, &mut tx)
            .await?;

        if !slot::has_available_capacity(&slot.id, reservation.date, &mut tx)
            .await?
        {
            slot::set_available(&slot.id, false, &mut tx).await?;
        }

        let recipients = participants
            .iter()
            .map(|p| p.user_id)
            .chain(std::iter::once(user.id));
        notification::enqueue_for_all(
            recipients,
            NewNotification::reservation(
                reservation.creator_user_id,
                reservation.id,
                NotificationType::ReservationConfirmed,
                format!(
                    "Match {} is complete and confirmed",
                    reservation.coder
                ),
            ),
            time_source,
            &mut tx,
        )
        .await?;
    }

    let updated = get_reservation_tx(&reservation.id, &mut tx).await?;
    tx.commit().await?;

    tracing::info!(
        reservation_id = %updated.id,
        operation = "join",
        filled,
        promoted = promotes,
        "participant joined"
    );
    Ok(updated)
}

/// Cancel a reservation, or leave it, depending on who asks.
///
/// Rejected inside the 24-hour window before the slot's start time. The
/// creator cancels the whole reservation with full per-debit refunds; a
/// joiner only leaves their seat, reverting a VALID match to PENDING when
/// it drops below four players.
#[tracing::instrument(skip(pool, time_source), fields(user_id = %details.user_id, reservation_id = %details.reservation_id))]
pub async fn cancel_reservation(
    details: &requests::CancelReservation,
    pool: &PgPool,
    time_source: &TimeSource,
) -> Result<Reservation, StoreError> {
    let mut tx = pool.begin().await?;

    let reservation =
        lock_reservation_tx(&details.reservation_id, &mut tx).await?;
    if reservation.is_cancel {
        return Err(StoreError::ReservationCancelled);
    }
    let slot = slot::lock_slot(&reservation.slot_id, &mut tx).await?;

    let now = time_source.now();
    if slot.start_time.duration_since(now)
        < SignedDuration::from_hours(payloads::CANCEL_WINDOW_HOURS)
    {
        return Err(StoreError::TooLateToCancel);
    }

    let participants = lock_participants_tx(&reservation.id, &mut tx).await?;
    let actor = participants
        .iter()
        .find(|p| p.user_id == details.user_id)
        .ok_or(StoreError::NotAParticipant)?
        .clone();

    if actor.is_creator {
        cancel_reservation_rows(
            &reservation,
            RefundStyle::PerParticipant,
            Some(actor.user_id),
            time_source,
            &mut tx,
        )
        .await?;

        if slot::has_available_capacity(&slot.id, reservation.date, &mut tx)
            .await?
        {
            slot::set_available(&slot.id, true, &mut tx).await?;
        }
    } else {
        if actor.payment_state == PaymentState::Paid
            && let Some(debit) = ledger::find_debit_for(
                &actor.user_id,
                &reservation.id,
                &mut tx,
            )
            .await?
        {
            ledger::refund(
                &actor.user_id,
                debit.amount.abs(),
                &ledger::participant_refund_key(
                    reservation.id,
                    actor.user_id,
                    actor.id,
                ),
                time_source,
                &mut tx,
            )
            .await?;
        }

        sqlx::query("DELETE FROM participants WHERE id = $1")
            .bind(actor.id)
            .execute(&mut *tx)
            .await?;

        let remaining: Vec<UserId> = participants
            .iter()
            .map(|p| p.user_id)
            .filter(|id| *id != actor.user_id)
            .collect();

        if reservation.etat == ReservationState::Valid
            && remaining.len() < MATCH_SEATS
        {
            sqlx::query("UPDATE reservations SET etat = $2 WHERE id = $1")
                .bind(reservation.id)
                .bind(ReservationState::Pending)
                .execute(&mut *tx)
                .await?;
            slot::set_available(&slot.id, true, &mut tx).await?;

            notification::enqueue_for_all(
                remaining,
                NewNotification::reservation(
                    reservation.creator_user_id,
                    reservation.id,
                    NotificationType::MatchStatusChanged,
                    format!(
                        "A player left; match {} is pending again",
                        reservation.coder
                    ),
                ),
                time_source,
                &mut tx,
            )
            .await?;
        } else {
            notification::enqueue_for_all(
                remaining,
                NewNotification::reservation(
                    reservation.creator_user_id,
                    reservation.id,
                    NotificationType::ParticipantLeft,
                    format!("A player left match {}", reservation.coder),
                ),
                time_source,
                &mut tx,
            )
            .await?;
        }
    }

    let updated = get_reservation_tx(&reservation.id, &mut tx).await?;
    tx.commit().await?;

    tracing::info!(
        reservation_id = %updated.id,
        operation = "cancel",
        by_creator = actor.is_creator,
        "cancellation committed"
    );
    Ok(updated)
}
