//! Capacity arbitration over court slots.
//!
//! Sibling slots share `(court_id, start_time, end_time)`; a slot group's
//! capacity is the sum of its rows' capacities. Only VALID reservations
//! consume capacity; PENDING reservations compete for it but hold nothing.

use jiff::civil::Date;
use jiff_sqlx::ToSqlx;
use payloads::{ReservationState, SlotId};

use super::{CourtSlot, StoreError, Tx, date_sqlx};

pub async fn get_slot(
    slot_id: &SlotId,
    tx: &mut Tx<'_>,
) -> Result<CourtSlot, StoreError> {
    sqlx::query_as::<_, CourtSlot>("SELECT * FROM court_slots WHERE id = $1")
        .bind(slot_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::SlotNotFound)
}

/// Lock a slot row for the remainder of the transaction.
pub async fn lock_slot(
    slot_id: &SlotId,
    tx: &mut Tx<'_>,
) -> Result<CourtSlot, StoreError> {
    sqlx::query_as::<_, CourtSlot>(
        "SELECT * FROM court_slots WHERE id = $1 FOR UPDATE",
    )
    .bind(slot_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StoreError::SlotNotFound)
}

/// Count VALID reservations on `(slot_id, date)`, locking the counted rows
/// so a concurrent creator cannot slip a new VALID row underneath us.
pub async fn valid_reservation_count(
    slot_id: &SlotId,
    date: Date,
    tx: &mut Tx<'_>,
) -> Result<i64, StoreError> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM reservations
        WHERE slot_id = $1 AND date = $2 AND etat = $3 AND is_cancel = FALSE
        ORDER BY id
        FOR UPDATE",
    )
    .bind(slot_id)
    .bind(date_sqlx(date))
    .bind(ReservationState::Valid)
    .fetch_all(&mut **tx)
    .await?;

    Ok(ids.len() as i64)
}

/// Whether the slot can take one more VALID reservation on the date.
///
/// Locks the slot row first, then recounts under lock; the `available`
/// hint plays no part in the decision.
pub async fn has_available_capacity(
    slot_id: &SlotId,
    date: Date,
    tx: &mut Tx<'_>,
) -> Result<bool, StoreError> {
    let slot = lock_slot(slot_id, tx).await?;
    let active = valid_reservation_count(slot_id, date, tx).await?;
    Ok(active < i64::from(slot.capacity.max(1)))
}

/// All slots sharing the group triple, ascending id, locked. Includes the
/// given slot itself.
pub async fn lock_sibling_group(
    slot: &CourtSlot,
    tx: &mut Tx<'_>,
) -> Result<Vec<CourtSlot>, StoreError> {
    let slots = sqlx::query_as::<_, CourtSlot>(
        "SELECT * FROM court_slots
        WHERE court_id = $1 AND start_time = $2 AND end_time = $3
        ORDER BY id
        FOR UPDATE",
    )
    .bind(slot.court_id)
    .bind(slot.start_time.to_sqlx())
    .bind(slot.end_time.to_sqlx())
    .fetch_all(&mut **tx)
    .await?;

    Ok(slots)
}

/// Find a sibling slot with free capacity for the date, if any.
///
/// Siblings are enumerated and locked in ascending id order; the first one
/// that still has capacity wins.
pub async fn find_free_sibling(
    slot: &CourtSlot,
    date: Date,
    tx: &mut Tx<'_>,
) -> Result<Option<CourtSlot>, StoreError> {
    let siblings = lock_sibling_group(slot, tx).await?;
    for sibling in siblings {
        if sibling.id == slot.id {
            continue;
        }
        if has_available_capacity(&sibling.id, date, tx).await? {
            return Ok(Some(sibling));
        }
    }
    Ok(None)
}

/// Update the denormalized availability hint.
pub async fn set_available(
    slot_id: &SlotId,
    available: bool,
    tx: &mut Tx<'_>,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE court_slots SET available = $2 WHERE id = $1")
        .bind(slot_id)
        .bind(available)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Total capacity across a locked sibling group.
pub fn group_capacity(slots: &[CourtSlot]) -> i64 {
    slots.iter().map(|s| i64::from(s.capacity.max(1))).sum()
}

/// Total VALID reservations across a locked sibling group on a date.
pub async fn group_valid_count(
    slots: &[CourtSlot],
    date: Date,
    tx: &mut Tx<'_>,
) -> Result<i64, StoreError> {
    let mut total = 0;
    for slot in slots {
        total += valid_reservation_count(&slot.id, date, tx).await?;
    }
    Ok(total)
}
