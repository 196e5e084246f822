//! Database store module for the booking core.
//!
//! ## Design Decisions
//!
//! ### Lock discipline
//! - **Row locks, not hints**: every write path locks the rows it is about
//!   to reason over with `SELECT ... FOR UPDATE` inside one transaction.
//!   The `available` flag on slots is a denormalized hint; authoritative
//!   capacity is always recomputed from VALID reservation rows under lock.
//! - **Deterministic lock order**: sibling slots are enumerated and locked
//!   in ascending slot id so concurrent creators racing on the same time
//!   cannot deadlock each other. Deadlocks and serialization failures the
//!   database still reports are surfaced as `SlotContention`, which the
//!   caller may retry.
//!
//! ### Ledger
//! - **Append-only**: user balances change only through the ledger module;
//!   every delta is recorded as a `credit_transactions` row whose
//!   `(user_id, type_key)` pair is unique. Refunds use that constraint as
//!   their idempotence gate.
//!
//! ### Time Source Dependency
//! - Functions that need the current time accept a `TimeSource` instead of
//!   reading the clock, so tests can control time.
//!
//! ### Database Triggers
//! - The database maintains `updated_at` via triggers; application code
//!   never sets it explicitly.

use derive_more::Display;
use jiff::Timestamp;
use jiff::civil::Date;
use jiff_sqlx::{Date as SqlxDate, Timestamp as SqlxTs, ToSqlx};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use payloads::{
    CourtId, CreditTransactionId, MembershipTier, NotificationId,
    NotificationType, ParticipantId, PaymentChannel, PaymentState,
    ReservationId, ReservationState, ReservationType, ScoreStatus, SlotId,
    TeamWin, UserId, responses, responses::OptionalTimestamp,
};

use crate::scoring::ScoreError;

pub mod ledger;
pub mod notification;
pub mod reservation;
pub mod score;
pub mod slot;

pub type Tx<'a> = Transaction<'a, Postgres>;

/// A complete user row that stays in the backend. Authentication material
/// lives with the identity service, not here.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub rating: f64,
    /// Integer percentage in [0, 100], used as /100 coefficient.
    pub reliability: i16,
    pub credit_balance: Decimal,
    pub membership_tier: MembershipTier,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
    #[sqlx(try_from = "SqlxTs")]
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, FromRow)]
pub struct Court {
    pub id: CourtId,
    pub name: String,
    pub sport: String,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
    #[sqlx(try_from = "SqlxTs")]
    pub updated_at: Timestamp,
}

/// One bookable time window on a court. Slots sharing
/// `(court_id, start_time, end_time)` are siblings and arbitrate capacity
/// together.
#[derive(Debug, Clone, FromRow)]
pub struct CourtSlot {
    pub id: SlotId,
    pub court_id: CourtId,
    #[sqlx(try_from = "SqlxTs")]
    pub start_time: Timestamp,
    #[sqlx(try_from = "SqlxTs")]
    pub end_time: Timestamp,
    pub unit_price: Decimal,
    pub capacity: i32,
    /// Hint only; never the source of truth for a booking decision.
    pub available: bool,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
    #[sqlx(try_from = "SqlxTs")]
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, FromRow)]
pub struct Reservation {
    pub id: ReservationId,
    pub slot_id: SlotId,
    #[sqlx(try_from = "SqlxDate")]
    pub date: Date,
    pub creator_user_id: UserId,
    pub reservation_type: ReservationType,
    pub etat: ReservationState,
    pub is_cancel: bool,
    pub coder: String,
    pub unit_total_price: Decimal,
    pub is_prepaid_for_all: bool,
    pub used_infinity_discount: bool,
    pub rating_min: Option<f64>,
    pub rating_max: Option<f64>,
    pub set1_a: Option<i16>,
    pub set1_b: Option<i16>,
    pub set2_a: Option<i16>,
    pub set2_b: Option<i16>,
    pub set3_a: Option<i16>,
    pub set3_b: Option<i16>,
    pub super_tiebreak: bool,
    pub teamwin: Option<TeamWin>,
    pub score_status: ScoreStatus,
    pub last_score_submitter_id: Option<UserId>,
    #[sqlx(try_from = "OptionalTimestamp")]
    pub last_score_update_at: Option<Timestamp>,
    #[sqlx(try_from = "OptionalTimestamp")]
    pub score_confirmed_at: Option<Timestamp>,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
    #[sqlx(try_from = "SqlxTs")]
    pub updated_at: Timestamp,
}

impl From<Reservation> for responses::Reservation {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id,
            slot_id: r.slot_id,
            date: r.date,
            creator_user_id: r.creator_user_id,
            reservation_type: r.reservation_type,
            etat: r.etat,
            is_cancel: r.is_cancel,
            coder: r.coder,
            unit_total_price: r.unit_total_price,
            is_prepaid_for_all: r.is_prepaid_for_all,
            rating_min: r.rating_min,
            rating_max: r.rating_max,
            set1_a: r.set1_a,
            set1_b: r.set1_b,
            set2_a: r.set2_a,
            set2_b: r.set2_b,
            set3_a: r.set3_a,
            set3_b: r.set3_b,
            super_tiebreak: r.super_tiebreak,
            teamwin: r.teamwin,
            score_status: r.score_status,
            last_score_submitter_id: r.last_score_submitter_id,
            last_score_update_at: r.last_score_update_at,
            score_confirmed_at: r.score_confirmed_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl From<Reservation> for responses::ScoreRecord {
    fn from(r: Reservation) -> Self {
        Self {
            reservation_id: r.id,
            score_status: r.score_status,
            teamwin: r.teamwin,
            set1_a: r.set1_a,
            set1_b: r.set1_b,
            set2_a: r.set2_a,
            set2_b: r.set2_b,
            set3_a: r.set3_a,
            set3_b: r.set3_b,
            super_tiebreak: r.super_tiebreak,
            last_score_submitter_id: r.last_score_submitter_id,
            last_score_update_at: r.last_score_update_at,
            score_confirmed_at: r.score_confirmed_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Participant {
    pub id: ParticipantId,
    pub reservation_id: ReservationId,
    pub user_id: UserId,
    pub is_creator: bool,
    pub payment_state: PaymentState,
    pub payment_channel: PaymentChannel,
    /// Seat index 0-3; seats {0,1} play seats {2,3}.
    pub team: i16,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
}

impl From<Participant> for responses::Participant {
    fn from(p: Participant) -> Self {
        Self {
            id: p.id,
            reservation_id: p.reservation_id,
            user_id: p.user_id,
            is_creator: p.is_creator,
            payment_state: p.payment_state,
            payment_channel: p.payment_channel,
            team: p.team,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CreditTransaction {
    pub id: CreditTransactionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub type_key: String,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
}

impl From<CreditTransaction> for responses::CreditTransaction {
    fn from(t: CreditTransaction) -> Self {
        Self {
            id: t.id,
            user_id: t.user_id,
            amount: t.amount,
            type_key: t.type_key,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub reservation_id: Option<ReservationId>,
    pub submitter_id: Option<UserId>,
    pub notification_type: NotificationType,
    pub title: Option<String>,
    pub message: String,
    pub data: Option<Json<serde_json::Value>>,
    pub sent: bool,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Display, FromRow)]
#[display("{user_id}:{token}")]
pub struct FcmToken {
    pub user_id: UserId,
    pub token: String,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("User not found")]
    UserNotFound,
    #[error("Slot not found")]
    SlotNotFound,
    #[error("Reservation not found")]
    ReservationNotFound,
    #[error("No sibling slot has free capacity")]
    SlotFull,
    #[error("Slot was taken by a concurrent booking")]
    SlotJustTaken,
    #[error("Lost a lock race on the slot; retry")]
    SlotContention(#[source] sqlx::Error),
    #[error("Insufficient credit balance")]
    InsufficientFunds,
    #[error("Ledger amount must be positive")]
    InvalidAmount,
    #[error("Invalid rating window")]
    InvalidRange,
    #[error("Rating outside the reservation's window")]
    RatingOutOfRange,
    #[error("Within 24 hours of match start")]
    TooLateToCancel,
    #[error("Score already confirmed")]
    ScoreLocked,
    #[error("Invalid score")]
    InvalidScore(ScoreError),
    #[error("Submitted sets do not decide the match")]
    MatchUndecided,
    #[error("User is not a participant of this reservation")]
    NotAParticipant,
    #[error("User already joined this reservation")]
    AlreadyJoined,
    #[error("Seat already taken")]
    SeatTaken,
    #[error("All four seats are filled")]
    ReservationFull,
    #[error("Reservation has been cancelled")]
    ReservationCancelled,
    #[error("Reservation is not an active match")]
    MatchNotActive,
    #[error("Reservation is not in a valid state for this operation")]
    InvalidState,
    #[error("Unique constraint violation")]
    NotUnique(#[source] sqlx::Error),
    #[error("Database error")]
    Database(#[source] sqlx::Error),
    #[error("Unexpected error")]
    UnexpectedError(#[from] anyhow::Error),
}

impl StoreError {
    /// The stable error code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::SlotNotFound => "SLOT_NOT_FOUND",
            Self::ReservationNotFound => "RESERVATION_NOT_FOUND",
            Self::SlotFull => "SLOT_FULL",
            Self::SlotJustTaken => "SLOT_JUST_TAKEN",
            Self::SlotContention(_) | Self::NotUnique(_) => "SLOT_CONTENTION",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InvalidRange | Self::RatingOutOfRange => "INVALID_RANGE",
            Self::TooLateToCancel => "TOO_LATE_TO_CANCEL",
            Self::ScoreLocked => "SCORE_LOCKED",
            Self::InvalidScore(_) => "INVALID_SCORE",
            Self::MatchUndecided => "MATCH_UNDECIDED",
            Self::NotAParticipant => "NOT_A_PARTICIPANT",
            Self::AlreadyJoined => "ALREADY_JOINED",
            Self::SeatTaken => "SEAT_TAKEN",
            Self::ReservationFull => "RESERVATION_FULL",
            Self::ReservationCancelled => "RESERVATION_CANCELLED",
            Self::MatchNotActive => "MATCH_NOT_ACTIVE",
            Self::InvalidState => "INVALID_STATE",
            Self::Database(_) | Self::UnexpectedError(_) => "INTERNAL",
        }
    }
}

impl From<ScoreError> for StoreError {
    fn from(e: ScoreError) -> Self {
        match e {
            ScoreError::MatchUndecided => StoreError::MatchUndecided,
            e => StoreError::InvalidScore(e),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                return StoreError::NotUnique(e);
            }
            // 40001 serialization_failure, 40P01 deadlock_detected: the
            // operation lost a lock race and may be retried.
            if let Some(code) = db_err.code()
                && (code == "40001" || code == "40P01")
            {
                return StoreError::SlotContention(e);
            }
        }
        StoreError::Database(e)
    }
}

/// Create a user row. Identity and credentials are provisioned externally;
/// this exists for seeding and tests.
pub async fn create_user(
    pool: &PgPool,
    username: &str,
    email: &str,
) -> Result<User, StoreError> {
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email) VALUES ($1, $2) RETURNING *",
    )
    .bind(username)
    .bind(email)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

pub async fn update_user(
    pool: &PgPool,
    user: &User,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE users SET
            rating = $2,
            reliability = $3,
            credit_balance = $4,
            membership_tier = $5
        WHERE id = $1",
    )
    .bind(user.id)
    .bind(user.rating)
    .bind(user.reliability)
    .bind(user.credit_balance)
    .bind(user.membership_tier)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_user(
    user_id: &UserId,
    pool: &PgPool,
) -> Result<User, StoreError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::UserNotFound)
}

/// Lock a user row for the remainder of the transaction.
pub(crate) async fn lock_user_tx(
    user_id: &UserId,
    tx: &mut Tx<'_>,
) -> Result<User, StoreError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::UserNotFound)
}

pub(crate) async fn get_reservation_tx(
    reservation_id: &ReservationId,
    tx: &mut Tx<'_>,
) -> Result<Reservation, StoreError> {
    sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations WHERE id = $1",
    )
    .bind(reservation_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StoreError::ReservationNotFound)
}

/// Lock a reservation row for the remainder of the transaction.
pub(crate) async fn lock_reservation_tx(
    reservation_id: &ReservationId,
    tx: &mut Tx<'_>,
) -> Result<Reservation, StoreError> {
    sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations WHERE id = $1 FOR UPDATE",
    )
    .bind(reservation_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StoreError::ReservationNotFound)
}

/// Lock all participants of a reservation, ordered by id.
pub(crate) async fn lock_participants_tx(
    reservation_id: &ReservationId,
    tx: &mut Tx<'_>,
) -> Result<Vec<Participant>, StoreError> {
    let participants = sqlx::query_as::<_, Participant>(
        "SELECT * FROM participants WHERE reservation_id = $1
        ORDER BY id FOR UPDATE",
    )
    .bind(reservation_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(participants)
}

/// Read a reservation with its participants. Read-only; no locks.
pub async fn get_reservation_with_participants(
    reservation_id: &ReservationId,
    pool: &PgPool,
) -> Result<responses::ReservationWithParticipants, StoreError> {
    let reservation = sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations WHERE id = $1",
    )
    .bind(reservation_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::ReservationNotFound)?;

    let participants = sqlx::query_as::<_, Participant>(
        "SELECT * FROM participants WHERE reservation_id = $1 ORDER BY team",
    )
    .bind(reservation_id)
    .fetch_all(pool)
    .await?;

    Ok(responses::ReservationWithParticipants {
        reservation: reservation.into(),
        participants: participants.into_iter().map(Into::into).collect(),
    })
}

/// A user's balance with their most recent ledger entries. Read-only.
pub async fn get_balance_info(
    user_id: &UserId,
    pool: &PgPool,
) -> Result<responses::BalanceInfo, StoreError> {
    let user = get_user(user_id, pool).await?;

    let transactions = sqlx::query_as::<_, CreditTransaction>(
        "SELECT * FROM credit_transactions WHERE user_id = $1
        ORDER BY created_at DESC, id DESC LIMIT 20",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(responses::BalanceInfo {
        user_id: user.id,
        credit_balance: user.credit_balance,
        transactions: transactions.into_iter().map(Into::into).collect(),
    })
}

/// Bind helper for civil dates.
pub(crate) fn date_sqlx(date: Date) -> SqlxDate {
    date.to_sqlx()
}
