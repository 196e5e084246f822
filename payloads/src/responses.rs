use jiff::Timestamp;
use jiff::civil::Date;
#[cfg(feature = "use-sqlx")]
use jiff_sqlx::{Date as SqlxDate, Timestamp as SqlxTs};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    CreditTransactionId, ParticipantId, PaymentChannel, PaymentState,
    ReservationId, ReservationState, ReservationType, ScoreStatus, SlotId,
    TeamWin, UserId,
};

/// Nullable timestamp column helper for sqlx `try_from` field decoding.
#[cfg(feature = "use-sqlx")]
#[derive(sqlx::Type)]
#[sqlx(transparent)]
pub struct OptionalTimestamp(pub Option<SqlxTs>);

#[cfg(feature = "use-sqlx")]
impl TryFrom<OptionalTimestamp> for Option<Timestamp> {
    type Error = std::convert::Infallible;

    fn try_from(value: OptionalTimestamp) -> Result<Self, Self::Error> {
        Ok(value.0.map(Timestamp::from))
    }
}

/// A reservation as returned by the booking endpoints. Score fields are
/// flat, mirroring the stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::FromRow))]
pub struct Reservation {
    pub id: ReservationId,
    pub slot_id: SlotId,
    #[cfg_attr(feature = "use-sqlx", sqlx(try_from = "SqlxDate"))]
    pub date: Date,
    pub creator_user_id: UserId,
    pub reservation_type: ReservationType,
    pub etat: ReservationState,
    pub is_cancel: bool,
    pub coder: String,
    pub unit_total_price: Decimal,
    pub is_prepaid_for_all: bool,
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
    #[cfg_attr(feature = "use-sqlx", sqlx(try_from = "OptionalTimestamp"))]
    pub last_score_update_at: Option<Timestamp>,
    #[cfg_attr(feature = "use-sqlx", sqlx(try_from = "OptionalTimestamp"))]
    pub score_confirmed_at: Option<Timestamp>,
    #[cfg_attr(feature = "use-sqlx", sqlx(try_from = "SqlxTs"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "use-sqlx", sqlx(try_from = "SqlxTs"))]
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::FromRow))]
pub struct Participant {
    pub id: ParticipantId,
    pub reservation_id: ReservationId,
    pub user_id: UserId,
    pub is_creator: bool,
    pub payment_state: PaymentState,
    pub payment_channel: PaymentChannel,
    pub team: i16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationWithParticipants {
    pub reservation: Reservation,
    pub participants: Vec<Participant>,
}

/// The score record returned by `submit_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub reservation_id: ReservationId,
    pub score_status: ScoreStatus,
    pub teamwin: Option<TeamWin>,
    pub set1_a: Option<i16>,
    pub set1_b: Option<i16>,
    pub set2_a: Option<i16>,
    pub set2_b: Option<i16>,
    pub set3_a: Option<i16>,
    pub set3_b: Option<i16>,
    pub super_tiebreak: bool,
    pub last_score_submitter_id: Option<UserId>,
    pub last_score_update_at: Option<Timestamp>,
    pub score_confirmed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::FromRow))]
pub struct CreditTransaction {
    pub id: CreditTransactionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub type_key: String,
    #[cfg_attr(feature = "use-sqlx", sqlx(try_from = "SqlxTs"))]
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub user_id: UserId,
    pub credit_balance: Decimal,
    pub transactions: Vec<CreditTransaction>,
}
