use jiff::civil::Date;
use serde::{Deserialize, Serialize};

use crate::{
    PaymentChannel, ReservationId, ReservationType, SetGames, SlotId, UserId,
};

/// Book a slot. The acting user is injected by the gateway; the core does
/// not authenticate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReservation {
    pub user_id: UserId,
    pub slot_id: SlotId,
    pub date: Date,
    pub reservation_type: ReservationType,
    pub payment_channel: PaymentChannel,
    /// Creator pays all four seats up front; joiners then owe nothing.
    #[serde(default)]
    pub pay_for_all: bool,
    /// Rating window for open matches.
    pub rating_min: Option<f64>,
    pub rating_max: Option<f64>,
}

/// Take a seat on an existing reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinReservation {
    pub user_id: UserId,
    pub reservation_id: ReservationId,
    /// Seat index 0-3; seats {0,1} play seats {2,3}.
    pub team: i16,
    pub payment_channel: PaymentChannel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelReservation {
    pub user_id: UserId,
    pub reservation_id: ReservationId,
}

/// One participant's account of the match result. Set 3 is required only
/// when the first two sets are split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitScore {
    pub reservation_id: ReservationId,
    pub submitter_id: UserId,
    pub set1: SetGames,
    pub set2: SetGames,
    pub set3: Option<SetGames>,
    /// Whether set 3 was played as a super tie-break to 10.
    #[serde(default)]
    pub super_tiebreak: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReservation {
    pub reservation_id: ReservationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBalance {
    pub user_id: UserId,
}
