pub mod api_client;
pub mod requests;
pub mod responses;

pub use api_client::{APIClient, ClientError};

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Id type wrappers help ensure we don't mix up ids for different tables.
/// Ids are bigserial values; lock acquisition orders by ascending id.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct UserId(pub i64);

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct CourtId(pub i64);

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct SlotId(pub i64);

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct ReservationId(pub i64);

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct ParticipantId(pub i64);

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct NotificationId(pub i64);

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type), sqlx(transparent))]
pub struct CreditTransactionId(pub i64);

/// A match is always four seats: teams {0,1} vs {2,3}.
pub const MATCH_SEATS: usize = 4;

/// Seats 0 and 1 form team A, seats 2 and 3 form team B.
pub const TEAM_A_SEATS: [i16; 2] = [0, 1];
pub const TEAM_B_SEATS: [i16; 2] = [2, 3];

/// Hours before the slot start time after which cancellation is rejected,
/// and after which an unchallenged score auto-confirms.
pub const CANCEL_WINDOW_HOURS: i64 = 24;
pub const SCORE_AUTO_CONFIRM_HOURS: i64 = 24;

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[repr(i16)]
pub enum ReservationType {
    Private = 1,
    Open = 2,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[repr(i16)]
pub enum ReservationState {
    Pending = 0,
    Valid = 1,
    Cancelled = 3,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[repr(i16)]
pub enum PaymentChannel {
    Credit = 1,
    Onsite = 2,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[repr(i16)]
pub enum PaymentState {
    Unpaid = 0,
    Paid = 1,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[repr(i16)]
pub enum ScoreStatus {
    Pending = 0,
    Confirmed = 1,
    AutoConfirmed = 2,
    Conflict = 3,
}

impl ScoreStatus {
    /// Once a score reaches a confirmed state it never transitions again.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Confirmed | Self::AutoConfirmed)
    }
}

/// Which team won the match, as persisted in `teamwin`.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[repr(i16)]
pub enum TeamWin {
    TeamA = 1,
    TeamB = 2,
}

impl TeamWin {
    /// The winning side for a given seat (0-3).
    pub fn for_seat(seat: i16) -> Self {
        if TEAM_A_SEATS.contains(&seat) {
            Self::TeamA
        } else {
            Self::TeamB
        }
    }
}

/// Membership discount ladder. Tiers 1-3 subtract a flat amount from the
/// unit price; Infinity reservations are free, limited to one per user per
/// calendar date.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[repr(i16)]
pub enum MembershipTier {
    None = 0,
    Bronze = 1,
    Silver = 2,
    Gold = 3,
    Infinity = 4,
}

impl MembershipTier {
    pub fn has_flat_discount(&self) -> bool {
        matches!(self, Self::Bronze | Self::Silver | Self::Gold)
    }

    pub fn is_infinity(&self) -> bool {
        matches!(self, Self::Infinity)
    }
}

/// Notification types carried by the outbox. The score protocol predates
/// the snake_case convention, hence the upper-case labels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "use-sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "use-sqlx", sqlx(type_name = "notification_type"))]
pub enum NotificationType {
    #[serde(rename = "reservation_confirmed")]
    #[cfg_attr(feature = "use-sqlx", sqlx(rename = "reservation_confirmed"))]
    ReservationConfirmed,
    #[serde(rename = "reservation_cancelled")]
    #[cfg_attr(feature = "use-sqlx", sqlx(rename = "reservation_cancelled"))]
    ReservationCancelled,
    #[serde(rename = "credit_deduction")]
    #[cfg_attr(feature = "use-sqlx", sqlx(rename = "credit_deduction"))]
    CreditDeduction,
    #[serde(rename = "participant_left")]
    #[cfg_attr(feature = "use-sqlx", sqlx(rename = "participant_left"))]
    ParticipantLeft,
    #[serde(rename = "match_status_changed")]
    #[cfg_attr(feature = "use-sqlx", sqlx(rename = "match_status_changed"))]
    MatchStatusChanged,
    #[serde(rename = "SCORE_PROPOSAL")]
    #[cfg_attr(feature = "use-sqlx", sqlx(rename = "SCORE_PROPOSAL"))]
    ScoreProposal,
    #[serde(rename = "SCORE_CONFIRMED")]
    #[cfg_attr(feature = "use-sqlx", sqlx(rename = "SCORE_CONFIRMED"))]
    ScoreConfirmed,
    #[serde(rename = "SCORE_CONFLICT")]
    #[cfg_attr(feature = "use-sqlx", sqlx(rename = "SCORE_CONFLICT"))]
    ScoreConflict,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReservationConfirmed => "reservation_confirmed",
            Self::ReservationCancelled => "reservation_cancelled",
            Self::CreditDeduction => "credit_deduction",
            Self::ParticipantLeft => "participant_left",
            Self::MatchStatusChanged => "match_status_changed",
            Self::ScoreProposal => "SCORE_PROPOSAL",
            Self::ScoreConfirmed => "SCORE_CONFIRMED",
            Self::ScoreConflict => "SCORE_CONFLICT",
        }
    }
}

/// Games won in one set, team A first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetGames {
    pub a: i16,
    pub b: i16,
}

impl SetGames {
    pub fn new(a: i16, b: i16) -> Self {
        Self { a, b }
    }
}
