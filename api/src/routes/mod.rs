pub mod reservation;
pub mod score;

use actix_web::{
    HttpResponse, Responder, ResponseError, body::BoxBody,
    dev::HttpServiceFactory, get, web,
};

use crate::store::StoreError;

pub fn api_services() -> impl HttpServiceFactory {
    web::scope("/api")
        .service(health_check)
        .service(reservation::create_reservation)
        .service(reservation::join_reservation)
        .service(reservation::cancel_reservation)
        .service(reservation::get_reservation)
        .service(reservation::get_balance)
        .service(score::submit_score)
}

#[get("/health_check")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("healthy")
}

/// Route-level error. The body always leads with the stable error code so
/// clients can branch on it without parsing.
#[derive(Debug, thiserror::Error)]
pub enum APIError {
    #[error("{0}")]
    BadRequest(&'static str, #[source] anyhow::Error),
    #[error("{0}")]
    Conflict(&'static str, #[source] anyhow::Error),
    #[error("Not found")]
    NotFound(#[source] anyhow::Error),
    #[error("Something went wrong")]
    UnexpectedError(#[from] anyhow::Error),
}

impl ResponseError for APIError {
    fn error_response(&self) -> HttpResponse<BoxBody> {
        match self {
            Self::BadRequest(code, e) => {
                HttpResponse::BadRequest().body(format!("{code}: {e}"))
            }
            Self::Conflict(code, e) => {
                HttpResponse::Conflict().body(format!("{code}: {e}"))
            }
            Self::NotFound(e) => {
                HttpResponse::NotFound().body(format!("{self}: {e}"))
            }
            Self::UnexpectedError(_) => {
                HttpResponse::InternalServerError().body(self.to_string())
            }
        }
    }
}

impl From<StoreError> for APIError {
    fn from(e: StoreError) -> Self {
        let code = e.code();
        match e {
            // Retryable contention and non-retryable business conflicts
            // both answer 409.
            StoreError::SlotFull
            | StoreError::SlotJustTaken
            | StoreError::SlotContention(_)
            | StoreError::NotUnique(_)
            | StoreError::TooLateToCancel
            | StoreError::ScoreLocked
            | StoreError::ReservationCancelled
            | StoreError::AlreadyJoined
            | StoreError::SeatTaken
            | StoreError::ReservationFull
            | StoreError::MatchNotActive => {
                APIError::Conflict(code, e.into())
            }
            StoreError::InsufficientFunds
            | StoreError::InvalidAmount
            | StoreError::InvalidRange
            | StoreError::RatingOutOfRange
            | StoreError::InvalidScore(_)
            | StoreError::MatchUndecided
            | StoreError::NotAParticipant => {
                APIError::BadRequest(code, e.into())
            }
            StoreError::UserNotFound
            | StoreError::SlotNotFound
            | StoreError::ReservationNotFound => APIError::NotFound(e.into()),
            StoreError::InvalidState
            | StoreError::Database(_)
            | StoreError::UnexpectedError(_) => {
                APIError::UnexpectedError(e.into())
            }
        }
    }
}
