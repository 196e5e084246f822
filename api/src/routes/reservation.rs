use actix_web::{HttpResponse, post, web};
use payloads::{requests, responses};
use sqlx::PgPool;

use crate::store;
use crate::time::TimeSource;

use super::APIError;

#[tracing::instrument(skip(pool, time_source), ret)]
#[post("/create_reservation")]
pub async fn create_reservation(
    details: web::Json<requests::CreateReservation>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
) -> Result<HttpResponse, APIError> {
    let reservation = store::reservation::create_reservation(
        &details,
        &pool,
        &time_source,
    )
    .await?;

    Ok(HttpResponse::Created()
        .json(responses::Reservation::from(reservation)))
}

#[tracing::instrument(skip(pool, time_source), ret)]
#[post("/join_reservation")]
pub async fn join_reservation(
    details: web::Json<requests::JoinReservation>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
) -> Result<HttpResponse, APIError> {
    let reservation = store::reservation::join_reservation(
        &details,
        &pool,
        &time_source,
    )
    .await?;

    Ok(HttpResponse::Ok().json(responses::Reservation::from(reservation)))
}

#[tracing::instrument(skip(pool, time_source), ret)]
#[post("/cancel_reservation")]
pub async fn cancel_reservation(
    details: web::Json<requests::CancelReservation>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
) -> Result<HttpResponse, APIError> {
    let reservation = store::reservation::cancel_reservation(
        &details,
        &pool,
        &time_source,
    )
    .await?;

    Ok(HttpResponse::Ok().json(responses::Reservation::from(reservation)))
}

#[tracing::instrument(skip(pool), ret)]
#[post("/get_reservation")]
pub async fn get_reservation(
    details: web::Json<requests::GetReservation>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, APIError> {
    let reservation = store::get_reservation_with_participants(
        &details.reservation_id,
        &pool,
    )
    .await?;

    Ok(HttpResponse::Ok().json(reservation))
}

#[tracing::instrument(skip(pool), ret)]
#[post("/get_balance")]
pub async fn get_balance(
    details: web::Json<requests::GetBalance>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, APIError> {
    let info = store::get_balance_info(&details.user_id, &pool).await?;

    Ok(HttpResponse::Ok().json(info))
}
