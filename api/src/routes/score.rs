use actix_web::{HttpResponse, post, web};
use payloads::requests;
use sqlx::PgPool;

use crate::store;
use crate::time::TimeSource;

use super::APIError;

#[tracing::instrument(skip(pool, time_source), ret)]
#[post("/submit_score")]
pub async fn submit_score(
    details: web::Json<requests::SubmitScore>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
) -> Result<HttpResponse, APIError> {
    let record =
        store::score::update_score(&details, &pool, &time_source).await?;

    Ok(HttpResponse::Ok().json(record))
}
