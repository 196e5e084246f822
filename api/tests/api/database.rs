//! Some basic database tests.
//!
//! Though api::store defines its own level of API interface, most tests
//! are at the http route level.

use jiff::{SignedDuration, Timestamp};
use rust_decimal::dec;
use sqlx::Error;

use api::store::{self, User};
use test_helpers::spawn_app;

/// Check if a timestamp is from the last ten seconds.
fn timestamp_is_recent(ts: Timestamp) -> bool {
    ts.duration_since(Timestamp::now()).abs()
        < SignedDuration::from_secs(10)
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn test_user_defaults() -> Result<(), Error> {
    let app = spawn_app().await;
    let conn = &app.db_pool;

    let user = store::create_user(conn, "alice", "alice@example.com")
        .await
        .unwrap();

    assert_eq!(user.rating, 0.5);
    assert_eq!(user.reliability, 20);
    assert_eq!(user.credit_balance, dec!(0));
    assert!(timestamp_is_recent(user.created_at));

    let retrieved =
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user.id)
            .fetch_one(conn)
            .await?;
    assert_eq!(retrieved.username, "alice");

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn test_username_unique() {
    let app = spawn_app().await;
    let conn = &app.db_pool;

    store::create_user(conn, "alice", "alice@example.com")
        .await
        .unwrap();
    let result = store::create_user(conn, "alice", "other@example.com").await;
    assert!(matches!(result, Err(store::StoreError::NotUnique(_))));
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn test_rating_bounds_enforced() {
    let app = spawn_app().await;
    let conn = &app.db_pool;

    let user = store::create_user(conn, "alice", "alice@example.com")
        .await
        .unwrap();
    let result = sqlx::query("UPDATE users SET rating = 7.5 WHERE id = $1")
        .bind(user.id)
        .execute(conn)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn test_cancelled_state_checked() {
    let app = spawn_app().await;
    let players = app.create_four_players().await.unwrap();
    let slot_id = app.create_slot(1, dec!(100), 48).await.unwrap();
    let date = app.slot_date(&slot_id).await.unwrap();

    // is_cancel requires etat = 3; the constraint rejects anything else.
    let result = sqlx::query(
        "INSERT INTO reservations (
            slot_id, date, creator_user_id, reservation_type,
            etat, is_cancel, coder
        ) VALUES ($1, $2, $3, 1, 1, TRUE, 'BAD001')",
    )
    .bind(slot_id)
    .bind(jiff_sqlx::ToSqlx::to_sqlx(date))
    .bind(players[0])
    .execute(&app.db_pool)
    .await;
    assert!(result.is_err());
}
