//! Ledger invariants: idempotent refunds, balance reconciliation.

use rust_decimal::{Decimal, dec};

use api::store::ledger;
use payloads::ReservationId;
use test_helpers::spawn_app;

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn debit_requires_funds() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = app.create_player("alice", dec!(100)).await?;

    let mut tx = app.db_pool.begin().await?;
    let result = ledger::debit(
        &user_id,
        dec!(101),
        "debit:reservation:R1:U1:creator",
        &app.time_source,
        &mut tx,
    )
    .await;
    assert!(matches!(
        result,
        Err(api::store::StoreError::InsufficientFunds)
    ));
    drop(tx);

    // The failed transaction must not have touched the balance.
    assert_eq!(app.balance_of(&user_id).await?, dec!(100));
    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn debit_rejects_non_positive_amounts() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = app.create_player("alice", dec!(100)).await?;

    let mut tx = app.db_pool.begin().await?;
    let result = ledger::debit(
        &user_id,
        dec!(0),
        "debit:reservation:R1:U1:creator",
        &app.time_source,
        &mut tx,
    )
    .await;
    assert!(matches!(result, Err(api::store::StoreError::InvalidAmount)));
    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn refund_is_idempotent_per_type_key() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = app.create_player("alice", dec!(100)).await?;

    let key = "refund:R1:U1:P1";
    let mut tx = app.db_pool.begin().await?;
    let first =
        ledger::refund(&user_id, dec!(50), key, &app.time_source, &mut tx)
            .await?;
    let second =
        ledger::refund(&user_id, dec!(50), key, &app.time_source, &mut tx)
            .await?;
    tx.commit().await?;

    assert!(first);
    assert!(!second);
    assert_eq!(app.balance_of(&user_id).await?, dec!(150));
    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn find_debit_matches_creator_and_join_patterns() -> anyhow::Result<()>
{
    let app = spawn_app().await;
    let user_id = app.create_player("alice", dec!(10000)).await?;
    let reservation_id = ReservationId(7);

    let mut tx = app.db_pool.begin().await?;
    ledger::debit(
        &user_id,
        dec!(2000),
        &ledger::creator_debit_key(reservation_id, user_id),
        &app.time_source,
        &mut tx,
    )
    .await?;
    let found = ledger::find_debit_for(&user_id, &reservation_id, &mut tx)
        .await?
        .expect("creator debit should be found");
    assert_eq!(found.amount, dec!(-2000));

    let other = ledger::find_debit_for(&user_id, &ReservationId(8), &mut tx)
        .await?;
    assert!(other.is_none());

    let joiner = app.create_player("bob", dec!(10000)).await?;
    ledger::debit(
        &joiner,
        dec!(1500),
        &ledger::join_debit_key(reservation_id, joiner, 2),
        &app.time_source,
        &mut tx,
    )
    .await?;
    let found = ledger::find_debit_for(&joiner, &reservation_id, &mut tx)
        .await?
        .expect("join debit should be found");
    assert_eq!(found.amount, dec!(-1500));
    tx.commit().await?;

    Ok(())
}

/// After any mix of debits and refunds, the balance reconciles with the
/// transaction log.
#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn balance_reconciles_with_ledger() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let initial = dec!(5000);
    let user_id = app.create_player("alice", initial).await?;

    let mut tx = app.db_pool.begin().await?;
    for i in 0..5 {
        ledger::debit(
            &user_id,
            dec!(100),
            &ledger::creator_debit_key(ReservationId(i), user_id),
            &app.time_source,
            &mut tx,
        )
        .await?;
    }
    for i in 0..3 {
        ledger::refund(
            &user_id,
            dec!(100),
            &ledger::cancel_refund_key(ReservationId(i)),
            &app.time_source,
            &mut tx,
        )
        .await?;
    }
    tx.commit().await?;

    let ledger_sum: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM credit_transactions
        WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(&app.db_pool)
    .await?;

    assert_eq!(ledger_sum, dec!(-200));
    assert_eq!(app.balance_of(&user_id).await?, initial + ledger_sum);
    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn one_transaction_per_user_and_key() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = app.create_player("alice", dec!(1000)).await?;

    let mut tx = app.db_pool.begin().await?;
    ledger::refund(&user_id, dec!(10), "refund:R1:U1:P1", &app.time_source, &mut tx)
        .await?;
    ledger::refund(&user_id, dec!(10), "refund:R1:U1:P1", &app.time_source, &mut tx)
        .await?;
    tx.commit().await?;

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM credit_transactions
        WHERE user_id = $1 AND type_key = $2",
    )
    .bind(user_id)
    .bind("refund:R1:U1:P1")
    .fetch_one(&app.db_pool)
    .await?;
    assert_eq!(count, 1);
    Ok(())
}
