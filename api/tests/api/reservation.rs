//! Reservation state machine tests at the http route level.

use payloads::{
    MembershipTier, PaymentChannel, ReservationState, ReservationType,
    requests,
};
use reqwest::StatusCode;
use rust_decimal::dec;
use test_helpers::spawn_app;

fn create_request(
    user_id: payloads::UserId,
    slot_id: payloads::SlotId,
    date: jiff::civil::Date,
) -> requests::CreateReservation {
    requests::CreateReservation {
        user_id,
        slot_id,
        date,
        reservation_type: ReservationType::Private,
        payment_channel: PaymentChannel::Credit,
        pay_for_all: false,
        rating_min: None,
        rating_max: None,
    }
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn private_credit_booking_is_immediately_valid() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = app.create_player("alice", dec!(10000)).await?;
    let slot_id = app.create_slot(1, dec!(2000), 48).await?;
    let date = app.slot_date(&slot_id).await?;

    let reservation = app
        .client
        .create_reservation(&create_request(user_id, slot_id, date))
        .await?;

    assert_eq!(reservation.etat, ReservationState::Valid);
    assert!(!reservation.is_cancel);
    assert_eq!(reservation.unit_total_price, dec!(2000));
    assert_eq!(reservation.coder.len(), 6);
    assert_eq!(app.balance_of(&user_id).await?, dec!(8000));

    let full = app
        .client
        .get_reservation(&requests::GetReservation {
            reservation_id: reservation.id,
        })
        .await?;
    assert_eq!(full.participants.len(), 1);
    assert!(full.participants[0].is_creator);
    assert_eq!(full.participants[0].team, 0);

    // The slot hint flips off for a confirmed private booking.
    let available: bool = sqlx::query_scalar(
        "SELECT available FROM court_slots WHERE id = $1",
    )
    .bind(slot_id)
    .fetch_one(&app.db_pool)
    .await?;
    assert!(!available);

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn full_slot_without_sibling_rejects() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let alice = app.create_player("alice", dec!(10000)).await?;
    let bob = app.create_player("bob", dec!(10000)).await?;
    let slot_id = app.create_slot(1, dec!(2000), 48).await?;
    let date = app.slot_date(&slot_id).await?;

    app.client
        .create_reservation(&create_request(alice, slot_id, date))
        .await?;

    let err = app
        .client
        .create_reservation(&create_request(bob, slot_id, date))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::CONFLICT));
    assert!(err.has_code("SLOT_FULL"));

    // Exactly one debit happened.
    let debits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM credit_transactions WHERE amount < 0",
    )
    .fetch_one(&app.db_pool)
    .await?;
    assert_eq!(debits, 1);
    assert_eq!(app.balance_of(&bob).await?, dec!(10000));

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn full_slot_reassigns_to_free_sibling() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let alice = app.create_player("alice", dec!(10000)).await?;
    let bob = app.create_player("bob", dec!(10000)).await?;
    let court = app.create_court("Center").await?;
    let slots = app
        .create_sibling_slots(&court, 2, 1, dec!(2000), 48)
        .await?;
    let date = app.slot_date(&slots[0]).await?;

    let first = app
        .client
        .create_reservation(&create_request(alice, slots[0], date))
        .await?;
    let second = app
        .client
        .create_reservation(&create_request(bob, slots[0], date))
        .await?;

    assert_eq!(first.slot_id, slots[0]);
    assert_eq!(second.slot_id, slots[1]);
    assert_eq!(second.etat, ReservationState::Valid);

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn insufficient_funds_is_a_bad_request() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = app.create_player("alice", dec!(100)).await?;
    let slot_id = app.create_slot(1, dec!(2000), 48).await?;
    let date = app.slot_date(&slot_id).await?;

    let err = app
        .client
        .create_reservation(&create_request(user_id, slot_id, date))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    assert!(err.has_code("INSUFFICIENT_FUNDS"));

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn open_booking_requires_ordered_rating_window() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = app.create_player("alice", dec!(10000)).await?;
    let slot_id = app.create_slot(1, dec!(2000), 48).await?;
    let date = app.slot_date(&slot_id).await?;

    let mut details = create_request(user_id, slot_id, date);
    details.reservation_type = ReservationType::Open;
    details.rating_min = Some(4.0);
    details.rating_max = Some(2.0);

    let err = app.client.create_reservation(&details).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    assert!(err.has_code("INVALID_RANGE"));

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn membership_discount_and_infinity_rate_limit() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let gold = app.create_player("gold", dec!(10000)).await?;
    let infinity = app.create_player("infinity", dec!(10000)).await?;
    app.set_membership_tier(&gold, MembershipTier::Gold).await?;
    app.set_membership_tier(&infinity, MembershipTier::Infinity)
        .await?;
    let court = app.create_court("Center").await?;
    let slots = app
        .create_sibling_slots(&court, 4, 1, dec!(2000), 48)
        .await?;
    let date = app.slot_date(&slots[0]).await?;

    app.client
        .create_reservation(&create_request(gold, slots[0], date))
        .await?;
    assert_eq!(app.balance_of(&gold).await?, dec!(10000) - dec!(1700));

    // First Infinity booking of the day is free.
    app.client
        .create_reservation(&create_request(infinity, slots[1], date))
        .await?;
    assert_eq!(app.balance_of(&infinity).await?, dec!(10000));

    // The second one the same day pays the full price.
    app.client
        .create_reservation(&create_request(infinity, slots[2], date))
        .await?;
    assert_eq!(app.balance_of(&infinity).await?, dec!(8000));

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn pending_reservations_hold_no_capacity() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let alice = app.create_player("alice", dec!(10000)).await?;
    let bob = app.create_player("bob", dec!(10000)).await?;
    let slot_id = app.create_slot(1, dec!(2000), 48).await?;
    let date = app.slot_date(&slot_id).await?;

    // An open reservation with one player stays pending.
    let mut open = create_request(alice, slot_id, date);
    open.reservation_type = ReservationType::Open;
    let pending = app.client.create_reservation(&open).await?;
    assert_eq!(pending.etat, ReservationState::Pending);

    // A private credit booking still wins the slot, and the saturated
    // group sweeps the pending competitor with a refund.
    let valid = app
        .client
        .create_reservation(&create_request(bob, slot_id, date))
        .await?;
    assert_eq!(valid.etat, ReservationState::Valid);

    let swept = app
        .client
        .get_reservation(&requests::GetReservation {
            reservation_id: pending.id,
        })
        .await?;
    assert!(swept.reservation.is_cancel);
    assert_eq!(swept.reservation.etat, ReservationState::Cancelled);
    assert!(swept.participants.is_empty());
    assert_eq!(app.balance_of(&alice).await?, dec!(10000));

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn creator_cancel_refunds_every_paid_participant() -> anyhow::Result<()>
{
    let app = spawn_app().await;
    let fixture = app.setup_valid_match().await?;

    // Everyone paid 2000 on the way in.
    for player in &fixture.players {
        assert_eq!(app.balance_of(player).await?, dec!(8000));
    }

    let cancelled = app
        .client
        .cancel_reservation(&requests::CancelReservation {
            user_id: fixture.players[0],
            reservation_id: fixture.reservation.id,
        })
        .await?;

    assert!(cancelled.is_cancel);
    assert_eq!(cancelled.etat, ReservationState::Cancelled);
    for player in &fixture.players {
        assert_eq!(app.balance_of(player).await?, dec!(10000));
    }

    let full = app
        .client
        .get_reservation(&requests::GetReservation {
            reservation_id: fixture.reservation.id,
        })
        .await?;
    assert!(full.participants.is_empty());

    let available: bool = sqlx::query_scalar(
        "SELECT available FROM court_slots WHERE id = $1",
    )
    .bind(fixture.slot_id)
    .fetch_one(&app.db_pool)
    .await?;
    assert!(available);

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn cancellation_rejected_inside_24h_window() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let user_id = app.create_player("alice", dec!(10000)).await?;
    let slot_id = app.create_slot(1, dec!(2000), 10).await?;
    let date = app.slot_date(&slot_id).await?;

    let reservation = app
        .client
        .create_reservation(&create_request(user_id, slot_id, date))
        .await?;

    let err = app
        .client
        .cancel_reservation(&requests::CancelReservation {
            user_id,
            reservation_id: reservation.id,
        })
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::CONFLICT));
    assert!(err.has_code("TOO_LATE_TO_CANCEL"));

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn leaving_player_reverts_valid_match_to_pending() -> anyhow::Result<()>
{
    let app = spawn_app().await;
    let fixture = app.setup_valid_match().await?;
    assert_eq!(fixture.reservation.etat, ReservationState::Valid);

    let updated = app
        .client
        .cancel_reservation(&requests::CancelReservation {
            user_id: fixture.players[3],
            reservation_id: fixture.reservation.id,
        })
        .await?;

    assert_eq!(updated.etat, ReservationState::Pending);
    assert!(!updated.is_cancel);
    // Only the leaver got their seat refunded.
    assert_eq!(app.balance_of(&fixture.players[3]).await?, dec!(10000));
    assert_eq!(app.balance_of(&fixture.players[0]).await?, dec!(8000));

    let full = app
        .client
        .get_reservation(&requests::GetReservation {
            reservation_id: fixture.reservation.id,
        })
        .await?;
    assert_eq!(full.participants.len(), 3);

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn open_promotion_displaces_valid_open_sibling() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let players = app.create_four_players().await?;
    let rivals = [
        app.create_player("erin", dec!(10000)).await?,
        app.create_player("frank", dec!(10000)).await?,
        app.create_player("grace", dec!(10000)).await?,
        app.create_player("heidi", dec!(10000)).await?,
    ];
    let court = app.create_court("Center").await?;
    let slots = app
        .create_sibling_slots(&court, 2, 1, dec!(2000), 48)
        .await?;
    let date = app.slot_date(&slots[0]).await?;

    // First OPEN match fills on slot A and goes VALID.
    let mut open_a = create_request(players[0], slots[0], date);
    open_a.reservation_type = ReservationType::Open;
    let match_a = app.client.create_reservation(&open_a).await?;
    for (seat, user_id) in players.iter().enumerate().skip(1) {
        app.client
            .join_reservation(&requests::JoinReservation {
                user_id: *user_id,
                reservation_id: match_a.id,
                team: seat as i16,
                payment_channel: PaymentChannel::Credit,
            })
            .await?;
    }

    // Second OPEN match fills on slot B; its promotion displaces A.
    let mut open_b = create_request(rivals[0], slots[1], date);
    open_b.reservation_type = ReservationType::Open;
    let match_b = app.client.create_reservation(&open_b).await?;
    for (seat, user_id) in rivals.iter().enumerate().skip(1) {
        app.client
            .join_reservation(&requests::JoinReservation {
                user_id: *user_id,
                reservation_id: match_b.id,
                team: seat as i16,
                payment_channel: PaymentChannel::Credit,
            })
            .await?;
    }

    let a = app
        .client
        .get_reservation(&requests::GetReservation {
            reservation_id: match_a.id,
        })
        .await?;
    let b = app
        .client
        .get_reservation(&requests::GetReservation {
            reservation_id: match_b.id,
        })
        .await?;
    assert!(a.reservation.is_cancel);
    assert_eq!(b.reservation.etat, ReservationState::Valid);
    // The displaced players all got their money back.
    for player in &players {
        assert_eq!(app.balance_of(player).await?, dec!(10000));
    }

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn prepaid_for_all_covers_joiners() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let players = app.create_four_players().await?;
    let slot_id = app.create_slot(1, dec!(2000), 48).await?;
    let date = app.slot_date(&slot_id).await?;

    let mut details = create_request(players[0], slot_id, date);
    details.reservation_type = ReservationType::Open;
    details.pay_for_all = true;
    let reservation = app.client.create_reservation(&details).await?;
    assert_eq!(reservation.unit_total_price, dec!(8000));
    assert_eq!(app.balance_of(&players[0]).await?, dec!(2000));

    for (seat, user_id) in players.iter().enumerate().skip(1) {
        app.client
            .join_reservation(&requests::JoinReservation {
                user_id: *user_id,
                reservation_id: reservation.id,
                team: seat as i16,
                payment_channel: PaymentChannel::Credit,
            })
            .await?;
    }

    // Joiners owed nothing.
    for player in &players[1..] {
        assert_eq!(app.balance_of(player).await?, dec!(10000));
    }

    // Creator cancellation claws back the full prepaid amount.
    let cancelled = app
        .client
        .cancel_reservation(&requests::CancelReservation {
            user_id: players[0],
            reservation_id: reservation.id,
        })
        .await?;
    assert!(cancelled.is_cancel);
    assert_eq!(app.balance_of(&players[0]).await?, dec!(10000));

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn capacity_race_admits_exactly_one() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let alice = app.create_player("alice", dec!(10000)).await?;
    let bob = app.create_player("bob", dec!(10000)).await?;
    let slot_id = app.create_slot(1, dec!(2000), 48).await?;
    let date = app.slot_date(&slot_id).await?;

    let alice_request = create_request(alice, slot_id, date);
    let bob_request = create_request(bob, slot_id, date);
    let (first, second) = tokio::join!(
        app.client.create_reservation(&alice_request),
        app.client.create_reservation(&bob_request),
    );

    let successes =
        [first.is_ok(), second.is_ok()].iter().filter(|b| **b).count();
    assert_eq!(successes, 1);

    let debits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM credit_transactions WHERE amount < 0",
    )
    .fetch_one(&app.db_pool)
    .await?;
    assert_eq!(debits, 1);

    Ok(())
}
