//! Score protocol tests: proposal, confirmation, conflict, lockout, and
//! the background finalizer.

use jiff::Span;
use payloads::{ScoreStatus, SetGames, TeamWin, requests};
use reqwest::StatusCode;
use test_helpers::{MatchFixture, TestApp, spawn_app};

fn submission(
    fixture: &MatchFixture,
    submitter: usize,
) -> requests::SubmitScore {
    requests::SubmitScore {
        reservation_id: fixture.reservation.id,
        submitter_id: fixture.players[submitter],
        set1: SetGames::new(6, 4),
        set2: SetGames::new(6, 4),
        set3: None,
        super_tiebreak: false,
    }
}

/// Poll until the background rating task has visibly run.
async fn wait_for_rating_change(
    app: &TestApp,
    user_id: &payloads::UserId,
    baseline: f64,
) -> f64 {
    for _ in 0..50 {
        let rating: f64 =
            sqlx::query_scalar("SELECT rating FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_one(&app.db_pool)
                .await
                .unwrap();
        if (rating - baseline).abs() > f64::EPSILON {
            return rating;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("rating task did not run");
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn first_submission_is_pending() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let fixture = app.setup_valid_match().await?;

    let record = app.client.submit_score(&submission(&fixture, 0)).await?;

    assert_eq!(record.score_status, ScoreStatus::Pending);
    assert_eq!(record.teamwin, Some(TeamWin::TeamA));
    assert_eq!(
        record.last_score_submitter_id,
        Some(fixture.players[0])
    );
    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn matching_counter_submission_confirms() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let fixture = app.setup_valid_match().await?;
    app.set_rating(&fixture.players[0], 4.0, 100).await?;
    app.set_rating(&fixture.players[1], 4.0, 100).await?;
    app.set_rating(&fixture.players[2], 4.0, 100).await?;
    app.set_rating(&fixture.players[3], 4.0, 100).await?;

    app.client.submit_score(&submission(&fixture, 0)).await?;
    // An opponent confirms with the identical score.
    let record = app.client.submit_score(&submission(&fixture, 2)).await?;

    assert_eq!(record.score_status, ScoreStatus::Confirmed);
    assert_eq!(record.teamwin, Some(TeamWin::TeamA));
    assert!(record.score_confirmed_at.is_some());

    // Team A won 12 games: W=0.5, pct=68.42 for the winners.
    let new_rating =
        wait_for_rating_change(&app, &fixture.players[0], 4.0).await;
    assert!((new_rating - 4.1579).abs() < 1e-3);

    // Winners' reliability moved up from 100%... it was already capped.
    let reliability: i16 = sqlx::query_scalar(
        "SELECT reliability FROM users WHERE id = $1",
    )
    .bind(fixture.players[0])
    .fetch_one(&app.db_pool)
    .await?;
    assert_eq!(reliability, 100);

    // The two non-submitters got a SCORE_CONFIRMED notification.
    let recipients: Vec<i64> = sqlx::query_scalar(
        "SELECT recipient_id FROM notifications
        WHERE notification_type = 'SCORE_CONFIRMED' ORDER BY recipient_id",
    )
    .fetch_all(&app.db_pool)
    .await?;
    let mut expected = vec![fixture.players[1].0, fixture.players[3].0];
    expected.sort();
    assert_eq!(recipients, expected);

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn mismatched_counter_submission_conflicts() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let fixture = app.setup_valid_match().await?;

    app.client.submit_score(&submission(&fixture, 0)).await?;

    let mut disputed = submission(&fixture, 2);
    disputed.set1 = SetGames::new(4, 6);
    disputed.set2 = SetGames::new(4, 6);
    let record = app.client.submit_score(&disputed).await?;

    assert_eq!(record.score_status, ScoreStatus::Conflict);
    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn resubmission_by_same_player_stays_pending() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let fixture = app.setup_valid_match().await?;

    app.client.submit_score(&submission(&fixture, 0)).await?;
    let record = app.client.submit_score(&submission(&fixture, 0)).await?;

    assert_eq!(record.score_status, ScoreStatus::Pending);
    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn confirmed_score_is_locked() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let fixture = app.setup_valid_match().await?;

    app.client.submit_score(&submission(&fixture, 0)).await?;
    app.client.submit_score(&submission(&fixture, 2)).await?;

    let err = app
        .client
        .submit_score(&submission(&fixture, 1))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::CONFLICT));
    assert!(err.has_code("SCORE_LOCKED"));
    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn invalid_and_undecided_scores_rejected() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let fixture = app.setup_valid_match().await?;

    // 7-4 should have ended at 6-4.
    let mut invalid = submission(&fixture, 0);
    invalid.set1 = SetGames::new(7, 4);
    let err = app.client.submit_score(&invalid).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    assert!(err.has_code("INVALID_SCORE"));

    // Split sets with no third set decide nothing.
    let mut undecided = submission(&fixture, 0);
    undecided.set2 = SetGames::new(4, 6);
    let err = app.client.submit_score(&undecided).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    assert!(err.has_code("MATCH_UNDECIDED"));

    // Outsiders cannot submit at all.
    let outsider = app.create_player("mallory", rust_decimal::dec!(0)).await?;
    let mut foreign = submission(&fixture, 0);
    foreign.submitter_id = outsider;
    let err = app.client.submit_score(&foreign).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn super_tiebreak_third_set_confirms() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let fixture = app.setup_valid_match().await?;

    let mut first = submission(&fixture, 0);
    first.set2 = SetGames::new(4, 6);
    first.set3 = Some(SetGames::new(10, 7));
    first.super_tiebreak = true;

    app.client.submit_score(&first).await?;
    let mut second = first.clone();
    second.submitter_id = fixture.players[3];
    let record = app.client.submit_score(&second).await?;

    assert_eq!(record.score_status, ScoreStatus::Confirmed);
    assert_eq!(record.teamwin, Some(TeamWin::TeamA));
    assert_eq!(record.set3_a, Some(10));
    assert!(record.super_tiebreak);
    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn finalizer_auto_confirms_day_old_scores() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let fixture = app.setup_valid_match().await?;

    app.client.submit_score(&submission(&fixture, 0)).await?;
    app.time_source.advance(Span::new().hours(25));
    app.run_scheduler_tick().await?;

    let status: i16 = sqlx::query_scalar(
        "SELECT score_status FROM reservations WHERE id = $1",
    )
    .bind(fixture.reservation.id)
    .fetch_one(&app.db_pool)
    .await?;
    assert_eq!(status, ScoreStatus::AutoConfirmed as i16);

    // A second tick does not touch the locked score.
    app.run_scheduler_tick().await?;
    let err = app
        .client
        .submit_score(&submission(&fixture, 2))
        .await
        .unwrap_err();
    assert!(err.has_code("SCORE_LOCKED"));

    Ok(())
}

#[tokio::test]
#[ignore = "requires the docker-compose Postgres instance"]
async fn outbox_dispatch_reaches_registered_devices() -> anyhow::Result<()> {
    let app = spawn_app().await;
    let fixture = app.setup_valid_match().await?;

    api::store::notification::register_fcm_token(
        &fixture.players[1],
        "device-token-1",
        &app.time_source,
        &app.db_pool,
    )
    .await?;

    app.client.submit_score(&submission(&fixture, 0)).await?;
    app.run_scheduler_tick().await?;

    let sent = app.push_service.sent.lock().unwrap();
    assert!(
        sent.iter().any(|(tokens, message)| {
            tokens.contains(&"device-token-1".to_string())
                && message.title == "SCORE_PROPOSAL"
        }),
        "expected a SCORE_PROPOSAL push to the registered device"
    );

    let unsent: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE NOT sent",
    )
    .fetch_one(&app.db_pool)
    .await?;
    assert_eq!(unsent, 0);

    Ok(())
}
