//! Score submission protocol and the post-confirmation rating task.
//!
//! Two participants submit independently; matching submissions confirm the
//! score, mismatched ones flag a conflict, and a confirmed score can never
//! change again. Rating updates run on a detached task reading committed
//! state; their failures are logged and never reach the submitter.

use jiff_sqlx::ToSqlx;
use payloads::{
    MATCH_SEATS, NotificationType, ReservationId, ReservationState,
    ScoreStatus, TEAM_A_SEATS, TeamWin, UserId, requests, responses,
};
use sqlx::PgPool;

use super::{
    Participant, Reservation, StoreError, Tx, lock_reservation_tx,
    notification, notification::NewNotification,
};
use crate::scoring::ProposedScore;
use crate::telemetry::log_error;
use crate::time::TimeSource;

/// Whether a stored score matches a new submission field by field,
/// including winner and set count.
fn submissions_match(
    stored: &Reservation,
    proposed: &ProposedScore,
    winner: TeamWin,
) -> bool {
    stored.set1_a == Some(proposed.set1.a)
        && stored.set1_b == Some(proposed.set1.b)
        && stored.set2_a == Some(proposed.set2.a)
        && stored.set2_b == Some(proposed.set2.b)
        && stored.set3_a == proposed.set3.map(|s| s.a)
        && stored.set3_b == proposed.set3.map(|s| s.b)
        && stored.super_tiebreak == proposed.super_tiebreak
        && stored.teamwin == Some(winner)
}

/// Apply one participant's score submission.
///
/// On reaching CONFIRMED the rating task is spawned after commit; the
/// submission response never waits on it.
#[tracing::instrument(skip(pool, time_source), fields(reservation_id = %details.reservation_id, submitter_id = %details.submitter_id))]
pub async fn update_score(
    details: &requests::SubmitScore,
    pool: &PgPool,
    time_source: &TimeSource,
) -> Result<responses::ScoreRecord, StoreError> {
    let mut tx = pool.begin().await?;

    let reservation =
        lock_reservation_tx(&details.reservation_id, &mut tx).await?;
    if reservation.is_cancel {
        return Err(StoreError::ReservationCancelled);
    }
    if reservation.score_status.is_locked() {
        return Err(StoreError::ScoreLocked);
    }
    if reservation.etat != ReservationState::Valid {
        return Err(StoreError::MatchNotActive);
    }

    let participants =
        super::lock_participants_tx(&reservation.id, &mut tx).await?;
    if !participants
        .iter()
        .any(|p| p.user_id == details.submitter_id)
    {
        return Err(StoreError::NotAParticipant);
    }

    let proposed = ProposedScore::from(details);
    let winner = proposed.winner()?;

    let is_counter_submission = reservation.score_status
        == ScoreStatus::Pending
        && reservation
            .last_score_submitter_id
            .is_some_and(|prev| prev != details.submitter_id);

    let new_status = if is_counter_submission {
        if submissions_match(&reservation, &proposed, winner) {
            ScoreStatus::Confirmed
        } else {
            ScoreStatus::Conflict
        }
    } else {
        ScoreStatus::Pending
    };

    let now = time_source.now();
    let confirmed_at = (new_status == ScoreStatus::Confirmed).then_some(now);
    let updated = sqlx::query_as::<_, Reservation>(
        "UPDATE reservations SET
            set1_a = $2, set1_b = $3,
            set2_a = $4, set2_b = $5,
            set3_a = $6, set3_b = $7,
            super_tiebreak = $8,
            teamwin = $9,
            score_status = $10,
            last_score_submitter_id = $11,
            last_score_update_at = $12,
            score_confirmed_at = COALESCE(score_confirmed_at, $13)
        WHERE id = $1
        RETURNING *",
    )
    .bind(reservation.id)
    .bind(proposed.set1.a)
    .bind(proposed.set1.b)
    .bind(proposed.set2.a)
    .bind(proposed.set2.b)
    .bind(proposed.set3.map(|s| s.a))
    .bind(proposed.set3.map(|s| s.b))
    .bind(proposed.super_tiebreak)
    .bind(winner)
    .bind(new_status)
    .bind(details.submitter_id)
    .bind(now.to_sqlx())
    .bind(confirmed_at.map(|t| t.to_sqlx()))
    .fetch_one(&mut *tx)
    .await?;

    let others = participants
        .iter()
        .map(|p| p.user_id)
        .filter(|id| *id != details.submitter_id);
    match new_status {
        ScoreStatus::Pending => {
            notification::enqueue_for_all(
                others,
                NewNotification::reservation(
                    details.submitter_id,
                    reservation.id,
                    NotificationType::ScoreProposal,
                    format!(
                        "A score was proposed for match {}",
                        reservation.coder
                    ),
                )
                .with_submitter(details.submitter_id),
                time_source,
                &mut tx,
            )
            .await?;
        }
        ScoreStatus::Confirmed => {
            // The two submitters already know; tell the other two.
            let submitters = [
                Some(details.submitter_id),
                reservation.last_score_submitter_id,
            ];
            let spectators = participants
                .iter()
                .map(|p| p.user_id)
                .filter(|id| !submitters.contains(&Some(*id)));
            notification::enqueue_for_all(
                spectators,
                NewNotification::reservation(
                    details.submitter_id,
                    reservation.id,
                    NotificationType::ScoreConfirmed,
                    format!(
                        "The score for match {} is confirmed",
                        reservation.coder
                    ),
                )
                .with_submitter(details.submitter_id),
                time_source,
                &mut tx,
            )
            .await?;
        }
        ScoreStatus::Conflict => {
            notification::enqueue_for_all(
                others,
                NewNotification::reservation(
                    details.submitter_id,
                    reservation.id,
                    NotificationType::ScoreConflict,
                    format!(
                        "Score submissions for match {} disagree",
                        reservation.coder
                    ),
                )
                .with_submitter(details.submitter_id),
                time_source,
                &mut tx,
            )
            .await?;
        }
        ScoreStatus::AutoConfirmed => unreachable!("set only by the finalizer"),
    }

    tx.commit().await?;

    tracing::info!(
        reservation_id = %updated.id,
        operation = "submit_score",
        status = %updated.score_status,
        "score submission persisted"
    );

    if new_status == ScoreStatus::Confirmed {
        spawn_rating_update(pool.clone(), reservation.id);
    }

    Ok(updated.into())
}

/// Run the rating task in the background. Errors are logged, never
/// surfaced to the caller that triggered it.
pub fn spawn_rating_update(pool: PgPool, reservation_id: ReservationId) {
    tokio::spawn(async move {
        let _ = update_player_ratings(&reservation_id, &pool)
            .await
            .map_err(|e| log_error(e.into()));
    });
}

/// Per-seat inputs for one rating computation.
struct SeatPerspective {
    user_id: UserId,
    rating: f64,
    teammate: f64,
    adv1: f64,
    adv2: f64,
    points: u32,
    /// Teammate and the two opponents, in that order.
    reliabilities: [f64; 3],
}

/// Recompute all four players' ratings and reliabilities from a confirmed
/// score. Aborts quietly when the reservation is not a complete match.
pub async fn update_player_ratings(
    reservation_id: &ReservationId,
    pool: &PgPool,
) -> Result<(), StoreError> {
    use crate::rating;

    let reservation = sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations WHERE id = $1",
    )
    .bind(reservation_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::ReservationNotFound)?;

    let Some(winner) = reservation.teamwin else {
        tracing::warn!(
            reservation_id = %reservation_id,
            "rating update skipped: no confirmed winner"
        );
        return Ok(());
    };

    let participants = sqlx::query_as::<_, Participant>(
        "SELECT * FROM participants WHERE reservation_id = $1 ORDER BY team",
    )
    .bind(reservation_id)
    .fetch_all(pool)
    .await?;

    if participants.len() != MATCH_SEATS {
        tracing::warn!(
            reservation_id = %reservation_id,
            participants = participants.len(),
            "rating update skipped: incomplete team slots"
        );
        return Ok(());
    }

    // Seat order 0..=3; users loaded from the committed snapshot.
    let mut seats = Vec::with_capacity(MATCH_SEATS);
    for participant in &participants {
        let user = super::get_user(&participant.user_id, pool).await?;
        seats.push((participant.team, user));
    }
    seats.sort_by_key(|(team, _)| *team);
    if seats.iter().map(|(team, _)| *team).ne(0..MATCH_SEATS as i16) {
        tracing::warn!(
            reservation_id = %reservation_id,
            "rating update skipped: seats not fully assigned"
        );
        return Ok(());
    }

    let games_a = i32::from(
        reservation.set1_a.unwrap_or(0)
            + reservation.set2_a.unwrap_or(0)
            + reservation.set3_a.unwrap_or(0),
    )
    .max(0) as u32;
    let games_b = i32::from(
        reservation.set1_b.unwrap_or(0)
            + reservation.set2_b.unwrap_or(0)
            + reservation.set3_b.unwrap_or(0),
    )
    .max(0) as u32;

    let rel = |seat: usize| {
        rating::reliability_from_percent(seats[seat].1.reliability)
    };
    let rating_of = |seat: usize| seats[seat].1.rating;

    let team_a_sum = rating_of(0) + rating_of(1);
    let team_b_sum = rating_of(2) + rating_of(3);
    let (winner_sum, loser_sum) = match winner {
        TeamWin::TeamA => (team_a_sum, team_b_sum),
        TeamWin::TeamB => (team_b_sum, team_a_sum),
    };

    let mut perspectives = Vec::with_capacity(MATCH_SEATS);
    for seat in 0..MATCH_SEATS {
        let on_team_a = TEAM_A_SEATS.contains(&(seat as i16));
        let teammate = if on_team_a {
            1 - seat
        } else {
            // Seats 2 and 3 partner each other.
            5 - seat
        };
        let (adv1, adv2) = if on_team_a { (2, 3) } else { (0, 1) };
        perspectives.push(SeatPerspective {
            user_id: seats[seat].1.id,
            rating: rating_of(seat),
            teammate: rating_of(teammate),
            adv1: rating_of(adv1),
            adv2: rating_of(adv2),
            points: if on_team_a { games_a } else { games_b },
            reliabilities: [rel(teammate), rel(adv1), rel(adv2)],
        });
    }

    for (seat, perspective) in perspectives.iter().enumerate() {
        let new_rating = match rating::compute_rating(
            perspective.rating,
            perspective.teammate,
            perspective.adv1,
            perspective.adv2,
            perspective.points,
            perspective.reliabilities,
        ) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(
                    reservation_id = %reservation_id,
                    user_id = %perspective.user_id,
                    error = %e,
                    "rating computation failed"
                );
                continue;
            }
        };

        let delta = rating::reliability_delta(
            winner_sum,
            loser_sum,
            perspective.reliabilities,
        );
        let current = rating::reliability_from_percent(
            seats[seat].1.reliability,
        );
        let new_reliability = rating::reliability_to_percent(
            rating::apply_reliability(current, delta),
        );

        // Each player's result commits in its own short transaction.
        sqlx::query(
            "UPDATE users SET rating = $2, reliability = $3 WHERE id = $1",
        )
        .bind(perspective.user_id)
        .bind(new_rating)
        .bind(new_reliability)
        .execute(pool)
        .await?;

        tracing::info!(
            reservation_id = %reservation_id,
            user_id = %perspective.user_id,
            rating = new_rating,
            reliability = new_reliability,
            "player rating updated"
        );
    }

    Ok(())
}

/// Auto-confirm PENDING scores whose last submission is older than 24h.
/// Returns the touched reservation ids; the caller spawns rating tasks.
pub async fn auto_confirm_stale_scores(
    time_source: &TimeSource,
    tx: &mut Tx<'_>,
) -> Result<Vec<ReservationId>, StoreError> {
    use jiff::SignedDuration;

    let cutoff = time_source.now()
        - SignedDuration::from_hours(payloads::SCORE_AUTO_CONFIRM_HOURS);

    let stale = sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations
        WHERE score_status = $1
          AND is_cancel = FALSE
          AND last_score_submitter_id IS NOT NULL
          AND last_score_update_at < $2
        ORDER BY id
        FOR UPDATE SKIP LOCKED",
    )
    .bind(ScoreStatus::Pending)
    .bind(cutoff.to_sqlx())
    .fetch_all(&mut **tx)
    .await?;

    let mut confirmed = Vec::with_capacity(stale.len());
    for reservation in &stale {
        sqlx::query(
            "UPDATE reservations SET
                score_status = $2,
                score_confirmed_at = $3
            WHERE id = $1",
        )
        .bind(reservation.id)
        .bind(ScoreStatus::AutoConfirmed)
        .bind(time_source.now_sqlx())
        .execute(&mut **tx)
        .await?;

        let participants =
            super::lock_participants_tx(&reservation.id, tx).await?;
        let recipient_ids: Vec<_> = participants.iter().map(|p| p.user_id).collect();
        notification::enqueue_for_all(
            recipient_ids,
            NewNotification::reservation(
                reservation.creator_user_id,
                reservation.id,
                NotificationType::MatchStatusChanged,
                format!(
                    "The score for match {} was confirmed automatically",
                    reservation.coder
                ),
            ),
            time_source,
            tx,
        )
        .await?;

        tracing::info!(
            reservation_id = %reservation.id,
            operation = "auto_confirm",
            "stale pending score auto-confirmed"
        );
        confirmed.push(reservation.id);
    }

    Ok(confirmed)
}
