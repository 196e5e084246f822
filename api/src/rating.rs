//! Deterministic rating and reliability calculators.
//!
//! Both engines are pure: given the same inputs they produce the same
//! outputs, with no clock or storage access. The score protocol runs them
//! after a match result is confirmed and persists the results in short
//! follow-up transactions.

pub const RATING_MIN: f64 = 0.5;
pub const RATING_MAX: f64 = 7.0;

/// Additive reliability gain factor.
const RELIABILITY_BETA: f64 = 0.1;

/// Rating-difference rows `(min, max, w)`, walked in order; the first row
/// whose inclusive bounds contain X wins.
const W_TABLE: &[(f64, f64, f64)] = &[
    (0.96, 3.5, 0.02),
    (0.86, 0.95, 0.03),
    (0.76, 0.85, 0.05),
    (0.66, 0.75, 0.08),
    (0.56, 0.65, 0.11),
    (0.46, 0.55, 0.15),
    (0.36, 0.45, 0.20),
    (0.26, 0.35, 0.26),
    (0.16, 0.25, 0.33),
    (0.05, 0.15, 0.41),
    (-0.06, 0.05, 0.50),
    (-0.16, -0.06, 0.60),
    (-0.25, -0.16, 0.70),
    (-0.36, -0.26, 0.85),
    (-0.46, -0.36, 1.00),
    (-0.56, -0.46, 1.20),
    (-0.66, -0.56, 1.40),
    (-0.76, -0.66, 1.70),
    (-0.86, -0.76, 2.00),
    (-0.96, -0.86, 2.40),
    (-3.5, -0.96, 2.80),
];

/// Percentage retained per games won by the team, exact for 0..=19.
const GAME_PCT_TABLE: [f64; 20] = [
    100.0, 97.37, 94.74, 92.11, 89.47, 86.84, 84.21, 81.58, 78.95, 76.32,
    73.68, 71.05, 68.42, 65.79, 63.16, 60.53, 57.89, 55.26, 52.63, 50.0,
];

/// Linear falloff beyond the tabulated range, floored at zero.
const PCT_DECAY_PER_GAME: f64 = 2.63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RatingError {
    #[error("non-finite rating input")]
    NonFiniteInput,
}

/// Expectation weight for a rating gap of X points between the teams.
pub fn lookup_w(x: f64) -> f64 {
    if x > 3.5 {
        return 0.02;
    }
    if x < -3.5 {
        return 2.8;
    }
    for &(min, max, w) in W_TABLE {
        if x >= min && x <= max {
            return w;
        }
    }
    // No row matched (boundary gap); treat as an even matchup.
    0.5
}

/// Percentage of W retained after the player's team won `points` games.
pub fn lookup_pct(points: u32) -> f64 {
    match GAME_PCT_TABLE.get(points as usize) {
        Some(pct) => *pct,
        None => (50.0 - (points - 19) as f64 * PCT_DECAY_PER_GAME).max(0.0),
    }
}

/// Compute a player's post-match rating.
///
/// `points_scored` is the total games won by the player's team across all
/// sets. The three reliability coefficients belong to the teammate and the
/// two opponents, each in [0, 1].
pub fn compute_rating(
    player: f64,
    teammate: f64,
    adv1: f64,
    adv2: f64,
    points_scored: u32,
    reliabilities: [f64; 3],
) -> Result<f64, RatingError> {
    let inputs = [
        player,
        teammate,
        adv1,
        adv2,
        reliabilities[0],
        reliabilities[1],
        reliabilities[2],
    ];
    if inputs.iter().any(|v| !v.is_finite()) {
        return Err(RatingError::NonFiniteInput);
    }

    let x = ((player + teammate) - (adv1 + adv2)) / 2.0;
    let w = lookup_w(x);
    let pct = lookup_pct(points_scored);
    let y = w * pct / 100.0;
    let z = w - y;
    let avg_rel =
        (reliabilities[0] + reliabilities[1] + reliabilities[2]) / 3.0;
    let ro = z * avg_rel;

    Ok((player + ro).clamp(RATING_MIN, RATING_MAX))
}

/// Probability-of-result term on team-average ratings, /20 scale.
pub fn expected_result(winner_sum: f64, loser_sum: f64) -> f64 {
    let avg_winner = winner_sum / 2.0;
    let avg_loser = loser_sum / 2.0;
    1.0 / (1.0 + 10f64.powf((avg_loser - avg_winner) / 20.0))
}

/// Bounded additive reliability update for one player.
///
/// `others` are the reliabilities of the three other players on court.
pub fn reliability_delta(
    winner_sum: f64,
    loser_sum: f64,
    others: [f64; 3],
) -> f64 {
    let re = expected_result(winner_sum, loser_sum);
    let h = ((others[0] + others[1] + others[2]) / 3.0).max(0.01);
    RELIABILITY_BETA * re * (1.0 / h.sqrt())
}

pub fn apply_reliability(current: f64, delta: f64) -> f64 {
    (current + delta).clamp(0.0, 1.0)
}

/// Reliability is persisted as an integer percentage.
pub fn reliability_from_percent(percent: i16) -> f64 {
    f64::from(percent) / 100.0
}

pub fn reliability_to_percent(reliability: f64) -> i16 {
    (reliability.clamp(0.0, 1.0) * 100.0).round() as i16
}
