//! Set-score validation and winner derivation for best-of-three matches.

use payloads::{SetGames, TeamWin, requests};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScoreError {
    /// A submitted set is not a score padel allows.
    #[error("invalid score for set {set}")]
    InvalidSet { set: usize },
    /// The submitted sets do not decide the match.
    #[error("match undecided")]
    MatchUndecided,
}

/// A submission normalized for validation: up to three sets, team A games
/// first, with set 3 optionally played as a super tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposedScore {
    pub set1: SetGames,
    pub set2: SetGames,
    pub set3: Option<SetGames>,
    pub super_tiebreak: bool,
}

impl From<&requests::SubmitScore> for ProposedScore {
    fn from(details: &requests::SubmitScore) -> Self {
        Self {
            set1: details.set1,
            set2: details.set2,
            set3: details.set3,
            super_tiebreak: details.super_tiebreak,
        }
    }
}

/// Whether one set's games form a valid score.
///
/// A normal set ends 6-x with a two-game margin, or 7-5 / 7-6. A super
/// tie-break runs to at least 10 with a two-point margin.
pub fn set_is_valid(set: SetGames, super_tiebreak: bool) -> bool {
    if set.a < 0 || set.b < 0 {
        return false;
    }
    let hi = set.a.max(set.b);
    let lo = set.a.min(set.b);
    if super_tiebreak {
        hi >= 10 && hi - lo >= 2
    } else {
        (hi == 6 && hi - lo >= 2) || (hi == 7 && (lo == 5 || lo == 6))
    }
}

fn set_winner(set: SetGames) -> TeamWin {
    if set.a > set.b {
        TeamWin::TeamA
    } else {
        TeamWin::TeamB
    }
}

impl ProposedScore {
    /// Validate every submitted set and derive the match winner.
    ///
    /// Set 3 is required exactly when sets 1 and 2 are split; a third set
    /// on a match already decided 2-0 is rejected.
    pub fn winner(&self) -> Result<TeamWin, ScoreError> {
        if !set_is_valid(self.set1, false) {
            return Err(ScoreError::InvalidSet { set: 1 });
        }
        if !set_is_valid(self.set2, false) {
            return Err(ScoreError::InvalidSet { set: 2 });
        }

        let first = set_winner(self.set1);
        let second = set_winner(self.set2);
        if first == second {
            if self.set3.is_some() {
                return Err(ScoreError::InvalidSet { set: 3 });
            }
            return Ok(first);
        }

        let Some(set3) = self.set3 else {
            return Err(ScoreError::MatchUndecided);
        };
        if !set_is_valid(set3, self.super_tiebreak) {
            return Err(ScoreError::InvalidSet { set: 3 });
        }
        Ok(set_winner(set3))
    }

    /// Total games won by team A across the submitted sets.
    pub fn games_for_a(&self) -> u32 {
        let set3 = self.set3.map(|s| s.a).unwrap_or(0);
        u32::from((self.set1.a + self.set2.a + set3).max(0) as u16)
    }

    /// Total games won by team B across the submitted sets.
    pub fn games_for_b(&self) -> u32 {
        let set3 = self.set3.map(|s| s.b).unwrap_or(0);
        u32::from((self.set1.b + self.set2.b + set3).max(0) as u16)
    }
}
