//! Elo rating store for the pairwise stage.

use serde::Serialize;
use std::collections::BTreeMap;

/// Logistic scale of the expected-score curve.
pub const ELO_SCALE: f64 = 400.0;

/// Ratings keyed by display name. Only [`EloRatings::update`] mutates them.
#[derive(Debug, Clone, Serialize)]
pub struct EloRatings {
    k: f64,
    base: f64,
    ratings: BTreeMap<String, f64>,
}

/// Rating movement from one result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EloDelta {
    pub expected_winner: f64,
    /// Added to the winner, subtracted from the loser.
    pub change: f64,
}

impl EloRatings {
    pub fn new(k: f64, base: f64) -> Self {
        Self {
            k,
            base,
            ratings: BTreeMap::new(),
        }
    }

    /// Seeds every name at the base rating, so players with no recorded
    /// result still appear on the leaderboard.
    pub fn with_players<I, S>(k: f64, base: f64, players: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut elo = Self::new(k, base);
        for p in players {
            elo.ratings.entry(p.into()).or_insert(base);
        }
        elo
    }

    pub fn rating(&self, name: &str) -> f64 {
        self.ratings.get(name).copied().unwrap_or(self.base)
    }

    /// Records `winner` beating `loser`. The winner gains exactly what the
    /// loser gives up: `k * (1 - E)`, strictly between 0 and `k`.
    pub fn update(&mut self, winner: &str, loser: &str) -> EloDelta {
        let rw = self.rating(winner);
        let rl = self.rating(loser);
        let expected_winner = expected_score(rw, rl);
        let change = self.k * (1.0 - expected_winner);
        self.ratings.insert(winner.to_string(), rw + change);
        self.ratings.insert(loser.to_string(), rl - change);
        EloDelta {
            expected_winner,
            change,
        }
    }

    /// `(name, rating)` from highest to lowest. Equal ratings fall back to
    /// `tie_break` (lower first), then to name.
    pub fn leaderboard_by<F>(&self, tie_break: F) -> Vec<(String, f64)>
    where
        F: Fn(&str) -> f64,
    {
        let mut rows: Vec<(String, f64)> =
            self.ratings.iter().map(|(n, r)| (n.clone(), *r)).collect();
        rows.sort_by(|(na, ra), (nb, rb)| {
            rb.total_cmp(ra)
                .then_with(|| tie_break(na).total_cmp(&tie_break(nb)))
                .then_with(|| na.cmp(nb))
        });
        rows
    }
}

/// `1 / (1 + 10^((rb - ra) / 400))`.
pub fn expected_score(ra: f64, rb: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rb - ra) / ELO_SCALE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_move_by_half_k() {
        let mut elo = EloRatings::with_players(30.0, 1000.0, ["A", "B"]);
        let delta = elo.update("A", "B");
        assert!((delta.expected_winner - 0.5).abs() < 1e-12);
        assert!((delta.change - 15.0).abs() < 1e-12);
        assert!((elo.rating("A") - 1015.0).abs() < 1e-12);
        assert!((elo.rating("B") - 985.0).abs() < 1e-12);
    }

    #[test]
    fn update_is_zero_sum_and_bounded() {
        let mut elo = EloRatings::with_players(30.0, 1000.0, ["A", "B", "C"]);
        let pairs = [("A", "B"), ("A", "C"), ("B", "A"), ("C", "B"), ("A", "B")];
        for (w, l) in pairs {
            let before_w = elo.rating(w);
            let before_l = elo.rating(l);
            let d = elo.update(w, l);
            assert!(d.change > 0.0 && d.change < 30.0);
            assert!((elo.rating(w) - before_w - d.change).abs() < 1e-9);
            assert!((before_l - elo.rating(l) - d.change).abs() < 1e-9);
        }
        let total: f64 = ["A", "B", "C"].iter().map(|n| elo.rating(n)).sum();
        assert!((total - 3000.0).abs() < 1e-9);
    }

    #[test]
    fn upset_moves_more_than_expected_win() {
        let mut elo = EloRatings::new(30.0, 1000.0);
        for _ in 0..5 {
            elo.update("Strong", "Weak");
        }
        let mut favourite = elo.clone();
        let expected = favourite.update("Strong", "Weak").change;
        let upset = elo.update("Weak", "Strong").change;
        assert!(upset > expected);
    }

    #[test]
    fn leaderboard_includes_unplayed_and_breaks_ties() {
        let mut elo = EloRatings::with_players(30.0, 1000.0, ["A", "B", "C", "D"]);
        elo.update("C", "D");
        let screening = |n: &str| match n {
            "A" => 2.0,
            "B" => 1.0,
            _ => 3.0,
        };
        let order: Vec<String> = elo
            .leaderboard_by(screening)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(order, vec!["C", "B", "A", "D"]);
    }
}
