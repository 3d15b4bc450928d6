use serde::{Deserialize, Serialize};

use super::score;

/// Direction of a player's accuracy over their recent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyTrend {
    Improving,
    Stable,
    SuspiciousJump,
}

/// Every detection channel for one game or one aggregation window.
///
/// Scores are normalised to `[0, 1]` unless noted. The `Default` value is
/// the neutral, non-suspicious reading of every channel, so producers fill
/// in what they measured and leave the rest:
///
/// ```
/// use chessguard::ensemble::DetectionSignals;
///
/// let signals = DetectionSignals {
///     adjusted_engine_agreement: 0.97,
///     ..DetectionSignals::default()
/// };
/// assert_eq!(signals.human_likelihood, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSignals {
    pub engine_agreement: f64,
    /// Agreement over moves played after the opening book.
    pub adjusted_engine_agreement: f64,
    pub moves_in_book: u32,

    pub timing_suspicion: f64,
    pub scramble_toggle_score: f64,

    pub streak_improbability_score: f64,
    pub longest_win_streak: u32,
    /// Share of high-accuracy games within the streak window.
    pub streak_density: f64,

    /// Correlation in `[-1, 1]`; `None` when no complexity data exists.
    pub complexity_accuracy_corr: Option<f64>,

    /// Performance rating minus actual rating, in points.
    pub rating_delta: i32,

    /// 1.0 is fully human-like.
    pub human_likelihood: f64,
    pub non_obvious_engine_moves: u32,

    pub is_known_cheater: bool,
    pub cheater_source: Option<String>,

    pub history_anomaly_detected: bool,
    pub accuracy_trend: Option<AccuracyTrend>,
    pub accuracy_change: f64,

    pub opening_repertoire_score: f64,
    pub unique_openings_count: u32,

    pub resignation_pattern_score: f64,
    pub never_blunder_resign: bool,

    pub critical_vs_normal_gap: f64,
    pub critical_moves_correct: u32,
    pub critical_moves_total: u32,
    pub normal_moves_correct: u32,
    pub normal_moves_total: u32,

    pub time_distribution_score: f64,
    /// Coefficient of variation of move times; 0 when unknown.
    pub time_cv: f64,

    pub opponent_correlation_score: f64,
    pub rises_to_occasion: bool,

    pub session_fatigue_score: f64,
    pub never_tires: bool,

    pub games_analyzed: u32,
    pub flagged_games: u32,
    pub high_accuracy_games_count: u32,
}

impl Default for DetectionSignals {
    fn default() -> Self {
        Self {
            engine_agreement: 0.0,
            adjusted_engine_agreement: 0.0,
            moves_in_book: 0,
            timing_suspicion: 0.0,
            scramble_toggle_score: 0.0,
            streak_improbability_score: 0.0,
            longest_win_streak: 0,
            streak_density: 0.0,
            complexity_accuracy_corr: None,
            rating_delta: 0,
            human_likelihood: 1.0,
            non_obvious_engine_moves: 0,
            is_known_cheater: false,
            cheater_source: None,
            history_anomaly_detected: false,
            accuracy_trend: None,
            accuracy_change: 0.0,
            opening_repertoire_score: 0.0,
            unique_openings_count: 0,
            resignation_pattern_score: 0.0,
            never_blunder_resign: false,
            critical_vs_normal_gap: 0.0,
            critical_moves_correct: 0,
            critical_moves_total: 0,
            normal_moves_correct: 0,
            normal_moves_total: 0,
            time_distribution_score: 0.0,
            time_cv: 0.0,
            opponent_correlation_score: 0.0,
            rises_to_occasion: false,
            session_fatigue_score: 0.0,
            never_tires: false,
            games_analyzed: 0,
            flagged_games: 0,
            high_accuracy_games_count: 0,
        }
    }
}

impl DetectionSignals {
    pub(crate) fn has_timing_data(&self) -> bool {
        self.timing_suspicion > 0.0 || self.time_cv > 0.0
    }
}

/// Accuracy in critical positions minus accuracy elsewhere, clamped to
/// `[0, 1]`. Reported as 0 until `min_sample` critical positions exist.
pub fn critical_gap(
    critical_correct: u32,
    critical_total: u32,
    normal_correct: u32,
    normal_total: u32,
    min_sample: u32,
) -> f64 {
    if critical_total < min_sample.max(1) || normal_total == 0 {
        return 0.0;
    }
    let critical = f64::from(critical_correct) / f64::from(critical_total);
    let normal = f64::from(normal_correct) / f64::from(normal_total);
    (critical - normal).clamp(0.0, 1.0)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Fold per-game signals into one player-level vector.
///
/// Scores are averaged, except the scramble toggle where the worst game
/// counts. Counters are summed and the critical gap is recomputed from the
/// summed counters with `min_critical_sample` applied to the total.
pub fn combine(games: &[DetectionSignals], min_critical_sample: u32) -> DetectionSignals {
    if games.is_empty() {
        return DetectionSignals::default();
    }
    let avg = |f: fn(&DetectionSignals) -> f64| mean(games.iter().map(f));
    let total = |f: fn(&DetectionSignals) -> u32| games.iter().map(f).sum::<u32>();
    let any = |f: fn(&DetectionSignals) -> bool| games.iter().any(f);

    let corr: Vec<f64> = games
        .iter()
        .filter_map(|g| g.complexity_accuracy_corr)
        .collect();
    let critical_moves_correct = total(|g| g.critical_moves_correct);
    let critical_moves_total = total(|g| g.critical_moves_total);
    let normal_moves_correct = total(|g| g.normal_moves_correct);
    let normal_moves_total = total(|g| g.normal_moves_total);

    DetectionSignals {
        engine_agreement: avg(|g| g.engine_agreement),
        adjusted_engine_agreement: avg(|g| g.adjusted_engine_agreement),
        moves_in_book: total(|g| g.moves_in_book),
        timing_suspicion: avg(|g| g.timing_suspicion),
        scramble_toggle_score: games
            .iter()
            .map(|g| g.scramble_toggle_score)
            .fold(0.0, f64::max),
        streak_improbability_score: avg(|g| g.streak_improbability_score),
        longest_win_streak: games.iter().map(|g| g.longest_win_streak).max().unwrap_or(0),
        streak_density: avg(|g| g.streak_density),
        complexity_accuracy_corr: (!corr.is_empty()).then(|| mean(corr.iter().copied())),
        rating_delta: avg(|g| f64::from(g.rating_delta)).round() as i32,
        human_likelihood: avg(|g| g.human_likelihood),
        non_obvious_engine_moves: total(|g| g.non_obvious_engine_moves),
        is_known_cheater: any(|g| g.is_known_cheater),
        cheater_source: games.iter().find_map(|g| g.cheater_source.clone()),
        history_anomaly_detected: any(|g| g.history_anomaly_detected),
        accuracy_trend: games.iter().rev().find_map(|g| g.accuracy_trend),
        accuracy_change: avg(|g| g.accuracy_change),
        opening_repertoire_score: avg(|g| g.opening_repertoire_score),
        unique_openings_count: games
            .iter()
            .map(|g| g.unique_openings_count)
            .max()
            .unwrap_or(0),
        resignation_pattern_score: avg(|g| g.resignation_pattern_score),
        never_blunder_resign: any(|g| g.never_blunder_resign),
        critical_vs_normal_gap: critical_gap(
            critical_moves_correct,
            critical_moves_total,
            normal_moves_correct,
            normal_moves_total,
            min_critical_sample,
        ),
        critical_moves_correct,
        critical_moves_total,
        normal_moves_correct,
        normal_moves_total,
        time_distribution_score: avg(|g| g.time_distribution_score),
        time_cv: avg(|g| g.time_cv),
        opponent_correlation_score: avg(|g| g.opponent_correlation_score),
        rises_to_occasion: any(|g| g.rises_to_occasion),
        session_fatigue_score: avg(|g| g.session_fatigue_score),
        never_tires: any(|g| g.never_tires),
        games_analyzed: total(|g| g.games_analyzed.max(1)),
        flagged_games: games
            .iter()
            .filter(|g| score(g).score > 50.0)
            .count() as u32,
        high_accuracy_games_count: total(|g| g.high_accuracy_games_count),
    }
}
