//! Ensemble scoring.
//!
//! Fifteen detection channels are mapped to `[0, 1]` components, weighted,
//! and summed into a 0-100 suspicion score. Two overrides can only raise
//! the result: a known cheater is floored at 95, and a player with a
//! suspect volume of high-accuracy games is floored at 65 (85 above a 20%
//! ratio). Scoring never fails; missing data widens the confidence band.

mod signals;

pub use signals::{AccuracyTrend, DetectionSignals, combine, critical_gap};

use serde::{Deserialize, Serialize};

use crate::config::Calibration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Engine,
    Timing,
    Streak,
    Scramble,
    Complexity,
    Rating,
    HumanMl,
    KnownCheater,
    History,
    Opening,
    Resignation,
    CriticalMoment,
    TimeDistribution,
    OpponentCorrelation,
    Session,
}

impl Channel {
    pub const ALL: [Channel; 15] = [
        Channel::Engine,
        Channel::Timing,
        Channel::Streak,
        Channel::Scramble,
        Channel::Complexity,
        Channel::Rating,
        Channel::HumanMl,
        Channel::KnownCheater,
        Channel::History,
        Channel::Opening,
        Channel::Resignation,
        Channel::CriticalMoment,
        Channel::TimeDistribution,
        Channel::OpponentCorrelation,
        Channel::Session,
    ];

    /// Share of the final score. The weights of all channels sum to 1.
    pub fn weight(self) -> f64 {
        match self {
            Channel::Engine => 0.15,
            Channel::Timing => 0.10,
            Channel::Streak => 0.06,
            Channel::Scramble => 0.06,
            Channel::Complexity => 0.06,
            Channel::Rating => 0.07,
            Channel::HumanMl => 0.08,
            Channel::KnownCheater => 0.06,
            Channel::History => 0.04,
            Channel::Opening => 0.05,
            Channel::Resignation => 0.05,
            Channel::CriticalMoment => 0.07,
            Channel::TimeDistribution => 0.05,
            Channel::OpponentCorrelation => 0.05,
            Channel::Session => 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            RiskLevel::Critical
        } else if score >= 50.0 {
            RiskLevel::High
        } else if score >= 25.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Uncertainty {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub channel: Channel,
    pub weight: f64,
    /// Channel reading mapped to `[0, 1]`.
    pub component: f64,
    /// `weight * component * 100`.
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub score: f64,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub confidence_low: f64,
    pub confidence_high: f64,
    pub uncertainty: Uncertainty,
    pub components: Vec<Contribution>,
    pub flags: Vec<String>,
}

impl EnsembleResult {
    pub fn component(&self, channel: Channel) -> f64 {
        self.components
            .iter()
            .find(|c| c.channel == channel)
            .map_or(0.0, |c| c.component)
    }
}

// Staircases. Each returns the component for a raw reading; all are
// monotone non-decreasing in the suspicious direction.

fn engine_component(agreement: f64) -> f64 {
    match agreement {
        a if a > 0.95 => 1.0,
        a if a > 0.90 => 0.8,
        a if a > 0.85 => 0.5,
        a if a > 0.75 => 0.2,
        _ => 0.0,
    }
}

fn complexity_component(corr: Option<f64>) -> f64 {
    match corr {
        Some(c) if c < -0.3 => 0.8,
        Some(c) if c < -0.1 => 0.4,
        Some(c) if c < 0.1 => 0.2,
        _ => 0.0,
    }
}

fn rating_component(delta: i32) -> f64 {
    match delta {
        d if d > 400 => 1.0,
        d if d > 300 => 0.7,
        d if d > 200 => 0.4,
        d if d > 100 => 0.2,
        _ => 0.0,
    }
}

fn history_component(s: &DetectionSignals) -> f64 {
    if s.history_anomaly_detected {
        0.8
    } else if s.accuracy_trend == Some(AccuracyTrend::SuspiciousJump) {
        0.6
    } else if s.accuracy_change > 0.15 {
        0.4
    } else {
        0.0
    }
}

fn critical_component(gap: f64) -> f64 {
    match gap {
        g if g > 0.5 => 1.0,
        g if g > 0.35 => 0.8,
        g if g > 0.20 => 0.5,
        _ => 0.0,
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn percent(ratio: f64) -> String {
    format!("{:.0}%", ratio * 100.0)
}

/// High-accuracy game ratio when the suspect-volume override applies.
fn suspect_volume(s: &DetectionSignals, cal: &Calibration) -> Option<f64> {
    if s.games_analyzed <= 5 {
        return None;
    }
    let ratio = f64::from(s.high_accuracy_games_count) / f64::from(s.games_analyzed);
    (s.high_accuracy_games_count > cal.volume_min_games && ratio > cal.volume_high_ratio)
        .then_some(ratio)
}

/// Score with the default calibration.
pub fn score(signals: &DetectionSignals) -> EnsembleResult {
    score_with(signals, &Calibration::default())
}

pub fn score_with(s: &DetectionSignals, cal: &Calibration) -> EnsembleResult {
    let mut flags = Vec::new();
    let volume = suspect_volume(s, cal);

    let engine = if volume.is_some() {
        1.0
    } else {
        engine_component(s.adjusted_engine_agreement)
    };
    if s.adjusted_engine_agreement > 0.95 {
        flags.push("Very high engine agreement (>95%)".to_string());
    } else if s.adjusted_engine_agreement > 0.90 {
        flags.push("High engine agreement (>90%)".to_string());
    }

    let timing = unit(s.timing_suspicion);
    if timing > 0.7 {
        flags.push("Suspicious timing patterns".to_string());
    }

    let streak = unit(s.streak_improbability_score.max(s.streak_density * 3.0));
    if s.streak_density > 0.25 {
        flags.push(format!(
            "Suspicious streak density ({} high-accuracy games in window)",
            percent(s.streak_density)
        ));
    } else if s.streak_density > 0.15 {
        flags.push(format!(
            "Elevated streak density ({} high-accuracy games in window)",
            percent(s.streak_density)
        ));
    } else if s.streak_improbability_score > 0.6 {
        flags.push(format!(
            "Improbable win streaks (longest: {})",
            s.longest_win_streak
        ));
    }

    let scramble = unit(s.scramble_toggle_score);
    if scramble > 0.6 {
        flags.push("Engine toggle detected in time scramble".to_string());
    }

    let complexity = complexity_component(s.complexity_accuracy_corr);
    if complexity >= 0.8 {
        flags.push("Unusual accuracy-complexity pattern".to_string());
    }

    let rating = rating_component(s.rating_delta);
    if s.rating_delta > 300 {
        flags.push(format!("Performance {} points above rating", s.rating_delta));
    }

    let human_ml = unit(1.0 - s.human_likelihood);
    if human_ml > 0.6 {
        flags.push(format!(
            "Low human likelihood score ({})",
            percent(s.human_likelihood)
        ));
    }
    if s.non_obvious_engine_moves > 10 {
        flags.push(format!(
            "{} non-obvious engine moves",
            s.non_obvious_engine_moves
        ));
    }

    let known_cheater = if s.is_known_cheater { 1.0 } else { 0.0 };

    let history = history_component(s);
    if s.history_anomaly_detected {
        flags.push("Sudden accuracy improvement detected".to_string());
    } else if s.accuracy_trend == Some(AccuracyTrend::SuspiciousJump) {
        flags.push(format!(
            "Unusual accuracy trend (+{})",
            percent(s.accuracy_change)
        ));
    }

    let opening = unit(s.opening_repertoire_score);
    if opening > 0.6 {
        flags.push(format!(
            "Near-perfect play across {} different openings",
            s.unique_openings_count
        ));
    }

    let resignation = unit(s.resignation_pattern_score);
    if s.never_blunder_resign {
        flags.push("Never loses to blunders (always resigns cleanly)".to_string());
    }

    let gap = s.critical_vs_normal_gap;
    let critical = critical_component(gap);
    if gap > 0.5 {
        flags.push(format!(
            "Sniper pattern: massive accuracy gap at critical moments (+{})",
            percent(gap)
        ));
    } else if gap > 0.35 {
        flags.push(format!("Suspicious critical accuracy gap (+{})", percent(gap)));
    } else if gap > 0.20 {
        flags.push(format!("Elevated critical accuracy (+{})", percent(gap)));
    }

    let time_distribution = unit(s.time_distribution_score);
    if s.time_cv > 0.0 && s.time_cv < 0.3 {
        flags.push(format!("Robotic timing pattern (CV: {:.2})", s.time_cv));
    }

    let opponent = unit(s.opponent_correlation_score);
    if s.rises_to_occasion {
        flags.push("Plays better against stronger opponents".to_string());
    }

    let session = unit(s.session_fatigue_score);
    if s.never_tires {
        flags.push("No performance decline over long sessions".to_string());
    }

    let components: Vec<Contribution> = Channel::ALL
        .into_iter()
        .map(|channel| {
            let component = match channel {
                Channel::Engine => engine,
                Channel::Timing => timing,
                Channel::Streak => streak,
                Channel::Scramble => scramble,
                Channel::Complexity => complexity,
                Channel::Rating => rating,
                Channel::HumanMl => human_ml,
                Channel::KnownCheater => known_cheater,
                Channel::History => history,
                Channel::Opening => opening,
                Channel::Resignation => resignation,
                Channel::CriticalMoment => critical,
                Channel::TimeDistribution => time_distribution,
                Channel::OpponentCorrelation => opponent,
                Channel::Session => session,
            };
            Contribution {
                channel,
                weight: channel.weight(),
                component,
                points: channel.weight() * component * 100.0,
            }
        })
        .collect();

    let mut score: f64 = components.iter().map(|c| c.points).sum();

    // Overrides. Their flags lead the list, known cheater first.
    let mut leading = Vec::new();
    if s.is_known_cheater {
        score = score.max(95.0);
        leading.push(format!(
            "KNOWN CHEATER - previously banned ({})",
            s.cheater_source.as_deref().unwrap_or("database")
        ));
    }
    if let Some(ratio) = volume {
        let floor = if ratio > cal.volume_critical_ratio { 85.0 } else { 65.0 };
        score = score.max(floor);
        leading.push(format!(
            "Suspect volume: {} games with >95% accuracy",
            s.high_accuracy_games_count
        ));
    }
    leading.append(&mut flags);
    let score = score.clamp(0.0, 100.0);

    let confidence = confidence(s);
    let spread = (1.0 - confidence) * 30.0 + (15.0 - (score - 50.0).abs()).max(0.0) * 0.5;
    let uncertainty = if spread <= 10.0 {
        Uncertainty::Low
    } else if spread <= 20.0 {
        Uncertainty::Medium
    } else {
        Uncertainty::High
    };

    EnsembleResult {
        score,
        risk_level: RiskLevel::from_score(score),
        confidence,
        confidence_low: (score - spread).max(0.0),
        confidence_high: (score + spread).min(100.0),
        uncertainty,
        components,
        flags: leading,
    }
}

fn confidence(s: &DetectionSignals) -> f64 {
    let sample = match s.games_analyzed {
        n if n >= 50 => 1.0,
        n if n >= 20 => 0.8,
        n if n >= 10 => 0.6,
        _ => 0.3,
    };
    let timing = if s.has_timing_data() { 0.9 } else { 0.5 };
    let complexity = if s.complexity_accuracy_corr.is_some() { 0.9 } else { 0.5 };
    (sample + timing + complexity) / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let total: f64 = Channel::ALL.iter().map(|c| c.weight()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn neutral_signals_score_zero_and_low() {
        let result = score(&DetectionSignals::default());
        assert_eq!(result.score, 0.0);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!(result.flags.is_empty());
        // no games, no timing, no complexity
        assert!((result.confidence - (0.3 + 0.5 + 0.5) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn very_high_agreement_maxes_the_engine_channel() {
        let result = score(&DetectionSignals {
            adjusted_engine_agreement: 0.97,
            ..DetectionSignals::default()
        });
        assert_eq!(result.component(Channel::Engine), 1.0);
        assert!(result.score >= 15.0);
        assert!(result.flags[0].contains("engine agreement"));
    }

    #[test]
    fn known_cheater_is_floored_and_flagged_first() {
        let result = score(&DetectionSignals {
            is_known_cheater: true,
            cheater_source: Some("fide".into()),
            timing_suspicion: 0.9,
            ..DetectionSignals::default()
        });
        assert!(result.score >= 95.0);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert!(result.flags[0].starts_with("KNOWN CHEATER"));
        assert!(result.flags[0].contains("fide"));
    }

    #[test]
    fn suspect_volume_floors_by_ratio() {
        let base = DetectionSignals {
            games_analyzed: 100,
            high_accuracy_games_count: 15,
            ..DetectionSignals::default()
        };
        let high = score(&base);
        assert_eq!(high.score, 65.0);
        assert_eq!(high.component(Channel::Engine), 1.0);
        assert!(high.flags[0].starts_with("Suspect volume"));

        let critical = score(&DetectionSignals {
            high_accuracy_games_count: 25,
            ..base.clone()
        });
        assert_eq!(critical.score, 85.0);

        // ratio above 10% but too few games in absolute terms
        let small = score(&DetectionSignals {
            games_analyzed: 20,
            high_accuracy_games_count: 8,
            ..base
        });
        assert!(small.score < 65.0);
    }

    #[test]
    fn overrides_never_lower_the_score() {
        let mut s = DetectionSignals {
            adjusted_engine_agreement: 0.99,
            timing_suspicion: 1.0,
            streak_density: 0.5,
            scramble_toggle_score: 1.0,
            complexity_accuracy_corr: Some(-0.8),
            rating_delta: 600,
            human_likelihood: 0.0,
            history_anomaly_detected: true,
            opening_repertoire_score: 1.0,
            resignation_pattern_score: 1.0,
            critical_vs_normal_gap: 0.8,
            time_distribution_score: 1.0,
            opponent_correlation_score: 1.0,
            session_fatigue_score: 1.0,
            ..DetectionSignals::default()
        };
        let without = score(&s).score;
        assert!(without > 90.0);
        s.is_known_cheater = true;
        let with = score(&s).score;
        // the known-cheater channel adds its weight on top of the floor
        assert!(with > without);
        assert!(with <= 100.0);
    }

    #[test]
    fn tier_is_monotone_in_each_channel() {
        let steps = [0.0, 0.2, 0.4, 0.6, 0.8, 0.96, 1.0];
        let setters: [fn(&mut DetectionSignals, f64); 6] = [
            |s, v| s.adjusted_engine_agreement = v,
            |s, v| s.timing_suspicion = v,
            |s, v| s.scramble_toggle_score = v,
            |s, v| s.critical_vs_normal_gap = v,
            |s, v| s.human_likelihood = 1.0 - v,
            |s, v| s.session_fatigue_score = v,
        ];
        let base = DetectionSignals {
            timing_suspicion: 0.8,
            rating_delta: 350,
            opening_repertoire_score: 0.9,
            ..DetectionSignals::default()
        };
        for set in setters {
            let mut last = RiskLevel::Low;
            let mut last_score = f64::MIN;
            for v in steps {
                let mut s = base.clone();
                set(&mut s, v);
                let r = score(&s);
                assert!(r.score >= last_score);
                assert!(r.risk_level >= last);
                assert_eq!(r.risk_level, RiskLevel::from_score(r.score));
                last = r.risk_level;
                last_score = r.score;
            }
        }
    }

    #[test]
    fn band_widens_near_the_midline() {
        let mid = score(&DetectionSignals {
            games_analyzed: 60,
            timing_suspicion: 1.0,
            complexity_accuracy_corr: Some(0.5),
            adjusted_engine_agreement: 0.99,
            human_likelihood: 0.0,
            rating_delta: 500,
            critical_vs_normal_gap: 0.6,
            ..DetectionSignals::default()
        });
        // 15 + 10 + 8 + 7 + 7 = 47, three points below the midline
        assert!((mid.score - 47.0).abs() < 1e-9);
        let base = (1.0 - mid.confidence) * 30.0;
        let expected = base + 12.0 * 0.5;
        assert!((mid.confidence_high - mid.score - expected).abs() < 1e-9);
        assert!(mid.confidence_low <= mid.score && mid.confidence_high >= mid.score);
    }

    #[test]
    fn ordering_of_risk_levels() {
        assert_eq!(RiskLevel::from_score(70.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(69.9), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(25.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(24.99), RiskLevel::Low);
    }
}
