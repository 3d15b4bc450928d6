//! Per-side statistics over analysed moves. Everything here is a pure
//! function of the records.

use serde::{Deserialize, Serialize};

use crate::{
    config::Calibration,
    types::{MoveRecord, Side},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideSummary {
    pub moves: usize,
    /// Moves with a defined centipawn loss.
    pub graded_moves: usize,
    pub mean_loss: Option<f64>,
    pub median_loss: Option<f64>,
    pub max_loss: Option<i32>,
    pub perfect_rate: f64,
    pub agreement_rate: f64,
    pub top2_rate: f64,
    pub blunder_rate: f64,
    pub blunders: usize,
    pub accuracy: Option<f64>,
    /// Mean and population spread of the engine's score after each move,
    /// mates counted as +/-[`MATE_SCORE_CP`](crate::MATE_SCORE_CP).
    pub mean_eval: Option<f64>,
    pub eval_stdev: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub white: SideSummary,
    pub black: SideSummary,
}

impl GameSummary {
    pub fn side(&self, side: Side) -> &SideSummary {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }
}

pub fn summarize(records: &[MoveRecord], cal: &Calibration) -> GameSummary {
    GameSummary {
        white: summarize_side(records, Side::White, cal),
        black: summarize_side(records, Side::Black, cal),
    }
}

pub fn summarize_side(records: &[MoveRecord], side: Side, cal: &Calibration) -> SideSummary {
    let mine: Vec<&MoveRecord> = records.iter().filter(|r| r.side == side).collect();
    let mut losses: Vec<i32> = mine.iter().filter_map(|r| r.centipawn_loss).collect();
    let graded = losses.len();

    let rate = |hits: usize, of: usize| if of == 0 { 0.0 } else { hits as f64 / of as f64 };
    let count = |pred: &dyn Fn(i32) -> bool| losses.iter().filter(|&&l| pred(l)).count();

    let perfect = count(&|l| l <= cal.perfect_cp);
    let agreeing = count(&|l| l <= cal.agreement_cp);
    let blunders = count(&|l| l >= cal.blunder_cp);
    let top2 = mine.iter().filter(|r| in_top_two(r, cal)).count();
    let accuracy = (graded > 0).then(|| {
        losses.iter().map(|&l| move_accuracy(l, cal)).sum::<f64>() / graded as f64
    });
    let mean_loss = (graded > 0).then(|| losses.iter().map(|&l| f64::from(l)).sum::<f64>() / graded as f64);
    let max_loss = losses.iter().copied().max();

    let evals: Vec<f64> = mine
        .iter()
        .filter_map(|r| r.played.score)
        .map(|score| f64::from(score.to_centipawns()))
        .collect();
    let mean_eval = (!evals.is_empty()).then(|| evals.iter().sum::<f64>() / evals.len() as f64);
    let eval_stdev = mean_eval.map(|mean| {
        (evals.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / evals.len() as f64).sqrt()
    });

    losses.sort_unstable();
    let median_loss = match graded {
        0 => None,
        n if n % 2 == 1 => Some(f64::from(losses[n / 2])),
        n => Some(f64::from(losses[n / 2 - 1] + losses[n / 2]) / 2.0),
    };

    SideSummary {
        moves: mine.len(),
        graded_moves: graded,
        mean_loss,
        median_loss,
        max_loss,
        perfect_rate: rate(perfect, graded),
        agreement_rate: rate(agreeing, graded),
        top2_rate: rate(top2, mine.len()),
        blunder_rate: rate(blunders, graded),
        blunders,
        accuracy,
        mean_eval,
        eval_stdev,
    }
}

/// `1 - min(loss, cap) / cap`.
pub fn move_accuracy(loss: i32, cal: &Calibration) -> f64 {
    let cap = f64::from(cal.accuracy_cap_cp.max(1));
    1.0 - f64::from(loss.max(0)).min(cap) / cap
}

/// The played move is one of the engine's two best lines. Without ranked
/// lines a near-zero loss stands in for the comparison.
pub fn in_top_two(record: &MoveRecord, cal: &Calibration) -> bool {
    if let Some(best) = &record.best {
        if best.lines.len() >= 2 {
            return best
                .lines
                .iter()
                .take(2)
                .any(|line| line.first_move() == Some(record.move_uci.as_str()));
        }
    }
    record
        .centipawn_loss
        .is_some_and(|loss| loss <= cal.top2_cp)
}

/// Blunder-then-perfect toggling within one side's sequence of losses.
///
/// Each run of more than three near-perfect moves directly after a
/// blunder adds 0.2, up to 1.0. Moves without a defined loss are skipped.
pub fn scramble_toggle_score(losses: &[Option<i32>], cal: &Calibration) -> f64 {
    let mut score: f64 = 0.0;
    let mut after_blunder = false;
    let mut run = 0;
    for loss in losses.iter().flatten().copied() {
        if loss > cal.blunder_cp {
            if run > 3 {
                score += 0.2;
            }
            after_blunder = true;
            run = 0;
        } else if loss < cal.perfect_cp {
            if after_blunder {
                run += 1;
            }
        } else {
            if run > 3 {
                score += 0.2;
            }
            after_blunder = false;
            run = 0;
        }
    }
    if run > 3 {
        score += 0.2;
    }
    score.min(1.0)
}

/// Sample standard deviation of move times over their mean; 0 with fewer
/// than five times or a zero mean.
pub fn time_cv(times: &[f64]) -> f64 {
    if times.len() < 5 {
        return 0.0;
    }
    let n = times.len() as f64;
    let mean = times.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt() / mean
}
