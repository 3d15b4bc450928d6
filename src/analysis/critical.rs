//! Critical positions: balanced, with one clearly best move.

use serde::{Deserialize, Serialize};

use crate::{
    config::Calibration,
    ensemble::critical_gap,
    types::{EngineEvaluation, MoveRecord, Side},
};

/// Needs two ranked lines with centipawn scores; mate lines never count.
pub fn is_critical(best: &EngineEvaluation, cal: &Calibration) -> bool {
    let [first, second, ..] = best.lines.as_slice() else {
        return false;
    };
    let (Some(s1), Some(s2)) = (first.score_cp(), second.score_cp()) else {
        return false;
    };
    s1.abs() <= cal.critical_balanced_cp && (s1 - s2) > cal.critical_gap_cp
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalStats {
    pub critical_total: u32,
    pub critical_correct: u32,
    pub normal_total: u32,
    pub normal_correct: u32,
}

impl CriticalStats {
    /// Count one side's graded moves. A move is correct when its loss is
    /// below the perfect-move threshold.
    pub fn collect(records: &[MoveRecord], side: Side, cal: &Calibration) -> Self {
        let mut stats = Self::default();
        for record in records.iter().filter(|r| r.side == side) {
            let (Some(best), Some(loss)) = (&record.best, record.centipawn_loss) else {
                continue;
            };
            let correct = u32::from(loss < cal.perfect_cp);
            if is_critical(best, cal) {
                stats.critical_total += 1;
                stats.critical_correct += correct;
            } else {
                stats.normal_total += 1;
                stats.normal_correct += correct;
            }
        }
        stats
    }

    pub fn gap(&self, cal: &Calibration) -> f64 {
        critical_gap(
            self.critical_correct,
            self.critical_total,
            self.normal_correct,
            self.normal_total,
            cal.critical_min_sample,
        )
    }
}
