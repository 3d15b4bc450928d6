//! Move-quality analysis.
//!
//! [`Analyzer`] grades moves with two searches per position: one
//! unconstrained search for the best move, one constrained to the move
//! that was played. The difference is the centipawn loss. Games are fully
//! validated before the first engine query so an illegal move never costs
//! engine time.

mod critical;
mod summary;

pub use critical::{CriticalStats, is_critical};
pub use summary::{
    GameSummary, SideSummary, in_top_two, move_accuracy, scramble_toggle_score, summarize,
    summarize_side, time_cv,
};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    board::{Board, LegalMove},
    config::{AnalysisConfig, Calibration},
    engine::{Engine, SearchRequest},
    ensemble::{self, DetectionSignals, EnsembleResult},
    error::{Error, Result},
    pgn::PgnGame,
    types::{MoveRecord, Side, centipawn_loss},
};

/// One ply that has been checked against the board, ready for grading.
struct PendingPly {
    ply: u32,
    move_number: u32,
    side: Side,
    fen_before: String,
    mv: LegalMove,
}

pub struct Analyzer<E> {
    engine: Arc<E>,
    config: AnalysisConfig,
}

impl<E> Clone for Analyzer<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
        }
    }
}

impl<E: Engine> Analyzer<E> {
    pub fn new(engine: Arc<E>, config: AnalysisConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Grade `move_uci` played from `fen_before` with the configured limits.
    pub fn analyze_move(&self, fen_before: &str, move_uci: &str) -> Result<MoveRecord> {
        let (depth, movetime) = self.config.limits();
        self.analyze_move_with(fen_before, move_uci, depth, movetime)
    }

    pub fn analyze_move_with(
        &self,
        fen_before: &str,
        move_uci: &str,
        depth: Option<u32>,
        movetime: Option<u64>,
    ) -> Result<MoveRecord> {
        let board = Board::from_fen(fen_before)?;
        let mv = board.parse_uci(move_uci)?;
        let pending = PendingPly {
            ply: 1,
            move_number: board.fullmove_number(),
            side: board.turn(),
            fen_before: board.fen(),
            mv,
        };
        self.grade(pending, depth, movetime)
    }

    /// Grade every ply of a game. Moves may be given in coordinate or
    /// algebraic notation.
    pub fn analyze_game<S: AsRef<str>>(
        &self,
        moves: &[S],
        starting_fen: Option<&str>,
    ) -> Result<Vec<MoveRecord>> {
        let plies = replay(moves, starting_fen)?;
        let (depth, movetime) = self.config.limits();
        tracing::debug!(plies = plies.len(), ?depth, ?movetime, "analysing game");
        plies
            .into_iter()
            .map(|ply| self.grade(ply, depth, movetime))
            .collect()
    }

    /// Analyse a game and derive per-side statistics, signals and scores.
    /// The first `book_plies` plies count as opening theory.
    pub fn review_game<S: AsRef<str>>(
        &self,
        moves: &[S],
        starting_fen: Option<&str>,
        book_plies: u32,
    ) -> Result<GameReview> {
        self.review_timed_game(moves, starting_fen, &[], book_plies)
    }

    /// Like [`Analyzer::review_game`], with the seconds spent on each ply
    /// where known. `move_times` is aligned with `moves`.
    pub fn review_timed_game<S: AsRef<str>>(
        &self,
        moves: &[S],
        starting_fen: Option<&str>,
        move_times: &[Option<f64>],
        book_plies: u32,
    ) -> Result<GameReview> {
        let mut records = self.analyze_game(moves, starting_fen)?;
        for (record, time) in records.iter_mut().zip(move_times) {
            record.move_time = *time;
        }
        Ok(GameReview::from_records(records, book_plies, &self.config.calibration))
    }

    /// Review the main line of a PGN game, taking move times from its
    /// clock annotations and the start position from its `FEN` header.
    pub fn review_pgn(&self, pgn: &str, book_plies: u32) -> Result<GameReview> {
        let game = PgnGame::parse(pgn)?;
        self.review_timed_game(&game.moves, game.starting_fen(), &game.move_times(), book_plies)
    }

    fn grade(&self, pending: PendingPly, depth: Option<u32>, movetime: Option<u64>) -> Result<MoveRecord> {
        let best_request = SearchRequest::new(pending.fen_before.clone())
            .depth(depth)
            .movetime(movetime)
            .multipv(self.config.reference_multipv);
        let best = self.engine.evaluate(&best_request)?;
        if best.preferred_move().is_none() {
            return Err(Error::MissingPrincipalVariation(pending.fen_before));
        }

        let played_request = SearchRequest::new(pending.fen_before.clone())
            .depth(depth)
            .movetime(movetime)
            .search_moves([pending.mv.uci.clone()]);
        let played = self.engine.evaluate(&played_request)?;

        let loss = centipawn_loss(&best, &played);
        tracing::debug!(
            ply = pending.ply,
            mv = %pending.mv.uci,
            best = ?best.score,
            played = ?played.score,
            loss = ?loss,
            "graded move"
        );
        Ok(MoveRecord {
            ply: pending.ply,
            move_number: pending.move_number,
            side: pending.side,
            move_san: pending.mv.san,
            move_uci: pending.mv.uci,
            fen_before: pending.fen_before,
            best: Some(best),
            played,
            centipawn_loss: loss,
            move_time: None,
        })
    }
}

/// Replay the whole game, failing on the first bad move.
fn replay<S: AsRef<str>>(moves: &[S], starting_fen: Option<&str>) -> Result<Vec<PendingPly>> {
    if moves.is_empty() {
        return Err(Error::EmptyGame);
    }
    let mut board = Board::from_optional_fen(starting_fen)?;
    let mut plies = Vec::with_capacity(moves.len());
    for (i, text) in moves.iter().enumerate() {
        let mv = board.parse_move(text.as_ref())?;
        plies.push(PendingPly {
            ply: i as u32 + 1,
            move_number: board.fullmove_number(),
            side: board.turn(),
            fen_before: board.fen(),
            mv: mv.clone(),
        });
        board.play(&mv);
    }
    Ok(plies)
}

/// Everything derived for one side of an analysed game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideReview {
    pub summary: SideSummary,
    pub critical: CriticalStats,
    pub signals: DetectionSignals,
    pub ensemble: EnsembleResult,
}

impl SideReview {
    /// Merge values from external signal providers and rescore.
    pub fn update_signals(&mut self, cal: &Calibration, update: impl FnOnce(&mut DetectionSignals)) {
        update(&mut self.signals);
        self.ensemble = ensemble::score_with(&self.signals, cal);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameReview {
    pub records: Vec<MoveRecord>,
    pub white: SideReview,
    pub black: SideReview,
}

impl GameReview {
    pub fn from_records(records: Vec<MoveRecord>, book_plies: u32, cal: &Calibration) -> Self {
        let white = review_side(&records, Side::White, book_plies, cal);
        let black = review_side(&records, Side::Black, book_plies, cal);
        Self {
            records,
            white,
            black,
        }
    }

    pub fn side(&self, side: Side) -> &SideReview {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideReview {
        match side {
            Side::White => &mut self.white,
            Side::Black => &mut self.black,
        }
    }
}

fn review_side(records: &[MoveRecord], side: Side, book_plies: u32, cal: &Calibration) -> SideReview {
    let summary = summarize_side(records, side, cal);
    let critical = CriticalStats::collect(records, side, cal);
    let signals = side_signals(records, side, book_plies, &summary, &critical, cal);
    let ensemble = ensemble::score_with(&signals, cal);
    SideReview {
        summary,
        critical,
        signals,
        ensemble,
    }
}

/// The engine-derived channels for one side of one game. Channels fed by
/// external providers keep their neutral defaults.
pub fn side_signals(
    records: &[MoveRecord],
    side: Side,
    book_plies: u32,
    summary: &SideSummary,
    critical: &CriticalStats,
    cal: &Calibration,
) -> DetectionSignals {
    let mine: Vec<&MoveRecord> = records.iter().filter(|r| r.side == side).collect();
    let in_book = mine.iter().filter(|r| r.ply <= book_plies).count() as u32;
    let after_book: Vec<i32> = mine
        .iter()
        .filter(|r| r.ply > book_plies)
        .filter_map(|r| r.centipawn_loss)
        .collect();
    let adjusted = if after_book.is_empty() {
        0.0
    } else {
        after_book.iter().filter(|&&l| l <= cal.agreement_cp).count() as f64 / after_book.len() as f64
    };
    let losses: Vec<Option<i32>> = mine.iter().map(|r| r.centipawn_loss).collect();
    let times: Vec<f64> = mine.iter().filter_map(|r| r.move_time).collect();
    let high_accuracy = summary.graded_moves > 0 && summary.perfect_rate > 0.95;

    DetectionSignals {
        engine_agreement: summary.agreement_rate,
        adjusted_engine_agreement: adjusted,
        moves_in_book: in_book,
        scramble_toggle_score: scramble_toggle_score(&losses, cal),
        critical_vs_normal_gap: critical.gap(cal),
        critical_moves_correct: critical.critical_correct,
        critical_moves_total: critical.critical_total,
        normal_moves_correct: critical.normal_correct,
        normal_moves_total: critical.normal_total,
        games_analyzed: 1,
        high_accuracy_games_count: u32::from(high_accuracy),
        time_cv: time_cv(&times),
        ..DetectionSignals::default()
    }
}
