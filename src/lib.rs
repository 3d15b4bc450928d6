//! Engine-backed fair-play analysis for chess games.
//!
//! The crate drives a UCI engine subprocess to measure the quality of
//! every move in a game, fuses the resulting statistics with externally
//! computed detection signals into a single 0-100 suspicion score, and
//! runs interactive human-versus-engine practice sessions that produce
//! labelled training data.
//!
//! The pieces, leaves first:
//!
//! - [`UciEngine`] owns one engine process and evaluates one position at a
//!   time. Anything implementing [`Engine`] can stand in for it.
//! - [`Analyzer`] grades moves by centipawn loss and reviews whole games.
//! - [`ensemble::score`] turns [`ensemble::DetectionSignals`] into an
//!   [`ensemble::EnsembleResult`] with a risk tier and confidence band.
//! - [`SessionManager`] runs practice games with strict move ordering.
//! - [`AnalysisPool`] runs game reviews in the background, from move
//!   lists or PGN text ([`PgnGame`]) with clock annotations.
//!
//! All operations block; callers that live on an event loop should run
//! them on a worker thread.
//!
//! The library re-exports `shakmaty`, which provides the chess rules.

mod analysis;
mod board;
mod config;
mod engine;
pub mod ensemble;
mod error;
mod jobs;
mod pgn;
mod session;
mod types;

/// Engine access.
pub use engine::{Engine, SearchRequest, UciEngine};

/// Move analysis.
pub use analysis::{
    Analyzer, CriticalStats, GameReview, GameSummary, SideReview, SideSummary, in_top_two,
    is_critical, move_accuracy, scramble_toggle_score, side_signals, summarize, summarize_side,
    time_cv,
};

/// Practice sessions.
pub use session::{
    Actor, GameMode, MoveLabel, SessionExport, SessionManager, SessionMove, SessionState,
    SessionStatus, TrainingLabel,
};

/// Background analysis.
pub use jobs::{AnalysisJob, AnalysisPool, AnalysisRecord, AnalysisStatus, run_job, should_flag};

/// Game input.
pub use board::{Board, LegalMove, STARTING_FEN};
pub use pgn::PgnGame;

/// Settings.
pub use config::{
    AnalysisConfig, Calibration, EngineConfig, FALLBACK_DEPTH, JobConfig, SessionConfig, Settings,
};

/// Error types produced by library operations.
pub use error::{EngineError, Error, ErrorKind, Result};

/// Evaluation and move data shared by every component.
pub use types::{EngineEvaluation, MATE_SCORE_CP, MoveRecord, PvLine, Score, Side, centipawn_loss};

/// Re-export of `shakmaty` for callers that build positions themselves.
pub use shakmaty;
