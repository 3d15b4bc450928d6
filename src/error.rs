//! Error types for the analysis engine.
//!
//! Errors fall into three families that callers are expected to treat
//! differently: caller errors (bad input, wrong turn, closed session)
//! which are never retried, engine errors (the subprocess misbehaved)
//! which an operator may resolve by restarting the runtime, and data
//! errors (an ingested game is unusable) which are reported before any
//! engine time is spent. [`Error::kind`] exposes that grouping.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Failures of the engine subprocess or its protocol.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The binary could not be located or spawned, or the UCI handshake
    /// did not complete within the startup timeout.
    #[error("engine startup failed: {0}")]
    Startup(String),

    /// The engine did not answer a command within the configured timeout.
    #[error("engine did not respond within {0:?}")]
    Timeout(Duration),

    /// The process exited, or a pipe broke while reading or writing.
    #[error("engine process failure: {0}")]
    Process(String),

    /// The engine answered, but the answer cannot be used.
    #[error("engine protocol violation: {0}")]
    Protocol(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Caller,
    Engine,
    Data,
}

#[derive(Error, Debug)]
pub enum Error {
    /// A FEN string could not be parsed.
    #[error("invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },

    /// A FEN parsed but describes an impossible position.
    #[error("invalid chess position: {0}")]
    InvalidPosition(String),

    /// A move string is neither valid coordinate nor algebraic notation.
    #[error("cannot parse move '{0}'")]
    InvalidMove(String),

    /// The move is well formed but not legal in the given position.
    #[error("illegal move {mv} in position {fen}")]
    IllegalMove { mv: String, fen: String },

    /// A session move was submitted while the engine is to move.
    #[error("it is not the player's turn in session {0}")]
    OutOfTurn(Uuid),

    /// A session move was submitted after the game ended.
    #[error("the game in session {0} is already over")]
    GameOver(Uuid),

    /// A mutating operation targeted a completed session.
    #[error("session {0} is closed")]
    SessionClosed(Uuid),

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    /// PGN text could not be split into headers and moves.
    #[error("malformed PGN: {0}")]
    InvalidPgn(String),

    /// A game with no moves was submitted for analysis.
    #[error("game contains no moves")]
    EmptyGame,

    /// The engine returned no principal variation where one was required.
    #[error("engine returned no principal variation for {0}")]
    MissingPrincipalVariation(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Engine(_) => ErrorKind::Engine,
            Error::EmptyGame | Error::InvalidPgn(_) | Error::MissingPrincipalVariation(_) => {
                ErrorKind::Data
            }
            _ => ErrorKind::Caller,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
