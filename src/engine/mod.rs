//! Engine access.
//!
//! [`Engine`] is the seam between the analysis code and whatever produces
//! evaluations. [`UciEngine`] drives a real UCI subprocess; tests plug in
//! a closure instead.

mod parse;
mod uci;

pub use uci::UciEngine;

use serde::{Deserialize, Serialize};

use crate::{error::EngineError, types::EngineEvaluation};

/// One position to search and the limits of the search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub fen: String,
    /// Moves played from `fen` before searching, in coordinate notation.
    pub moves: Vec<String>,
    pub depth: Option<u32>,
    /// Milliseconds.
    pub movetime: Option<u64>,
    /// Restrict the search to these moves (`go searchmoves`).
    pub search_moves: Vec<String>,
    pub multipv: u32,
}

impl SearchRequest {
    pub fn new(fen: impl Into<String>) -> Self {
        Self {
            fen: fen.into(),
            moves: Vec::new(),
            depth: None,
            movetime: None,
            search_moves: Vec::new(),
            multipv: 1,
        }
    }

    pub fn depth(mut self, depth: Option<u32>) -> Self {
        self.depth = depth;
        self
    }

    pub fn movetime(mut self, movetime: Option<u64>) -> Self {
        self.movetime = movetime;
        self
    }

    pub fn moves<I, S>(mut self, moves: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.moves = moves.into_iter().map(Into::into).collect();
        self
    }

    pub fn search_moves<I, S>(mut self, moves: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_moves = moves.into_iter().map(Into::into).collect();
        self
    }

    pub fn multipv(mut self, lines: u32) -> Self {
        self.multipv = lines.max(1);
        self
    }

    /// True when the search is constrained to a set of moves.
    pub fn is_constrained(&self) -> bool {
        !self.search_moves.is_empty()
    }
}

/// Anything that can evaluate a position.
///
/// Implementations must be safe to share between threads; whether they
/// search concurrently or one at a time is up to them.
pub trait Engine: Send + Sync {
    fn evaluate(&self, request: &SearchRequest) -> Result<EngineEvaluation, EngineError>;
}

impl<F> Engine for F
where
    F: Fn(&SearchRequest) -> Result<EngineEvaluation, EngineError> + Send + Sync,
{
    fn evaluate(&self, request: &SearchRequest) -> Result<EngineEvaluation, EngineError> {
        self(request)
    }
}
