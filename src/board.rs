//! Thin adapter over `shakmaty` covering the handful of rules queries the
//! analysis pipeline needs: FEN in and out, move parsing in either
//! notation, legality, and the final result.

use shakmaty::{
    CastlingMode, Chess, Color, EnPassantMode, Move, Position, Setup, fen::Fen, san::San,
    uci::UciMove,
};

use crate::{
    error::{Error, Result},
    types::Side,
};

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// A move that has been checked for legality against a specific board.
#[derive(Debug, Clone)]
pub struct LegalMove {
    inner: Move,
    pub uci: String,
    pub san: String,
}

#[derive(Debug, Clone)]
pub struct Board {
    position: Chess,
}

impl Default for Board {
    fn default() -> Self {
        Self {
            position: Chess::default(),
        }
    }
}

impl Board {
    pub fn from_fen(fen: &str) -> Result<Self> {
        let parsed: Fen = fen.trim().parse().map_err(|e: shakmaty::fen::ParseFenError| {
            Error::InvalidFen {
                fen: fen.to_string(),
                reason: e.to_string(),
            }
        })?;
        let setup: Setup = parsed.into_setup();
        let position: Chess = setup
            .position(CastlingMode::Standard)
            .map_err(|e| Error::InvalidPosition(e.to_string()))?;
        Ok(Self { position })
    }

    /// Start from `fen` when given, else from the standard position.
    pub fn from_optional_fen(fen: Option<&str>) -> Result<Self> {
        match fen {
            Some(fen) => Self::from_fen(fen),
            None => Ok(Self::default()),
        }
    }

    pub fn fen(&self) -> String {
        Fen::from_position(&self.position, EnPassantMode::Legal).to_string()
    }

    pub fn is_standard_start(&self) -> bool {
        self.fen() == STARTING_FEN
    }

    pub fn turn(&self) -> Side {
        match self.position.turn() {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }

    pub fn fullmove_number(&self) -> u32 {
        self.position.fullmoves().get()
    }

    /// Parse a move given in coordinate notation only.
    pub fn parse_uci(&self, text: &str) -> Result<LegalMove> {
        let uci: UciMove = text
            .trim()
            .parse()
            .map_err(|_| Error::InvalidMove(text.to_string()))?;
        let mv = uci.to_move(&self.position).map_err(|_| Error::IllegalMove {
            mv: text.to_string(),
            fen: self.fen(),
        })?;
        Ok(self.describe(mv))
    }

    /// Parse a move in coordinate notation, falling back to SAN.
    pub fn parse_move(&self, text: &str) -> Result<LegalMove> {
        let trimmed = text.trim();
        if trimmed.parse::<UciMove>().is_ok() {
            return self.parse_uci(trimmed);
        }
        let bare = trimmed.trim_end_matches(['+', '#', '!', '?']);
        let san: San = bare
            .parse()
            .map_err(|_| Error::InvalidMove(text.to_string()))?;
        let mv = san.to_move(&self.position).map_err(|_| Error::IllegalMove {
            mv: text.to_string(),
            fen: self.fen(),
        })?;
        Ok(self.describe(mv))
    }

    pub fn play(&mut self, mv: &LegalMove) {
        self.position.play_unchecked(mv.inner);
    }

    pub fn is_game_over(&self) -> bool {
        self.position.is_game_over()
    }

    /// PGN result token once the game has ended on the board.
    pub fn result(&self) -> Option<&'static str> {
        if self.position.is_checkmate() {
            return Some(match self.turn() {
                Side::White => "0-1",
                Side::Black => "1-0",
            });
        }
        if self.position.is_game_over() {
            return Some("1/2-1/2");
        }
        None
    }

    fn describe(&self, mv: Move) -> LegalMove {
        let uci = mv.to_uci(CastlingMode::Standard).to_string();
        let mut san = San::from_move(&self.position, mv).to_string();
        let mut after = self.position.clone();
        after.play_unchecked(mv);
        if after.is_checkmate() {
            san.push('#');
        } else if after.is_check() {
            san.push('+');
        }
        LegalMove {
            inner: mv,
            uci,
            san,
        }
    }
}
