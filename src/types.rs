use serde::{Deserialize, Serialize};

/// Centipawn value used when a forced mate has to be treated as a number.
pub const MATE_SCORE_CP: i32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }
}

/// Engine score from the side to move's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    Cp(i32),
    /// Mate in N moves; zero or negative when the side to move is
    /// getting mated (zero: already mated).
    Mate(i32),
}

impl Score {
    /// Collapse to a plain number, mapping mates to +/-[`MATE_SCORE_CP`].
    pub fn to_centipawns(self) -> i32 {
        match self {
            Score::Cp(cp) => cp,
            Score::Mate(n) if n > 0 => MATE_SCORE_CP,
            Score::Mate(_) => -MATE_SCORE_CP,
        }
    }
}

/// One ranked line of a MultiPV search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvLine {
    /// 1-based rank assigned by the engine.
    pub rank: u32,
    pub depth: Option<u32>,
    pub score: Option<Score>,
    pub pv: Vec<String>,
}

impl PvLine {
    pub fn score_cp(&self) -> Option<i32> {
        match self.score {
            Some(Score::Cp(cp)) => Some(cp),
            _ => None,
        }
    }

    pub fn first_move(&self) -> Option<&str> {
        self.pv.first().map(String::as_str)
    }
}

/// Result of a single engine query. Built once by the runtime and never
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvaluation {
    pub fen: String,
    pub depth: Option<u32>,
    pub score: Option<Score>,
    pub best_move: Option<String>,
    pub pv: Vec<String>,
    /// Every line the engine printed during the search, in order.
    pub raw_info: Vec<String>,
    /// Ranked lines when more than one was requested, best first.
    pub lines: Vec<PvLine>,
}

impl EngineEvaluation {
    /// An evaluation of `fen` carrying no search output yet.
    pub fn empty(fen: impl Into<String>) -> Self {
        Self {
            fen: fen.into(),
            depth: None,
            score: None,
            best_move: None,
            pv: Vec::new(),
            raw_info: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn score_cp(&self) -> Option<i32> {
        match self.score {
            Some(Score::Cp(cp)) => Some(cp),
            _ => None,
        }
    }

    pub fn mate_in(&self) -> Option<i32> {
        match self.score {
            Some(Score::Mate(n)) => Some(n),
            _ => None,
        }
    }

    /// The engine's preferred move, taken from `bestmove` or else the PV head.
    pub fn preferred_move(&self) -> Option<&str> {
        self.best_move
            .as_deref()
            .or_else(|| self.pv.first().map(String::as_str))
    }
}

/// One analysed ply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// 1-based index within the analysed sequence.
    pub ply: u32,
    pub move_number: u32,
    pub side: Side,
    pub move_san: String,
    pub move_uci: String,
    pub fen_before: String,
    /// Unconstrained search from `fen_before`. Absent for engine moves
    /// played in a session, which are their own reference.
    pub best: Option<EngineEvaluation>,
    /// Search constrained to the move actually played.
    pub played: EngineEvaluation,
    /// `max(0, best - played)` in centipawns; `None` across mate scores.
    pub centipawn_loss: Option<i32>,
    /// Seconds spent on the move, when the game carried clock data.
    #[serde(default)]
    pub move_time: Option<f64>,
}

/// Loss of the played move against the best one. Undefined when either
/// side of the comparison is a mate score or missing.
pub fn centipawn_loss(best: &EngineEvaluation, played: &EngineEvaluation) -> Option<i32> {
    let best = best.score_cp()?;
    let played = played.score_cp()?;
    Some((best - played).max(0))
}
