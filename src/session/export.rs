//! Portable export of a finished session: PGN plus per-move labels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Actor, MoveLabel, SessionMove};
use crate::{
    board::{Board, STARTING_FEN},
    error::Result,
    types::Side,
};

pub(crate) const NULL_MOVE_UCI: &str = "0000";
const NULL_MOVE_SAN: &str = "--";
const LINE_WIDTH: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLabel {
    pub ply: u32,
    pub move_uci: String,
    pub move_san: String,
    pub actor: Actor,
    pub label: MoveLabel,
    pub confidence: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub session_id: Uuid,
    pub pgn: String,
    pub labels: Vec<TrainingLabel>,
}

pub(crate) fn training_labels(moves: &[SessionMove]) -> Vec<TrainingLabel> {
    moves
        .iter()
        .map(|m| TrainingLabel {
            ply: m.record.ply,
            move_uci: m.record.move_uci.clone(),
            move_san: m.record.move_san.clone(),
            actor: m.actor,
            label: m.label,
            confidence: match m.actor {
                Actor::Human => 0.85,
                Actor::Engine => 1.0,
            },
            notes: m
                .record
                .centipawn_loss
                .map(|loss| format!("centipawn_loss={loss}")),
        })
        .collect()
}

/// Movetext rebuilt from the coordinate history, so the export never
/// depends on stored SAN strings.
pub(crate) fn movetext(starting_fen: &str, history: &[String]) -> Result<Vec<String>> {
    let mut board = Board::from_fen(starting_fen)?;
    let mut tokens = Vec::with_capacity(history.len() * 3 / 2 + 1);
    for (i, uci) in history.iter().enumerate() {
        let number = board.fullmove_number();
        match board.turn() {
            Side::White => tokens.push(format!("{number}.")),
            Side::Black if i == 0 => tokens.push(format!("{number}...")),
            Side::Black => {}
        }
        if uci == NULL_MOVE_UCI {
            tokens.push(NULL_MOVE_SAN.to_string());
            break;
        }
        let mv = board.parse_uci(uci)?;
        tokens.push(mv.san.clone());
        board.play(&mv);
    }
    Ok(tokens)
}

pub(crate) fn render_pgn(headers: &[(&str, String)], tokens: &[String], result: &str) -> String {
    let mut pgn = String::new();
    for (name, value) in headers {
        let value = value.replace('\\', "\\\\").replace('"', "\\\"");
        pgn.push_str(&format!("[{name} \"{value}\"]\n"));
    }
    pgn.push('\n');

    let mut line = String::new();
    for token in tokens.iter().map(String::as_str).chain(std::iter::once(result)) {
        if !line.is_empty() && line.len() + 1 + token.len() > LINE_WIDTH {
            pgn.push_str(&line);
            pgn.push('\n');
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(token);
    }
    pgn.push_str(&line);
    pgn.push('\n');
    pgn
}

pub(crate) fn needs_setup(starting_fen: &str) -> bool {
    starting_fen.trim() != STARTING_FEN
}
