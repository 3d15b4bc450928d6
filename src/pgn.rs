//! Reading games from PGN text.
//!
//! Only the main line is kept: variations, NAGs and move numbers are
//! skipped, and the one comment annotation that matters for fair-play
//! review, `[%clk h:mm:ss]`, is collected per ply. Moves stay as written;
//! legality is checked when the game is replayed for analysis.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest time a single move is credited with, in seconds.
const MAX_MOVE_SECONDS: f64 = 600.0;

const RESULTS: [&str; 4] = ["1-0", "0-1", "1/2-1/2", "*"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PgnGame {
    pub headers: Vec<(String, String)>,
    /// Main-line moves in the notation the PGN used.
    pub moves: Vec<String>,
    /// Clock reading after each ply, in seconds, where annotated.
    pub clocks: Vec<Option<f64>>,
    pub result: Option<String>,
}

impl PgnGame {
    /// Parse the first game in `text`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut game = PgnGame::default();
        let mut movetext = String::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if movetext.trim().is_empty() && trimmed.starts_with('[') {
                game.headers.push(parse_header(trimmed)?);
            } else {
                movetext.push_str(line);
                movetext.push('\n');
            }
        }
        game.read_movetext(&movetext)?;
        if game.headers.is_empty() && game.moves.is_empty() {
            return Err(Error::InvalidPgn("no game found".into()));
        }
        Ok(game)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn starting_fen(&self) -> Option<&str> {
        self.header("FEN")
    }

    /// Seconds spent on each ply, aligned with `moves`.
    ///
    /// A ply's time is its side's previous clock reading (the base time
    /// for a side's first move) plus the increment, minus the reading after
    /// the move, clamped to `0..=600`. `None` where either reading is
    /// missing.
    pub fn move_times(&self) -> Vec<Option<f64>> {
        let (base, increment) = self.time_control().unzip();
        let increment = increment.unwrap_or(0.0);
        (0..self.clocks.len())
            .map(|i| {
                let before = match i.checked_sub(2) {
                    Some(j) => self.clocks[j],
                    None => base,
                }?;
                let after = self.clocks[i]?;
                Some((before + increment - after).clamp(0.0, MAX_MOVE_SECONDS))
            })
            .collect()
    }

    /// Base time and increment in seconds from a `TimeControl` such as
    /// `180+2`.
    fn time_control(&self) -> Option<(f64, f64)> {
        let tc = self.header("TimeControl")?;
        let (base, increment) = tc.split_once('+').unwrap_or((tc, "0"));
        Some((base.parse().ok()?, increment.parse().ok()?))
    }

    fn read_movetext(&mut self, text: &str) -> Result<()> {
        let mut rest = text;
        let mut variation_depth = 0usize;
        while let Some(c) = rest.chars().next() {
            match c {
                '{' => {
                    let end = rest
                        .find('}')
                        .ok_or_else(|| Error::InvalidPgn("unterminated comment".into()))?;
                    if variation_depth == 0 {
                        self.annotate(&rest[1..end]);
                    }
                    rest = &rest[end + 1..];
                }
                ';' => {
                    rest = rest.find('\n').map_or("", |end| &rest[end..]);
                }
                '(' => {
                    variation_depth += 1;
                    rest = &rest[1..];
                }
                ')' => {
                    variation_depth = variation_depth
                        .checked_sub(1)
                        .ok_or_else(|| Error::InvalidPgn("unbalanced ')'".into()))?;
                    rest = &rest[1..];
                }
                c if c.is_whitespace() => rest = &rest[c.len_utf8()..],
                _ => {
                    let end = rest
                        .find(|c: char| c.is_whitespace() || "{}();".contains(c))
                        .unwrap_or(rest.len());
                    if variation_depth == 0 {
                        self.token(&rest[..end]);
                    }
                    rest = &rest[end..];
                }
            }
        }
        if variation_depth > 0 {
            return Err(Error::InvalidPgn("unterminated variation".into()));
        }
        Ok(())
    }

    fn token(&mut self, token: &str) {
        if RESULTS.contains(&token) {
            self.result = Some(token.to_string());
            return;
        }
        if token.starts_with('$') {
            return;
        }
        // "12." and "12..." alone, or glued to the move as in "12.e4"
        let after_number = token.trim_start_matches(|c: char| c.is_ascii_digit());
        let mv = if after_number.len() < token.len() && after_number.starts_with('.') {
            after_number.trim_start_matches('.')
        } else {
            token
        };
        if !mv.is_empty() {
            self.moves.push(mv.to_string());
            self.clocks.push(None);
        }
    }

    fn annotate(&mut self, comment: &str) {
        if let (Some(slot), Some(clock)) = (self.clocks.last_mut(), parse_clock(comment)) {
            *slot = Some(clock);
        }
    }
}

fn parse_header(line: &str) -> Result<(String, String)> {
    let malformed = || Error::InvalidPgn(format!("bad header line {line}"));
    let inner = line
        .strip_prefix('[')
        .and_then(|l| l.strip_suffix(']'))
        .ok_or_else(malformed)?;
    let (key, value) = inner.trim().split_once(char::is_whitespace).ok_or_else(malformed)?;
    let value = value
        .trim()
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .ok_or_else(malformed)?;
    Ok((key.to_string(), value.replace("\\\"", "\"")))
}

/// Seconds on the clock from a `[%clk h:mm:ss]` annotation.
fn parse_clock(comment: &str) -> Option<f64> {
    let start = comment.find("[%clk")? + "[%clk".len();
    let rest = &comment[start..];
    let value = rest[..rest.find(']')?].trim();
    value
        .split(':')
        .try_fold(0.0, |acc, part| Some(acc * 60.0 + part.parse::<f64>().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLITZ: &str = r#"[Event "Rated Blitz game"]
[White "alice"]
[Black "bob"]
[TimeControl "180+2"]
[Result "1-0"]

1. e4 { [%clk 0:03:00] } 1... e5 { [%clk 0:02:58] } 2. Nf3 $1 { [%clk 0:02:55] }
(2. Bc4 Nc6 { [%clk 0:01:00] }) 2... Nc6 { [%clk 0:02:50] } 3. Bb5 { [%clk 0:02:54] } 1-0
"#;

    #[test]
    fn reads_headers_main_line_and_clocks() {
        let game = PgnGame::parse(BLITZ).unwrap();
        assert_eq!(game.header("White"), Some("alice"));
        assert_eq!(game.starting_fen(), None);
        assert_eq!(game.moves, vec!["e4", "e5", "Nf3", "Nc6", "Bb5"]);
        assert_eq!(
            game.clocks,
            vec![Some(180.0), Some(178.0), Some(175.0), Some(170.0), Some(174.0)]
        );
        assert_eq!(game.result.as_deref(), Some("1-0"));
    }

    #[test]
    fn move_times_use_each_sides_own_clock_and_the_increment() {
        let game = PgnGame::parse(BLITZ).unwrap();
        assert_eq!(
            game.move_times(),
            vec![Some(2.0), Some(4.0), Some(7.0), Some(10.0), Some(3.0)]
        );
    }

    #[test]
    fn tolerates_compact_numbers_line_comments_and_missing_clocks() {
        let game = PgnGame::parse("1.d4 d5 ; queen's gambit next\n2.c4 {no clock} 2...e6 *").unwrap();
        assert_eq!(game.moves, vec!["d4", "d5", "c4", "e6"]);
        assert_eq!(game.result.as_deref(), Some("*"));
        assert_eq!(game.move_times(), vec![None; 4]);
    }

    #[test]
    fn clock_annotations() {
        assert_eq!(parse_clock("[%clk 1:02:03.5]"), Some(3723.5));
        assert_eq!(parse_clock("[%eval 0.3] [%clk 0:00:09]"), Some(9.0));
        assert_eq!(parse_clock("[%emt 0:00:05]"), None);
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(matches!(PgnGame::parse("1. e4 { open"), Err(Error::InvalidPgn(_))));
        assert!(matches!(PgnGame::parse("1. e4 (1. d4"), Err(Error::InvalidPgn(_))));
        assert!(matches!(PgnGame::parse("[White alice]\n\n1. e4"), Err(Error::InvalidPgn(_))));
        assert!(matches!(PgnGame::parse("  \n"), Err(Error::InvalidPgn(_))));
    }
}
