//! Parsing of engine output.

use std::collections::BTreeMap;

use crate::types::{EngineEvaluation, PvLine, Score};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EngineLine {
    UciOk,
    ReadyOk,
    Info(InfoLine),
    /// `bestmove (none)` and `bestmove 0000` carry no move.
    BestMove(Option<String>),
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct InfoLine {
    pub depth: Option<u32>,
    pub multipv: Option<u32>,
    pub score: Option<Score>,
    pub pv: Vec<String>,
}

// info keys followed by exactly one value we don't use
const SINGLE_VALUE_KEYS: &[&str] = &[
    "seldepth", "time", "nodes", "nps", "hashfull", "tbhits", "sbhits", "cpuload", "currmove",
    "currmovenumber",
];

pub(crate) fn parse_line(line: &str) -> EngineLine {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("uciok") => EngineLine::UciOk,
        Some("readyok") => EngineLine::ReadyOk,
        Some("bestmove") => {
            let best = tokens
                .next()
                .filter(|mv| *mv != "(none)" && *mv != "0000")
                .map(str::to_string);
            EngineLine::BestMove(best)
        }
        Some("info") => EngineLine::Info(parse_info(tokens)),
        _ => EngineLine::Other,
    }
}

fn parse_info<'a>(mut tokens: impl Iterator<Item = &'a str>) -> InfoLine {
    let mut info = InfoLine::default();
    while let Some(token) = tokens.next() {
        match token {
            "depth" => info.depth = tokens.next().and_then(|v| v.parse().ok()),
            "multipv" => info.multipv = tokens.next().and_then(|v| v.parse().ok()),
            "score" => {
                let kind = tokens.next();
                let value = tokens.next().and_then(|v| v.parse::<i32>().ok());
                info.score = match (kind, value) {
                    (Some("cp"), Some(cp)) => Some(Score::Cp(cp)),
                    (Some("mate"), Some(n)) => Some(Score::Mate(n)),
                    _ => None,
                };
            }
            "pv" => {
                info.pv = tokens.by_ref().map(str::to_string).collect();
            }
            // free text, nothing after it is structured
            "string" | "refutation" | "currline" => break,
            key if SINGLE_VALUE_KEYS.contains(&key) => {
                tokens.next();
            }
            // lowerbound, upperbound and anything unknown
            _ => {}
        }
    }
    info
}

fn at_least_as_deep(candidate: Option<u32>, current: Option<u32>) -> bool {
    candidate.unwrap_or(0) >= current.unwrap_or(0)
}

/// Accumulates the output of one `go` until `bestmove`.
///
/// The authoritative score and PV come from the last scored line that
/// reached the highest depth among lines for the first (or only) PV.
/// Lines tagged with other `multipv` indexes are kept per rank under the
/// same rule.
#[derive(Debug)]
pub(crate) struct SearchCollector {
    fen: String,
    multipv: u32,
    raw: Vec<String>,
    main: Option<InfoLine>,
    ranked: BTreeMap<u32, InfoLine>,
}

impl SearchCollector {
    pub fn new(fen: impl Into<String>, multipv: u32) -> Self {
        Self {
            fen: fen.into(),
            multipv,
            raw: Vec::new(),
            main: None,
            ranked: BTreeMap::new(),
        }
    }

    /// Feed one line. Returns the best move once the search has ended.
    pub fn push(&mut self, line: &str) -> Option<Option<String>> {
        self.raw.push(line.to_string());
        match parse_line(line) {
            EngineLine::Info(info) if info.score.is_some() => {
                let rank = info.multipv.unwrap_or(1);
                if rank == 1
                    && self
                        .main
                        .as_ref()
                        .is_none_or(|cur| at_least_as_deep(info.depth, cur.depth))
                {
                    self.main = Some(info.clone());
                }
                let replace = self
                    .ranked
                    .get(&rank)
                    .is_none_or(|cur| at_least_as_deep(info.depth, cur.depth));
                if replace {
                    self.ranked.insert(rank, info);
                }
                None
            }
            EngineLine::BestMove(best) => Some(best),
            _ => None,
        }
    }

    pub fn finish(self, best_move: Option<String>) -> EngineEvaluation {
        let lines = if self.multipv > 1 {
            self.ranked
                .into_iter()
                .filter(|(rank, _)| *rank <= self.multipv)
                .map(|(rank, info)| PvLine {
                    rank,
                    depth: info.depth,
                    score: info.score,
                    pv: info.pv,
                })
                .collect()
        } else {
            Vec::new()
        };
        let (depth, score, pv) = match self.main {
            Some(info) => (info.depth, info.score, info.pv),
            None => (None, None, Vec::new()),
        };
        EngineEvaluation {
            fen: self.fen,
            depth,
            score,
            best_move,
            pv,
            raw_info: self.raw,
            lines,
        }
    }
}
