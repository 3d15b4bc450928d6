//! Interactive human-versus-engine practice sessions.
//!
//! Every session moves through `pending -> running -> completed` and is
//! guarded by its own lock; a coarser registry lock is only held while
//! looking a session up or inserting it. A move is applied on a copy of
//! the board and committed together with the engine's reply, so a failed
//! call leaves the session exactly as it was. Sessions stay registered
//! after they finish until [`SessionManager::remove_session`] drops them.

mod export;

pub use export::{SessionExport, TrainingLabel};

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    analysis::Analyzer,
    board::{Board, LegalMove},
    config::SessionConfig,
    engine::{Engine, SearchRequest},
    error::{Error, Result},
    types::{MoveRecord, Side},
};

use export::NULL_MOVE_UCI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameMode {
    #[default]
    #[serde(rename = "clean")]
    Clean,
    #[serde(rename = "assisted_10")]
    Assisted10,
    #[serde(rename = "assisted_20")]
    Assisted20,
    #[serde(rename = "assisted_40")]
    Assisted40,
}

impl GameMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Clean => "clean",
            GameMode::Assisted10 => "assisted_10",
            GameMode::Assisted20 => "assisted_20",
            GameMode::Assisted40 => "assisted_40",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Human,
    Engine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveLabel {
    HumanClean,
    HumanInaccuracy,
    HumanMistake,
    HumanBlunder,
    /// A human move whose loss is undefined (mate scores).
    HumanMove,
    EngineMove,
}

impl MoveLabel {
    pub fn for_human(centipawn_loss: Option<i32>) -> Self {
        match centipawn_loss {
            None => MoveLabel::HumanMove,
            Some(l) if l <= 30 => MoveLabel::HumanClean,
            Some(l) if l <= 100 => MoveLabel::HumanInaccuracy,
            Some(l) if l <= 250 => MoveLabel::HumanMistake,
            Some(_) => MoveLabel::HumanBlunder,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMove {
    pub actor: Actor,
    pub label: MoveLabel,
    #[serde(flatten)]
    pub record: MoveRecord,
}

/// Point-in-time copy of a session. Nothing in it aliases live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: Uuid,
    pub player_id: String,
    pub mode: GameMode,
    pub status: SessionStatus,
    pub human_color: Side,
    pub starting_fen: String,
    pub fen: String,
    pub next_to_move: Side,
    pub moves: Vec<SessionMove>,
    /// Coordinate notation, one entry per element of `moves`.
    pub history: Vec<String>,
    pub outcome: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn is_over(&self) -> bool {
        self.outcome.is_some()
    }
}

struct Session {
    id: Uuid,
    player_id: String,
    mode: GameMode,
    status: SessionStatus,
    human_color: Side,
    starting_fen: String,
    board: Board,
    moves: Vec<SessionMove>,
    history: Vec<String>,
    outcome: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    export: Option<SessionExport>,
}

impl Session {
    fn snapshot(&self) -> SessionState {
        SessionState {
            id: self.id,
            player_id: self.player_id.clone(),
            mode: self.mode,
            status: self.status,
            human_color: self.human_color,
            starting_fen: self.starting_fen.clone(),
            fen: self.board.fen(),
            next_to_move: self.board.turn(),
            moves: self.moves.clone(),
            history: self.history.clone(),
            outcome: self.outcome.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }

    fn push(&mut self, mv: SessionMove) {
        self.history.push(mv.record.move_uci.clone());
        self.moves.push(mv);
    }
}

/// The engine's answer to a position: the graded move, and the move to
/// play unless the engine had nothing to offer.
struct EngineReply {
    recorded: SessionMove,
    play: Option<LegalMove>,
}

pub struct SessionManager<E> {
    analyzer: Analyzer<E>,
    config: SessionConfig,
    sessions: Mutex<HashMap<Uuid, Arc<Mutex<Session>>>>,
}

impl<E: Engine> SessionManager<E> {
    pub fn new(analyzer: Analyzer<E>, config: SessionConfig) -> Self {
        Self {
            analyzer,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn analyzer(&self) -> &Analyzer<E> {
        &self.analyzer
    }

    /// Create a session. If the engine moves first its opening move is
    /// played before this returns, so the caller always gets a state where
    /// the human is to move or the game is over.
    pub fn start_session(
        &self,
        player_id: &str,
        mode: GameMode,
        human_color: Side,
        starting_fen: Option<&str>,
    ) -> Result<SessionState> {
        let board = Board::from_optional_fen(starting_fen)?;
        let now = Utc::now();
        let mut session = Session {
            id: Uuid::new_v4(),
            player_id: player_id.to_string(),
            mode,
            status: SessionStatus::Pending,
            human_color,
            starting_fen: board.fen(),
            board,
            moves: Vec::new(),
            history: Vec::new(),
            outcome: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            export: None,
        };

        session.outcome = session.board.result().map(str::to_string);
        if session.outcome.is_none() && session.board.turn() != human_color {
            let mut board = session.board.clone();
            let reply = self.engine_reply(&board, 1)?;
            let outcome = play_reply(&mut board, reply.play.as_ref());
            session.push(reply.recorded);
            session.board = board;
            session.outcome = outcome;
        }
        session.status = SessionStatus::Running;

        let state = session.snapshot();
        self.sessions
            .lock()
            .insert(session.id, Arc::new(Mutex::new(session)));
        tracing::info!(
            session = %state.id,
            player = %state.player_id,
            mode = state.mode.as_str(),
            human = state.human_color.as_str(),
            "session started"
        );
        Ok(state)
    }

    pub fn get_state(&self, id: Uuid) -> Result<SessionState> {
        let session = self.lookup(id)?;
        let session = session.lock();
        Ok(session.snapshot())
    }

    /// Play the human's move and, unless the game ended, the engine's
    /// reply. Returns both graded moves and the new state.
    pub fn apply_player_move(
        &self,
        id: Uuid,
        player_move: &str,
    ) -> Result<(SessionMove, Option<SessionMove>, SessionState)> {
        let session = self.lookup(id)?;
        let mut session = session.lock();
        if session.status == SessionStatus::Completed {
            return Err(Error::SessionClosed(id));
        }
        if session.outcome.is_some() {
            return Err(Error::GameOver(id));
        }
        if session.board.turn() != session.human_color {
            return Err(Error::OutOfTurn(id));
        }

        let mut board = session.board.clone();
        let mv = board.parse_move(player_move)?;
        let ply = session.moves.len() as u32 + 1;
        let mut record = self.analyzer.analyze_move(&board.fen(), &mv.uci)?;
        record.ply = ply;
        let human = SessionMove {
            actor: Actor::Human,
            label: MoveLabel::for_human(record.centipawn_loss),
            record,
        };
        board.play(&mv);

        let mut outcome = board.result().map(str::to_string);
        let mut engine = None;
        if outcome.is_none() {
            let reply = self.engine_reply(&board, ply + 1)?;
            outcome = play_reply(&mut board, reply.play.as_ref());
            engine = Some(reply.recorded);
        }

        // commit
        session.push(human.clone());
        if let Some(reply) = &engine {
            session.push(reply.clone());
        }
        session.board = board;
        session.outcome = outcome;
        session.updated_at = Utc::now();
        if let Some(result) = &session.outcome {
            tracing::info!(session = %id, result = %result, "game over");
        }
        Ok((human, engine, session.snapshot()))
    }

    /// Complete the session and export it. Calling this again returns the
    /// same export.
    pub fn finish_session(&self, id: Uuid) -> Result<(SessionState, SessionExport)> {
        let session = self.lookup(id)?;
        let mut session = session.lock();
        if let Some(export) = &session.export {
            return Ok((session.snapshot(), export.clone()));
        }

        let export = self.build_export(&session)?;
        let now = Utc::now();
        session.status = SessionStatus::Completed;
        session.completed_at = Some(now);
        session.updated_at = now;
        session.export = Some(export.clone());
        tracing::info!(
            session = %id,
            plies = session.moves.len(),
            result = session.outcome.as_deref().unwrap_or("*"),
            "session finished"
        );
        Ok((session.snapshot(), export))
    }

    /// Finish the session if needed and drop it from the registry, handing
    /// back its final state and export. Finished sessions are otherwise
    /// kept so that `finish_session` stays repeatable.
    pub fn remove_session(&self, id: Uuid) -> Result<(SessionState, SessionExport)> {
        let finished = self.finish_session(id)?;
        self.sessions.lock().remove(&id);
        tracing::info!(session = %id, "session removed");
        Ok(finished)
    }

    fn lookup(&self, id: Uuid) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .lock()
            .get(&id)
            .cloned()
            .ok_or(Error::SessionNotFound(id))
    }

    fn engine_reply(&self, board: &Board, ply: u32) -> Result<EngineReply> {
        let fen = board.fen();
        let request = SearchRequest::new(fen.clone())
            .depth(self.config.reply_depth)
            .movetime(self.config.reply_movetime);
        let eval = self.analyzer.engine().evaluate(&request)?;

        let play = match eval.preferred_move().map(|uci| (uci, board.parse_uci(uci))) {
            Some((_, Ok(mv))) => Some(mv),
            Some((uci, Err(e))) => {
                tracing::warn!(
                    fen = %fen,
                    mv = uci,
                    error = %e,
                    "engine proposed an unplayable move, recording a null move"
                );
                None
            }
            None => {
                tracing::warn!(fen = %fen, "engine returned no move, recording a null move");
                None
            }
        };
        let (move_uci, move_san) = match &play {
            Some(mv) => (mv.uci.clone(), mv.san.clone()),
            None => (NULL_MOVE_UCI.to_string(), "--".to_string()),
        };
        let record = MoveRecord {
            ply,
            move_number: board.fullmove_number(),
            side: board.turn(),
            move_san,
            move_uci,
            fen_before: fen,
            best: None,
            played: eval,
            centipawn_loss: None,
            move_time: None,
        };
        Ok(EngineReply {
            recorded: SessionMove {
                actor: Actor::Engine,
                label: MoveLabel::EngineMove,
                record,
            },
            play,
        })
    }

    fn build_export(&self, session: &Session) -> Result<SessionExport> {
        let (white, black) = match session.human_color {
            Side::White => (session.player_id.clone(), self.config.engine_name.clone()),
            Side::Black => (self.config.engine_name.clone(), session.player_id.clone()),
        };
        let result = session.outcome.clone().unwrap_or_else(|| "*".to_string());
        let mut headers = vec![
            ("Event", self.config.event.clone()),
            ("Site", self.config.site.clone()),
            ("Date", session.created_at.format("%Y.%m.%d").to_string()),
            ("White", white),
            ("Black", black),
            ("Result", result.clone()),
        ];
        if export::needs_setup(&session.starting_fen) {
            headers.push(("SetUp", "1".to_string()));
            headers.push(("FEN", session.starting_fen.clone()));
        }
        let tokens = export::movetext(&session.starting_fen, &session.history)?;
        Ok(SessionExport {
            session_id: session.id,
            pgn: export::render_pgn(&headers, &tokens, &result),
            labels: export::training_labels(&session.moves),
        })
    }
}

/// Play the engine's move, or end the game when there is none. Returns
/// the outcome if the game is now over.
fn play_reply(board: &mut Board, mv: Option<&LegalMove>) -> Option<String> {
    match mv {
        Some(mv) => {
            board.play(mv);
            board.result().map(str::to_string)
        }
        None => Some(board.result().unwrap_or("*").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
    };

    use super::*;
    use crate::{
        config::AnalysisConfig,
        error::EngineError,
        types::{EngineEvaluation, Score},
    };

    type EngineFn =
        Box<dyn Fn(&SearchRequest) -> std::result::Result<EngineEvaluation, EngineError> + Send + Sync>;

    /// Scores everything 0 and always proposes `best`.
    fn fixed(best: &'static str) -> EngineFn {
        Box::new(move |req: &SearchRequest| {
            let mut eval = EngineEvaluation::empty(&req.fen);
            eval.score = Some(Score::Cp(0));
            eval.best_move = Some(best.to_string());
            Ok(eval)
        })
    }

    fn manager(engine: EngineFn) -> SessionManager<EngineFn> {
        let analyzer = Analyzer::new(Arc::new(engine), AnalysisConfig::default());
        SessionManager::new(analyzer, SessionConfig::default())
    }

    #[test]
    fn human_move_gets_an_engine_reply() {
        let m = manager(fixed("e7e5"));
        let state = m.start_session("p1", GameMode::Clean, Side::White, None).unwrap();
        assert_eq!(state.status, SessionStatus::Running);
        assert!(state.moves.is_empty());

        let (human, engine, state) = m.apply_player_move(state.id, "e2e4").unwrap();
        assert_eq!(human.label, MoveLabel::HumanClean);
        assert_eq!(human.record.centipawn_loss, Some(0));
        let engine = engine.unwrap();
        assert_eq!(engine.label, MoveLabel::EngineMove);
        assert_eq!(engine.record.centipawn_loss, None);
        assert_eq!(engine.record.ply, 2);
        assert_eq!(state.history, vec!["e2e4", "e7e5"]);
        assert_eq!(state.moves.len(), 2);
        assert_eq!(state.next_to_move, Side::White);
    }

    #[test]
    fn engine_opens_when_human_plays_black() {
        let m = manager(fixed("d2d4"));
        let state = m.start_session("p2", GameMode::Assisted20, Side::Black, None).unwrap();
        assert_eq!(state.history, vec!["d2d4"]);
        assert_eq!(state.next_to_move, Side::Black);
        assert_eq!(state.moves[0].actor, Actor::Engine);
    }

    #[test]
    fn labels_follow_loss_breakpoints() {
        assert_eq!(MoveLabel::for_human(Some(30)), MoveLabel::HumanClean);
        assert_eq!(MoveLabel::for_human(Some(31)), MoveLabel::HumanInaccuracy);
        assert_eq!(MoveLabel::for_human(Some(100)), MoveLabel::HumanInaccuracy);
        assert_eq!(MoveLabel::for_human(Some(250)), MoveLabel::HumanMistake);
        assert_eq!(MoveLabel::for_human(Some(251)), MoveLabel::HumanBlunder);
        assert_eq!(MoveLabel::for_human(None), MoveLabel::HumanMove);
    }

    #[test]
    fn failed_engine_reply_leaves_session_untouched() {
        let fail = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fail);
        let good = fixed("e7e5");
        let m = manager(Box::new(move |req: &SearchRequest| {
            // grading searches pass, the reply search fails
            if flag.load(Ordering::SeqCst) && req.search_moves.is_empty() && req.multipv == 1 {
                return Err(EngineError::Timeout(std::time::Duration::from_millis(5)));
            }
            good(req)
        }));
        let state = m.start_session("p3", GameMode::Clean, Side::White, None).unwrap();
        fail.store(true, Ordering::SeqCst);
        let err = m.apply_player_move(state.id, "e2e4").unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::Timeout(_))));
        assert_eq!(m.get_state(state.id).unwrap(), state);

        fail.store(false, Ordering::SeqCst);
        let (_, _, after) = m.apply_player_move(state.id, "e2e4").unwrap();
        assert_eq!(after.moves.len(), 2);
    }

    #[test]
    fn illegal_engine_move_becomes_a_null_move() {
        // "e2e4" is fine for grading White but illegal as Black's reply
        let m = manager(fixed("e2e4"));
        let state = m.start_session("p4", GameMode::Clean, Side::White, None).unwrap();
        let (human, engine, state) = m.apply_player_move(state.id, "d2d4").unwrap();
        assert_eq!(human.record.move_uci, "d2d4");
        let engine = engine.unwrap();
        assert_eq!(engine.record.move_uci, "0000");
        assert_eq!(engine.label, MoveLabel::EngineMove);
        assert_eq!(state.history, vec!["d2d4", "0000"]);
        assert_eq!(state.outcome.as_deref(), Some("*"));
        assert!(matches!(
            m.apply_player_move(state.id, "e2e4"),
            Err(Error::GameOver(_))
        ));
    }

    #[test]
    fn caller_errors_are_rejected() {
        let m = manager(fixed("e7e5"));
        let state = m.start_session("p5", GameMode::Clean, Side::White, None).unwrap();
        assert!(matches!(
            m.apply_player_move(state.id, "e2e5"),
            Err(Error::IllegalMove { .. })
        ));
        assert!(matches!(
            m.apply_player_move(Uuid::new_v4(), "e2e4"),
            Err(Error::SessionNotFound(_))
        ));
        m.finish_session(state.id).unwrap();
        assert!(matches!(
            m.apply_player_move(state.id, "e2e4"),
            Err(Error::SessionClosed(_))
        ));
    }

    #[test]
    fn no_engine_move_records_a_null_move_and_ends_the_game() {
        let m = manager(Box::new(|req: &SearchRequest| {
            let mut eval = EngineEvaluation::empty(&req.fen);
            eval.score = Some(Score::Cp(0));
            // reference searches still name a move so the human can be graded
            if req.multipv > 1 || !req.search_moves.is_empty() {
                eval.best_move = Some("e2e4".into());
            }
            Ok(eval)
        }));
        let state = m.start_session("p6", GameMode::Clean, Side::White, None).unwrap();
        let (_, engine, state) = m.apply_player_move(state.id, "e2e4").unwrap();
        let engine = engine.unwrap();
        assert_eq!(engine.record.move_uci, "0000");
        assert_eq!(engine.record.move_san, "--");
        assert_eq!(state.outcome.as_deref(), Some("*"));
        assert_eq!(state.moves.len(), state.history.len());
        assert!(matches!(
            m.apply_player_move(state.id, "d2d4"),
            Err(Error::GameOver(_))
        ));

        let (_, export) = m.finish_session(state.id).unwrap();
        assert!(export.pgn.contains("1. e4 -- *"));
    }

    #[test]
    fn checkmate_by_the_human_skips_the_reply() {
        let fen = "6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1";
        let m = manager(fixed("a1a8"));
        let state = m.start_session("p7", GameMode::Clean, Side::White, Some(fen)).unwrap();
        let (human, engine, state) = m.apply_player_move(state.id, "a1a8").unwrap();
        assert_eq!(human.record.move_san, "Ra8#");
        assert!(engine.is_none());
        assert_eq!(state.outcome.as_deref(), Some("1-0"));
    }

    #[test]
    fn finish_is_idempotent_and_exports_pgn() {
        let m = manager(fixed("e7e5"));
        let state = m.start_session("alice", GameMode::Clean, Side::White, None).unwrap();
        m.apply_player_move(state.id, "e2e4").unwrap();

        let (first_state, first) = m.finish_session(state.id).unwrap();
        let (second_state, second) = m.finish_session(state.id).unwrap();
        assert_eq!(first_state.status, SessionStatus::Completed);
        assert_eq!(first_state, second_state);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );

        assert!(first.pgn.contains("[White \"alice\"]"));
        assert!(first.pgn.contains("[Black \"Reference Engine\"]"));
        assert!(first.pgn.contains("[Result \"*\"]"));
        assert!(!first.pgn.contains("[FEN"));
        assert!(first.pgn.contains("1. e4 e5 *"));
        assert_eq!(first.labels.len(), 2);
        assert_eq!(first.labels[0].confidence, 0.85);
        assert_eq!(first.labels[0].notes.as_deref(), Some("centipawn_loss=0"));
        assert_eq!(first.labels[1].confidence, 1.0);
        assert_eq!(first.labels[1].notes, None);
    }

    #[test]
    fn removed_sessions_hand_back_their_export() {
        let m = manager(fixed("e7e5"));
        let state = m.start_session("p10", GameMode::Clean, Side::White, None).unwrap();
        m.apply_player_move(state.id, "e2e4").unwrap();
        let (_, finished) = m.finish_session(state.id).unwrap();

        let (removed_state, removed) = m.remove_session(state.id).unwrap();
        assert_eq!(removed, finished);
        assert_eq!(removed_state.status, SessionStatus::Completed);
        assert!(matches!(m.get_state(state.id), Err(Error::SessionNotFound(_))));
        assert!(matches!(m.remove_session(state.id), Err(Error::SessionNotFound(_))));
    }

    #[test]
    fn concurrent_moves_on_one_session_never_interleave() {
        let m = Arc::new(manager(fixed("e7e5")));
        let state = m.start_session("p8", GameMode::Clean, Side::White, None).unwrap();
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || m.apply_player_move(state.id, "e2e4").is_ok())
            })
            .collect();
        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(applied, 1);
        let state = m.get_state(state.id).unwrap();
        assert_eq!(state.moves.len(), 2);
        assert_eq!(state.history, vec!["e2e4", "e7e5"]);
    }

    #[test]
    fn states_serialize_with_flattened_records() {
        let m = manager(fixed("e7e5"));
        let state = m.start_session("p9", GameMode::Assisted40, Side::White, None).unwrap();
        let (_, _, state) = m.apply_player_move(state.id, "e2e4").unwrap();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["mode"], "assisted_40");
        assert_eq!(json["status"], "running");
        assert_eq!(json["moves"][0]["label"], "human_clean");
        assert_eq!(json["moves"][0]["move_uci"], "e2e4");
        assert_eq!(json["next_to_move"], "white");
    }
}
