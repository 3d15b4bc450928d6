use std::{
    io::{BufRead, BufReader, Write},
    process::{Child, ChildStdin, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use shakmaty::uci::UciMove;

use super::{
    Engine, SearchRequest,
    parse::{EngineLine, SearchCollector, parse_line},
};
use crate::{
    config::{EngineConfig, FALLBACK_DEPTH},
    error::EngineError,
    types::EngineEvaluation,
};

const EXIT_POLL: Duration = Duration::from_millis(20);

/// A UCI engine running as a child process.
///
/// Searches are serialized: concurrent callers of [`Engine::evaluate`]
/// queue on an internal lock, and the process only ever thinks about one
/// position at a time. A crashed process is not restarted behind the
/// caller's back; call [`UciEngine::stop`] and [`UciEngine::start`].
pub struct UciEngine {
    config: EngineConfig,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    process: Option<Process>,
    ever_started: bool,
}

struct Process {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    reader: Option<JoinHandle<()>>,
    /// A timed-out search may still print a `bestmove` we never consumed.
    stale: bool,
}

impl UciEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn the engine and complete the handshake. Does nothing if the
    /// process is already up.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if let Some(process) = state.process.as_mut() {
            if process.is_alive() {
                return Ok(());
            }
            tracing::warn!("engine process had exited, respawning");
            if let Some(dead) = state.process.take() {
                dead.reap();
            }
        }
        state.process = Some(Process::spawn(&self.config)?);
        state.ever_started = true;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .process
            .as_mut()
            .is_some_and(Process::is_alive)
    }

    /// Ask the engine to quit, killing it if it is still around after
    /// the grace period.
    pub fn stop(&self) {
        let Some(mut process) = self.state.lock().process.take() else {
            return;
        };
        if process.send("quit").is_err() {
            tracing::debug!("engine stdin already closed");
        }
        let deadline = Instant::now() + self.config.quit_grace;
        loop {
            match process.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(%status, "engine exited");
                    break;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                _ => {
                    tracing::warn!(
                        grace = ?self.config.quit_grace,
                        "engine ignored quit, killing it"
                    );
                    let _ = process.child.kill();
                    let _ = process.child.wait();
                    break;
                }
            }
        }
        process.reap();
    }

    fn search(&self, process: &mut Process, request: &SearchRequest) -> Result<EngineEvaluation, EngineError> {
        if process.stale {
            process.resync(self.config.command_timeout)?;
        }
        process.drain();

        if request.multipv > 1 {
            process.send(&format!("setoption name MultiPV value {}", request.multipv))?;
        }
        process.send("ucinewgame")?;
        process.send(&position_command(request))?;
        process.send(&go_command(request))?;

        let mut collector = SearchCollector::new(request.fen.clone(), request.multipv);
        let deadline = Instant::now() + self.config.command_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match process.lines.recv_timeout(remaining) {
                Ok(line) => {
                    tracing::debug!(target: "chessguard::uci", "<< {line}");
                    if let Some(best) = collector.push(&line) {
                        if let Some(mv) = best.as_deref().filter(|mv| mv.parse::<UciMove>().is_err()) {
                            return Err(EngineError::Protocol(format!("unreadable bestmove '{mv}'")));
                        }
                        return Ok(collector.finish(best));
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    process.abandon_search(self.config.stop_grace);
                    return Err(EngineError::Timeout(self.config.command_timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::Process(
                        "engine closed its output during a search".into(),
                    ));
                }
            }
        }
    }
}

impl Engine for UciEngine {
    fn evaluate(&self, request: &SearchRequest) -> Result<EngineEvaluation, EngineError> {
        let mut state = self.state.lock();
        if state.process.is_none() {
            if state.ever_started {
                return Err(EngineError::Process("engine has been stopped".into()));
            }
            state.process = Some(Process::spawn(&self.config)?);
            state.ever_started = true;
        }
        let Some(process) = state.process.as_mut() else {
            return Err(EngineError::Process("engine is not running".into()));
        };
        if !process.is_alive() {
            return Err(EngineError::Process("engine process has exited".into()));
        }

        let outcome = self.search(process, request);
        if request.multipv > 1 {
            let reset = process.send("setoption name MultiPV value 1");
            if let (Ok(_), Err(e)) = (&outcome, reset) {
                return Err(e);
            }
        }
        outcome
    }
}

impl Drop for UciEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Process {
    fn spawn(config: &EngineConfig) -> Result<Self, EngineError> {
        let program = config.path.display().to_string();
        tracing::info!(program = %program, args = ?config.args, "spawning engine");

        let mut child = Command::new(&config.path)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Startup(format!("cannot launch '{program}': {e}")))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::Startup("engine pipes unavailable".into()));
        };

        let (tx, lines) = crossbeam_channel::unbounded();
        let reader = thread::Builder::new()
            .name("uci-reader".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::Startup(format!("cannot start reader thread: {e}")));
            }
        };

        let mut process = Self {
            child,
            stdin,
            lines,
            reader: Some(reader),
            stale: false,
        };
        if let Err(e) = process.handshake(config) {
            let _ = process.child.kill();
            let _ = process.child.wait();
            process.reap();
            return Err(e);
        }
        tracing::info!(program = %program, pid = process.child.id(), "engine ready");
        Ok(process)
    }

    fn handshake(&mut self, config: &EngineConfig) -> Result<(), EngineError> {
        let deadline = Instant::now() + config.startup_timeout;
        let startup = |e: EngineError| match e {
            EngineError::Timeout(_) => EngineError::Startup(format!(
                "handshake did not complete within {:?}",
                config.startup_timeout
            )),
            EngineError::Process(msg) => EngineError::Startup(msg),
            other => other,
        };

        self.send("uci").map_err(startup)?;
        self.wait_for(EngineLine::UciOk, deadline, config.startup_timeout)
            .map_err(startup)?;
        for (name, value) in &config.options {
            self.send(&format!("setoption name {name} value {value}"))
                .map_err(startup)?;
        }
        self.send("isready").map_err(startup)?;
        self.wait_for(EngineLine::ReadyOk, deadline, config.startup_timeout)
            .map_err(startup)
    }

    fn send(&mut self, command: &str) -> Result<(), EngineError> {
        tracing::debug!(target: "chessguard::uci", ">> {command}");
        writeln!(self.stdin, "{command}")
            .and_then(|_| self.stdin.flush())
            .map_err(|e| EngineError::Process(format!("write to engine failed: {e}")))
    }

    /// Discard output until `expected` arrives. A missed deadline is
    /// reported as `budget`, the timeout the caller configured.
    fn wait_for(
        &mut self,
        expected: EngineLine,
        deadline: Instant,
        budget: Duration,
    ) -> Result<(), EngineError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    tracing::debug!(target: "chessguard::uci", "<< {line}");
                    if parse_line(&line) == expected {
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Err(EngineError::Timeout(budget)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::Process("engine closed its output".into()));
                }
            }
        }
    }

    fn drain(&mut self) {
        loop {
            match self.lines.try_recv() {
                Ok(line) => tracing::debug!(target: "chessguard::uci", "<< (discarded) {line}"),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Stop a search whose caller has given up on it and swallow its
    /// `bestmove` if it comes in time.
    fn abandon_search(&mut self, grace: Duration) {
        if self.send("stop").is_err() {
            return;
        }
        let deadline = Instant::now() + grace;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    if matches!(parse_line(&line), EngineLine::BestMove(_)) {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        tracing::warn!("engine did not acknowledge stop, output marked stale");
        self.stale = true;
    }

    /// Re-synchronise with `isready` after an abandoned search.
    fn resync(&mut self, timeout: Duration) -> Result<(), EngineError> {
        tracing::warn!("draining stale engine output");
        self.send("stop")?;
        self.send("isready")?;
        self.wait_for(EngineLine::ReadyOk, Instant::now() + timeout, timeout)?;
        self.stale = false;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn reap(mut self) {
        let _ = self.child.try_wait();
        drop(self.stdin);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                tracing::warn!("engine reader thread panicked");
            }
        }
    }
}

fn position_command(request: &SearchRequest) -> String {
    let mut cmd = format!("position fen {}", request.fen.trim());
    if !request.moves.is_empty() {
        cmd.push_str(" moves ");
        cmd.push_str(&request.moves.join(" "));
    }
    cmd
}

fn go_command(request: &SearchRequest) -> String {
    let mut cmd = String::from("go");
    let depth = match (request.depth, request.movetime) {
        (None, None) => Some(FALLBACK_DEPTH),
        (depth, _) => depth,
    };
    if let Some(depth) = depth {
        cmd.push_str(&format!(" depth {depth}"));
    }
    if let Some(ms) = request.movetime {
        cmd.push_str(&format!(" movetime {ms}"));
    }
    if !request.search_moves.is_empty() {
        cmd.push_str(" searchmoves ");
        cmd.push_str(&request.search_moves.join(" "));
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_position_and_go_commands() {
        let req = SearchRequest::new("8/8/8/8/8/8/8/K1k5 w - - 0 1")
            .moves(["a1a2"])
            .depth(Some(12))
            .movetime(Some(300))
            .search_moves(["c1c2", "c1d2"]);
        assert_eq!(
            position_command(&req),
            "position fen 8/8/8/8/8/8/8/K1k5 w - - 0 1 moves a1a2"
        );
        assert_eq!(
            go_command(&req),
            "go depth 12 movetime 300 searchmoves c1c2 c1d2"
        );
    }

    #[test]
    fn unbounded_search_falls_back_to_default_depth() {
        let req = SearchRequest::new("fen");
        assert_eq!(go_command(&req), format!("go depth {FALLBACK_DEPTH}"));
        let req = SearchRequest::new("fen").movetime(Some(50));
        assert_eq!(go_command(&req), "go movetime 50");
    }

    #[test]
    fn missing_binary_is_a_startup_error() {
        let engine = UciEngine::new(EngineConfig::new("/nonexistent/chessguard-engine"));
        assert!(matches!(engine.start(), Err(EngineError::Startup(_))));
        assert!(!engine.is_running());
    }

    #[cfg(unix)]
    mod process {
        use std::fs;

        use super::*;
        use crate::types::Score;

        // Answers the handshake, prints a fixed MultiPV pair for every
        // search and records every command it receives.
        const FAKE_ENGINE: &str = r#"
while read -r line; do
  echo "$line" >> "$LOG"
  case "$line" in
    uci) echo "id name Fake"; echo "uciok" ;;
    isready) echo "readyok" ;;
    "go "*)
      echo "info depth 1 multipv 1 score cp 5 pv d2d4"
      echo "info depth 2 multipv 1 score cp 31 pv e2e4 e7e5"
      echo "info depth 2 multipv 2 score cp -12 pv g1f3"
      echo "bestmove e2e4 ponder e7e5" ;;
    quit) exit 0 ;;
  esac
done
"#;

        // Never finishes a search and ignores stop.
        const SILENT_ENGINE: &str = r#"
while read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    "go "*) echo "info depth 1 score cp 3 pv e2e4" ;;
    quit) exit 0 ;;
  esac
done
"#;

        fn script_engine(dir: &tempfile::TempDir, body: &str) -> EngineConfig {
            let script = dir.path().join("engine.sh");
            let log = dir.path().join("commands.log");
            fs::write(&script, format!("LOG='{}'\n{body}", log.display())).unwrap();
            EngineConfig::new("/bin/sh")
                .with_args([script.display().to_string()])
                .with_startup_timeout(Duration::from_secs(5))
                .with_command_timeout(Duration::from_secs(5))
        }

        fn command_log(dir: &tempfile::TempDir) -> Vec<String> {
            fs::read_to_string(dir.path().join("commands.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        #[test]
        fn handshake_then_multipv_search_then_reset() {
            let dir = tempfile::tempdir().unwrap();
            let engine = UciEngine::new(script_engine(&dir, FAKE_ENGINE).with_option("Hash", 16));
            engine.start().unwrap();
            engine.start().unwrap();
            assert!(engine.is_running());

            let req = SearchRequest::new(crate::board::STARTING_FEN)
                .depth(Some(2))
                .multipv(2);
            let eval = engine.evaluate(&req).unwrap();
            assert_eq!(eval.best_move.as_deref(), Some("e2e4"));
            assert_eq!(eval.score, Some(Score::Cp(31)));
            assert_eq!(eval.pv, vec!["e2e4", "e7e5"]);
            assert_eq!(eval.lines.len(), 2);
            assert_eq!(eval.lines[1].first_move(), Some("g1f3"));

            engine.stop();
            assert!(!engine.is_running());

            let log = command_log(&dir);
            let uci_count = log.iter().filter(|l| *l == "uci").count();
            assert_eq!(uci_count, 1, "second start() must not respawn");
            assert!(log.contains(&"setoption name Hash value 16".to_string()));
            let go = log.iter().position(|l| l.starts_with("go ")).unwrap();
            assert_eq!(log[go], "go depth 2");
            assert_eq!(log[go - 3], "setoption name MultiPV value 2");
            assert_eq!(log[go + 1], "setoption name MultiPV value 1");
        }

        #[test]
        fn evaluate_after_stop_is_a_process_error() {
            let dir = tempfile::tempdir().unwrap();
            let engine = UciEngine::new(script_engine(&dir, FAKE_ENGINE));
            let req = SearchRequest::new(crate::board::STARTING_FEN).depth(Some(1));
            engine.evaluate(&req).unwrap();
            engine.stop();
            assert!(matches!(engine.evaluate(&req), Err(EngineError::Process(_))));
            engine.start().unwrap();
            assert!(engine.evaluate(&req).is_ok());
        }

        #[test]
        fn search_without_bestmove_times_out_and_process_can_still_stop() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = script_engine(&dir, SILENT_ENGINE)
                .with_command_timeout(Duration::from_millis(200));
            config.stop_grace = Duration::from_millis(50);
            let engine = UciEngine::new(config);
            engine.start().unwrap();

            let req = SearchRequest::new(crate::board::STARTING_FEN).depth(Some(30));
            let err = engine.evaluate(&req).unwrap_err();
            assert!(matches!(err, EngineError::Timeout(_)));
            assert!(engine.is_running());

            engine.stop();
            assert!(!engine.is_running());
        }

        // The first search hangs and ignores the first stop. The next stop
        // flushes the stale bestmove that the resync must swallow.
        const LAGGING_ENGINE: &str = r#"
stops=0
while read -r line; do
  echo "$line" >> "$LOG"
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    stop)
      stops=$((stops+1))
      if [ "$stops" -eq 2 ]; then echo "bestmove d2d4"; fi ;;
    "go "*)
      if [ "$stops" -ge 2 ]; then
        echo "info depth 1 score cp 12 pv e2e4"
        echo "bestmove e2e4"
      else
        echo "info depth 1 score cp 3 pv d2d4"
      fi ;;
    quit) exit 0 ;;
  esac
done
"#;

        // Answers isready during the handshake only.
        const DEAF_ENGINE: &str = r#"
ready=0
while read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready)
      ready=$((ready+1))
      if [ "$ready" -eq 1 ]; then echo "readyok"; fi ;;
    "go "*) echo "info depth 1 score cp 3 pv e2e4" ;;
    quit) exit 0 ;;
  esac
done
"#;

        fn quick_timeouts(config: EngineConfig) -> EngineConfig {
            let mut config = config.with_command_timeout(Duration::from_millis(200));
            config.stop_grace = Duration::from_millis(50);
            config
        }

        #[test]
        fn search_after_timeout_resyncs_and_skips_stale_bestmove() {
            let dir = tempfile::tempdir().unwrap();
            let engine = UciEngine::new(quick_timeouts(script_engine(&dir, LAGGING_ENGINE)));
            engine.start().unwrap();

            let slow = SearchRequest::new(crate::board::STARTING_FEN).depth(Some(30));
            assert!(matches!(
                engine.evaluate(&slow),
                Err(EngineError::Timeout(d)) if d == Duration::from_millis(200)
            ));

            let req = SearchRequest::new(crate::board::STARTING_FEN).depth(Some(1));
            let eval = engine.evaluate(&req).unwrap();
            assert_eq!(eval.best_move.as_deref(), Some("e2e4"));
            assert_eq!(eval.score, Some(Score::Cp(12)));
            engine.stop();

            let log = command_log(&dir);
            let first_go = log.iter().position(|l| l == "go depth 30").unwrap();
            let second_go = log.iter().position(|l| l == "go depth 1").unwrap();
            let between: Vec<&str> = log[first_go + 1..second_go].iter().map(String::as_str).collect();
            assert_eq!(between[..3], ["stop", "stop", "isready"]);
        }

        #[test]
        fn failed_resync_reports_the_configured_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let engine = UciEngine::new(quick_timeouts(script_engine(&dir, DEAF_ENGINE)));
            let req = SearchRequest::new(crate::board::STARTING_FEN).depth(Some(30));
            assert!(matches!(engine.evaluate(&req), Err(EngineError::Timeout(_))));
            assert!(matches!(
                engine.evaluate(&req),
                Err(EngineError::Timeout(d)) if d == Duration::from_millis(200)
            ));
            engine.stop();
        }

        #[test]
        fn unreadable_bestmove_is_a_protocol_error() {
            let dir = tempfile::tempdir().unwrap();
            let body = FAKE_ENGINE.replace("bestmove e2e4 ponder e7e5", "bestmove e9e4");
            let engine = UciEngine::new(script_engine(&dir, &body));
            let req = SearchRequest::new(crate::board::STARTING_FEN).depth(Some(2));
            assert!(matches!(engine.evaluate(&req), Err(EngineError::Protocol(_))));
            assert!(engine.is_running());
            engine.stop();
        }

        #[test]
        fn engine_that_never_handshakes_fails_startup() {
            let dir = tempfile::tempdir().unwrap();
            let config = script_engine(&dir, "exec sleep 5\n")
                .with_startup_timeout(Duration::from_millis(150));
            let engine = UciEngine::new(config);
            assert!(matches!(engine.start(), Err(EngineError::Startup(_))));
        }
    }
}
