//! Runtime settings.
//!
//! Every section has a `Default` and a `from_env()` constructor reading
//! `CHESSGUARD_*` variables. Load a `.env` file (e.g. with `dotenvy`)
//! before calling `from_env()` if one is used.

use std::{env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Search depth used when neither depth nor movetime is configured.
pub const FALLBACK_DEPTH: u32 = 16;

fn lookup_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a positive integer. `Some(None)` means "explicitly disabled"
/// (zero or negative), `None` means "absent or unparseable".
fn positive<T: TryFrom<i64>>(raw: Option<String>, key: &str) -> Option<Option<T>> {
    let raw = raw?;
    match raw.trim().parse::<i64>() {
        Ok(v) if v > 0 => Some(T::try_from(v).ok()),
        Ok(_) => Some(None),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric setting");
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub analysis: AnalysisConfig,
    pub session: SessionConfig,
    pub jobs: JobConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            analysis: AnalysisConfig::default(),
            session: SessionConfig::default(),
            jobs: JobConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(lookup_env)
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            engine: EngineConfig::from_lookup(&lookup),
            analysis: AnalysisConfig::from_lookup(&lookup),
            session: SessionConfig::default(),
            jobs: JobConfig::default(),
        }
    }
}

// ── Engine process ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executable path, or a bare name resolved through `PATH`.
    pub path: PathBuf,
    /// Extra command-line arguments for the binary.
    pub args: Vec<String>,
    /// `setoption` pairs applied after the `uci` handshake, in order.
    pub options: Vec<(String, String)>,
    pub startup_timeout: Duration,
    pub command_timeout: Duration,
    /// How long `stop()` waits for the process to exit after `quit`.
    pub quit_grace: Duration,
    /// How long to wait for the `bestmove` of a search abandoned on timeout.
    pub stop_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stockfish"),
            args: Vec::new(),
            options: Vec::new(),
            startup_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(15),
            quit_grace: Duration::from_secs(2),
            stop_grace: Duration::from_millis(500),
        }
    }
}

impl EngineConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(&lookup_env)
    }

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(path) = lookup("CHESSGUARD_STOCKFISH_PATH") {
            config.path = PathBuf::from(path);
        }
        if let Some(Some(threads)) = positive::<u32>(lookup("CHESSGUARD_ENGINE_THREADS"), "threads") {
            config.options.push(("Threads".into(), threads.to_string()));
        }
        if let Some(Some(hash)) = positive::<u32>(lookup("CHESSGUARD_ENGINE_HASH"), "hash") {
            config.options.push(("Hash".into(), hash.to_string()));
        }
        if let Some(Some(secs)) = positive::<u64>(lookup("CHESSGUARD_ENGINE_TIMEOUT"), "timeout") {
            config.command_timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.options.push((name.into(), value.to_string()));
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

// ── Analysis ─────────────────────────────────────────────────

/// Empirically tuned thresholds. None of these are protocol constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub perfect_cp: i32,
    pub agreement_cp: i32,
    pub top2_cp: i32,
    pub blunder_cp: i32,
    pub accuracy_cap_cp: i32,
    /// A critical position has a best line within this many cp of equality...
    pub critical_balanced_cp: i32,
    /// ...and a gap to the second line larger than this.
    pub critical_gap_cp: i32,
    /// Critical positions required before a sniper gap is reported.
    pub critical_min_sample: u32,
    pub volume_min_games: u32,
    pub volume_high_ratio: f64,
    pub volume_critical_ratio: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            perfect_cp: 10,
            agreement_cp: 30,
            top2_cp: 20,
            blunder_cp: 150,
            accuracy_cap_cp: 800,
            critical_balanced_cp: 200,
            critical_gap_cp: 75,
            critical_min_sample: 5,
            volume_min_games: 10,
            volume_high_ratio: 0.10,
            volume_critical_ratio: 0.20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub depth: Option<u32>,
    /// Milliseconds per query.
    pub movetime: Option<u64>,
    /// Lines requested for the unconstrained search.
    pub reference_multipv: u32,
    pub calibration: Calibration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            depth: Some(FALLBACK_DEPTH),
            movetime: None,
            reference_multipv: 2,
            calibration: Calibration::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(&lookup_env)
    }

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(depth) = positive::<u32>(lookup("CHESSGUARD_ANALYSIS_DEPTH"), "depth") {
            config.depth = depth;
        }
        if let Some(movetime) = positive::<u64>(lookup("CHESSGUARD_ANALYSIS_MOVETIME"), "movetime") {
            config.movetime = movetime;
        }
        config
    }

    /// Depth and movetime with the fallback applied when both are unset.
    pub fn limits(&self) -> (Option<u32>, Option<u64>) {
        match (self.depth, self.movetime) {
            (None, None) => (Some(FALLBACK_DEPTH), None),
            other => other,
        }
    }
}

// ── Sessions ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Depth for the engine's own replies.
    pub reply_depth: Option<u32>,
    pub reply_movetime: Option<u64>,
    pub event: String,
    pub site: String,
    pub engine_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reply_depth: Some(14),
            reply_movetime: None,
            event: "Engine Practice Session".into(),
            site: "Fair Play Lab".into(),
            engine_name: "Reference Engine".into(),
        }
    }
}

// ── Batch jobs ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Ensemble score at or above which a finished analysis is flagged.
    pub flag_score: f64,
    /// Shorter games are never flagged.
    pub min_plies: usize,
    /// A side with more blunders than this is never flagged.
    pub max_blunders: usize,
    /// Nor is a side that dropped more than this in a single move.
    pub max_single_loss: i32,
    /// Scramble-toggle score above which a side is flagged.
    pub scramble_flag: f64,
    /// Engine-like play: agreement at least this high...
    pub engine_like_agreement: f64,
    /// ...with a mean loss no higher than this.
    pub engine_like_mean_loss: f64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            flag_score: 60.0,
            min_plies: 20,
            max_blunders: 1,
            max_single_loss: 200,
            scramble_flag: 0.1,
            engine_like_agreement: 0.85,
            engine_like_mean_loss: 25.0,
        }
    }
}
