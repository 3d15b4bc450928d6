//! Background game analysis.
//!
//! A job becomes an [`AnalysisRecord`] that ends in exactly one terminal
//! status: `completed` (clean), `flagged` (suspicious) or `error` with a
//! readable message. [`AnalysisPool`] runs jobs on worker threads, one
//! engine per worker.

use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    analysis::{Analyzer, GameReview},
    config::JobConfig,
    engine::Engine,
    error::{ErrorKind, Result},
    pgn::PgnGame,
    types::Side,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Queued,
    Analyzing,
    Completed,
    Flagged,
    Error,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AnalysisStatus::Completed | AnalysisStatus::Flagged | AnalysisStatus::Error
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub moves: Vec<String>,
    pub starting_fen: Option<String>,
    /// Side under review; both sides when `None`.
    pub subject: Option<Side>,
    pub book_plies: u32,
    /// Seconds spent on each ply where known, aligned with `moves`.
    #[serde(default)]
    pub move_times: Vec<Option<f64>>,
}

impl AnalysisJob {
    pub fn new<I, S>(moves: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            moves: moves.into_iter().map(Into::into).collect(),
            starting_fen: None,
            subject: None,
            book_plies: 0,
            move_times: Vec::new(),
        }
    }

    /// A job for the main line of a PGN game, with its start position and
    /// clock-derived move times.
    pub fn from_pgn(pgn: &str) -> Result<Self> {
        let game = PgnGame::parse(pgn)?;
        let mut job = Self::new(game.moves.iter().cloned()).move_times(game.move_times());
        if let Some(fen) = game.starting_fen() {
            job = job.starting_fen(fen);
        }
        Ok(job)
    }

    pub fn starting_fen(mut self, fen: impl Into<String>) -> Self {
        self.starting_fen = Some(fen.into());
        self
    }

    pub fn subject(mut self, side: Side) -> Self {
        self.subject = Some(side);
        self
    }

    pub fn book_plies(mut self, plies: u32) -> Self {
        self.book_plies = plies;
        self
    }

    pub fn move_times(mut self, times: Vec<Option<f64>>) -> Self {
        self.move_times = times;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub status: AnalysisStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub review: Option<GameReview>,
    /// One-line verdict for a finished analysis.
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl AnalysisRecord {
    pub fn queued(job: &AnalysisJob) -> Self {
        Self {
            id: job.id,
            status: AnalysisStatus::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            review: None,
            summary: None,
            error: None,
        }
    }

    fn fail(mut self, message: String) -> Self {
        self.status = AnalysisStatus::Error;
        self.error = Some(message);
        self.finished_at = Some(Utc::now());
        self
    }
}

/// Run one job to a terminal status. Never fails: analysis errors are
/// recorded on the returned record.
pub fn run_job<E: Engine>(analyzer: &Analyzer<E>, config: &JobConfig, job: &AnalysisJob) -> AnalysisRecord {
    run_queued(analyzer, config, job, AnalysisRecord::queued(job))
}

fn run_queued<E: Engine>(
    analyzer: &Analyzer<E>,
    config: &JobConfig,
    job: &AnalysisJob,
    mut record: AnalysisRecord,
) -> AnalysisRecord {
    record.status = AnalysisStatus::Analyzing;
    record.started_at = Some(Utc::now());

    let review = match analyzer.review_timed_game(
        &job.moves,
        job.starting_fen.as_deref(),
        &job.move_times,
        job.book_plies,
    ) {
        Ok(review) => review,
        Err(e) => {
            let prefix = match e.kind() {
                ErrorKind::Caller => "invalid game",
                ErrorKind::Engine => "engine failure",
                ErrorKind::Data => "unusable game",
            };
            tracing::error!(job = %job.id, error = %e, "analysis failed");
            return record.fail(format!("{prefix}: {e}"));
        }
    };

    let sides = match job.subject {
        Some(side) => vec![side],
        None => vec![Side::White, Side::Black],
    };
    let flagged: Vec<Side> = sides
        .into_iter()
        .filter(|&side| should_flag(&review, side, config))
        .collect();

    record.status = if flagged.is_empty() {
        AnalysisStatus::Completed
    } else {
        AnalysisStatus::Flagged
    };
    record.summary = Some(describe(&review, &flagged));
    record.finished_at = Some(Utc::now());
    tracing::info!(
        job = %job.id,
        plies = review.records.len(),
        status = ?record.status,
        "analysis finished"
    );
    record.review = Some(review);
    record
}

/// Whether one side's play in a reviewed game warrants a closer look.
pub fn should_flag(review: &GameReview, side: Side, config: &JobConfig) -> bool {
    if review.records.len() < config.min_plies {
        return false;
    }
    let side = review.side(side);
    let summary = &side.summary;
    if summary.graded_moves == 0
        || summary.blunders > config.max_blunders
        || summary.max_loss.is_some_and(|l| l > config.max_single_loss)
    {
        return false;
    }
    if side.ensemble.score >= config.flag_score
        || side.signals.scramble_toggle_score > config.scramble_flag
    {
        return true;
    }
    // human only when both inaccurate and off the engine's choices
    summary.agreement_rate >= config.engine_like_agreement
        || summary.mean_loss.is_some_and(|l| l <= config.engine_like_mean_loss)
}

fn describe(review: &GameReview, flagged: &[Side]) -> String {
    if let Some(&side) = flagged.first() {
        let s = &review.side(side).summary;
        return format!(
            "{} flagged: {:.0}% of moves within engine agreement, {} near-perfect moves in {} plies",
            side.as_str(),
            s.agreement_rate * 100.0,
            (s.perfect_rate * s.graded_moves as f64).round() as usize,
            review.records.len()
        );
    }
    let blunders = review.white.summary.blunders + review.black.summary.blunders;
    format!(
        "analysis complete: {} plies, {} blunders",
        review.records.len(),
        blunders
    )
}

/// Worker threads fed over a channel. Each worker owns one analyzer, and
/// so one engine; jobs run in parallel up to the number of analyzers.
pub struct AnalysisPool {
    jobs: Option<Sender<(AnalysisJob, AnalysisRecord)>>,
    results: Receiver<AnalysisRecord>,
    workers: Vec<JoinHandle<()>>,
}

impl AnalysisPool {
    pub fn new<E: Engine + 'static>(analyzers: Vec<Analyzer<E>>, config: JobConfig) -> Self {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<(AnalysisJob, AnalysisRecord)>();
        let (result_tx, results) = crossbeam_channel::unbounded();
        let mut workers = Vec::with_capacity(analyzers.len());
        for (i, analyzer) in analyzers.into_iter().enumerate() {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let config = config.clone();
            let spawned = thread::Builder::new()
                .name(format!("analysis-worker-{i}"))
                .spawn(move || {
                    for (job, record) in job_rx.iter() {
                        let record = run_queued(&analyzer, &config, &job, record);
                        if result_tx.send(record).is_err() {
                            break;
                        }
                    }
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::error!(worker = i, error = %e, "cannot spawn analysis worker"),
            }
        }
        tracing::info!(workers = workers.len(), "analysis pool started");
        Self {
            jobs: Some(job_tx),
            results,
            workers,
        }
    }

    /// Queue a job. The returned record is the `queued` state; the
    /// finished record arrives on [`AnalysisPool::results`].
    pub fn submit(&self, job: AnalysisJob) -> AnalysisRecord {
        let record = AnalysisRecord::queued(&job);
        let accepted = !self.workers.is_empty()
            && self
                .jobs
                .as_ref()
                .is_some_and(|tx| tx.send((job, record.clone())).is_ok());
        if accepted {
            record
        } else {
            tracing::error!(job = %record.id, "analysis pool has no running workers");
            record.fail("analysis pool has no running workers".into())
        }
    }

    pub fn results(&self) -> &Receiver<AnalysisRecord> {
        &self.results
    }

    /// Stop accepting jobs, wait for queued ones to finish and return
    /// every result not yet received.
    pub fn shutdown(mut self) -> Vec<AnalysisRecord> {
        self.close();
        self.results.try_iter().collect()
    }

    fn close(&mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("analysis worker panicked");
            }
        }
    }
}

impl Drop for AnalysisPool {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AnalysisConfig,
        engine::SearchRequest,
        error::EngineError,
        types::{EngineEvaluation, Score},
    };

    type EngineFn = fn(&SearchRequest) -> Result<EngineEvaluation, EngineError>;

    fn perfect(req: &SearchRequest) -> Result<EngineEvaluation, EngineError> {
        let mut eval = EngineEvaluation::empty(&req.fen);
        eval.score = Some(Score::Cp(15));
        eval.best_move = req.search_moves.first().cloned().or(Some("e2e4".into()));
        Ok(eval)
    }

    fn broken(_: &SearchRequest) -> Result<EngineEvaluation, EngineError> {
        Err(EngineError::Process("engine closed its output".into()))
    }

    fn analyzer(engine: EngineFn) -> Analyzer<EngineFn> {
        Analyzer::new(Arc::new(engine), AnalysisConfig::default())
    }

    // 24 plies of knight shuffling.
    fn long_game() -> Vec<String> {
        ["g1f3", "g8f6", "f3g1", "f6g8"]
            .iter()
            .cycle()
            .take(24)
            .map(|m| m.to_string())
            .collect()
    }

    #[test]
    fn perfect_play_over_enough_plies_is_flagged() {
        let record = run_job(&analyzer(perfect), &JobConfig::default(), &AnalysisJob::new(long_game()));
        assert_eq!(record.status, AnalysisStatus::Flagged);
        assert!(record.review.is_some());
        assert!(record.error.is_none());
        assert!(record.summary.as_deref().unwrap().starts_with("white flagged"));
        assert!(record.finished_at.is_some());
    }

    // Perfect play except two 40 cp slips by White on moves 2 and 4.
    fn two_slips(req: &SearchRequest) -> Result<EngineEvaluation, EngineError> {
        let mut eval = perfect(req)?;
        let slip = req.search_moves.first().is_some_and(|m| m == "f3g1")
            && (req.fen.ends_with(" 2") || req.fen.ends_with(" 4"));
        if slip {
            eval.score = Some(Score::Cp(15 - 40));
        }
        Ok(eval)
    }

    #[test]
    fn low_mean_loss_is_flagged_even_below_agreement_threshold() {
        let review = analyzer(two_slips).review_game(&long_game(), None, 0).unwrap();
        let white = &review.white.summary;
        assert!(white.agreement_rate < 0.85);
        assert!(white.mean_loss.unwrap() <= 25.0);
        assert_eq!(white.blunders, 0);
        assert!(review.white.ensemble.score < 60.0);
        assert!(should_flag(&review, Side::White, &JobConfig::default()));

        let job = AnalysisJob::new(long_game()).subject(Side::White);
        let record = run_job(&analyzer(two_slips), &JobConfig::default(), &job);
        assert_eq!(record.status, AnalysisStatus::Flagged);
    }

    #[test]
    fn inaccurate_and_disagreeing_play_is_not_flagged() {
        let config = JobConfig {
            engine_like_mean_loss: 5.0,
            ..JobConfig::default()
        };
        let review = analyzer(two_slips).review_game(&long_game(), None, 0).unwrap();
        assert!(!should_flag(&review, Side::White, &config));
    }

    #[test]
    fn pgn_jobs_keep_clock_times() {
        let pgn = "[White \"a\"]\n[TimeControl \"300+0\"]\n\n\
            1. e4 { [%clk 0:04:58] } e5 { [%clk 0:04:55] } 2. Nf3 { [%clk 0:04:50] } *";
        let job = AnalysisJob::from_pgn(pgn).unwrap();
        assert_eq!(job.moves, vec!["e4", "e5", "Nf3"]);
        assert_eq!(job.move_times, vec![Some(2.0), Some(5.0), Some(8.0)]);

        let record = run_job(&analyzer(perfect), &JobConfig::default(), &job);
        let review = record.review.unwrap();
        assert_eq!(review.records[1].move_time, Some(5.0));
    }

    #[test]
    fn short_games_are_never_flagged() {
        let job = AnalysisJob::new(["e2e4", "e7e5"]).subject(Side::White);
        let record = run_job(&analyzer(perfect), &JobConfig::default(), &job);
        assert_eq!(record.status, AnalysisStatus::Completed);
    }

    #[test]
    fn failures_become_error_records() {
        let record = run_job(&analyzer(broken), &JobConfig::default(), &AnalysisJob::new(["e2e4"]));
        assert_eq!(record.status, AnalysisStatus::Error);
        assert!(record.error.as_deref().unwrap().starts_with("engine failure"));

        let empty: Vec<String> = Vec::new();
        let record = run_job(&analyzer(perfect), &JobConfig::default(), &AnalysisJob::new(empty));
        assert_eq!(record.status, AnalysisStatus::Error);
        assert!(record.error.as_deref().unwrap().starts_with("unusable game"));
        assert!(record.status.is_terminal());
    }

    #[test]
    fn pool_runs_jobs_on_every_worker() {
        let pool = AnalysisPool::new(vec![analyzer(perfect), analyzer(perfect)], JobConfig::default());
        let ids: Vec<Uuid> = (0..4)
            .map(|_| {
                let queued = pool.submit(AnalysisJob::new(long_game()));
                assert_eq!(queued.status, AnalysisStatus::Queued);
                queued.id
            })
            .collect();
        let done: Vec<AnalysisRecord> = (0..4)
            .map(|_| pool.results().recv_timeout(Duration::from_secs(10)).unwrap())
            .collect();
        assert!(done.iter().all(|r| r.status == AnalysisStatus::Flagged));
        assert!(ids.iter().all(|id| done.iter().any(|r| r.id == *id)));
        assert!(pool.shutdown().is_empty());
    }

    #[test]
    fn pool_without_workers_rejects_jobs() {
        let pool = AnalysisPool::new(Vec::<Analyzer<EngineFn>>::new(), JobConfig::default());
        let record = pool.submit(AnalysisJob::new(["e2e4"]));
        assert_eq!(record.status, AnalysisStatus::Error);
    }
}
