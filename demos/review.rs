use std::{path::PathBuf, sync::Arc};

use chessguard::{
    Analyzer, GameMode, SessionManager, Settings, Side, UciEngine,
    ensemble::{self, DetectionSignals},
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Review a game or play a scripted practice session against a UCI engine")]
struct Cli {
    /// Engine binary; overrides CHESSGUARD_STOCKFISH_PATH.
    #[arg(long, env = "CHESSGUARD_STOCKFISH_PATH")]
    engine: Option<PathBuf>,

    /// Search depth per query.
    #[arg(long)]
    depth: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyse a game given as moves in UCI or SAN, or read from a PGN file.
    Review {
        moves: Vec<String>,
        #[arg(long)]
        fen: Option<String>,
        /// PGN file; its clock comments supply move times.
        #[arg(long, conflicts_with_all = ["moves", "fen"])]
        pgn: Option<PathBuf>,
        /// Plies treated as opening theory.
        #[arg(long, default_value_t = 8)]
        book: u32,
    },
    /// Play the given moves as White against the engine, then export PGN.
    Play { moves: Vec<String> },
    /// Score a detection-signal vector read from a JSON file.
    Score { signals: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env();
    if let Some(path) = cli.engine {
        settings.engine.path = path;
    }
    if let Some(depth) = cli.depth {
        settings.analysis.depth = Some(depth);
        settings.session.reply_depth = Some(depth);
    }

    match cli.command {
        Command::Score { signals } => {
            let signals: DetectionSignals = serde_json::from_str(&std::fs::read_to_string(signals)?)?;
            let result = ensemble::score_with(&signals, &settings.analysis.calibration);
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        Command::Review { moves, fen, pgn, book } => {
            // 1. Start the engine
            let engine = Arc::new(UciEngine::new(settings.engine.clone()));
            engine.start()?;
            let analyzer = Analyzer::new(Arc::clone(&engine), settings.analysis.clone());

            // 2. Analyse every ply
            let review = match pgn {
                Some(path) => {
                    println!("Analysing {}...", path.display());
                    analyzer.review_pgn(&std::fs::read_to_string(path)?, book)?
                }
                None => {
                    println!("Analysing {} plies...", moves.len());
                    analyzer.review_game(&moves, fen.as_deref(), book)?
                }
            };

            // 3. Output results
            for record in &review.records {
                let loss = record
                    .centipawn_loss
                    .map_or_else(|| "-".to_string(), |l| l.to_string());
                let time = record
                    .move_time
                    .map_or_else(String::new, |t| format!("  {t:.1}s"));
                println!(
                    "{:>3}. {:<7} {:<5} loss {:>5}{}",
                    record.move_number,
                    record.move_san,
                    record.side.as_str(),
                    loss,
                    time
                );
            }
            for side in [Side::White, Side::Black] {
                let r = review.side(side);
                println!("------------------------------------------------");
                println!(
                    "{}: agreement {:.0}%, ensemble {:.1} ({:?}, {:.1}-{:.1})",
                    side.as_str(),
                    r.summary.agreement_rate * 100.0,
                    r.ensemble.score,
                    r.ensemble.risk_level,
                    r.ensemble.confidence_low,
                    r.ensemble.confidence_high
                );
                for flag in &r.ensemble.flags {
                    println!("  - {flag}");
                }
            }
            engine.stop();
        }
        Command::Play { moves } => {
            let engine = Arc::new(UciEngine::new(settings.engine.clone()));
            engine.start()?;
            let analyzer = Analyzer::new(Arc::clone(&engine), settings.analysis.clone());
            let manager = SessionManager::new(analyzer, settings.session.clone());

            let state = manager.start_session("demo", GameMode::Clean, Side::White, None)?;
            for mv in &moves {
                let (human, reply, state) = manager.apply_player_move(state.id, mv)?;
                let reply = reply.map_or_else(|| "-".to_string(), |r| r.record.move_san);
                println!("{:<7} {:?}  engine: {}", human.record.move_san, human.label, reply);
                if state.is_over() {
                    break;
                }
            }
            let (_, export) = manager.finish_session(state.id)?;
            println!("{}", export.pgn);
            engine.stop();
        }
    }
    Ok(())
}
