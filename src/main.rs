mod analyzer;
mod cli;
mod config;
mod context;
mod error;
mod inference;
mod patch;
mod pipeline;
mod prompt;
mod rule;
mod server;
mod task;
mod types;

use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use inference::{InferenceClient, InferenceLane};
use pipeline::session::{SessionPhase, SessionState};
use pipeline::{coordinator, report};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Init(args) => run_init(args),
        Commands::Fix(args) => run_fix(args).await,
        Commands::Serve(args) => run_serve(args).await,
    }
}

fn run_init(args: &cli::InitArgs) {
    if std::path::Path::new(&args.config).exists() && !args.r#override {
        eprintln!(
            "{} already exists (use --override to replace it)",
            args.config
        );
        std::process::exit(1);
    }
    if let Err(e) = std::fs::write(&args.config, config::DEFAULT_CONFIG) {
        eprintln!("Failed to write {}: {}", args.config, e);
        std::process::exit(1);
    }
    info!("Wrote {}", args.config);
}

fn load_config(path: &str) -> Arc<Config> {
    match Config::load_or_default(path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_fix(args: &cli::FixArgs) {
    let config = load_config(&args.config);
    let path = PathBuf::from(&args.file);
    let source = match std::fs::read_to_string(&path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to read {}: {}", args.file, e);
            std::process::exit(1);
        }
    };
    if source.trim().is_empty() {
        eprintln!("{} appears to be empty", args.file);
        std::process::exit(1);
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| args.file.clone());

    let lane = InferenceLane::new(InferenceClient::new(config.inference.clone()));
    let session = SessionState::new(file_name, path, source).shared();
    coordinator::run(session.clone(), config, lane).await;

    let mut session = session.lock().await;
    if session.phase == SessionPhase::Failed {
        eprintln!(
            "Analysis failed: {}",
            session.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }

    if args.apply {
        match session.apply_all() {
            Ok(count) => info!("Applied {} patch(es)", count),
            Err(e) => {
                eprintln!("Apply failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    report::print_summary(&session);
    if let Some(output) = &args.output {
        if let Err(e) = report::write_output(output, &session) {
            eprintln!("Failed to write output: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_serve(args: &cli::ServeArgs) {
    let config = load_config(&args.config);
    let port = args.port.unwrap_or(config.server.port);
    let lane = InferenceLane::new(InferenceClient::new(config.inference.clone()));
    if let Err(e) = server::serve(config, lane, port).await {
        eprintln!("Server failed: {}", e);
        std::process::exit(1);
    }
}
