//! # Kids News Pipeline
//!
//! Collects Indian national news from a syndication feed, a scraped listing
//! page and a crawling API, filters out duplicate and unsuitable stories, and
//! rewrites what remains for three reading age groups.
//!
//! ## Usage
//!
//! ```sh
//! kids_news_pipeline            # same as `full`
//! kids_news_pipeline extract
//! kids_news_pipeline clean
//! kids_news_pipeline process
//! kids_news_pipeline store
//! ```
//!
//! ## Architecture
//!
//! 1. **Extraction**: every source runs through its strategy (feed, scrape or
//!    crawl), a few sources at a time
//! 2. **Cleaning**: normalize text, drop duplicate titles, reject articles that
//!    mention a sensitive keyword
//! 3. **Processing**: one LLM rewrite per article, truncated per age group
//! 4. **Storage**: everything lands in SQLite; JSON artifacts sit between stages

use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod clean;
mod cli;
mod config;
mod error;
mod models;
mod outputs;
mod pipeline;
mod process;
mod scrapers;
mod storage;
mod utils;

use cli::Cli;
use config::AppConfig;
use pipeline::Pipeline;
use scrapers::RunBudget;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring unreadable .env file: {e}");
        }
    }

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("kids_news_pipeline starting up");

    let args = Cli::parse();
    debug!(config = ?args.config, command = ?args.command, credentials = ?args.credentials(), "Parsed CLI arguments");

    let mut config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Could not load configuration");
            return ExitCode::FAILURE;
        }
    };
    args.apply_overrides(&mut config);

    let budget = RunBudget::new(
        config
            .extraction
            .run_timeout_secs
            .map(std::time::Duration::from_secs),
    );
    let on_ctrl_c = budget.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing the current items and stopping extraction");
            on_ctrl_c.abort();
        }
    });

    let mode = args.mode();
    let result = Pipeline::new(config, args.credentials(), budget).run(mode).await;

    let elapsed = start_time.elapsed();
    match result {
        Ok(summary) => {
            info!(
                %mode,
                ?summary,
                secs = elapsed.as_secs(),
                millis = elapsed.subsec_millis(),
                "Execution complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(
                %mode,
                error = %e,
                secs = elapsed.as_secs(),
                "Pipeline failed"
            );
            ExitCode::FAILURE
        }
    }
}
