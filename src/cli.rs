//! Command-line interface definitions for the kids news pipeline.
//!
//! Secrets and service endpoints can come from flags or environment variables
//! (a `.env` file is loaded first). Everything else lives in the YAML config.

use crate::config::AppConfig;
use crate::pipeline::{Credentials, RunMode};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the kids news pipeline.
///
/// # Examples
///
/// ```sh
/// # Complete run with built-in sources
/// kids_news_pipeline
///
/// # Extraction only, with a custom config and a 5 minute budget
/// kids_news_pipeline --config config.yaml --timeout-secs 300 extract
///
/// # Re-run processing against an existing cleaned artifact
/// LLM_API_KEY=... kids_news_pipeline process
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for the JSON stage artifacts (overrides the config)
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// SQLite database file (overrides the config)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Deadline for the extraction phase, in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Firecrawl API key, needed by crawl sources
    #[arg(long, env = "FIRECRAWL_API_KEY", hide_env_values = true)]
    pub firecrawl_api_key: Option<String>,

    /// API key for the OpenAI-compatible rewrite service
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Base URL of the rewrite service (overrides the config)
    #[arg(long, env = "LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// Model name of the rewrite service (overrides the config)
    #[arg(long, env = "LLM_MODEL")]
    pub llm_model: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Extract, clean, process and store (the default)
    Full,
    /// Extract all sources into the raw artifact
    Extract,
    /// Clean the raw artifact into the cleaned artifact
    Clean,
    /// Rewrite the cleaned artifact into the processed artifact
    Process,
    /// Store all three artifacts in the database
    Store,
}

impl From<Command> for RunMode {
    fn from(command: Command) -> Self {
        match command {
            Command::Full => RunMode::Full,
            Command::Extract => RunMode::Extract,
            Command::Clean => RunMode::Clean,
            Command::Process => RunMode::Process,
            Command::Store => RunMode::Store,
        }
    }
}

impl Cli {
    pub fn mode(&self) -> RunMode {
        self.command.unwrap_or(Command::Full).into()
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            crawl_api_key: self.firecrawl_api_key.clone(),
            llm_api_key: self.llm_api_key.clone(),
        }
    }

    /// Layer the command-line overrides on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.data_dir {
            config.paths.data_dir = dir.clone();
        }
        if let Some(db) = &self.database {
            config.paths.database = db.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.extraction.run_timeout_secs = Some(secs);
        }
        if let Some(url) = &self.llm_base_url {
            config.simplifier.base_url = url.clone();
        }
        if let Some(model) = &self.llm_model {
            config.simplifier.model = model.clone();
        }
    }
}
