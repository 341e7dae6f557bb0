//! CLI for the zapi dispatcher: read queries, send them, write results.

mod commands;
mod input;

use anyhow::{Context, Result};
use clap::builder::RangedU64ValueParser;
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use zapi_core::config::{self, PolicyPreset, ZapiConfig};
use zapi_core::{Client, CurlTransport};

pub use input::InputType;

/// Send queries to the extraction API.
#[derive(Debug, Parser)]
#[command(name = "zapi")]
#[command(about = "Send extraction API queries with bounded concurrency and retries", long_about = None)]
pub struct Cli {
    /// Input file: one URL per line (txt) or one JSON query per line (jl).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Input file type. Guessed from the extension (.jl, .jsonl, .txt) or
    /// the first line if omitted, with txt as fallback.
    #[arg(long, value_enum)]
    pub intype: Option<InputType>,

    /// Maximum number of queries to send.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Output file for results, in JSON Lines. Standard output if omitted.
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Number of concurrent connections (default: `n_conn` from config.toml).
    #[arg(long, value_name = "N", value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub n_conn: Option<usize>,

    /// API key (default: config.toml, then ZYTE_API_KEY).
    #[arg(long, value_name = "KEY")]
    pub api_key: Option<String>,

    /// Base API URL (default: `api_url` from config.toml).
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    /// Log level.
    #[arg(short = 'L', long, value_enum, default_value = "info", ignore_case = true)]
    pub loglevel: LogLevel,

    /// Shuffle query order before applying --limit.
    #[arg(long)]
    pub shuffle: bool,

    /// Only retry rate-limiting responses, not errors.
    #[arg(long)]
    pub dont_retry_errors: bool,

    /// Also write error response bodies to the output.
    #[arg(long)]
    pub store_errors: bool,

    /// Double every retry budget.
    #[arg(long)]
    pub aggressive: bool,

    /// Log to ~/.local/state/zapi/zapi.log instead of stderr.
    #[arg(long)]
    pub log_file: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    #[value(alias = "warn")]
    Warning,
    Error,
}

impl LogLevel {
    /// Default `EnvFilter` directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Cli {
    /// Command-line flags layered over the config file.
    fn apply_to(&self, cfg: &mut ZapiConfig) {
        if let Some(url) = &self.api_url {
            cfg.api_url = url.clone();
        }
        if let Some(n) = self.n_conn {
            cfg.n_conn = n;
        }
        if self.aggressive {
            cfg.retry.policy = PolicyPreset::Aggressive;
        }
        if self.dont_retry_errors {
            cfg.retry.retry_errors = false;
        }
    }

    pub async fn run(self) -> Result<()> {
        let mut cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        self.apply_to(&mut cfg);
        cfg.validate()?;

        let queries = input::read_input(&self.input, self.intype)?;
        let queries = input::prepare(queries, self.shuffle, self.limit);
        tracing::info!(
            "loaded {} queries from {}; shuffled: {}",
            queries.len(),
            self.input.display(),
            self.shuffle
        );

        let api_key = cfg.resolve_api_key(self.api_key.as_deref())?;
        let transport = CurlTransport::new(cfg.transport_settings(api_key))?;
        let client = Client::with_policy(transport, cfg.n_conn, cfg.policy());
        tracing::info!("running against {} (connections: {})", client.transport().url(), cfg.n_conn);

        let mut out: Box<dyn Write> = match &self.output {
            Some(path) => Box::new(BufWriter::new(
                File::create(path).with_context(|| format!("create {}", path.display()))?,
            )),
            None => Box::new(io::stdout()),
        };
        commands::run_queries(&client, queries, &mut out, self.store_errors).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
