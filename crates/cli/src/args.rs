//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pipeline::StageName;

#[derive(Debug, Parser)]
#[command(name = "planforge")]
#[command(about = "Turn natural-language data requests into governed execution plans", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log line format written to stderr
    #[arg(long, global = true, value_enum, env = "PLANFORGE_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// OTLP/gRPC collector for trace export; tracing stays local when unset
    #[arg(long, global = true, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Plan one analyze request read from a JSON file
    Analyze {
        /// Path to the request JSON, or `-` for stdin
        #[arg(long, short)]
        request: PathBuf,

        /// Identity used for rate limiting
        #[arg(long, env = "PLANFORGE_CLIENT_KEY", default_value = "cli")]
        client_key: String,

        /// Submit the request this many times; repeats within the cache TTL are served from cache
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=1000))]
        repeat: u32,
    },
    /// Print the JSON Schema a stage's output must satisfy
    Schema {
        #[arg(value_enum)]
        stage: StageArg,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StageArg {
    Intent,
    Governance,
    Planning,
    Visualization,
    Analysis,
}

impl From<StageArg> for StageName {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Intent => StageName::Intent,
            StageArg::Governance => StageName::Governance,
            StageArg::Planning => StageName::Planning,
            StageArg::Visualization => StageName::Visualization,
            StageArg::Analysis => StageName::Analysis,
        }
    }
}
