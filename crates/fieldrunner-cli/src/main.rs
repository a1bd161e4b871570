//! fieldrunner - run grading scripts from the command line
//!
//! ## Commands
//!
//! - `run`: execute one answer request and print the response body
//! - `widen`: expand field range specs the way scripts see them

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fieldrunner_core::metrics::METRICS;
use fieldrunner_core::{AnswerResponse, Sandbox, SandboxConfig};
use fieldrunner_stats::{
    separate_names_and_aliases, widen_fields, widen_labeled_fields, FieldList,
};
use serde_json::json;
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "fieldrunner")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandboxed grading scripts over student field data", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an answer request and print the response JSON
    Run {
        /// Request file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        request: PathBuf,

        /// Pretty-print the response
        #[arg(long)]
        pretty: bool,

        /// Heap ceiling of the isolate in megabytes
        #[arg(long)]
        memory_limit_mb: Option<usize>,

        /// Maximum number of isolates alive at once
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Batch timeout when the markup sets none (milliseconds)
        #[arg(long)]
        default_timeout_ms: Option<u64>,
    },

    /// Expand field specs such as `d(1,3)=t` and print the result as JSON
    Widen {
        /// Field specs; each may hold several `;`-separated entries
        #[arg(required = true)]
        specs: Vec<String>,

        /// Print names and aliases separately
        #[arg(long)]
        split: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fieldrunner_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            request,
            pretty,
            memory_limit_mb,
            max_concurrent,
            default_timeout_ms,
        } => {
            let mut config = SandboxConfig::from_env();
            if let Some(mb) = memory_limit_mb {
                config = config.with_memory_limit_mb(mb);
            }
            if let Some(n) = max_concurrent {
                config = config.with_max_concurrent(n);
            }
            if let Some(ms) = default_timeout_ms {
                config = config.with_default_timeout_ms(ms);
            }
            let response = cmd_run(&request, config).await?;
            println!("{}", render(&response, pretty)?);
            Ok(())
        }
        Commands::Widen { specs, split } => {
            println!("{}", cmd_widen(specs, split)?);
            Ok(())
        }
    }
}

async fn cmd_run(request: &Path, config: SandboxConfig) -> Result<AnswerResponse> {
    let body = read_request(request)?;
    debug!(bytes = body.len(), "request read");
    let sandbox = Sandbox::new(config).context("Invalid sandbox configuration")?;
    let response = sandbox.answer_json(&body).await;
    METRICS.flush();
    Ok(response)
}

fn read_request(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("Failed to read request from stdin")?;
        return Ok(body);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read request file: {:?}", path))
}

fn render(response: &AnswerResponse, pretty: bool) -> Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(response)?
    } else {
        serde_json::to_string(response)?
    })
}

fn cmd_widen(specs: Vec<String>, split: bool) -> Result<String> {
    let specs = FieldList::List(specs);
    let value = if split {
        let fields = widen_labeled_fields(&specs).context("Invalid field spec")?;
        let parts = separate_names_and_aliases(&fields);
        json!({"names": parts.names, "aliases": parts.aliases})
    } else {
        json!(widen_fields(&specs).context("Invalid field spec")?)
    };
    Ok(value.to_string())
}
