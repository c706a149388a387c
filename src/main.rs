// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use linkbundle::config::Config;
use linkbundle::server::Server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// linkbundle - many file links in, one ZIP archive out.
#[derive(Parser)]
#[command(name = "linkbundle")]
#[command(version = VERSION)]
#[command(about = "Fetch many remote file links and return them as one ZIP archive.")]
#[command(long_about = "linkbundle - many file links in, one ZIP archive out\n\n\
    Start the server:    linkbundle\n\
    Custom port:         linkbundle serve --port 8080\n\
    Show config:         linkbundle config show\n\n\
    POST {\"urls\": [...]} to /download-zip and receive files.zip.")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to ~/.linkbundle/config.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose mode: debug-level logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind to (use 0.0.0.0 for network access)
        #[arg(short, long)]
        bind: Option<String>,
        /// Directory for per-request scratch space
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
        /// Disable per-IP rate limiting
        #[arg(long)]
        no_rate_limit: bool,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as JSON
    Show,
}

fn init_tracing(verbose: bool, json: bool) {
    let default_directives = if verbose {
        "linkbundle=debug,tower_http=debug"
    } else {
        "linkbundle=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Some(Commands::Config {
            command: ConfigCommands::Show,
        }) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Commands::Serve {
            port,
            bind,
            scratch_dir,
            no_rate_limit,
        }) => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            if let Some(dir) = scratch_dir {
                config.scratch_dir = Some(dir);
            }
            if no_rate_limit {
                config.rate_limit = None;
            }
            config.validate()?;
            run_server(config)
        }
        None => run_server(config),
    }
}

fn run_server(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    runtime.block_on(async move {
        let server = Server::new(config);
        server.start().await?;
        tracing::info!("Server stopped");
        Ok(())
    })
}
