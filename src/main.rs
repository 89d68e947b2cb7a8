//! handoff - negotiated file transfer over TCP
//!
//! `handoff server -f FILE...` offers files; `handoff client -s DIR` previews
//! the offer, confirms, and receives whatever does not already exist.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use handoff::catalog::build_catalog;
use handoff::cli::{Cli, ClientOpts, Command, ServerOpts};
use handoff::client::{Client, FixedAnswer, Outcome, StdinPrompt};
use handoff::logger::{NoopLogger, TextLogger, TransferLogger};
use handoff::server::{shutdown_channel, Server};
use handoff::util::human_size;

// Exit codes
const EXIT_SERVER: u8 = 10;
const EXIT_CLIENT: u8 = 11;
const EXIT_INVALID: u8 = 12;
const EXIT_INTERRUPTED: i32 = 130;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let base_level = match cli.command {
        Command::Server(_) => "info",
        Command::Client(_) => "warn",
    };
    init_tracing(base_level, cli.verbose);

    // Choose logger once; NoopLogger when no record was asked for
    let logger: Arc<dyn TransferLogger> = match cli.log_file {
        Some(ref p) => match TextLogger::new(p) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                eprintln!("Cannot open log file {}: {}", p.display(), e);
                Arc::new(NoopLogger)
            }
        },
        None => Arc::new(NoopLogger),
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to build tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Server(ref opts) => rt.block_on(server_main(opts, logger)),
        Command::Client(ref opts) => rt.block_on(client_main(opts, logger)),
    }
}

fn init_tracing(base: &str, verbose: u8) {
    let level = match verbose {
        0 => base,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn server_main(opts: &ServerOpts, logger: Arc<dyn TransferLogger>) -> ExitCode {
    let config = opts.to_config();

    // Fail at startup rather than on every connection
    let catalog = match build_catalog(&config.files).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID);
        }
    };

    let server = match Server::bind(config.clone()).await {
        Ok(s) => s.with_logger(logger),
        Err(e) => {
            eprintln!("Error: bind {}: {}", config.bind, e);
            return ExitCode::from(EXIT_SERVER);
        }
    };

    println!("Starting server at {}", config.bind);
    let total: u64 = catalog.iter().map(|e| e.size).sum();
    for e in &catalog {
        println!("  {} ({})", e.name, human_size(e.size));
    }
    println!("  {} files, {}", catalog.len(), human_size(total));

    let (handle, signal) = shutdown_channel();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Shutting down (Ctrl-C)...");
        handle.trigger();
    }) {
        eprintln!("Error setting Ctrl-C handler: {}", e);
        return ExitCode::from(EXIT_SERVER);
    }

    match server.run(signal).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_SERVER)
        }
    }
}

async fn client_main(opts: &ClientOpts, logger: Arc<dyn TransferLogger>) -> ExitCode {
    let config = opts.to_config();
    let client = match Client::new(config.clone())
        .with_context(|| format!("{} is not a writable directory", config.save_dir.display()))
    {
        Ok(c) => c.with_logger(logger),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_INVALID);
        }
    };

    if let Err(e) = ctrlc::set_handler(|| {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        std::process::exit(EXIT_INTERRUPTED);
    }) {
        eprintln!("Error setting Ctrl-C handler: {}", e);
    }

    println!(
        "Starting client for {}, saving to {}",
        config.server,
        client.save_dir().root().display()
    );

    match run_client(&client, opts.yes).await {
        Ok(Outcome::Completed(stats)) => {
            println!(
                "Received {} files ({}), skipped {}",
                stats.files_received,
                human_size(stats.bytes_received),
                stats.skipped
            );
            ExitCode::SUCCESS
        }
        Ok(Outcome::Declined) => {
            println!("Download cancelled");
            ExitCode::SUCCESS
        }
        Ok(Outcome::NothingOffered) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_CLIENT)
        }
    }
}

async fn run_client(client: &Client, assume_yes: bool) -> Result<Outcome> {
    let outcome = if assume_yes {
        client.run(&mut FixedAnswer::yes()).await
    } else {
        client.run(&mut StdinPrompt::new()).await
    };
    outcome.context("transfer failed")
}
