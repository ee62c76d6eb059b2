//! Replays ledgerplay transactions from a YAML fixture.
//!
//! Usage: ledgerplay replay --config fixtures/replay.yaml [--verbose] [--output report.txt]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledgerplay_cli::{load_config, replay};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "ledgerplay")]
#[command(about = "Replay and audit ledgerplay transactions")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate every transaction of a fixture and print each action's outcome
    Replay {
        /// Fixture describing currencies, base state and transactions
        #[arg(short, long)]
        config: PathBuf,

        /// Print updated states and debug logs
        #[arg(short, long, default_value_t = false)]
        verbose: bool,

        /// Also write the report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Writes to stdout and, optionally, a report file.
struct Report {
    stdout: io::Stdout,
    file: Option<BufWriter<File>>,
}

impl Write for Report {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdout.write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("ledgerplay failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Replay {
            config,
            verbose,
            output,
        } => {
            let validated = load_config(&config)?
                .validate()
                .context("Invalid config file")?;

            let level = if verbose {
                Level::DEBUG
            } else {
                validated.log_level
            };
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(io::stderr)
                .init();
            info!(config = %config.display(), "loaded config file");

            let file = output
                .as_ref()
                .map(|path| {
                    File::create(path)
                        .map(BufWriter::new)
                        .with_context(|| format!("Failed to create output file {}", path.display()))
                })
                .transpose()?;
            let mut report = Report {
                stdout: io::stdout(),
                file,
            };
            let outcome = replay(&validated, verbose, &mut report)?;
            report.flush()?;
            info!(
                transactions = outcome.transactions,
                evaluations = outcome.evaluations,
                failures = outcome.failures,
                "replay complete"
            );
            Ok(())
        }
    }
}
