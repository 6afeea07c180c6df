use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::format::{to_json, write_text, write_trace};
use crate::core::{
    config::DetectorConfig,
    detection::{CancellationToken, CardDetectionService},
    reader::{PcscReader, SmartCardService},
    technology::CardTechnology,
    trace::RecordingService,
    utils::format_hex_spaced,
};

#[derive(Parser)]
#[command(name = "cred-bench")]
#[command(about = "Identify access-control credential technologies on a smart card")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available PCSC readers
    List {
        /// Show detailed information about readers
        #[arg(short = 'l', long)]
        detailed: bool,
    },

    /// Scan the card on a reader and report its credential technologies
    Scan {
        /// Reader name or index (default: first reader)
        #[arg(short, long)]
        reader: Option<String>,

        /// Output results as JSON
        #[arg(short, long)]
        json: bool,

        /// Print every APDU exchanged during the scan
        #[arg(short, long)]
        trace: bool,

        /// Detector configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::List { detailed } => cmd_list(detailed),
        Commands::Scan {
            reader,
            json,
            trace,
            config,
        } => cmd_scan(reader.as_deref(), json, trace, config.as_deref()),
    }
}

fn cmd_list(detailed: bool) -> Result<()> {
    let reader = PcscReader::new().context("Failed to initialize PCSC")?;

    let readers = reader.readers().context("Failed to list readers")?;

    if readers.is_empty() {
        println!("No PCSC readers found.");
        return Ok(());
    }

    println!("Available PCSC readers:");
    for (i, reader_info) in readers.iter().enumerate() {
        if detailed {
            println!("  [{}] {}", i, reader_info.name);
            println!(
                "      Status: {}",
                if reader_info.card_present {
                    "Card present"
                } else {
                    "No card"
                }
            );
            if let Some(ref atr) = reader_info.atr {
                println!("      ATR: {}", format_hex_spaced(atr));
            }
        } else if reader_info.card_present {
            println!("  [{}] {} [CARD]", i, reader_info.name);
        } else {
            println!("  [{}] {}", i, reader_info.name);
        }
    }

    Ok(())
}

fn cmd_scan(
    reader_arg: Option<&str>,
    json: bool,
    trace: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => DetectorConfig::from_json_file(path)?,
        None => DetectorConfig::default(),
    };

    let reader = PcscReader::new().context("Failed to initialize PCSC")?;
    let reader_name = resolve_reader_name(&reader, reader_arg)?;

    let service = RecordingService::new(reader);
    let transcript = service.transcript().clone();
    let detector = Arc::new(CardDetectionService::with_config(service, &config));

    eprint!("Scanning {reader_name}...");
    let progress: Box<dyn FnMut(CardTechnology) + Send> =
        Box::new(|technology: CardTechnology| {
            if !technology.is_unknown() {
                eprint!(" {technology}");
            }
        });

    let outcome = detector
        .spawn(reader_name.clone(), Some(progress), CancellationToken::new())
        .join()
        .map_err(|_| anyhow!("Detection thread panicked"))?;

    let result = match outcome {
        Ok(result) => {
            eprintln!(" done.");
            eprintln!();
            result
        }
        Err(e) => {
            eprintln!(" failed.");
            return Err(e).with_context(|| format!("Scan of '{reader_name}' failed"));
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        let mut value = to_json(&result);
        if trace {
            value["apduTrace"] = serde_json::to_value(transcript.exchanges())
                .context("Failed to serialize APDU trace")?;
        }
        let rendered =
            serde_json::to_string_pretty(&value).context("Failed to serialize result")?;
        writeln!(out, "{rendered}")?;
    } else {
        write_text(&result, &mut out)?;
        if trace {
            write_trace(&transcript.exchanges(), &transcript.statistics(), &mut out)?;
        }
    }

    Ok(())
}

/// Resolve a reader given by index or name; the first reader by default
fn resolve_reader_name<S: SmartCardService>(
    service: &S,
    name_or_index: Option<&str>,
) -> Result<String> {
    let readers = service.readers().context("Failed to list readers")?;
    if readers.is_empty() {
        bail!("No PCSC readers found");
    }

    let Some(name_or_index) = name_or_index else {
        return Ok(readers[0].name.clone());
    };

    // Try to parse as index first
    if let Ok(index) = name_or_index.parse::<usize>() {
        return match readers.get(index) {
            Some(reader_info) => Ok(reader_info.name.clone()),
            None => bail!(
                "Reader index {} out of range (0-{})",
                index,
                readers.len() - 1
            ),
        };
    }

    if readers.iter().any(|r| r.name == name_or_index) {
        Ok(name_or_index.to_string())
    } else {
        let available: Vec<&str> = readers.iter().map(|r| r.name.as_str()).collect();
        bail!(
            "Reader not found: {name_or_index} (available: {})",
            available.join(", ")
        )
    }
}
