//! usbgate command-line interface: device registration and daemon inspection.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::warn;
use schemars::schema_for;
use serde_json::{to_string_pretty, Value};
use std::io::{self, BufRead, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;
use usbgate_core::{config::DEFAULT_CONFIG_PATH, logging, Candidate, DeviceId, Gate, GateConfig};
use usbgate_udev::UdevPlatform;

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "usbgate",
    version,
    about = "Manage the removable devices allowed to unlock this machine."
)]
struct Cli {
    /// Path to the usbgate configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List removable devices attached right now, with their identifiers.
    Candidates,

    /// Authorize a device. Without an identifier, pick from attached devices.
    Register {
        /// Device identifier (usually the hardware serial).
        id: Option<String>,
    },

    /// Revoke a device's authorization. Without an identifier, pick from the registry.
    Remove {
        /// Device identifier to remove.
        id: Option<String>,
    },

    /// List authorized device identifiers.
    List,

    /// Ask the running daemon whether access is currently granted.
    Status {
        /// Status endpoint address; defaults to daemon.status_addr from the config.
        #[arg(long)]
        addr: Option<SocketAddr>,
    },

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// Path to the configuration file to validate.
        #[arg(short = 'f', long, default_value = DEFAULT_CONFIG_PATH)]
        file: PathBuf,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    logging::init("warn");
    let cli = Cli::parse();

    if let Commands::Validate { file, schema } = &cli.command {
        return validate(file, *schema);
    }

    let config = GateConfig::load_or_default(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from {}",
            cli.config.display()
        )
    })?;

    if let Commands::Status { addr } = cli.command {
        let addr = match addr {
            Some(addr) => addr,
            None => config
                .daemon
                .status_addr
                .parse()
                .context("parse daemon.status_addr")?,
        };
        return print_status(addr);
    }

    let gate = Gate::from_config(&config, UdevPlatform::from_config(&config));

    match cli.command {
        Commands::Candidates => {
            let candidates = gate.list_connected_candidates()?;
            if candidates.is_empty() {
                println!("No removable devices found.");
            }
            print_candidates(&candidates, &gate.list_authorized());
        }
        Commands::Register { id } => {
            let id = match id {
                Some(value) => DeviceId::new(value)?,
                None => {
                    let candidates = gate.list_connected_candidates()?;
                    if candidates.is_empty() {
                        bail!("no removable devices found; plug the device in or pass its identifier");
                    }
                    print_candidates(&candidates, &gate.list_authorized());
                    let index = prompt_selection("Select a device to register", candidates.len())?;
                    candidates[index].id.clone()
                }
            };
            if gate.register_device(id.clone()) {
                println!("Device {id} registered.");
                report_persistence(&gate);
            } else {
                println!("Device {id} is already registered.");
            }
        }
        Commands::Remove { id } => {
            let id = match id {
                Some(value) => DeviceId::new(value)?,
                None => {
                    let registered = gate.list_authorized();
                    if registered.is_empty() {
                        bail!("no registered devices to remove");
                    }
                    print_ids(&registered);
                    let index = prompt_selection("Select a device to remove", registered.len())?;
                    registered[index].clone()
                }
            };
            if gate.remove_device(&id) {
                println!("Device {id} removed.");
                report_persistence(&gate);
            } else {
                println!("Device {id} is not registered.");
            }
        }
        Commands::List => {
            let registered = gate.list_authorized();
            if registered.is_empty() {
                println!("No registered devices.");
            } else {
                print_ids(&registered);
            }
        }
        Commands::Status { .. } | Commands::Validate { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn validate(file: &Path, schema: bool) -> Result<()> {
    if schema {
        let schema = schema_for!(GateConfig);
        println!("{}", to_string_pretty(&schema)?);
        return Ok(());
    }

    let cfg = GateConfig::load(file)
        .with_context(|| format!("failed to load configuration from {}", file.display()))?;
    let issues = cfg.validate();
    if !issues.is_empty() {
        eprintln!("Configuration validation failed:");
        for issue in issues {
            eprintln!("  - {issue}");
        }
        std::process::exit(1);
    }

    println!(
        "Configuration valid (registry at {}).",
        cfg.registry_path().display()
    );
    if cfg.identity.allow_path_fallback {
        println!("  note: path fallback is enabled; serial-less devices are tied to their port.");
    }
    Ok(())
}

/// Tell the operator whether the change reached disk; a running daemon
/// re-reads the store itself once it has.
fn report_persistence(gate: &Gate<UdevPlatform>) {
    if gate.registry_stale() {
        warn!("registry file could not be written; the change is not persisted");
        eprintln!(
            "warning: the registry file could not be written; the running daemon will not see this change."
        );
        return;
    }
    println!(
        "Saved to {}; usbgate-daemon applies it from the next device event.",
        gate.registry_path().display()
    );
}

fn print_candidates(candidates: &[Candidate], registered: &[DeviceId]) {
    for (number, candidate) in candidates.iter().enumerate() {
        let node = candidate
            .handle
            .devnode
            .as_ref()
            .map(|node| node.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        let marker = if registered.contains(&candidate.id) {
            " [registered]"
        } else {
            ""
        };
        println!("{:>3}. {:<32} {}{}", number + 1, candidate.id, node, marker);
    }
}

fn print_ids(ids: &[DeviceId]) {
    for (number, id) in ids.iter().enumerate() {
        println!("{:>3}. {}", number + 1, id);
    }
}

/// Prompt on stdin until the operator enters a valid 1-based choice or an empty line.
fn prompt_selection(prompt: &str, count: usize) -> Result<usize> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{prompt} [1-{count}, empty to abort]: ");
        io::stdout().flush().ok();

        let Some(line) = lines.next() else {
            bail!("aborted");
        };
        let line = line?;
        if line.trim().is_empty() {
            bail!("aborted");
        }
        match parse_selection(&line, count) {
            Ok(index) => return Ok(index),
            Err(message) => println!("{message}"),
        }
    }
}

/// Turn a 1-based menu choice into an index, rejecting anything out of range.
fn parse_selection(input: &str, count: usize) -> std::result::Result<usize, String> {
    let choice: usize = input
        .trim()
        .parse()
        .map_err(|_| "Please enter a valid number.".to_string())?;
    if choice == 0 || choice > count {
        return Err(format!("Invalid device number {choice}; choose 1-{count}."));
    }
    Ok(choice - 1)
}

fn print_status(addr: SocketAddr) -> Result<()> {
    let body = fetch_status(addr)
        .with_context(|| format!("query usbgate-daemon at {addr}; is it running?"))?;
    let status: Value = serde_json::from_str(&body).context("decode status response")?;

    let authenticated = status["authenticated"].as_bool().unwrap_or(false);
    println!(
        "Status: {}",
        if authenticated {
            "authenticated"
        } else {
            "not authenticated"
        }
    );
    if let Some(count) = status["registered"].as_u64() {
        println!("Registered devices: {count}");
    }
    if status["registry_stale"].as_bool().unwrap_or(false) {
        println!("Warning: daemon could not persist its registry; on-disk copy is stale.");
    }
    Ok(())
}

fn fetch_status(addr: SocketAddr) -> Result<String> {
    let timeout = Duration::from_secs(3);
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.write_all(b"GET /status HTTP/1.0\r\n\r\n")?;

    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    split_body(&response)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("malformed status response"))
}

fn split_body(response: &str) -> Option<&str> {
    let (head, body) = response.split_once("\r\n\r\n")?;
    head.starts_with("HTTP/1.1 200").then_some(body)
}
