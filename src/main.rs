//! CLI Entry Point for rust_indi
//!
//! Provides command-line interface for:
//! - Running the simulated device as a driver process (`simulate`)
//! - Validating a configuration file (`check-config`)
//! - Converting sexagesimal values (`sexa format` / `sexa parse`)
//!
//! # Driver process
//!
//! A hub starts the driver with its stdin and stdout connected to the hub.
//! Outbound messages go to stdout, which is probed once: a local socket gets
//! batched messages with BLOB descriptors, anything else a plain byte stream.
//! Stdin is read on a dedicated thread and fed to the tokio event loop, which
//! also drives the polling timer. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! rust_indi simulate --config config/rust_indi.toml
//! rust_indi check-config config/rust_indi.toml
//! rust_indi sexa format -- -12.51 --format %10.6m
//! ```

use std::io::{self, Read};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rust_indi::config::{DriverConfig, DEFAULT_CONFIG_PATH};
use rust_indi::dispatch::Dispatcher;
use rust_indi::logging;
use rust_indi::number_format::number_format;
use rust_indi::scheduler::TimerQueue;
use rust_indi::sexagesimal::parse_sexagesimal;
use rust_indi::simulator::Simulator;
use rust_indi::transport::{detect_channel, recv_with_fds, ChannelKind, Connection};
use rust_indi::wire::MessageDecoder;
use rust_indi::DriverIo;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "rust_indi")]
#[command(about = "Device-control property protocol driver tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulated device over stdin/stdout
    Simulate {
        /// Configuration file (defaults to config/rust_indi.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Path to the TOML file
        path: Option<PathBuf>,
    },

    /// Sexagesimal conversions
    Sexa {
        #[command(subcommand)]
        op: SexaCommand,
    },
}

#[derive(Subcommand)]
enum SexaCommand {
    /// Render a number with a display format
    Format {
        /// Value to render
        #[arg(allow_negative_numbers = true)]
        value: f64,

        /// printf-style or %<w>.<f>m format
        #[arg(long, default_value = "%10.6m")]
        format: String,
    },

    /// Parse D:M:S text into a number
    Parse {
        /// Text such as 12:30:36 or -0:30
        #[arg(allow_hyphen_values = true)]
        text: String,
    },
}

/// Bytes and descriptors read together from stdin.
struct Inbound {
    bytes: Vec<u8>,
    fds: Vec<OwnedFd>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate { config } => simulate(config).await,
        Commands::CheckConfig { path } => check_config(path),
        Commands::Sexa { op } => sexa(op),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<DriverConfig> {
    let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    DriverConfig::load_from(&path).with_context(|| format!("loading {}", path.display()))
}

fn check_config(path: Option<PathBuf>) -> Result<()> {
    let config = load_config(path)?;
    println!("✅ Configuration is valid");
    println!("   Device: {}", config.driver.device);
    println!("   Poll period: {} ms", config.driver.poll_period_ms);
    println!(
        "   Channel: {:?} (chunk {} B, flush at {} B, {} attachments)",
        config.io.channel, config.io.chunk_size, config.io.flush_threshold, config.io.max_attachments
    );
    println!("   Logging: {} ({})", config.application.log_level, config.application.log_format);
    Ok(())
}

fn sexa(op: SexaCommand) -> Result<()> {
    match op {
        SexaCommand::Format { value, format } => println!("{}", number_format(value, &format)),
        SexaCommand::Parse { text } => println!("{}", parse_sexagesimal(&text)?),
    }
    Ok(())
}

async fn simulate(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    logging::init_from_config(&config)?;
    info!(device = %config.driver.device, "starting simulator");

    let io = DriverIo::new(Connection::stdout(&config.io)?);
    let mut dispatcher = Dispatcher::new(io.clone());
    let mut sim = Simulator::new(&config.driver.device)?;

    let mut timers: TimerQueue<Simulator> = TimerQueue::new();
    let poll_io = io.clone();
    timers.add_periodic(Duration::from_millis(config.driver.poll_period_ms), move |sim| {
        if let Err(e) = sim.poll(&poll_io) {
            warn!(error = %e, "poll failed");
        }
    });

    let (tx, mut rx) = mpsc::channel::<Inbound>(64);
    let max_fds = config.io.max_attachments;
    std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || read_stdin(tx, max_fds))
        .context("spawning stdin reader")?;

    let mut decoder = MessageDecoder::new();
    loop {
        let deadline = timers.next_deadline();
        tokio::select! {
            inbound = rx.recv() => {
                let Some(Inbound { bytes, fds }) = inbound else {
                    info!("hub closed the connection");
                    break;
                };
                decoder.push_fds(fds);
                decoder.push_bytes(&bytes);
                loop {
                    match decoder.next_message() {
                        Ok(Some(root)) => {
                            if let Err(e) = dispatcher.dispatch(&root, &mut sim) {
                                warn!(element = %root.name, error = %e, "message rejected");
                            }
                        }
                        Ok(None) => break,
                        Err(e) => warn!(error = %e, "discarding malformed input"),
                    }
                }
            }
            _ = wait_until(deadline) => {
                let fired = timers.run_due(std::time::Instant::now(), &mut sim);
                debug!(fired, "timers ran");
            }
        }
    }

    sim.shutdown(&io)?;
    Ok(())
}

async fn wait_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

/// Forward stdin to the event loop until EOF or the loop goes away.
fn read_stdin(tx: mpsc::Sender<Inbound>, max_fds: usize) {
    let stdin = io::stdin();
    let mut buf = vec![0u8; READ_CHUNK];

    let socket = match detect_channel(stdin.as_fd()) {
        ChannelKind::Socket => match stdin.as_fd().try_clone_to_owned() {
            Ok(fd) => Some(UnixStream::from(fd)),
            Err(e) => {
                warn!(error = %e, "cannot duplicate stdin, reading it as a stream");
                None
            }
        },
        ChannelKind::Stream => None,
    };

    loop {
        let read = match &socket {
            Some(sock) => recv_with_fds(sock, &mut buf, max_fds),
            None => stdin.lock().read(&mut buf).map(|n| (n, Vec::new())),
        };
        let (n, fds) = match read {
            Ok((0, fds)) if fds.is_empty() => break,
            Ok(received) => received,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        };
        let chunk = Inbound {
            bytes: buf[..n].to_vec(),
            fds,
        };
        if tx.blocking_send(chunk).is_err() {
            break;
        }
    }
    debug!("stdin reader finished");
}
