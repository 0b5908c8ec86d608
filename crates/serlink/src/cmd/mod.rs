use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use serlink_frame::{FrameConfig, DEFAULT_MAX_FRAME_LEN};
use serlink_transport::{SerialConfig, SerialPort, DEFAULT_BAUD};

use crate::exit::{transport_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod chat;
pub mod listen;
pub mod send;
pub mod version;

/// How often the event loop checks for Ctrl-C.
pub const TICK: Duration = Duration::from_millis(100);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Exchange text lines reliably with a peer.
    Chat(ChatArgs),
    /// Print every verified frame received on a device.
    Listen(ListenArgs),
    /// Send a single checksummed frame, without acknowledgement.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Chat(args) => chat::run(args),
        Command::Listen(args) => listen::run(args, format),
        Command::Send(args) => send::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SerialArgs {
    /// Serial device path.
    #[arg(env = "SERLINK_DEVICE")]
    pub device: PathBuf,
    /// Line speed in baud.
    #[arg(long, env = "SERLINK_BAUD", default_value_t = DEFAULT_BAUD)]
    pub baud: u32,
}

impl SerialArgs {
    pub fn open(&self) -> CliResult<SerialPort> {
        let config = SerialConfig { baud: self.baud };
        SerialPort::open(&self.device, &config)
            .map_err(|err| transport_error("open failed", err))
    }

    pub fn display(&self) -> String {
        self.device.display().to_string()
    }
}

#[derive(Args, Debug)]
pub struct FrameArgs {
    /// Discard a partial frame after this long without a byte (e.g. 500ms, 2s).
    #[arg(long, env = "SERLINK_FRAME_TIMEOUT", default_value = "500ms")]
    pub frame_timeout: String,
    /// Frame length above which a warning is logged.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: usize,
}

impl FrameArgs {
    pub fn config(&self) -> CliResult<FrameConfig> {
        Ok(FrameConfig {
            max_frame_len: self.max_frame_len,
            frame_timeout: parse_duration(&self.frame_timeout)?,
        })
    }
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    #[command(flatten)]
    pub serial: SerialArgs,
    #[command(flatten)]
    pub frame: FrameArgs,
    /// Retransmit unacknowledged data after this long (e.g. 1s, 250ms).
    #[arg(long, env = "SERLINK_ACK_TIMEOUT", default_value = "1s")]
    pub ack_timeout: String,
    /// Give up on a message after this many retransmissions. Default: never.
    #[arg(long)]
    pub max_retransmissions: Option<u32>,
    /// Keep running this long after stdin closes, for acknowledgements to
    /// arrive.
    #[arg(long, default_value = "2s")]
    pub linger: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub serial: SerialArgs,
    #[command(flatten)]
    pub frame: FrameArgs,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub serial: SerialArgs,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Send the payload without a checksum trailer.
    #[arg(long)]
    pub no_checksum: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

/// Clear the returned flag on Ctrl-C.
pub fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}
