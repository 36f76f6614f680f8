//! createlab CLI - talk to CREATE Lab serial and HID devices from the shell.
//!
//! ## Features
//!
//! - List serial ports and HID devices
//! - Send raw commands with echo verification and print the reply
//! - Run the startup handshake of devices that need one
//! - Watch a device and report when it goes away
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use createlab::{
    HandshakeStrategy, IoSettings, SerialConfig,
    connection::{SerialQueue, connect_serial, connect_serial_with_handshake},
};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Baud rate used when neither the command line nor the config sets one.
const DEFAULT_BAUD: u32 = 115_200;

/// createlab - send commands to CREATE Lab serial and HID devices.
///
/// Environment variables:
///   CREATELAB_PORT              - Default serial port
///   CREATELAB_BAUD              - Default baud rate (default: 115200)
///   CREATELAB_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "createlab")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "CREATELAB_PORT")]
    port: Option<String>,

    /// Baud rate of the serial link [default: 115200].
    #[arg(short, long, global = true, env = "CREATELAB_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "CREATELAB_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Offer all ports during selection, not only recognised devices.
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List USB HID devices (needs the `hid` feature).
    ListHid {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Send a command over serial and print the reply.
    Send(SendArgs),

    /// Run the startup handshake and exit.
    Handshake {
        /// Pattern the device sends while waiting for the host (hex).
        #[arg(long, value_parser = parse_hex_bytes)]
        startup: HexBytes,

        /// Pattern to answer with (hex).
        #[arg(long, value_parser = parse_hex_bytes)]
        response: HexBytes,

        /// Pause after the handshake, in milliseconds.
        #[arg(long, value_name = "MS")]
        settle_ms: Option<u64>,
    },

    /// Send a command to a USB HID device and print the reply.
    HidSend(HidSendArgs),

    /// Ping a device until it disconnects or Ctrl-C is pressed.
    Watch(WatchArgs),

    /// Generate or install shell completion scripts.
    Completions {
        /// Shell type (auto-detected when installing).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Install completions into the shell's completion directory.
        #[arg(long)]
        install: bool,
    },
}

/// Arguments of `send`.
#[derive(Args, Debug)]
struct SendArgs {
    /// Command bytes in hex, e.g. "56" or "4D 01 FF".
    #[arg(value_parser = parse_hex_bytes)]
    command: HexBytes,

    /// Number of reply bytes to read after the echo.
    #[arg(short = 'n', long, conflicts_with = "header_size")]
    response_size: Option<usize>,

    /// Size of a reply header that announces the body length.
    #[arg(long, requires = "length_offset")]
    header_size: Option<usize>,

    /// Offset of the length field inside the header.
    #[arg(long, requires = "header_size")]
    length_offset: Option<usize>,

    /// Width and byte order of the length field.
    #[arg(long, value_enum, default_value_t = LengthField::U8)]
    length_field: LengthField,

    #[command(flatten)]
    handshake: HandshakeArgs,

    /// Output as JSON.
    #[arg(long)]
    json: bool,
}

/// Optional handshake before the first command.
#[derive(Args, Debug, Clone, Default)]
struct HandshakeArgs {
    /// Handshake first: pattern the device sends while waiting (hex).
    #[arg(long, value_parser = parse_hex_bytes, requires = "response")]
    startup: Option<HexBytes>,

    /// Handshake first: pattern to answer with (hex).
    #[arg(long, value_parser = parse_hex_bytes, requires = "startup")]
    response: Option<HexBytes>,

    /// Pause after the handshake, in milliseconds.
    #[arg(long, value_name = "MS")]
    settle_ms: Option<u64>,
}

/// Arguments of `hid-send`.
#[derive(Args, Debug)]
struct HidSendArgs {
    /// USB vendor id (hex).
    #[arg(long, value_parser = parse_hex_u16)]
    vid: u16,

    /// USB product id (hex).
    #[arg(long, value_parser = parse_hex_u16)]
    pid: u16,

    /// Input report length in bytes, including the report id.
    #[arg(long, default_value_t = 9)]
    input_len: usize,

    /// Output report length in bytes, including the report id.
    #[arg(long, default_value_t = 9)]
    output_len: usize,

    /// Command payload in hex (without the report id or command id).
    #[arg(value_parser = parse_hex_bytes)]
    command: HexBytes,

    /// Number of reply payload bytes to print.
    #[arg(short = 'n', long, default_value_t = 0)]
    response_size: usize,

    /// How long to wait for the matching reply, in milliseconds.
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    timeout_ms: u64,

    /// Output as JSON.
    #[arg(long)]
    json: bool,
}

/// Arguments of `watch`.
#[derive(Args, Debug)]
struct WatchArgs {
    /// Ping command in hex.
    #[arg(long, value_parser = parse_hex_bytes)]
    ping: HexBytes,

    /// Reply bytes the ping expects after its echo.
    #[arg(short = 'n', long, default_value_t = 0)]
    response_size: usize,

    /// Time between pings, in milliseconds.
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    interval_ms: u64,

    /// Consecutive failed pings before the device counts as lost.
    #[arg(long, default_value_t = 1)]
    failures: u32,

    #[command(flatten)]
    handshake: HandshakeArgs,
}

/// Layout of the length field in a variable-length reply header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LengthField {
    /// One byte.
    U8,
    /// Two bytes, most significant first.
    U16Be,
    /// Two bytes, least significant first.
    U16Le,
}

/// Byte string parsed from hex on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
struct HexBytes(Vec<u8>);

/// Errors that decide the process exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or an ambiguous choice in non-interactive mode.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration file.
    #[error("{0}")]
    Config(String),
    /// The user backed out of a prompt.
    #[error("{0}")]
    Cancelled(String),
}

/// Parse hex bytes such as `4D01FF`, `4D 01 FF`, `0x4D,0x01`.
fn parse_hex_bytes(s: &str) -> Result<HexBytes, String> {
    let mut bytes = Vec::new();
    for token in s
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("Invalid hex bytes: {token}"));
        }
        if digits.len() % 2 != 0 {
            return Err(format!("Odd number of hex digits: {token}"));
        }
        for pair in digits.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
            bytes.push(u8::from_str_radix(pair, 16).map_err(|e| format!("{pair}: {e}"))?);
        }
    }

    if bytes.is_empty() {
        return Err("Expected at least one byte".to_string());
    }
    Ok(HexBytes(bytes))
}

/// Parse a hex u16 with optional `0x` prefix.
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let cleaned = s.trim().replace('_', "");
    let digits = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .unwrap_or(&cleaned);
    u16::from_str_radix(digits, 16).map_err(|e| format!("Invalid hex id '{s}': {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "createlab v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path).map_err(|e| CliError::Config(e.to_string()))?
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json)?;
        },
        Commands::ListHid { json } => {
            commands::hid::cmd_list_hid(*json)?;
        },
        Commands::Send(args) => {
            commands::send::cmd_send(cli, &mut config, args)?;
        },
        Commands::Handshake {
            startup,
            response,
            settle_ms,
        } => {
            let args = HandshakeArgs {
                startup: Some(startup.clone()),
                response: Some(response.clone()),
                settle_ms: *settle_ms,
            };
            commands::send::cmd_handshake(cli, &mut config, &args)?;
        },
        Commands::HidSend(args) => {
            commands::hid::cmd_hid_send(cli, &config, args)?;
        },
        Commands::Watch(args) => {
            commands::watch::cmd_watch(cli, &mut config, args)?;
        },
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)?;
            } else {
                let shell = shell
                    .or_else(commands::completions::detect_shell_type)
                    .ok_or_else(|| {
                        CliError::Usage(
                            "specify a shell type, e.g.: createlab completions bash".to_string(),
                        )
                    })?;
                commands::completions::cmd_completions(shell);
            }
        },
    }

    Ok(())
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => 2,
                CliError::Config(_) => 3,
                CliError::Cancelled(_) => 130,
            };
        }
        if let Some(lib_err) = cause.downcast_ref::<createlab::Error>() {
            match lib_err {
                createlab::Error::DeviceNotFound | createlab::Error::ClaimConflict(_) => return 4,
                createlab::Error::Config(_) => return 3,
                _ => {},
            }
        }
    }
    1
}

/// Get serial port from CLI args, config or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember if not a known device and interactive mode
    if !selected.is_known && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.path().to_string())
}

/// Baud rate from the command line, then the config, then the default.
fn baud_rate(cli: &Cli, config: &Config) -> u32 {
    cli.baud.or(config.serial.baud).unwrap_or(DEFAULT_BAUD)
}

/// Build the handshake requested by `args`, if any.
fn handshake_strategy(
    args: &HandshakeArgs,
    io: IoSettings,
    config: &Config,
) -> Option<HandshakeStrategy> {
    let (startup, response) = (args.startup.as_ref()?, args.response.as_ref()?);
    let mut handshake = HandshakeStrategy::new(startup.0.clone(), response.0.clone()).with_settings(io);
    if let Some(delay) = args
        .settle_ms
        .map(Duration::from_millis)
        .or_else(|| config.settle_delay())
    {
        handshake = handshake.with_settle_delay(delay);
    }
    Some(handshake)
}

/// Select a port, open it and run the handshake if one was requested.
fn open_serial(cli: &Cli, config: &mut Config, handshake: &HandshakeArgs) -> Result<SerialQueue> {
    let port = get_port(cli, config)?;
    let baud = baud_rate(cli, config);
    let serial = SerialConfig::new(&port, baud);
    let settings = config.queue_settings();

    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("🔌").cyan(),
            style(&port).yellow(),
            baud
        );
    }

    match handshake_strategy(handshake, config.io_settings(), config) {
        Some(handshake) => {
            let spinner = spinner(cli, "Waiting for the device to start up...");
            let result = connect_serial_with_handshake(&serial, handshake, settings);
            spinner.finish_and_clear();
            result.with_context(|| format!("Handshake on {port} failed"))
        },
        None => connect_serial(&serial, settings).with_context(|| format!("Failed to open {port}")),
    }
}

/// Spinner on stderr, hidden in quiet mode or without a terminal.
fn spinner(cli: &Cli, message: &'static str) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
