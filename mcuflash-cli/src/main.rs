//! mcuflash CLI - send firmware images to microcontrollers over UART.
//!
//! ## Features
//!
//! - Optional hex find/replace patch of the image before sending
//! - Chunked transfer with progress display
//! - Concurrent printing of device responses
//! - Response-only monitor mode
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support
//! - Internationalization (i18n) support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    commands::send::SendArgs,
    config::Config,
    console::style,
    env_logger::Env,
    log::debug,
    mcuflash::{CancelToken, port::DEFAULT_BAUD_RATE},
    serial::{SerialOptions, ask_remember_port, select_serial_port},
    std::{
        env,
        path::PathBuf,
        sync::{
            OnceLock,
            atomic::{AtomicBool, Ordering},
        },
    },
};

mod commands;
mod config;
mod help;
mod serial;

// Initialize i18n with locale files from the locales directory
rust_i18n::i18n!("locales", fallback = "en");

/// Name of the installed binary.
pub(crate) const BIN_NAME: &str = "mcuflash";

/// Exit code for usage errors (bad arguments, no port to pick).
pub(crate) const EXIT_USAGE: i32 = 2;
/// Exit code for configuration errors.
pub(crate) const EXIT_CONFIG: i32 = 3;
/// Exit code when the serial device cannot be found or opened.
pub(crate) const EXIT_DEVICE: i32 = 4;
/// Exit code after Ctrl+C.
pub(crate) const EXIT_CANCELLED: i32 = 130;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl+C handler.
static INTERRUPT: OnceLock<CancelToken> = OnceLock::new();

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Token flipped by Ctrl+C.
pub(crate) fn interrupt_token() -> CancelToken {
    INTERRUPT.get_or_init(CancelToken::new).clone()
}

/// Whether Ctrl+C was pressed.
pub(crate) fn was_interrupted() -> bool {
    interrupt_token().is_cancelled()
}

/// First Ctrl+C requests a stop; a second one exits immediately.
fn install_interrupt_handler() {
    let token = interrupt_token();
    let result = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(EXIT_CANCELLED);
        }
        token.cancel();
    });
    if let Err(e) = result {
        debug!("Could not install Ctrl+C handler: {e}");
    }
}

/// Errors raised by the CLI itself, each with its own exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation.
    #[error("{0}")]
    Usage(String),
    /// Invalid or unreadable configuration.
    #[error("{0}")]
    Config(String),
    /// Stopped by the user.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => EXIT_USAGE,
            Self::Config(_) => EXIT_CONFIG,
            Self::Cancelled(_) => EXIT_CANCELLED,
        }
    }
}

/// Map an error chain to the process exit code.
pub(crate) fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return cli.exit_code();
        }
        if let Some(lib) = cause.downcast_ref::<mcuflash::Error>() {
            return match lib {
                mcuflash::Error::PortOpen { .. } => EXIT_DEVICE,
                e if e.is_config() => EXIT_CONFIG,
                _ => 1,
            };
        }
    }
    1
}

/// mcuflash - send firmware images to microcontrollers over UART.
///
/// Environment variables:
///   MCUFLASH_PORT              - Default serial port
///   MCUFLASH_BAUD              - Default baud rate (default: 115200)
///   MCUFLASH_LANG              - Language/locale (en, zh-CN)
///   MCUFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "mcuflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "MCUFLASH_PORT")]
    pub port: Option<String>,

    /// Baud rate (default: 115200).
    #[arg(short, long, global = true, env = "MCUFLASH_BAUD")]
    pub baud: Option<u32>,

    /// Language/locale for messages (e.g., en, zh-CN).
    #[arg(long, global = true, env = "MCUFLASH_LANG")]
    pub lang: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "MCUFLASH_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    pub confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    pub list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Send a firmware image, optionally patched, and print device responses.
    Send(SendArgs),

    /// Patch a firmware image without sending it.
    Patch {
        /// Firmware image to patch.
        file: PathBuf,

        /// Hex byte pattern to search for.
        #[arg(long, value_name = "HEX")]
        find: String,

        /// Hex bytes to put in its place.
        #[arg(long, value_name = "HEX")]
        replace: String,

        /// Directory for the patched image (default: desktop).
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Print device responses without sending anything.
    Monitor {
        /// Output one JSON object per response to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

impl Cli {
    /// Baud rate from the command line/environment, then config, then default.
    pub(crate) fn baud_rate(&self, config: &Config) -> u32 {
        self.baud
            .or(config.port.connection.baud)
            .unwrap_or(DEFAULT_BAUD_RATE)
    }
}

/// Get serial port from CLI args or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    // Offer to remember unknown USB devices
    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Value of `--lang` if given, looked up before clap parses anything so that
/// help output is already localized.
fn early_lang(args: &[String]) -> Option<String> {
    args.iter().enumerate().find_map(|(i, arg)| {
        arg.strip_prefix("--lang=")
            .map(str::to_string)
            .or_else(|| (arg == "--lang").then(|| args.get(i + 1).cloned()).flatten())
    })
}

fn init_logging(cli: &Cli) {
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
}

fn run() -> Result<()> {
    let raw_args: Vec<String> = env::args().collect();

    let locale = early_lang(&raw_args)
        .or_else(|| env::var("MCUFLASH_LANG").ok())
        .unwrap_or_else(help::detect_locale);
    rust_i18n::set_locale(&locale);

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Localized help for -h/--help and bare invocation
    if raw_args.len() <= 1 || raw_args.iter().skip(1).any(|a| a == "-h" || a == "--help") {
        help::print_localized_help(&raw_args);
        return Ok(());
    }

    let cli = Cli::parse();
    init_logging(&cli);
    debug!(
        "{BIN_NAME} v{} (verbose level: {}, locale: {locale})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let mut config = match &cli.config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    install_interrupt_handler();

    match &cli.command {
        Commands::Send(args) => commands::send::cmd_send(&cli, &mut config, args),
        Commands::Patch {
            file,
            find,
            replace,
            output_dir,
            json,
        } => commands::patch::cmd_patch(
            &cli,
            &config,
            file,
            find,
            replace,
            output_dir.as_deref(),
            *json,
        ),
        Commands::Monitor { json } => commands::monitor::cmd_monitor(&cli, &mut config, *json),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.or_else(commands::completions::detect_shell_type).ok_or_else(|| {
                    CliError::Usage(rust_i18n::t!("completions.shell_required").to_string())
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}
