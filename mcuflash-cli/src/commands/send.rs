//! Send command implementation.
//!
//! Optional patch, then the chunked transfer on this thread while a
//! background listener prints whatever the device answers.

use {
    super::patch::{apply_patch, report_patch, requested_patch, resolve_output_dir},
    crate::{Cli, CliError, config::Config, get_port, use_fancy_output, was_interrupted},
    anyhow::{Context, Result},
    clap::Args,
    console::style,
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::{debug, warn},
    mcuflash::{
        FlashSession, ListenConfig, ListenExit, ListenerHandle, ResponseEvent, SessionEvent,
        TransferJob, monitor::DEFAULT_POLL_INTERVAL, transfer::DEFAULT_CHUNK_SIZE,
    },
    rust_i18n::t,
    std::{
        path::PathBuf,
        thread,
        time::{Duration, Instant},
    },
};

/// How long a listener gets to wind down before it is detached.
pub(crate) const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Sleep between checks while waiting for Ctrl+C.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Arguments of `mcuflash send`.
#[derive(Args, Debug)]
pub(crate) struct SendArgs {
    /// Firmware image to send (.bin or .hex, sent as raw bytes).
    pub file: PathBuf,

    /// Bytes written per chunk (default: 4).
    #[arg(long, value_name = "BYTES", value_parser = parse_chunk_size)]
    pub chunk_size: Option<usize>,

    /// Pause between chunks in milliseconds (default: none).
    #[arg(long, value_name = "MS")]
    pub chunk_delay: Option<u64>,

    /// Hex byte pattern to replace before sending.
    #[arg(long, value_name = "HEX", requires = "replace")]
    pub find: Option<String>,

    /// Hex bytes to put in place of every --find match.
    #[arg(long, value_name = "HEX", requires = "find")]
    pub replace: Option<String>,

    /// Directory for the patched image (default: desktop).
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Do not read device responses.
    #[arg(long, conflicts_with = "listen_for")]
    pub no_listen: bool,

    /// Stop listening this many seconds after the transfer instead of waiting for Ctrl+C.
    #[arg(long, value_name = "SECS")]
    pub listen_for: Option<u64>,

    /// Output one JSON object per event to stdout.
    #[arg(long)]
    pub json: bool,
}

fn parse_chunk_size(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("chunk size must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled(t!("error.interrupted").to_string()).into())
    } else {
        Ok(())
    }
}

/// Print one event as a JSON line on stdout.
pub(crate) fn emit_json(event: &SessionEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => debug!("Could not serialize {event:?}: {e}"),
    }
}

/// Print a device response for humans: text on stdout, problems on stderr.
pub(crate) fn print_response(event: &ResponseEvent) {
    match event {
        ResponseEvent::Line { text } => println!("{}", t!("send.response", text = text)),
        ResponseEvent::Malformed { lossy, .. } => {
            eprintln!("{} {}", style("⚠").yellow(), t!("send.malformed", text = lossy));
        },
        ResponseEvent::LinkError { message } => {
            eprintln!("{} {}", style("✗").red(), t!("send.link_error", error = message));
        },
    }
}

/// Listener settings from the config file.
pub(crate) fn listen_config(config: &Config) -> ListenConfig {
    ListenConfig {
        poll_interval: config.poll_interval().unwrap_or(DEFAULT_POLL_INTERVAL),
        ..ListenConfig::default()
    }
}

/// Build the transfer job; command line values win over the config file.
fn build_job(args: &SendArgs, config: &Config, port: String, baud: u32, source: PathBuf) -> TransferJob {
    let chunk_size = args
        .chunk_size
        .or(config.transfer.chunk_size)
        .unwrap_or(DEFAULT_CHUNK_SIZE);
    let chunk_delay = match args.chunk_delay {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
        None => config.chunk_delay(),
    };

    TransferJob::new(port, baud, source)
        .with_chunk_size(chunk_size)
        .with_chunk_delay(chunk_delay)
}

fn progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
        .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("#>-"));
    pb.set_style(bar_style);
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Block until Ctrl+C, the deadline, or the listener ending on its own.
pub(crate) fn wait_for_listener(listener: &ListenerHandle, listen_for: Option<Duration>) {
    let deadline = listen_for.map(|d| Instant::now() + d);
    while !was_interrupted() && !listener.is_finished() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        thread::sleep(WAIT_SLICE);
    }
}

/// Send command implementation.
pub(crate) fn cmd_send(cli: &Cli, config: &mut Config, args: &SendArgs) -> Result<()> {
    let quiet = cli.quiet || args.json;

    if !args.file.is_file() {
        return Err(CliError::Config(
            t!("error.file_not_found", path = args.file.display().to_string()).to_string(),
        )
        .into());
    }

    // Patch step
    let source = match requested_patch(args.find.as_deref(), args.replace.as_deref()) {
        Some((find, replace)) => {
            let output_dir = resolve_output_dir(args.output_dir.as_deref(), config);
            let outcome = apply_patch(&args.file, find, replace, &output_dir)?;
            if args.json {
                emit_json(&SessionEvent::Patched(outcome.clone()));
            } else if !cli.quiet {
                report_patch(&outcome);
            }
            outcome.path
        },
        None => {
            if (args.find.is_some() || args.replace.is_some()) && !quiet {
                eprintln!("{} {}", style("⚠").yellow(), t!("send.patch_skipped"));
            }
            args.file.clone()
        },
    };
    ensure_not_interrupted()?;

    let port = get_port(cli, config)?;
    let baud = cli.baud_rate(config);
    let job = build_job(args, config, port, baud, source);

    if !quiet {
        eprintln!(
            "{} {}",
            style("🔌").cyan(),
            t!("common.using_port", port = job.port.as_str(), baud = baud)
        );
    }

    let mut session = FlashSession::open(job)?;
    if let Err(err) = ensure_not_interrupted() {
        session.close().ok();
        return Err(err);
    }

    let pb = progress_bar(quiet || !use_fancy_output());

    let listener = if args.no_listen {
        None
    } else {
        let json = args.json;
        let pb_sink = pb.clone();
        let spawned = session.spawn_listener(listen_config(config), move |event| {
            if json {
                emit_json(&SessionEvent::Response(event));
            } else {
                pb_sink.suspend(|| print_response(&event));
            }
        });
        match spawned {
            Ok(listener) => Some(listener),
            Err(err) => {
                session.close().ok();
                return Err(err.into());
            },
        }
    };

    let send_result = session.send(|progress| {
        if args.json {
            emit_json(&SessionEvent::Sent(progress));
        }
        if pb.length() != Some(progress.total) {
            pb.set_length(progress.total);
        }
        pb.set_position(progress.sent);
    });

    let summary = match send_result {
        Ok(summary) => summary,
        Err(err) => {
            pb.abandon();
            if let Some(listener) = listener {
                listener.stop(LISTENER_STOP_TIMEOUT);
            }
            session.close().ok();
            return Err(err).context(t!("error.transfer_failed").to_string());
        },
    };
    pb.finish_and_clear();

    if args.json {
        emit_json(&SessionEvent::Finished(summary));
    } else if !cli.quiet {
        eprintln!(
            "{} {}",
            style("✓").green(),
            t!("send.sent", bytes = summary.bytes_sent)
        );
    }

    if let Some(listener) = listener {
        if !quiet && !was_interrupted() {
            eprintln!("{}", style(t!("send.listening_hint")).dim());
        }
        wait_for_listener(&listener, args.listen_for.map(Duration::from_secs));
        if listener.stop(LISTENER_STOP_TIMEOUT) == Some(ListenExit::Disconnected) {
            warn!("{}", t!("send.listener_disconnected"));
        }
    }

    session.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, clap::Parser};

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        send: SendArgs,
    }

    fn args(extra: &[&str]) -> SendArgs {
        let argv = std::iter::once("send").chain(extra.iter().copied());
        Harness::try_parse_from(argv).unwrap().send
    }

    #[test]
    fn test_parse_chunk_size() {
        assert_eq!(parse_chunk_size("1"), Ok(1));
        assert_eq!(parse_chunk_size("256"), Ok(256));
        assert!(parse_chunk_size("0").is_err());
        assert!(parse_chunk_size("-4").is_err());
        assert!(parse_chunk_size("four").is_err());
    }

    #[test]
    fn test_build_job_defaults() {
        let job = build_job(
            &args(&["fw.bin"]),
            &Config::default(),
            "/dev/ttyUSB0".into(),
            115_200,
            "fw.bin".into(),
        );
        assert_eq!(job.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(job.chunk_delay, None);
        assert_eq!(job.port, "/dev/ttyUSB0");
    }

    #[test]
    fn test_build_job_config_and_cli_precedence() {
        let mut config = Config::default();
        config.transfer.chunk_size = Some(16);
        config.transfer.chunk_delay_ms = Some(3);

        let from_config = build_job(&args(&["fw.bin"]), &config, "p".into(), 9600, "fw.bin".into());
        assert_eq!(from_config.chunk_size, 16);
        assert_eq!(from_config.chunk_delay, Some(Duration::from_millis(3)));

        let from_cli = build_job(
            &args(&["fw.bin", "--chunk-size", "64", "--chunk-delay", "0"]),
            &config,
            "p".into(),
            9600,
            "fw.bin".into(),
        );
        assert_eq!(from_cli.chunk_size, 64);
        assert_eq!(from_cli.chunk_delay, None);
    }

    #[test]
    fn test_listen_config_uses_poll_interval() {
        let mut config = Config::default();
        assert_eq!(listen_config(&config), ListenConfig::default());

        config.monitor.poll_interval_ms = Some(25);
        assert_eq!(listen_config(&config).poll_interval, Duration::from_millis(25));
    }

    #[test]
    fn test_session_events_serialize_as_json_lines() {
        let event = SessionEvent::Response(ResponseEvent::Line {
            text: "OK".to_string(),
        });
        let line = serde_json::to_string(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "response");
        assert_eq!(value["data"]["kind"], "line");
        assert_eq!(value["data"]["text"], "OK");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_wait_for_listener_honors_deadline() {
        let reader = std::io::empty();
        let listener = ListenerHandle::spawn(reader, ListenConfig::default(), |_| {}).unwrap();

        let start = Instant::now();
        wait_for_listener(&listener, Some(Duration::from_millis(100)));
        assert!(start.elapsed() < Duration::from_secs(5));
        listener.stop(LISTENER_STOP_TIMEOUT);
    }
}
