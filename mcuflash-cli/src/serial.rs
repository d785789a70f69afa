//! Serial port selection.
//!
//! Resolution order:
//! 1. `--port` / `MCUFLASH_PORT`
//! 2. `[port.connection] serial` from the config files
//! 3. Detected ports, recognized devices first. A single recognized port is
//!    used directly; otherwise the user is asked (never in non-interactive
//!    mode, where anything but exactly one candidate is a usage error).

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    mcuflash::{DetectedPort, detect_ports},
    rust_i18n::t,
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// List all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
    /// Force confirmation even for single recognized port.
    pub confirm_port: bool,
}

/// Result of port selection including whether it was a known device.
#[derive(Debug)]
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

impl SelectedPort {
    fn new(port: DetectedPort, config: &Config) -> Self {
        let is_known = is_known_device(&port, config);
        Self { port, is_known }
    }
}

fn usage_err(message: impl Into<String>) -> anyhow::Error {
    CliError::Usage(message.into()).into()
}

fn cancelled_err() -> anyhow::Error {
    CliError::Cancelled(t!("serial.selection_cancelled").to_string()).into()
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, detect_ports(), config));
    }

    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, detect_ports(), config));
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(usage_err(t!("serial.no_ports_found")));
    }

    let candidates = candidate_ports(ports, config, options.list_all_ports);

    if options.non_interactive {
        return select_non_interactive_port(candidates, config);
    }

    match <[DetectedPort; 1]>::try_from(candidates) {
        Ok([port]) => {
            let selected = SelectedPort::new(port, config);
            if selected.is_known && !options.confirm_port {
                info!(
                    "Auto-selected port: {} [{}]",
                    selected.port.name,
                    selected.port.device.name()
                );
                Ok(selected)
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(selected.port)
            }
        },
        Err(candidates) if candidates.is_empty() => {
            Err(usage_err(t!("serial.no_ports_available")))
        },
        Err(candidates) => {
            ensure_interactive_terminal()?;
            select_port_interactive(candidates, config)
        },
    }
}

/// Recognized ports first; unrecognized ones only when asked for or when
/// nothing is recognized.
fn candidate_ports(ports: Vec<DetectedPort>, config: &Config, list_all: bool) -> Vec<DetectedPort> {
    let (mut known, unknown): (Vec<_>, Vec<_>) =
        ports.into_iter().partition(|p| is_known_device(p, config));

    if list_all || known.is_empty() {
        known.extend(unknown);
    }
    known
}

fn select_non_interactive_port(candidates: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    match <[DetectedPort; 1]>::try_from(candidates) {
        Ok([port]) => Ok(SelectedPort::new(port, config)),
        Err(candidates) if candidates.is_empty() => {
            Err(usage_err(t!("serial.no_ports_available")))
        },
        Err(_) => Err(usage_err(t!("serial.multiple_ports"))),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(t!("serial.interactive_requires_tty")))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) if io_err.kind() == std::io::ErrorKind::Interrupted => {
            cancelled_err()
        },
        DialoguerError::IO(_) => usage_err(t!("serial.prompt_failed")),
    }
}

/// Resolve a user supplied port name against the detected list.
///
/// Names that are not detected are still accepted as-is.
fn find_port_by_name(name: &str, ports: Vec<DetectedPort>, config: &Config) -> SelectedPort {
    let found = ports
        .iter()
        .position(|p| p.name == name)
        .or_else(|| ports.iter().position(|p| p.name.eq_ignore_ascii_case(name)));

    let port = match found {
        Some(index) => ports.into_iter().nth(index).unwrap_or_else(|| DetectedPort::unlisted(name)),
        None => DetectedPort::unlisted(name),
    };
    SelectedPort::new(port, config)
}

/// Check if a port matches a known device (from config or built-in list).
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port.device.is_known() {
        return true;
    }

    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config.port.usb_device.iter().any(|d| d.matches(vid, pid)),
        _ => false,
    }
}

/// Styled one-line label for the selection menu.
fn port_label(port: &DetectedPort, known: bool) -> String {
    let name = if known {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} {}",
        style("ℹ").blue(),
        t!("serial.detected_ports", count = ports.len())
    );
    eprintln!("{}", style(t!("serial.known_devices_hint")).dim());

    ports.sort_by_key(|p| !is_known_device(p, config));

    // Keep labels on one line in narrow terminals
    let max_width = usize::from(console::Term::stderr().size().1).saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| port_label(p, is_known_device(p, config)))
        .map(|label| console::truncate_str(&label, max_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.select_prompt").to_string())
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?
        .ok_or_else(cancelled_err)?;

    let port = ports
        .into_iter()
        .nth(selection)
        .ok_or_else(|| anyhow::anyhow!("Invalid port index: {selection}"))?;
    Ok(SelectedPort::new(port, config))
}

/// Confirm use of a single unrecognized port.
fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.confirm_use", port = port.description()).to_string())
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(cancelled_err())
    }
}

/// Ask user if they want to remember this port.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config.port.usb_device.iter().any(|d| d.matches(vid, pid)) {
        return Ok(());
    }
    if !std::io::stdin().is_terminal() {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("serial.remember_prompt").to_string())
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
