//! Monitor command implementation: the response path without a transfer.

use {
    super::send::{LISTENER_STOP_TIMEOUT, emit_json, listen_config, print_response, wait_for_listener},
    crate::{Cli, config::Config, get_port},
    anyhow::Result,
    console::style,
    mcuflash::{ListenExit, SessionEvent, SerialConfig, open_monitor},
    rust_i18n::t,
};

/// Print device responses until Ctrl+C or until the link drops.
///
/// Ctrl+C is the normal way out and exits successfully; losing the port is
/// an error.
pub(crate) fn cmd_monitor(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let port = get_port(cli, config)?;
    let baud = cli.baud_rate(config);

    if !cli.quiet && !json {
        eprintln!(
            "{} {}",
            style("📡").cyan(),
            t!(
                "monitor.opening",
                port = style(&port).green().to_string(),
                baud = baud
            )
        );
        eprintln!("{}", style(t!("monitor.exit_hint")).dim());
    }

    let serial = SerialConfig::new(&port, baud);
    let listener = open_monitor(&serial, listen_config(config), move |event| {
        if json {
            emit_json(&SessionEvent::Response(event));
        } else {
            print_response(&event);
        }
    })?;

    wait_for_listener(&listener, None);

    match listener.stop(LISTENER_STOP_TIMEOUT) {
        Some(ListenExit::Disconnected) => {
            anyhow::bail!(t!("monitor.disconnected", port = port).to_string())
        },
        _ => {
            if !cli.quiet && !json {
                eprintln!("\n{} {}", style("✓").green(), t!("monitor.closed"));
            }
            Ok(())
        },
    }
}
