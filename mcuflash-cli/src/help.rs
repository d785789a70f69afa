//! Localized help output for the CLI.
//!
//! Builds a clap `Command` with translated section headings, subcommand
//! descriptions and argument help text.

use {
    crate::Cli,
    clap::{Arg, ArgAction, Command, CommandFactory},
    rust_i18n::t,
};

/// Supported locales for i18n.
pub(crate) const SUPPORTED_LOCALES: &[&str] = &["en", "zh-CN"];

/// Detect the best matching locale from system settings.
///
/// Handles the usual spellings:
/// - `zh_CN.UTF-8` -> `zh-CN`
/// - `zh` -> `zh-CN`
/// - `en_US.UTF-8` -> `en`
/// - `C` or `POSIX` -> `en`
pub(crate) fn detect_locale() -> String {
    normalize_locale(&sys_locale::get_locale().unwrap_or_else(|| "en".to_string()))
}

fn normalize_locale(raw: &str) -> String {
    // Strip the encoding suffix and use BCP 47 separators
    let locale = raw.split('.').next().unwrap_or(raw).replace('_', "-");

    if SUPPORTED_LOCALES.contains(&locale.as_str()) {
        return locale;
    }

    match locale.split('-').next().unwrap_or_default().to_lowercase().as_str() {
        "zh" => "zh-CN".to_string(),
        _ => "en".to_string(),
    }
}

/// Print localized help for the main command or the subcommand named in
/// `raw_args`.
pub(crate) fn print_localized_help(raw_args: &[String]) {
    let mut app = build_localized_command();

    let sub = raw_args.iter().skip(1).find_map(|token| {
        app.get_subcommands()
            .find(|s| s.get_name() == token.as_str())
            .cloned()
    });

    // A closed stdout (e.g. `| head`) is not worth reporting
    let _ = match sub {
        Some(mut sub) => sub.print_help(),
        None => app.print_help(),
    };
}

/// Heading an argument belongs under.
fn place_arg(arg: Arg, args_heading: &'static str, opts_heading: &'static str) -> Arg {
    let arg = localize_arg(arg);
    if arg.get_short().is_none() && arg.get_long().is_none() {
        arg.help_heading(args_heading)
    } else {
        arg.help_heading(opts_heading)
    }
}

/// Build a clap `Command` with fully localized help output.
///
/// The structure comes from [`Cli`]; only user-visible text is replaced.
pub(crate) fn build_localized_command() -> Command {
    // Headings must be 'static; the process prints help once and exits
    let args_heading: &'static str =
        Box::leak(t!("help.arguments_heading").to_string().into_boxed_str());
    let opts_heading: &'static str =
        Box::leak(t!("help.options_heading").to_string().into_boxed_str());

    let tpl = format!(
        "{{bin}} {{version}}\n\n{{about}}\n\n\
         {usage_h}:\n  {{usage}}\n\n\
         {cmds_h}:\n{{subcommands}}\n\n\
         {opts_h}:\n{{options}}\n\n\
         {{after-help}}\n",
        usage_h = t!("help.usage_heading"),
        cmds_h = t!("help.commands_heading"),
        opts_h = opts_heading,
    );

    let sub_tpl = format!(
        "{{about}}\n\n{usage_h}:\n  {{usage}}\n\n{{all-args}}\n",
        usage_h = t!("help.usage_heading"),
    );

    Cli::command()
        .help_template(tpl)
        .about(t!("app.about").to_string())
        .after_help(t!("app.after_help").to_string())
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("help")
                .short('h')
                .long("help")
                .help(t!("arg.help_flag.help").to_string())
                .action(ArgAction::Help)
                .global(true),
        )
        .arg(
            Arg::new("version")
                .short('V')
                .long("version")
                .help(t!("arg.version_flag.help").to_string())
                .action(ArgAction::Version)
                .global(true),
        )
        .mut_args(move |arg| place_arg(arg, args_heading, opts_heading))
        .mut_subcommands(move |sub| {
            let about_key = format!("cmd.{}.about", sub.get_name().replace('-', "_"));
            let localized = t!(&about_key).to_string();
            let sub = if localized == about_key {
                sub
            } else {
                sub.about(localized)
            };
            sub.help_template(sub_tpl.clone())
                .mut_args(move |arg| place_arg(arg, args_heading, opts_heading))
        })
        .disable_help_subcommand(true)
}

/// Replace an arg's help text with its localized version if available.
///
/// Looks up `arg.<id>.help` in the current locale and keeps the doc comment
/// text when there is no entry.
pub(crate) fn localize_arg(arg: Arg) -> Arg {
    let key = format!("arg.{}.help", arg.get_id().as_str());
    let localized = t!(&key).to_string();
    if localized == key {
        arg
    } else {
        arg.help(localized)
    }
}
