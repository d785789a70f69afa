//! Patch command implementation.

use {
    crate::{Cli, CliError, config::Config},
    anyhow::{Context, Result},
    console::style,
    log::debug,
    mcuflash::{PatchOutcome, PatchSpec, patch_file},
    rust_i18n::t,
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Where patched images go: `--output-dir`, then `[transfer] output_dir`,
/// then the desktop, then the current directory.
pub(crate) fn resolve_output_dir(cli_dir: Option<&Path>, config: &Config) -> PathBuf {
    cli_dir
        .map(Path::to_path_buf)
        .or_else(|| config.transfer.output_dir.clone())
        .or_else(mcuflash::patch::default_output_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// The find/replace pair to apply, or `None` when either side is blank.
///
/// A blank side means no patch was asked for. Treating a blank replacement
/// as "delete every match" would silently strip bytes from the image.
pub(crate) fn requested_patch<'a>(
    find: Option<&'a str>,
    replace: Option<&'a str>,
) -> Option<(&'a str, &'a str)> {
    let find = find.map(str::trim).filter(|s| !s.is_empty())?;
    let replace = replace.map(str::trim).filter(|s| !s.is_empty())?;
    Some((find, replace))
}

/// Decode the patch and write the patched copy of `file`.
pub(crate) fn apply_patch(
    file: &Path,
    find: &str,
    replace: &str,
    output_dir: &Path,
) -> Result<PatchOutcome> {
    let spec = PatchSpec::from_hex(find, replace)?;

    fs::create_dir_all(output_dir).with_context(|| {
        t!("error.create_output_dir", path = output_dir.display().to_string()).to_string()
    })?;
    debug!("Writing patched image into {}", output_dir.display());

    let outcome = patch_file(file, &spec, output_dir)?;
    Ok(outcome)
}

/// Human readable summary of a patch on stderr.
pub(crate) fn report_patch(outcome: &PatchOutcome) {
    if outcome.occurrences == 0 {
        eprintln!("{} {}", style("⚠").yellow(), t!("patch.no_match"));
    } else {
        eprintln!(
            "{} {}",
            style("✓").green(),
            t!("patch.replaced", count = outcome.occurrences)
        );
    }
    eprintln!(
        "{} {}",
        style("📄").cyan(),
        t!(
            "patch.saved",
            path = style(outcome.path.display()).yellow().to_string()
        )
    );
}

/// Patch command implementation.
pub(crate) fn cmd_patch(
    cli: &Cli,
    config: &Config,
    file: &Path,
    find: &str,
    replace: &str,
    output_dir: Option<&Path>,
    json: bool,
) -> Result<()> {
    let Some((find, replace)) = requested_patch(Some(find), Some(replace)) else {
        return Err(CliError::Usage(t!("patch.empty_pattern").to_string()).into());
    };
    let output_dir = resolve_output_dir(output_dir, config);
    let outcome = apply_patch(file, find, replace, &output_dir)?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if !cli.quiet {
        report_patch(&outcome);
    }

    Ok(())
}
