//! Shell completion generation and installation.

use {
    crate::{BIN_NAME, Cli},
    anyhow::{Context, Result},
    clap::CommandFactory,
    clap_complete::{Shell, generate},
    console::style,
    directories::BaseDirs,
    rust_i18n::t,
    std::{
        env, fs,
        io::{self, Write as _},
        path::{Path, PathBuf},
    },
};

const ZSH_FPATH_LINE: &str = "fpath=(~/.zfunc $fpath)";

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, BIN_NAME, out);
}

/// Detect the user's current shell from environment.
pub(crate) fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }

    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }

    None
}

/// Map a shell binary path to its `Shell`.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let shell_name = Path::new(shell_path)
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    match shell_name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

/// Where the completion script for `shell` is installed, relative to the
/// user's home, config and data directories.
fn completion_install_path(shell: Shell, dirs: &BaseDirs) -> Result<PathBuf> {
    let path = match shell {
        Shell::Bash => dirs
            .data_local_dir()
            .join("bash-completion")
            .join("completions")
            .join(BIN_NAME),
        Shell::Zsh => dirs.home_dir().join(".zfunc").join(format!("_{BIN_NAME}")),
        Shell::Fish => dirs
            .config_dir()
            .join("fish")
            .join("completions")
            .join(format!("{BIN_NAME}.fish")),
        Shell::PowerShell => env::var_os("PROFILE")
            .and_then(|profile| PathBuf::from(profile).parent().map(Path::to_path_buf))
            .unwrap_or_else(|| dirs.config_dir().join("powershell").join("completions"))
            .join(format!("{BIN_NAME}.ps1")),
        Shell::Elvish => dirs
            .config_dir()
            .join("elvish")
            .join("lib")
            .join(format!("{BIN_NAME}.elv")),
        _ => anyhow::bail!("Unsupported shell for auto-install"),
    };
    Ok(path)
}

/// Install shell completions automatically.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg {
        Some(s) => s,
        None => detect_shell_type().context(t!("completions.detect_failed").to_string())?,
    };

    let dirs = BaseDirs::new().context("Could not determine home directory")?;
    let path = completion_install_path(shell, &dirs)?;

    let mut buf = Vec::new();
    write_completions(shell, &mut buf);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, &buf)
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} {}",
        style("✓").green().bold(),
        t!(
            "completions.installed",
            shell = style(format!("{shell:?}")).cyan().to_string(),
            path = style(path.display()).yellow().to_string()
        )
    );

    eprintln!();
    match shell {
        Shell::Bash => {
            eprintln!("{}", t!("completions.bash_hint"));
            eprintln!("  {}", style(format!("source {}", path.display())).cyan());
        },
        Shell::Zsh => {
            let zshrc = dirs.home_dir().join(".zshrc");
            if ensure_zsh_fpath(&zshrc)? {
                eprintln!(
                    "{} {}",
                    style("✓").green().bold(),
                    t!("completions.zsh_fpath_added", path = zshrc.display().to_string())
                );
            }
            eprintln!("{} {}", t!("completions.restart_hint"), style("exec zsh").cyan());
        },
        Shell::PowerShell => {
            eprintln!("{}", t!("completions.powershell_hint"));
            eprintln!("  {}", style(format!("Import-Module {}", path.display())).cyan());
        },
        _ => eprintln!("{}", t!("completions.auto_loaded")),
    }

    Ok(())
}

/// Append the `~/.zfunc` fpath setup to `zshrc` unless already present.
///
/// Returns whether the file was changed.
fn ensure_zsh_fpath(zshrc: &Path) -> Result<bool> {
    let present = fs::read_to_string(zshrc).is_ok_and(|content| content.contains(ZSH_FPATH_LINE));
    if present {
        return Ok(false);
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(zshrc)
        .with_context(|| format!("Failed to update {}", zshrc.display()))?;
    writeln!(file, "\n# {BIN_NAME} completions")?;
    writeln!(file, "{ZSH_FPATH_LINE}")?;
    writeln!(file, "autoload -Uz compinit && compinit")?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::tempdir};

    #[test]
    fn test_shell_from_path() {
        assert_eq!(shell_from_path("/bin/bash"), Some(Shell::Bash));
        assert_eq!(shell_from_path("/usr/bin/zsh"), Some(Shell::Zsh));
        assert_eq!(shell_from_path("/usr/local/bin/fish"), Some(Shell::Fish));
        assert_eq!(shell_from_path("/usr/bin/elvish"), Some(Shell::Elvish));
        assert_eq!(shell_from_path("/usr/bin/pwsh"), Some(Shell::PowerShell));
        assert_eq!(shell_from_path("bash"), Some(Shell::Bash));
    }

    #[test]
    fn test_shell_from_path_unknown() {
        assert_eq!(shell_from_path("/usr/bin/tcsh"), None);
        assert_eq!(shell_from_path("/usr/bin/ksh"), None);
        assert_eq!(shell_from_path(""), None);
    }

    #[test]
    fn test_install_paths_use_binary_name() {
        let Some(dirs) = BaseDirs::new() else {
            return;
        };

        let bash = completion_install_path(Shell::Bash, &dirs).unwrap();
        assert!(bash.to_string_lossy().contains("bash-completion"));
        assert!(bash.ends_with("mcuflash"));

        let zsh = completion_install_path(Shell::Zsh, &dirs).unwrap();
        assert!(zsh.starts_with(dirs.home_dir().join(".zfunc")));
        assert!(zsh.ends_with("_mcuflash"));

        let fish = completion_install_path(Shell::Fish, &dirs).unwrap();
        assert!(fish.ends_with("fish/completions/mcuflash.fish"));

        let elvish = completion_install_path(Shell::Elvish, &dirs).unwrap();
        assert!(elvish.ends_with("mcuflash.elv"));
    }

    #[test]
    fn test_ensure_zsh_fpath_is_idempotent() {
        let dir = tempdir().unwrap();
        let zshrc = dir.path().join(".zshrc");
        fs::write(&zshrc, "export EDITOR=vi\n").unwrap();

        assert!(ensure_zsh_fpath(&zshrc).unwrap());
        assert!(!ensure_zsh_fpath(&zshrc).unwrap());

        let content = fs::read_to_string(&zshrc).unwrap();
        assert!(content.starts_with("export EDITOR=vi\n"));
        assert_eq!(content.matches(ZSH_FPATH_LINE).count(), 1);
    }

    #[test]
    fn test_completions_generate_for_every_shell() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish, Shell::PowerShell, Shell::Elvish] {
            let mut buf = Vec::new();
            write_completions(shell, &mut buf);
            let output = String::from_utf8(buf).unwrap();
            assert!(output.contains("mcuflash"), "{shell:?}");
        }
    }
}
