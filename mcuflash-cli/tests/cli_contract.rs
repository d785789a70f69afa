//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

const MISSING_PORT: &str = "/dev/mcuflash-test-no-such-port";

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("mcuflash");
    cmd.env_remove("MCUFLASH_PORT")
        .env_remove("MCUFLASH_BAUD")
        .env_remove("MCUFLASH_NON_INTERACTIVE")
        .env_remove("RUST_LOG")
        .env("MCUFLASH_LANG", "en");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mcuflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn no_arguments_prints_help() {
    cli_cmd()
        .assert()
        .success()
        .stdout(predicate::str::contains("send"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn subcommand_help_describes_send_options() {
    cli_cmd()
        .args(["send", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--chunk-size"))
        .stdout(predicate::str::contains("--find"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_is_localized() {
    cli_cmd()
        .args(["--lang", "zh-CN", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("用法"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mcuflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")))
        .stderr(predicate::str::is_empty());
}

#[test]
fn list_ports_json_returns_valid_json() {
    let output = cli_cmd()
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");
    assert!(output.status.success());

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["ok"], true);
    assert!(parsed["data"]["ports"].is_array());
}

#[test]
fn unknown_subcommand_is_usage_error() {
    cli_cmd().arg("erase").assert().code(2);
}

#[test]
fn send_without_file_is_usage_error() {
    cli_cmd().arg("send").assert().code(2);
}

#[test]
fn send_rejects_zero_chunk_size() {
    cli_cmd()
        .args(["send", "fw.bin", "--chunk-size", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("chunk size"));
}

#[test]
fn send_find_without_replace_is_usage_error() {
    cli_cmd()
        .args(["send", "fw.bin", "--find", "BB"])
        .assert()
        .code(2);
}

#[test]
fn missing_explicit_config_is_config_error() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir.path().join("nope.toml");

    cli_cmd()
        .arg("--config")
        .arg(&missing)
        .arg("list-ports")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("nope.toml"));
}

#[test]
fn invalid_explicit_config_is_config_error() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("broken.toml");
    fs::write(&config, "[transfer\nchunk_size = ").expect("config should be written");

    cli_cmd()
        .arg("--config")
        .arg(&config)
        .args(["list-ports", "--json"])
        .assert()
        .code(3);
}

#[test]
fn invalid_local_config_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("mcuflash.toml"), "this is = = not toml").expect("config should be written");

    cli_cmd()
        .current_dir(dir.path())
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("TOML"));
}

#[test]
fn patch_writes_modified_copy_and_reports_json() {
    let dir = tempdir().expect("tempdir should be created");
    let source = dir.path().join("app.bin");
    fs::write(&source, [0x00, 0xBB, 0x01, 0xBB]).expect("image should be written");
    let out = dir.path().join("out");

    let output = cli_cmd()
        .arg("patch")
        .arg(&source)
        .args(["--find", "BB", "--replace", "8080", "--json", "--output-dir"])
        .arg(&out)
        .output()
        .expect("command should execute");
    assert!(output.status.success(), "{output:?}");

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["ok"], true);
    assert_eq!(parsed["data"]["occurrences"], 2);
    assert_eq!(parsed["data"]["original_len"], 4);
    assert_eq!(parsed["data"]["patched_len"], 6);

    let patched = out.join("modified_app.bin");
    assert_eq!(
        fs::read(&patched).expect("patched image should exist"),
        vec![0x00, 0x80, 0x80, 0x01, 0x80, 0x80]
    );
    assert_eq!(
        fs::read(&source).expect("source should still exist"),
        vec![0x00, 0xBB, 0x01, 0xBB]
    );
}

#[test]
fn patch_with_invalid_hex_is_config_error() {
    let dir = tempdir().expect("tempdir should be created");
    let source = dir.path().join("app.bin");
    fs::write(&source, [0x00]).expect("image should be written");

    cli_cmd()
        .arg("patch")
        .arg(&source)
        .args(["--find", "XYZ", "--replace", "00", "--output-dir"])
        .arg(dir.path())
        .assert()
        .code(3)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Invalid hex"));
}

#[test]
fn send_missing_file_is_config_error() {
    let dir = tempdir().expect("tempdir should be created");

    cli_cmd()
        .args(["--port", MISSING_PORT, "send"])
        .arg(dir.path().join("missing.bin"))
        .assert()
        .code(3)
        .stderr(predicate::str::contains("missing.bin"));
}

#[test]
fn send_to_missing_port_is_device_error() {
    let dir = tempdir().expect("tempdir should be created");
    let source = dir.path().join("app.bin");
    fs::write(&source, b"hello").expect("image should be written");

    cli_cmd()
        .args(["--non-interactive", "--port", MISSING_PORT, "send", "--no-listen"])
        .arg(&source)
        .assert()
        .code(4)
        .stderr(predicate::str::contains(MISSING_PORT));
}

#[test]
fn send_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let source = dir.path().join("app.bin");
    fs::write(&source, b"hello").expect("image should be written");

    cli_cmd()
        .args(["--port", MISSING_PORT, "send", "--json"])
        .arg(&source)
        .assert()
        .code(4)
        .stdout(predicate::str::is_empty());
}

#[test]
fn monitor_missing_port_is_device_error() {
    cli_cmd()
        .args(["--port", MISSING_PORT, "monitor"])
        .assert()
        .code(4);
}

#[test]
fn non_interactive_env_is_accepted() {
    cli_cmd()
        .env("MCUFLASH_NON_INTERACTIVE", "true")
        .args(["list-ports", "--json"])
        .assert()
        .success();
}

#[test]
fn completions_bash_writes_script() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_mcuflash()"));
}

#[test]
fn completions_unknown_shell_is_usage_error() {
    cli_cmd().args(["completions", "tcsh"]).assert().code(2);
}

fn modified_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    fs::read_dir(dir)
        .expect("output dir should be readable")
        .map(|entry| entry.expect("entry should be readable").path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("modified_"))
        })
        .collect()
}

#[test]
fn send_with_empty_find_and_replace_sends_unpatched_image() {
    let dir = tempdir().expect("tempdir should be created");
    let source = dir.path().join("fw.bin");
    fs::write(&source, [0xBB, 0x01]).expect("image should be written");
    let out = dir.path().join("out");
    fs::create_dir(&out).expect("output dir should be created");

    cli_cmd()
        .args(["--non-interactive", "--port", MISSING_PORT, "send", "--no-listen"])
        .arg(&source)
        .args(["--find", "", "--replace", "", "--output-dir"])
        .arg(&out)
        .assert()
        .code(4)
        .stderr(predicate::str::contains(MISSING_PORT));

    assert!(modified_files(&out).is_empty());
}

#[test]
fn send_with_empty_replace_never_strips_bytes() {
    let dir = tempdir().expect("tempdir should be created");
    let source = dir.path().join("fw.bin");
    fs::write(&source, [0xBB, 0x01]).expect("image should be written");
    let out = dir.path().join("out");
    fs::create_dir(&out).expect("output dir should be created");

    cli_cmd()
        .args(["--non-interactive", "--port", MISSING_PORT, "send", "--no-listen"])
        .arg(&source)
        .args(["--find", "BB", "--replace", "", "--output-dir"])
        .arg(&out)
        .assert()
        .code(4);

    assert!(modified_files(&out).is_empty());
    assert_eq!(
        fs::read(&source).expect("source should still exist"),
        vec![0xBB, 0x01]
    );
}

#[test]
fn patch_with_empty_replace_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");
    let source = dir.path().join("fw.bin");
    fs::write(&source, [0xBB, 0x01]).expect("image should be written");

    cli_cmd()
        .arg("patch")
        .arg(&source)
        .args(["--find", "BB", "--replace", "", "--output-dir"])
        .arg(dir.path())
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty());

    assert!(modified_files(dir.path()).is_empty());
}

#[test]
fn port_open_error_names_the_cause_once() {
    let dir = tempdir().expect("tempdir should be created");
    let source = dir.path().join("app.bin");
    fs::write(&source, b"hello").expect("image should be written");

    let output = cli_cmd()
        .args(["--non-interactive", "--port", MISSING_PORT, "send", "--no-listen"])
        .arg(&source)
        .output()
        .expect("command should execute");
    assert_eq!(output.status.code(), Some(4));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.matches("Failed to open serial port").count(), 1, "{stderr}");
}

#[test]
fn patch_reports_saved_file_once() {
    let dir = tempdir().expect("tempdir should be created");
    let source = dir.path().join("app.bin");
    fs::write(&source, [0xBB]).expect("image should be written");

    let output = cli_cmd()
        .arg("patch")
        .arg(&source)
        .args(["--find", "BB", "--replace", "80", "--output-dir"])
        .arg(dir.path())
        .output()
        .expect("command should execute");
    assert!(output.status.success(), "{output:?}");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.matches("Modified file saved as").count(), 1, "{stderr}");
}
