//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("createlab")
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("createlab"))
        .stdout(predicate::str::contains("hid-send"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("createlab"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn list_ports_json_returns_json_array() {
    let dir = tempdir().expect("tempdir should be created");
    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("stdout should be pure JSON");
    assert!(parsed.is_array(), "should be a JSON array");
}

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_createlab()"));
}

#[cfg(unix)]
#[test]
fn completions_without_shell_is_usage_error() {
    let mut cmd = cli_cmd();
    cmd.env_remove("SHELL")
        .arg("completions")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("completions bash"));
}

// ============================================================================
// Exit Code Tests
// ============================================================================

/// Exit code 2: usage error (unknown command, invalid arguments)
#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn exit_code_two_for_invalid_hex() {
    let mut cmd = cli_cmd();
    cmd.args(["send", "ZZ"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Invalid hex"));
}

#[test]
fn exit_code_two_for_half_specified_handshake() {
    let mut cmd = cli_cmd();
    cmd.args(["send", "01", "--startup", "434C3F"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_length_offset() {
    let mut cmd = cli_cmd();
    cmd.args(["send", "01", "--header-size", "2"])
        .assert()
        .failure()
        .code(2);
}

#[cfg(not(feature = "hid"))]
#[test]
fn hid_commands_without_hid_support_are_usage_errors() {
    let mut cmd = cli_cmd();
    cmd.args(["hid-send", "--vid", "2354", "--pid", "1111", "01"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--features hid"));
}

/// Exit code 3: explicitly requested config file is invalid
#[test]
fn exit_code_three_for_invalid_explicit_config() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("custom.toml");
    fs::write(&config, "invalid toml [[[").expect("write invalid config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("list-ports")
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("TOML"));
}

#[test]
fn exit_code_three_for_missing_explicit_config() {
    let dir = tempdir().expect("tempdir should be created");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["--config", "nope.toml", "list-ports"])
        .assert()
        .failure()
        .code(3);
}

/// Invalid auto-discovered config is a warning, not an error.
#[test]
fn invalid_local_config_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("createlab.toml"), "invalid toml [[[").expect("write config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("list-ports")
        .output()
        .expect("command should execute");

    assert!(
        output.status.success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

/// Exit code 1: the port cannot be opened
#[test]
fn exit_code_one_when_port_cannot_be_opened() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir.path().join("no-such-port");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--non-interactive")
        .arg("-p")
        .arg(&missing)
        .args(["send", "01"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn unknown_flag_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("list-ports")
        .arg("--jason")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("json"));
}
