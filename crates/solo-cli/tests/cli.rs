//! End-to-end tests driving the `solo` binary.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use solo_test_utils::config::{TestConfigBuilder, TestEnv};

struct Fixture {
    env: TestEnv,
    config_path: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let env = TestConfigBuilder::new().endpoint_name("cli-e2e").build();
        let config_path = env.write_config_file();
        Self { env, config_path }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_solo"));
        cmd.env("SOLO_CONFIG", &self.config_path)
            .env_remove("RUST_LOG");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().unwrap()
    }

    fn spawn_resident(&self) -> Resident {
        let child = self
            .command()
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        wait_for(&self.env.dir().join("cli-e2e.sock"));
        Resident(child)
    }
}

/// Kills the resident if a test fails before it exits on its own.
struct Resident(Child);

impl Resident {
    fn wait_exit(&mut self) -> std::process::ExitStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(status) = self.0.try_wait().unwrap() {
                return status;
            }
            assert!(Instant::now() < deadline, "resident did not exit");
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for Resident {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn wait_for(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !path.exists() {
        assert!(Instant::now() < deadline, "{} never appeared", path.display());
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim_end().to_string()
}

#[test]
fn test_help_without_resident() {
    let fx = Fixture::new();
    let output = fx.run(&["--help"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("--logging-rules"));
}

#[test]
fn test_bad_arguments_without_resident_exit_2() {
    let fx = Fixture::new();
    let output = fx.run(&["--bogus"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(!String::from_utf8_lossy(&output.stderr).is_empty());
}

#[test]
fn test_quit_without_resident() {
    let fx = Fixture::new();
    let output = fx.run(&["--quit"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "No running instance");
}

#[test]
fn test_forward_to_resident_then_quit() {
    let fx = Fixture::new();
    let mut resident = fx.spawn_resident();

    let output = fx.run(&["--version"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), solo_core::build_info::version_string());

    // A resident answers bad arguments with help instead of failing the caller.
    let output = fx.run(&["--bogus"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("--message-pattern"));

    let output = fx.run(&["--quit"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "Shutdown requested");

    assert!(resident.wait_exit().success());
}
