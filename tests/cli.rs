use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use linux_vm::tracker::{ProcessControl, SystemProcesses};

fn linux() -> assert_cmd::Command {
    cargo_bin_cmd!("linux").into()
}

/// `linux init` into a fresh folder under `dir`.
fn init_workdir(dir: &tempfile::TempDir) -> PathBuf {
    let work = dir.path().join("linux");
    linux()
        .args(["--path", work.to_str().unwrap(), "init"])
        .assert()
        .success();
    work
}

/// Stand-in hypervisor that ignores its arguments and stays alive. It
/// writes its own pid to `<dir>/hypervisor.pid` first.
fn write_fake_hypervisor(dir: &Path) -> PathBuf {
    let path = dir.join("fake-xhyve");
    let pid_out = dir.join("hypervisor.pid");
    std::fs::write(
        &path,
        format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 60\n", pid_out.display()),
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn write_config(work: &Path, hypervisor: &Path, resolver_command: &str) {
    std::fs::write(
        work.join("linux.toml"),
        format!(
            r#"
hypervisor = "{}"

[boot]
poll_interval_ms = 200

[resolver]
command = "{resolver_command}"
"#,
            hypervisor.display()
        ),
    )
    .unwrap();
}

/// Pid the fake hypervisor recorded for itself.
fn launched_pid(dir: &Path) -> Option<u32> {
    std::fs::read_to_string(dir.join("hypervisor.pid"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn read_pid(work: &Path) -> Option<u32> {
    std::fs::read_to_string(work.join("linux.pid"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[test]
fn help_works() {
    linux()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Boot and manage a Linux guest"));
}

#[test]
fn ssh_help_mentions_host_key_checking() {
    linux()
        .args(["ssh", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Host key checking is disabled"));
}

#[test]
fn init_creates_keys_and_config() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("linux");
    linux()
        .args(["--path", work.to_str().unwrap(), "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created new config folder"));

    let mode = std::fs::metadata(work.join("id_ed25519"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
    let public = std::fs::read_to_string(work.join("id_ed25519.pub")).unwrap();
    assert!(public.starts_with("ssh-ed25519 "));
    assert!(work.join("linux.toml").is_file());
}

#[test]
fn init_twice_fails() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    linux()
        .args(["--path", work.to_str().unwrap(), "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn boot_without_init_fails() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("missing");
    linux()
        .args(["--path", work.to_str().unwrap(), "boot"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("linux init"));
    assert!(!work.exists());
}

#[test]
fn status_on_fresh_folder() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    linux()
        .args(["--path", work.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linux is not running"));
    linux()
        .args(["--path", work.to_str().unwrap(), "pid"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn stale_pid_file_reads_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);

    // Spawn and reap a process so its pid is known to be dead.
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead = child.id();
    child.wait().unwrap();

    std::fs::write(work.join("linux.pid"), dead.to_string()).unwrap();
    std::fs::write(work.join("hostname"), "ghost").unwrap();

    linux()
        .args(["--path", work.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linux is not running"));
    linux()
        .args(["--path", work.to_str().unwrap(), "kill"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linux was not running"));
}

#[test]
fn status_and_kill_live_record() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);

    let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    std::fs::write(work.join("linux.pid"), child.id().to_string()).unwrap();
    std::fs::write(work.join("hostname"), "tom-oreo").unwrap();

    linux()
        .args(["--path", work.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "Linux is running (pid {})",
            child.id()
        )));
    linux()
        .args(["--path", work.to_str().unwrap(), "pid"])
        .assert()
        .success()
        .stdout(predicate::str::contains(child.id().to_string()));

    linux()
        .args(["--path", work.to_str().unwrap(), "kill"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linux has been killed"));
    child.wait().unwrap();

    assert!(!work.join("linux.pid").exists());
    linux()
        .args(["--path", work.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linux is not running"));
}

#[test]
fn custom_pid_file_location() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    let pid_file = dir.path().join("elsewhere.pid");

    let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    std::fs::write(&pid_file, child.id().to_string()).unwrap();
    std::fs::write(work.join("hostname"), "felix").unwrap();

    linux()
        .args([
            "--path",
            work.to_str().unwrap(),
            "--pid",
            pid_file.to_str().unwrap(),
            "status",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linux is running"));

    child.kill().unwrap();
    child.wait().unwrap();
}

#[test]
fn boot_debug_prints_command_line() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    linux()
        .args([
            "--path",
            work.to_str().unwrap(),
            "boot",
            "--debug",
            "--hostname",
            "tom-oreo",
        ])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("kexec,")
                .and(predicate::str::contains("host=tom-oreo"))
                .and(predicate::str::contains("-s 0:0,hostbridge")),
        );
    assert!(!work.join("linux.pid").exists());
}

#[test]
fn boot_rejects_invalid_hostname() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    linux()
        .args([
            "--path",
            work.to_str().unwrap(),
            "boot",
            "--hostname",
            "Not Valid",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("hostname"));
    assert!(!work.join("linux.pid").exists());
}

#[test]
fn boot_with_missing_hypervisor_fails() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    write_config(&work, &dir.path().join("no-such-xhyve"), "true");
    linux()
        .args(["--path", work.to_str().unwrap(), "boot"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to launch"));
    assert!(!work.join("linux.pid").exists());
}

#[test]
fn boot_times_out_and_kills_orphan() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    let hypervisor = write_fake_hypervisor(dir.path());
    write_config(&work, &hypervisor, "true");

    linux()
        .args(["--path", work.to_str().unwrap(), "boot", "--timeout", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timed out"));

    let launched = launched_pid(dir.path()).expect("fake hypervisor started");
    assert!(!SystemProcesses.is_alive(launched));
    assert!(!work.join("linux.pid").exists());
    linux()
        .args(["--path", work.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linux is not running"));
    assert!(work.join("linux.log").is_file());
}

#[test]
fn boot_then_kill() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    let hypervisor = write_fake_hypervisor(dir.path());
    write_config(&work, &hypervisor, "echo 192.168.64.9; true");

    linux()
        .args(["--path", work.to_str().unwrap(), "boot", "--hostname", "luna"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Linux has booted")
                .and(predicate::str::contains("192.168.64.9"))
                .and(predicate::str::contains("luna")),
        );
    let pid = read_pid(&work).expect("pid file written");
    assert!(SystemProcesses.is_alive(pid));

    // Second boot is a no-op.
    linux()
        .args(["--path", work.to_str().unwrap(), "boot"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "Linux is already running (pid {pid})"
        )));

    linux()
        .args(["--path", work.to_str().unwrap(), "kill"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linux has been killed"));
    assert!(!SystemProcesses.is_alive(pid));
    linux()
        .args(["--path", work.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linux is not running"));
}

#[test]
fn boot_with_unwritable_pid_file_leaves_nothing_running() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    let hypervisor = write_fake_hypervisor(dir.path());
    write_config(&work, &hypervisor, "true");
    let pid_file = dir.path().join("missing/linux.pid");

    linux()
        .args([
            "--path",
            work.to_str().unwrap(),
            "--pid",
            pid_file.to_str().unwrap(),
            "boot",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("linux.pid"));

    // The kill can land before the script records its pid; then there is
    // nothing to check.
    if let Some(launched) = launched_pid(dir.path()) {
        assert!(!SystemProcesses.is_alive(launched));
    }
    assert!(!work.join("hostname").exists());
}

#[test]
fn boot_rejects_zero_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    linux()
        .args(["--path", work.to_str().unwrap(), "boot", "--timeout", "0"])
        .assert()
        .failure();
    assert!(!work.join("linux.pid").exists());
}

#[test]
fn run_without_guest_reports_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    linux()
        .args(["--path", work.to_str().unwrap(), "run", "uname", "-a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("linux is not running"));
}

#[test]
fn halt_when_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let work = init_workdir(&dir);
    linux()
        .args(["--path", work.to_str().unwrap(), "halt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linux is not running"));
}

#[test]
fn ps_runs_without_workdir() {
    linux().arg("ps").assert().success();
}
