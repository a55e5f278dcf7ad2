//! Launching the hypervisor.
//!
//! The argument vector is a contract with xhyve and is reproduced exactly.
//! The process is started in its own process group with its output appended
//! to log files, so it outlives the CLI invocation that started it.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::config::Config;
use crate::error::LinuxError;
use crate::paths::{WORKDIR_MARKER, WorkDir};
use crate::tracker::{PersistedRecord, ProcessControl, RecordStore, Signal};

/// Everything needed to boot a guest apart from its identifier.
#[derive(Debug, Clone)]
pub struct BootSpec {
    pub hypervisor: PathBuf,
    pub kernel: PathBuf,
    pub initrd: PathBuf,
    pub memory: String,
    pub net_slot: String,
    pub public_key: String,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
    pub marker: String,
}

impl BootSpec {
    pub fn from_config(config: &Config, work: &WorkDir, public_key: String) -> Self {
        // Bare names are left for PATH lookup by the spawn.
        let hypervisor = if config.hypervisor.contains('/') {
            work.resolve(&config.hypervisor)
        } else {
            PathBuf::from(&config.hypervisor)
        };
        Self {
            hypervisor,
            kernel: work.resolve(&config.kernel),
            initrd: work.resolve(&config.initrd),
            memory: config.memory.clone(),
            net_slot: config.net_slot.clone(),
            public_key,
            stdout_log: work.stdout_log.clone(),
            stderr_log: work.stderr_log.clone(),
            marker: work.marker_value(),
        }
    }
}

/// Kernel command line handed to the guest through the kexec directive.
pub fn kernel_cmdline(identifier: &str, public_key: &str) -> String {
    format!("earlyprintk=serial console=ttyS0 host={identifier} sshkey=\"{public_key}\"")
}

pub fn boot_args(spec: &BootSpec, identifier: &str) -> Vec<String> {
    let kexec = [
        "kexec".to_string(),
        spec.kernel.display().to_string(),
        spec.initrd.display().to_string(),
        format!("\"{}\"", kernel_cmdline(identifier, &spec.public_key)),
    ]
    .join(",");

    vec![
        "-A".into(),
        "-m".into(),
        spec.memory.clone(),
        "-s".into(),
        "0:0,hostbridge".into(),
        "-s".into(),
        "31,lpc".into(),
        "-l".into(),
        "com1,stdio".into(),
        "-s".into(),
        format!("{},virtio-net", spec.net_slot),
        "-f".into(),
        kexec,
    ]
}

/// A fully resolved hypervisor invocation.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
    pub env: Vec<(String, String)>,
}

impl LaunchPlan {
    pub fn new(spec: &BootSpec, identifier: &str) -> Self {
        Self {
            program: spec.hypervisor.clone(),
            args: boot_args(spec, identifier),
            stdout_log: spec.stdout_log.clone(),
            stderr_log: spec.stderr_log.clone(),
            env: vec![(WORKDIR_MARKER.to_string(), spec.marker.clone())],
        }
    }

    /// Shell-ish rendering for `boot --debug`.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Starts a process from a plan and returns its pid.
pub trait Launcher {
    fn launch(&self, plan: &LaunchPlan) -> Result<u32, LinuxError>;
}

/// Spawns the real hypervisor, detached from the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct HypervisorLauncher;

impl Launcher for HypervisorLauncher {
    fn launch(&self, plan: &LaunchPlan) -> Result<u32, LinuxError> {
        let open_log = |path: &PathBuf| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| LinuxError::Io {
                    context: format!("opening log {}", path.display()),
                    source: e,
                })
        };
        let stdout = open_log(&plan.stdout_log)?;
        let stderr = open_log(&plan.stderr_log)?;

        let child = Command::new(&plan.program)
            .args(&plan.args)
            .envs(plan.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(|e| LinuxError::Launch {
                binary: plan.program.display().to_string(),
                source: e,
            })?;

        // Dropping the handle does not signal the child; it keeps running
        // after we exit.
        Ok(child.id())
    }
}

/// Launch the guest and persist its record before returning, so a status
/// check that runs right after sees the new instance.
///
/// A guest whose record cannot be written would be invisible to `status` and
/// `kill`, so it is killed again before the write error is returned.
pub fn boot<L: Launcher, P: ProcessControl>(
    launcher: &L,
    processes: &P,
    store: &RecordStore,
    spec: &BootSpec,
    identifier: &str,
) -> Result<PersistedRecord, LinuxError> {
    let plan = LaunchPlan::new(spec, identifier);
    tracing::debug!(command = %plan.command_line(), "launching hypervisor");

    let pid = launcher.launch(&plan)?;
    let record = PersistedRecord {
        pid,
        identifier: identifier.to_string(),
    };
    if let Err(e) = store.write(&record) {
        tracing::warn!(pid, error = %e, "could not record hypervisor, killing it");
        match processes.terminate(pid, Signal::Forceful) {
            Ok(()) | Err(LinuxError::ProcessNotFound { .. }) => {}
            Err(kill_err) => {
                tracing::error!(pid, error = %kill_err, "unrecorded hypervisor left running");
            }
        }
        if let Err(rm_err) = store.remove() {
            tracing::debug!(error = %rm_err, "partial record not removed");
        }
        return Err(e);
    }

    tracing::info!(pid, identifier, "hypervisor launched");
    Ok(record)
}
