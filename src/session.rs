//! Remote shell access into the guest over `ssh`.
//!
//! Host key checking is turned off: the guest gets a fresh address and a
//! fresh host key on every boot, so pinning a key would only ever produce
//! mismatch warnings. The trade-off is that the first hop is not
//! authenticated; anything able to answer on the guest's address of the
//! host-only network could impersonate it. The CLI help of `ssh`, `run` and
//! `halt` repeats this.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;

use crate::config::SshConfig;
use crate::error::LinuxError;

/// Command run inside the guest to shut it down.
pub const HALT_COMMAND: &[&str] = &["sudo", "halt"];

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait RemoteShell {
    /// Open a session. With no commands it is interactive; otherwise the
    /// commands run and the remote exit code is returned.
    async fn session(
        &self,
        address: IpAddr,
        commands: &[String],
        tty: bool,
    ) -> Result<i32, LinuxError>;

    async fn halt(&self, address: IpAddr) -> Result<i32, LinuxError> {
        let commands: Vec<String> = HALT_COMMAND.iter().map(|s| s.to_string()).collect();
        self.session(address, &commands, false).await
    }
}

/// Shells out to the system `ssh` client with stdio inherited.
#[derive(Debug, Clone)]
pub struct SshGateway {
    binary: String,
    user: String,
    key_path: PathBuf,
}

impl SshGateway {
    pub fn new(config: &SshConfig, key_path: PathBuf) -> Self {
        Self {
            binary: config.binary.clone(),
            user: config.user.clone(),
            key_path,
        }
    }

    pub fn args(&self, address: IpAddr, commands: &[String], tty: bool) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.key_path.display().to_string(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            "-o".into(),
            "LogLevel=ERROR".into(),
        ];
        if tty {
            args.push("-t".into());
        }
        args.push(format!("{}@{address}", self.user));
        args.extend(commands.iter().cloned());
        args
    }
}

impl RemoteShell for SshGateway {
    async fn session(
        &self,
        address: IpAddr,
        commands: &[String],
        tty: bool,
    ) -> Result<i32, LinuxError> {
        let args = self.args(address, commands, tty);
        tracing::debug!(binary = %self.binary, ?args, "opening ssh session");

        let status = tokio::process::Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| LinuxError::Io {
                context: format!("running {}", self.binary),
                source: e,
            })?;

        // ssh itself uses 255 for its own failures; a signal-killed client
        // reports no code at all.
        Ok(status.code().unwrap_or(255))
    }
}
