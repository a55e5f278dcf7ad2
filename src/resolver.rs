//! Finding the guest's address from its identifier.
//!
//! Resolvers only answer "here it is" or "not yet"; deciding how long to keep
//! asking is the supervisor's job.

use std::net::IpAddr;
use std::path::PathBuf;

use crate::config::ResolverConfig;
use crate::error::LinuxError;

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait AddressResolver {
    /// `Ok(None)` when the guest has not advertised itself yet.
    async fn resolve(&self, identifier: &str) -> Result<Option<IpAddr>, LinuxError>;
}

/// Reads the host's bootpd lease database (`/var/db/dhcpd_leases` on macOS).
#[derive(Debug, Clone)]
pub struct LeaseFileResolver {
    path: PathBuf,
}

impl LeaseFileResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AddressResolver for LeaseFileResolver {
    async fn resolve(&self, identifier: &str) -> Result<Option<IpAddr>, LinuxError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            // bootpd creates the file on the first lease it hands out.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LinuxError::Resolver {
                    message: format!("reading {}: {e}", self.path.display()),
                });
            }
        };
        Ok(find_lease(&contents, identifier))
    }
}

/// Address of the first lease block whose `name` is `identifier`.
///
/// Blocks look like:
///
/// ```text
/// {
///     name=tom-oreo-luna-max
///     ip_address=192.168.64.3
///     hw_address=1,2:a:b:c:d:e
///     lease=0x5f3c1a2b
/// }
/// ```
///
/// bootpd writes the newest lease first.
pub fn find_lease(contents: &str, identifier: &str) -> Option<IpAddr> {
    let mut name: Option<&str> = None;
    let mut ip: Option<&str> = None;

    for line in contents.lines().map(str::trim) {
        match line {
            "{" => {
                name = None;
                ip = None;
            }
            "}" => {
                if name == Some(identifier)
                    && let Some(addr) = ip.and_then(|s| s.parse().ok())
                {
                    return Some(addr);
                }
            }
            _ => {
                if let Some(v) = line.strip_prefix("name=") {
                    name = Some(v);
                } else if let Some(v) = line.strip_prefix("ip_address=") {
                    ip = Some(v);
                }
            }
        }
    }
    None
}

/// Runs a user-supplied shell command with the identifier as `$1`, in the
/// spirit of a `get-ip.sh` helper.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    command: String,
}

impl CommandResolver {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl AddressResolver for CommandResolver {
    async fn resolve(&self, identifier: &str) -> Result<Option<IpAddr>, LinuxError> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(format!("{} \"$1\"", self.command))
            .arg("linux-resolve")
            .arg(identifier)
            .output()
            .await
            .map_err(|e| LinuxError::Resolver {
                message: format!("running `{}`: {e}", self.command),
            })?;

        if !output.status.success() {
            return Err(LinuxError::Resolver {
                message: format!(
                    "`{}` exited with {}: {}",
                    self.command,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Ok(None);
        };
        line.parse().map(Some).map_err(|_| LinuxError::Resolver {
            message: format!("`{}` printed '{line}', which is not an ip address", self.command),
        })
    }
}

/// Resolver selected by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredResolver {
    Leases(LeaseFileResolver),
    Command(CommandResolver),
}

impl ConfiguredResolver {
    pub fn from_config(config: &ResolverConfig) -> Self {
        if config.command.trim().is_empty() {
            ConfiguredResolver::Leases(LeaseFileResolver::new(&config.leases))
        } else {
            ConfiguredResolver::Command(CommandResolver::new(config.command.trim()))
        }
    }
}

impl AddressResolver for ConfiguredResolver {
    async fn resolve(&self, identifier: &str) -> Result<Option<IpAddr>, LinuxError> {
        match self {
            ConfiguredResolver::Leases(r) => r.resolve(identifier).await,
            ConfiguredResolver::Command(r) => r.resolve(identifier).await,
        }
    }
}
