use std::time::Duration;

use facet::Facet;

use crate::error::LinuxError;
use crate::paths::WorkDir;

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default = "xhyve")]
    pub hypervisor: String,
    #[facet(default = "vmlinuz64")]
    pub kernel: String,
    #[facet(default = "initrd.gz")]
    pub initrd: String,
    #[facet(default = "1G")]
    pub memory: String,
    #[facet(default = "2:0")]
    pub net_slot: String,
    #[facet(default)]
    pub boot: BootConfig,
    #[facet(default)]
    pub ssh: SshConfig,
    #[facet(default)]
    pub resolver: ResolverConfig,
    #[facet(default)]
    pub halt: HaltConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hypervisor: "xhyve".into(),
            kernel: "vmlinuz64".into(),
            initrd: "initrd.gz".into(),
            memory: "1G".into(),
            net_slot: "2:0".into(),
            boot: BootConfig::default(),
            ssh: SshConfig::default(),
            resolver: ResolverConfig::default(),
            halt: HaltConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct BootConfig {
    #[facet(default = 15)]
    pub timeout_s: u64,
    #[facet(default = 1000)]
    pub poll_interval_ms: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            timeout_s: 15,
            poll_interval_ms: 1000,
        }
    }
}

impl BootConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct SshConfig {
    #[facet(default = "tc")]
    pub user: String,
    #[facet(default = "ssh")]
    pub binary: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "tc".into(),
            binary: "ssh".into(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct ResolverConfig {
    #[facet(default = "/var/db/dhcpd_leases")]
    pub leases: String,
    /// Shell command run with the guest identifier as `$1`. Takes precedence
    /// over the lease file when non-empty.
    #[facet(default)]
    pub command: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            leases: "/var/db/dhcpd_leases".into(),
            command: String::new(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct HaltConfig {
    #[facet(default = 30)]
    pub timeout_s: u64,
}

impl Default for HaltConfig {
    fn default() -> Self {
        Self { timeout_s: 30 }
    }
}

// ── validation ────────────────────────────────────────────

const MIN_MEMORY: u64 = 256 << 20;

/// Bytes for an xhyve `-m` value: a plain count or `<n>K`, `<n>M`, `<n>G`
/// (binary units, optional trailing `B`, any case).
fn memory_bytes(value: &str) -> Option<u64> {
    let upper = value.trim().to_ascii_uppercase();
    let digits = upper.strip_suffix('B').unwrap_or(&upper);
    let (digits, shift) = match digits.as_bytes().last()? {
        b'K' => (&digits[..digits.len() - 1], 10),
        b'M' => (&digits[..digits.len() - 1], 20),
        b'G' => (&digits[..digits.len() - 1], 30),
        _ => (digits, 0),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()?.checked_mul(1 << shift)
}

fn validate_config(config: &Config) -> Result<(), LinuxError> {
    if config.hypervisor.trim().is_empty() {
        return Err(LinuxError::Validation {
            message: "hypervisor must not be empty".into(),
        });
    }

    let memory = memory_bytes(&config.memory).ok_or_else(|| LinuxError::Validation {
        message: format!(
            "memory must be a byte count or end in K, M or G (got '{}')",
            config.memory
        ),
    })?;
    if memory < MIN_MEMORY {
        return Err(LinuxError::Validation {
            message: format!("memory must be at least 256M (got '{}')", config.memory),
        });
    }

    let slot_ok = !config.net_slot.is_empty()
        && config
            .net_slot
            .split(':')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    if !slot_ok {
        return Err(LinuxError::Validation {
            message: format!(
                "net_slot must look like '2' or '2:0' (got '{}')",
                config.net_slot
            ),
        });
    }

    if config.boot.poll_interval_ms == 0 {
        return Err(LinuxError::Validation {
            message: "boot.poll_interval_ms must be greater than 0".into(),
        });
    }
    if config.boot.timeout_s == 0 {
        return Err(LinuxError::Validation {
            message: "boot.timeout_s must be greater than 0".into(),
        });
    }
    if config.halt.timeout_s == 0 {
        return Err(LinuxError::Validation {
            message: "halt.timeout_s must be greater than 0".into(),
        });
    }
    if config.ssh.user.is_empty() {
        return Err(LinuxError::Validation {
            message: "ssh.user must not be empty".into(),
        });
    }

    Ok(())
}

// ── template ──────────────────────────────────────────────

/// Default `linux.toml` written by `linux init`.
pub fn default_config_toml() -> String {
    r#"# Hypervisor binary; bare names are looked up on PATH.
hypervisor = "xhyve"
# Kernel and initrd, relative to this folder unless absolute.
kernel = "vmlinuz64"
initrd = "initrd.gz"
memory = "1G"
net_slot = "2:0"

[boot]
timeout_s = 15
poll_interval_ms = 1000

[ssh]
user = "tc"
binary = "ssh"

[resolver]
leases = "/var/db/dhcpd_leases"
# command = "./get-ip.sh"

[halt]
timeout_s = 30
"#
    .to_string()
}

// ── public API ────────────────────────────────────────────

/// Load `linux.toml` from the working directory. A missing file yields the
/// defaults; a present but invalid one is an error.
pub fn load_config(work: &WorkDir) -> Result<Config, LinuxError> {
    let path = work.config_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(LinuxError::Io {
                context: format!("reading {}", path.display()),
                source,
            });
        }
    };

    parse_config(&contents).map_err(|e| match e {
        LinuxError::ConfigParse { message, .. } => LinuxError::ConfigParse {
            path: path.display().to_string(),
            message,
        },
        other => other,
    })
}

pub fn parse_config(contents: &str) -> Result<Config, LinuxError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| LinuxError::ConfigParse {
        path: String::new(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}
