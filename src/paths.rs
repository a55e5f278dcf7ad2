use std::path::{Path, PathBuf};

/// Environment variable set on every hypervisor process we launch. Its value
/// is the absolute working directory the guest belongs to.
pub const WORKDIR_MARKER: &str = "LINUX_VM_WORKDIR";

/// File layout of one guest's working directory.
///
/// Log and pid locations can be overridden from the command line; everything
/// else lives directly under `root`.
#[derive(Debug, Clone)]
pub struct WorkDir {
    pub root: PathBuf,
    pub pid_file: PathBuf,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            pid_file: root.join("linux.pid"),
            stdout_log: root.join("stdout.log"),
            stderr_log: root.join("stderr.log"),
            root,
        }
    }

    /// Apply command-line overrides for the pid file and log sinks.
    pub fn with_overrides(
        mut self,
        pid_file: Option<PathBuf>,
        stdout_log: Option<PathBuf>,
        stderr_log: Option<PathBuf>,
    ) -> Self {
        if let Some(p) = pid_file {
            self.pid_file = p;
        }
        if let Some(p) = stdout_log {
            self.stdout_log = p;
        }
        if let Some(p) = stderr_log {
            self.stderr_log = p;
        }
        self
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Guest identifier of the current record, next to the pid file.
    pub fn hostname_file(&self) -> PathBuf {
        self.root.join("hostname")
    }

    pub fn key_path(&self) -> PathBuf {
        self.root.join("id_ed25519")
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.root.join("id_ed25519.pub")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("linux.toml")
    }

    /// Supervisor's own debug log.
    pub fn supervisor_log(&self) -> PathBuf {
        self.root.join("linux.log")
    }

    /// Resolve a configured path: absolute paths pass through, relative ones
    /// are taken relative to the working directory.
    pub fn resolve(&self, configured: &str) -> PathBuf {
        let p = Path::new(configured);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    /// Absolute form of the root, used as the process marker value.
    pub fn marker_value(&self) -> String {
        std::path::absolute(&self.root)
            .unwrap_or_else(|_| self.root.clone())
            .display()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let wd = WorkDir::new("/tmp/linux");
        assert_eq!(wd.pid_file, PathBuf::from("/tmp/linux/linux.pid"));
        assert_eq!(wd.stdout_log, PathBuf::from("/tmp/linux/stdout.log"));
        assert_eq!(wd.stderr_log, PathBuf::from("/tmp/linux/stderr.log"));
        assert_eq!(wd.hostname_file(), PathBuf::from("/tmp/linux/hostname"));
    }

    #[test]
    fn overrides_replace_only_given_paths() {
        let wd = WorkDir::new("/tmp/linux").with_overrides(
            Some("/run/guest.pid".into()),
            None,
            Some("/var/log/guest.err".into()),
        );
        assert_eq!(wd.pid_file, PathBuf::from("/run/guest.pid"));
        assert_eq!(wd.stdout_log, PathBuf::from("/tmp/linux/stdout.log"));
        assert_eq!(wd.stderr_log, PathBuf::from("/var/log/guest.err"));
    }

    #[test]
    fn resolve_relative_and_absolute() {
        let wd = WorkDir::new("/tmp/linux");
        assert_eq!(wd.resolve("initrd.gz"), PathBuf::from("/tmp/linux/initrd.gz"));
        assert_eq!(wd.resolve("/opt/bzImage"), PathBuf::from("/opt/bzImage"));
    }
}
