//! Durable record of the current guest and liveness checks against it.
//!
//! The record is two plain-text files in the working directory: the pid file
//! and the hostname file. It is the only state that survives between CLI
//! invocations, so every status question goes through here.

use std::path::PathBuf;

use crate::error::LinuxError;
use crate::paths::WorkDir;

/// On-disk identity of a launched guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
    pub pid: u32,
    pub identifier: String,
}

/// What a status query found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerStatus {
    Absent,
    Running(PersistedRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM
    Graceful,
    /// SIGKILL
    Forceful,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Graceful => libc::SIGTERM,
            Signal::Forceful => libc::SIGKILL,
        }
    }
}

// ── RecordStore ──────────────────────────────────────────

/// Read/write/remove access to the persisted record files.
#[derive(Debug, Clone)]
pub struct RecordStore {
    pid_file: PathBuf,
    hostname_file: PathBuf,
}

impl RecordStore {
    pub fn new(work: &WorkDir) -> Self {
        Self {
            pid_file: work.pid_file.clone(),
            hostname_file: work.hostname_file(),
        }
    }

    /// Current record, or `None` when either file is missing or unparsable.
    pub fn read(&self) -> Option<PersistedRecord> {
        let pid = std::fs::read_to_string(&self.pid_file).ok()?;
        let pid = parse_pid(&pid)?;
        let identifier = std::fs::read_to_string(&self.hostname_file).ok()?;
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return None;
        }
        Some(PersistedRecord {
            pid,
            identifier: identifier.to_string(),
        })
    }

    /// Write the identifier, then the pid. Readers key off the pid file, so
    /// they never see a pid without its identifier.
    pub fn write(&self, record: &PersistedRecord) -> Result<(), LinuxError> {
        std::fs::write(&self.hostname_file, &record.identifier).map_err(|e| LinuxError::Io {
            context: format!("writing {}", self.hostname_file.display()),
            source: e,
        })?;
        if let Err(e) = std::fs::write(&self.pid_file, record.pid.to_string()) {
            // No half records: an identifier without a pid is never left behind.
            let _ = std::fs::remove_file(&self.hostname_file);
            return Err(LinuxError::Io {
                context: format!("writing {}", self.pid_file.display()),
                source: e,
            });
        }
        Ok(())
    }

    /// Remove both files. Missing files are fine.
    pub fn remove(&self) -> Result<(), LinuxError> {
        for path in [&self.pid_file, &self.hostname_file] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(LinuxError::Io {
                        context: format!("removing {}", path.display()),
                        source: e,
                    });
                }
            }
        }
        Ok(())
    }

    /// Raw pid from the pid file, ignoring the hostname file. Used by
    /// `linux pid`.
    pub fn read_pid(&self) -> Option<u32> {
        let contents = std::fs::read_to_string(&self.pid_file).ok()?;
        parse_pid(&contents)
    }
}

/// Pid 0 and anything that does not fit a positive `pid_t` would address a
/// process group in `kill(2)`, so they are not valid records.
fn parse_pid(s: &str) -> Option<u32> {
    let pid: u32 = s.trim().parse().ok()?;
    if pid == 0 || i32::try_from(pid).is_err() {
        return None;
    }
    Some(pid)
}

// ── ProcessControl ───────────────────────────────────────

/// OS process operations the tracker depends on.
pub trait ProcessControl {
    /// Whether a process with this pid exists. Never errors.
    fn is_alive(&self, pid: u32) -> bool;

    /// Deliver a signal. `ProcessNotFound` when the pid does not exist.
    fn terminate(&self, pid: u32, signal: Signal) -> Result<(), LinuxError>;
}

/// Real processes via `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

impl ProcessControl for SystemProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw == 0 {
            return false;
        }
        // SAFETY: signal 0 performs only the existence and permission check.
        let rc = unsafe { libc::kill(raw, 0) };
        // EPERM means the process exists but belongs to someone else.
        let exists = rc == 0
            || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
        exists && !is_zombie(pid)
    }

    fn terminate(&self, pid: u32, signal: Signal) -> Result<(), LinuxError> {
        let raw = i32::try_from(pid)
            .ok()
            .filter(|p| *p > 0)
            .ok_or(LinuxError::ProcessNotFound { pid })?;
        // SAFETY: raw is a positive pid, so only that single process is signalled.
        let rc = unsafe { libc::kill(raw, signal.as_raw()) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Err(LinuxError::ProcessNotFound { pid });
        }
        Err(LinuxError::Signal { pid, source: err })
    }
}

/// A zombie still answers `kill(pid, 0)` until its parent reaps it, but the
/// guest behind it is gone.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // Format: `pid (comm) state ...`; comm may contain spaces or parens.
    stat.rfind(')')
        .and_then(|i| stat[i + 1..].split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

// ── ProcessTracker ───────────────────────────────────────

/// Composes the record store with process liveness.
#[derive(Debug, Clone)]
pub struct ProcessTracker<P> {
    store: RecordStore,
    processes: P,
}

impl<P: ProcessControl> ProcessTracker<P> {
    pub fn new(store: RecordStore, processes: P) -> Self {
        Self { store, processes }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn current_record(&self) -> Option<PersistedRecord> {
        self.store.read()
    }

    pub fn processes(&self) -> &P {
        &self.processes
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.processes.is_alive(pid)
    }

    /// `Running` only when a record exists and its process is alive. A stale
    /// record reads as `Absent`.
    pub fn status(&self) -> TrackerStatus {
        match self.current_record() {
            Some(record) if self.is_alive(record.pid) => TrackerStatus::Running(record),
            Some(record) => {
                tracing::debug!(pid = record.pid, "ignoring stale record");
                TrackerStatus::Absent
            }
            None => TrackerStatus::Absent,
        }
    }

    pub fn terminate(&self, pid: u32, signal: Signal) -> Result<(), LinuxError> {
        tracing::info!(pid, ?signal, "terminating hypervisor");
        self.processes.terminate(pid, signal)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashSet;

    use super::*;

    #[derive(Default)]
    struct FakeProcesses {
        alive: RefCell<HashSet<u32>>,
    }

    impl ProcessControl for FakeProcesses {
        fn is_alive(&self, pid: u32) -> bool {
            self.alive.borrow().contains(&pid)
        }

        fn terminate(&self, pid: u32, _signal: Signal) -> Result<(), LinuxError> {
            if self.alive.borrow_mut().remove(&pid) {
                Ok(())
            } else {
                Err(LinuxError::ProcessNotFound { pid })
            }
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> (WorkDir, RecordStore) {
        let work = WorkDir::new(dir.path());
        let store = RecordStore::new(&work);
        (work, store)
    }

    #[test]
    fn record_round_trips_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let (work, store) = store_in(&dir);
        let record = PersistedRecord {
            pid: 4242,
            identifier: "tom-felix-oreo-luna".into(),
        };
        store.write(&record).unwrap();

        assert_eq!(std::fs::read_to_string(&work.pid_file).unwrap(), "4242");
        assert_eq!(store.read(), Some(record));
    }

    #[test]
    fn unparsable_pid_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let (work, store) = store_in(&dir);
        std::fs::write(work.hostname_file(), "felix").unwrap();

        for contents in ["", "abc", "0", "-5", "4294967295"] {
            std::fs::write(&work.pid_file, contents).unwrap();
            assert_eq!(store.read(), None, "pid file {contents:?}");
        }
    }

    #[test]
    fn missing_hostname_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let (work, store) = store_in(&dir);
        std::fs::write(&work.pid_file, "77\n").unwrap();
        assert_eq!(store.read(), None);
        assert_eq!(store.read_pid(), Some(77));
    }

    #[test]
    fn failed_pid_write_leaves_no_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::new(dir.path())
            .with_overrides(Some(dir.path().join("missing/linux.pid")), None, None);
        let store = RecordStore::new(&work);
        let err = store
            .write(&PersistedRecord {
                pid: 12,
                identifier: "oreo".into(),
            })
            .unwrap_err();
        assert!(matches!(err, LinuxError::Io { .. }));
        assert!(!work.hostname_file().exists());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (_work, store) = store_in(&dir);
        store
            .write(&PersistedRecord {
                pid: 9,
                identifier: "oreo".into(),
            })
            .unwrap();
        store.remove().unwrap();
        store.remove().unwrap();
        assert_eq!(store.read(), None);
    }

    #[test]
    fn status_ignores_stale_record() {
        let dir = tempfile::tempdir().unwrap();
        let (_work, store) = store_in(&dir);
        store
            .write(&PersistedRecord {
                pid: 31337,
                identifier: "stale".into(),
            })
            .unwrap();
        let tracker = ProcessTracker::new(store, FakeProcesses::default());
        assert_eq!(tracker.status(), TrackerStatus::Absent);
    }

    #[test]
    fn status_reports_live_record() {
        let dir = tempfile::tempdir().unwrap();
        let (_work, store) = store_in(&dir);
        let record = PersistedRecord {
            pid: 500,
            identifier: "live".into(),
        };
        store.write(&record).unwrap();
        let processes = FakeProcesses::default();
        processes.alive.borrow_mut().insert(500);
        let tracker = ProcessTracker::new(store, processes);
        assert_eq!(tracker.status(), TrackerStatus::Running(record));
    }

    #[test]
    fn current_process_is_alive() {
        assert!(SystemProcesses.is_alive(std::process::id()));
    }

    #[test]
    fn out_of_range_pids_are_not_alive() {
        assert!(!SystemProcesses.is_alive(0));
        assert!(!SystemProcesses.is_alive(u32::MAX));
        assert!(!SystemProcesses.is_alive(999_999_999));
    }

    #[test]
    fn terminate_missing_process_is_not_found() {
        let err = SystemProcesses
            .terminate(999_999_999, Signal::Forceful)
            .unwrap_err();
        assert!(matches!(err, LinuxError::ProcessNotFound { pid: 999_999_999 }));
    }

    #[test]
    fn forceful_terminate_kills_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(SystemProcesses.is_alive(pid));

        SystemProcesses.terminate(pid, Signal::Forceful).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(!SystemProcesses.is_alive(pid));
    }
}
