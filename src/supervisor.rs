//! Lifecycle supervisor: the state machine behind `boot`, `kill` and `halt`.
//!
//! ```text
//! Absent    --boot-->                     Booting
//! Booting   --launched-->                 Resolving
//! Resolving --address before deadline-->  Running
//! Resolving --deadline / lookup error-->  TimedOut --kill orphan--> Absent
//! Running   --kill-->                     Killed
//! Running   --halt, process exits-->      Halted
//! ```
//!
//! Everything it touches is injected: process control, launching, address
//! lookup and time. The CLI wires in the real implementations; tests use
//! fakes and never sleep.

use std::net::IpAddr;
use std::time::Duration;

use tokio::time::Instant;

use crate::boot::{self, BootSpec, Launcher};
use crate::error::LinuxError;
use crate::guest_state::GuestState;
use crate::hostname;
use crate::resolver::AddressResolver;
use crate::session::RemoteShell;
use crate::tracker::{PersistedRecord, ProcessControl, ProcessTracker, Signal, TrackerStatus};

/// How often liveness is checked while waiting for a halted guest to exit.
pub const HALT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait Clock {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Address polling parameters for one boot.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    /// A live guest already owns this working directory; nothing launched.
    AlreadyRunning(PersistedRecord),
    Booted {
        record: PersistedRecord,
        address: IpAddr,
        attempts: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning,
    Killed { pid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltOutcome {
    NotRunning,
    /// Shutdown sent, exit not awaited.
    Requested { pid: u32 },
    Halted { pid: u32 },
    /// Shutdown sent but the process outlived the wait.
    StillRunning { pid: u32 },
}

enum PollResult {
    Found { address: IpAddr, attempts: u32 },
    Expired { attempts: u32 },
    Failed { error: LinuxError, attempts: u32 },
}

pub struct Supervisor<P, L, R, C> {
    tracker: ProcessTracker<P>,
    launcher: L,
    resolver: R,
    clock: C,
    state: GuestState,
}

impl<P, L, R, C> Supervisor<P, L, R, C>
where
    P: ProcessControl,
    L: Launcher,
    R: AddressResolver,
    C: Clock,
{
    pub fn new(tracker: ProcessTracker<P>, launcher: L, resolver: R, clock: C) -> Self {
        let state = match tracker.status() {
            TrackerStatus::Running(_) => GuestState::Running,
            TrackerStatus::Absent => GuestState::Absent,
        };
        Self {
            tracker,
            launcher,
            resolver,
            clock,
            state,
        }
    }

    pub fn state(&self) -> GuestState {
        self.state
    }

    fn transition(&mut self, to: GuestState) {
        if self.state != to {
            tracing::info!(from = %self.state, to = %to, "guest state");
            self.state = to;
        }
    }

    pub fn status(&self) -> TrackerStatus {
        self.tracker.status()
    }

    /// Pid from the pid file, whether or not it is still alive.
    pub fn pid(&self) -> Option<u32> {
        self.tracker.store().read_pid()
    }

    /// Boot a guest unless one is already running, then wait for its address.
    ///
    /// If no address shows up before `policy.timeout`, or the resolver
    /// errors, the launched process is killed and `BootTimeout` returned.
    pub async fn boot(
        &mut self,
        spec: &BootSpec,
        requested: Option<&str>,
        policy: PollPolicy,
    ) -> Result<BootOutcome, LinuxError> {
        if let Some(name) = requested {
            hostname::validate(name)?;
        }

        if let TrackerStatus::Running(record) = self.tracker.status() {
            tracing::info!(pid = record.pid, "guest already running, not booting");
            self.transition(GuestState::Running);
            return Ok(BootOutcome::AlreadyRunning(record));
        }

        let identifier = requested.map_or_else(hostname::generate, str::to_string);
        self.transition(GuestState::Booting);
        let record = match boot::boot(
            &self.launcher,
            self.tracker.processes(),
            self.tracker.store(),
            spec,
            &identifier,
        ) {
            Ok(record) => record,
            Err(e) => {
                self.transition(GuestState::Absent);
                return Err(e);
            }
        };
        self.transition(GuestState::Resolving);

        let reason = match self.poll_address(&record.identifier, policy).await {
            PollResult::Found { address, attempts } => {
                self.transition(GuestState::Running);
                return Ok(BootOutcome::Booted {
                    record,
                    address,
                    attempts,
                });
            }
            PollResult::Expired { attempts } => format!(
                "no address for {} after {attempts} attempts in {:?}",
                record.identifier, policy.timeout
            ),
            PollResult::Failed { error, attempts } => {
                format!("{error} (attempt {attempts})")
            }
        };

        self.transition(GuestState::TimedOut);
        self.cleanup_orphan(&record)?;
        self.transition(GuestState::Absent);
        Err(LinuxError::BootTimeout { reason })
    }

    async fn poll_address(&self, identifier: &str, policy: PollPolicy) -> PollResult {
        let deadline = self.clock.now() + policy.timeout;
        let mut attempts = 0;

        loop {
            if self.clock.now() >= deadline {
                return PollResult::Expired { attempts };
            }
            attempts += 1;
            match self.resolver.resolve(identifier).await {
                Ok(Some(address)) => {
                    tracing::info!(%address, attempts, "guest address resolved");
                    return PollResult::Found { address, attempts };
                }
                Ok(None) => tracing::debug!(attempts, "no address yet"),
                Err(error) => {
                    tracing::warn!(%error, attempts, "address lookup failed, giving up");
                    return PollResult::Failed { error, attempts };
                }
            }
            self.clock.sleep(policy.interval).await;
        }
    }

    /// Kill a process we launched but can no longer reach, and drop its
    /// record. A process that already exited is fine.
    fn cleanup_orphan(&self, record: &PersistedRecord) -> Result<(), LinuxError> {
        match self.tracker.terminate(record.pid, Signal::Forceful) {
            Ok(()) => {}
            Err(LinuxError::ProcessNotFound { pid }) => {
                tracing::debug!(pid, "orphan already gone");
            }
            Err(e) => return Err(e),
        }
        self.tracker.store().remove()
    }

    /// SIGKILL the guest if it is running.
    pub fn kill(&mut self) -> Result<KillOutcome, LinuxError> {
        let TrackerStatus::Running(record) = self.tracker.status() else {
            return Ok(KillOutcome::NotRunning);
        };
        self.tracker.terminate(record.pid, Signal::Forceful)?;
        self.tracker.store().remove()?;
        self.transition(GuestState::Killed);
        Ok(KillOutcome::Killed { pid: record.pid })
    }

    /// Address of the running guest, looked up once.
    pub async fn address(&self) -> Result<(PersistedRecord, IpAddr), LinuxError> {
        let TrackerStatus::Running(record) = self.tracker.status() else {
            return Err(LinuxError::NotRunning);
        };
        let found = self.resolver.resolve(&record.identifier).await?;
        match found {
            Some(address) => Ok((record, address)),
            None => Err(LinuxError::NoAddress {
                hostname: record.identifier,
            }),
        }
    }

    /// Ask the guest to shut down, then optionally wait up to `wait` for the
    /// hypervisor to exit.
    pub async fn halt<S: RemoteShell>(
        &mut self,
        shell: &S,
        wait: Option<Duration>,
    ) -> Result<HaltOutcome, LinuxError> {
        let (record, address) = match self.address().await {
            Ok(found) => found,
            Err(LinuxError::NotRunning) => return Ok(HaltOutcome::NotRunning),
            Err(e) => return Err(e),
        };
        let pid = record.pid;

        // The connection usually drops mid-command, so the exit code says
        // little about whether the guest is going down.
        let code = shell.halt(address).await?;
        tracing::debug!(code, "halt command returned");

        let Some(wait) = wait else {
            return Ok(HaltOutcome::Requested { pid });
        };

        let deadline = self.clock.now() + wait;
        loop {
            if !self.tracker.is_alive(pid) {
                self.tracker.store().remove()?;
                self.transition(GuestState::Halted);
                return Ok(HaltOutcome::Halted { pid });
            }
            if self.clock.now() >= deadline {
                tracing::warn!(pid, ?wait, "guest still running after halt");
                return Ok(HaltOutcome::StillRunning { pid });
            }
            self.clock.sleep(HALT_POLL_INTERVAL).await;
        }
    }
}
