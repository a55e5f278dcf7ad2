//! Shared vocabulary for guest lifecycle state.
//!
//! Only the supervisor holds a `GuestState` in memory, for the length of one
//! command. Across invocations the state is re-derived from the persisted
//! record: a live record means `Running`, anything else means `Absent`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestState {
    /// No live hypervisor process for this working directory.
    Absent,

    /// Boot requested, hypervisor not yet launched.
    Booting,

    /// Hypervisor launched and recorded; waiting for the guest to lease an
    /// address.
    Resolving,

    /// Guest is up and has an address.
    Running,

    /// Address resolution gave up; the orphaned process must be killed.
    TimedOut,

    /// Guest shut itself down after a remote `halt`.
    Halted,

    /// Hypervisor was killed with SIGKILL.
    Killed,
}

impl GuestState {
    /// States after which the record is stale and the directory is free for
    /// a new boot.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GuestState::Absent | GuestState::Halted | GuestState::Killed
        )
    }
}

impl fmt::Display for GuestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GuestState::Absent => "absent",
            GuestState::Booting => "booting",
            GuestState::Resolving => "resolving",
            GuestState::Running => "running",
            GuestState::TimedOut => "timed out",
            GuestState::Halted => "halted",
            GuestState::Killed => "killed",
        };
        f.write_str(s)
    }
}
