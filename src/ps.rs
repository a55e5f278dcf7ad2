//! `linux ps`: every guest launched by this tool, across all working
//! directories.
//!
//! Guests are recognised by the marker variable we put in their environment.
//! Reading other processes' environments is not always permitted, so the
//! command line is checked for the marker too. This is a diagnostic listing;
//! lifecycle decisions only ever use the per-directory record.

use sysinfo::System;

use crate::paths::WORKDIR_MARKER;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestProcess {
    pub pid: u32,
    pub workdir: Option<String>,
    pub hostname: Option<String>,
}

/// Scan the process table for marked guests, sorted by pid.
pub fn list_guests() -> Vec<GuestProcess> {
    let mut sys = System::new();
    sys.refresh_processes();

    let mut guests: Vec<GuestProcess> = sys
        .processes()
        .iter()
        .filter_map(|(pid, process)| match_guest(pid.as_u32(), process.cmd(), process.environ()))
        .collect();
    guests.sort_by_key(|g| g.pid);
    guests
}

/// Decide whether a process is one of ours from its argv and environment.
pub fn match_guest(pid: u32, cmd: &[String], environ: &[String]) -> Option<GuestProcess> {
    let prefix = format!("{WORKDIR_MARKER}=");
    let workdir = environ
        .iter()
        .find_map(|kv| kv.strip_prefix(&prefix))
        .map(str::to_string);

    if workdir.is_none() && !cmd.iter().any(|arg| arg.contains(WORKDIR_MARKER)) {
        return None;
    }

    Some(GuestProcess {
        pid,
        workdir,
        hostname: hostname_from_cmd(cmd),
    })
}

/// Pull `host=<name>` out of the kexec argument.
fn hostname_from_cmd(cmd: &[String]) -> Option<String> {
    cmd.iter().find_map(|arg| {
        let start = arg.find("host=")? + "host=".len();
        let rest = &arg[start..];
        let end = rest.find([' ', '"', ',']).unwrap_or(rest.len());
        Some(rest[..end].to_string()).filter(|h| !h.is_empty())
    })
}
