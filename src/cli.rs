use clap::{Parser, Subcommand};
use std::path::PathBuf;

const HOST_KEY_NOTE: &str = "Host key checking is disabled for guest sessions: the guest's \
address and host key change on every boot, so the connection is not authenticated.";

#[derive(Parser, Debug)]
#[command(name = "linux", about = "Boot and manage a Linux guest under xhyve")]
pub struct Cli {
    /// Config folder holding keys, pid file and logs
    #[arg(short, long, default_value = "linux", global = true)]
    pub path: PathBuf,

    /// File the hypervisor's stdout is appended to [default: <path>/stdout.log]
    #[arg(long, global = true)]
    pub stdout: Option<PathBuf>,

    /// File the hypervisor's stderr is appended to [default: <path>/stderr.log]
    #[arg(long, global = true)]
    pub stderr: Option<PathBuf>,

    /// Pid file location [default: <path>/linux.pid]
    #[arg(long, global = true)]
    pub pid: Option<PathBuf>,

    /// Print debug logs to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new config folder with an ssh key pair
    Init,

    /// Boot linux from the config folder and wait for its ip
    Boot {
        /// Guest hostname [default: four random cat names]
        #[arg(long)]
        hostname: Option<String>,

        /// Seconds to wait for the guest to get an ip [default: from linux.toml, 15]
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,

        /// Print the hypervisor command instead of running it
        #[arg(long)]
        debug: bool,
    },

    /// Check whether linux is running
    Status,

    /// Print the pid of the linux process
    Pid,

    /// Open an ssh session into linux
    #[command(after_help = HOST_KEY_NOTE)]
    Ssh {
        /// Force pseudo-terminal allocation
        #[arg(short = 't')]
        tty: bool,
    },

    /// Run a single command over ssh; exits with its exit code
    #[command(after_help = HOST_KEY_NOTE)]
    Run {
        #[arg(
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },

    /// Run `sudo halt` in linux and wait for it to shut down
    #[command(after_help = HOST_KEY_NOTE)]
    Halt {
        /// Return as soon as the halt command was sent
        #[arg(long)]
        no_wait: bool,

        /// Seconds to wait for the hypervisor to exit [default: from linux.toml, 30]
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
    },

    /// Kill the linux process immediately with SIGKILL
    Kill,

    /// List every linux guest started by this tool on this host
    Ps,
}
