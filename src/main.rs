use std::time::Duration;

use clap::Parser;
use console::style;
use indicatif::ProgressBar;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use linux_vm::boot::{BootSpec, HypervisorLauncher, LaunchPlan};
use linux_vm::cli::{Cli, Command};
use linux_vm::config::{self, Config};
use linux_vm::error::LinuxError;
use linux_vm::hostname;
use linux_vm::keys;
use linux_vm::logging::SupervisorLog;
use linux_vm::paths::WorkDir;
use linux_vm::ps;
use linux_vm::resolver::ConfiguredResolver;
use linux_vm::session::{RemoteShell, SshGateway};
use linux_vm::supervisor::{
    BootOutcome, HaltOutcome, KillOutcome, PollPolicy, Supervisor, TokioClock,
};
use linux_vm::tracker::{ProcessTracker, RecordStore, SystemProcesses, TrackerStatus};

type LiveSupervisor =
    Supervisor<SystemProcesses, HypervisorLauncher, ConfiguredResolver, TokioClock>;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Stderr layer: quiet unless -v or RUST_LOG asks for more, so it does not
    // fight with the spinner.
    let terminal_filter = if cli.verbose {
        EnvFilter::new("linux_vm=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("linux_vm=warn"))
    };
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    // File layer: always captures linux_vm=debug, discards until attached
    let (file_writer, file_handle) = SupervisorLog::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("linux_vm=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    let work = WorkDir::new(&cli.path).with_overrides(cli.pid, cli.stdout, cli.stderr);

    // init creates the folder; ps spans every folder on the host
    match cli.command {
        Command::Init => {
            linux_vm::init::run(&work)?;
            println!("Created new config folder at {}", work.root.display());
            return Ok(());
        }
        Command::Ps => {
            print_guests();
            return Ok(());
        }
        _ => {}
    }

    if !work.exists() {
        return Err(LinuxError::NotInitialized {
            path: work.root.display().to_string(),
        }
        .into());
    }
    let config = config::load_config(&work)?;

    if matches!(
        cli.command,
        Command::Boot { debug: false, .. } | Command::Kill | Command::Halt { .. }
    ) && let Err(e) = file_handle.attach(&work.supervisor_log())
    {
        tracing::warn!(error = %e, "could not open supervisor log");
    }

    let mut supervisor = Supervisor::new(
        ProcessTracker::new(RecordStore::new(&work), SystemProcesses),
        HypervisorLauncher,
        ConfiguredResolver::from_config(&config.resolver),
        TokioClock,
    );

    match cli.command {
        Command::Init | Command::Ps => unreachable!(),
        Command::Boot {
            hostname,
            timeout,
            debug,
        } => {
            let public_key = keys::read_public_key(&work)?;
            let spec = BootSpec::from_config(&config, &work, public_key);
            if debug {
                print_launch_plan(&spec, hostname.as_deref())?;
            } else {
                let policy = PollPolicy {
                    timeout: timeout.map_or_else(|| config.boot.timeout(), Duration::from_secs),
                    interval: config.boot.poll_interval(),
                };
                run_boot(&mut supervisor, &spec, hostname.as_deref(), policy).await?;
            }
        }
        Command::Status => match supervisor.status() {
            TrackerStatus::Running(record) => {
                println!("Linux is running (pid {})", record.pid);
            }
            TrackerStatus::Absent => println!("Linux is not running"),
        },
        Command::Pid => {
            if let Some(pid) = supervisor.pid() {
                println!("{pid}");
            }
        }
        Command::Ssh { tty } => {
            let code = run_session(&supervisor, &config, &work, &[], tty).await?;
            std::process::exit(code);
        }
        Command::Run { command } => {
            let code = run_session(&supervisor, &config, &work, &command, false).await?;
            std::process::exit(code);
        }
        Command::Halt { no_wait, timeout } => {
            let wait = if no_wait {
                None
            } else {
                Some(timeout.map_or(Duration::from_secs(config.halt.timeout_s), Duration::from_secs))
            };
            run_halt(&mut supervisor, &config, &work, wait).await?;
        }
        Command::Kill => match supervisor.kill()? {
            KillOutcome::Killed { pid } => {
                println!("{} (pid {pid})", style("Linux has been killed").red());
            }
            KillOutcome::NotRunning => println!("Linux was not running"),
        },
    }

    Ok(())
}

fn print_launch_plan(spec: &BootSpec, requested: Option<&str>) -> Result<(), LinuxError> {
    let identifier = match requested {
        Some(name) => {
            hostname::validate(name)?;
            name.to_string()
        }
        None => hostname::generate(),
    };
    println!("{}", LaunchPlan::new(spec, &identifier).command_line());
    Ok(())
}

async fn run_boot(
    supervisor: &mut LiveSupervisor,
    spec: &BootSpec,
    requested: Option<&str>,
    policy: PollPolicy,
) -> Result<(), LinuxError> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Waiting for linux to boot...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let outcome = supervisor.boot(spec, requested, policy).await;
    spinner.finish_and_clear();

    match outcome? {
        BootOutcome::AlreadyRunning(record) => {
            println!("Linux is already running (pid {})", record.pid);
        }
        BootOutcome::Booted {
            record, address, ..
        } => {
            println!("{}", style("Linux has booted").green().bold());
            println!("  IP:       {address}");
            println!("  Hostname: {}", record.identifier);
            println!("  PID:      {}", record.pid);
        }
    }
    Ok(())
}

async fn run_session(
    supervisor: &LiveSupervisor,
    config: &Config,
    work: &WorkDir,
    commands: &[String],
    tty: bool,
) -> Result<i32, LinuxError> {
    let key_path = keys::ensure_private_key(work)?;
    let (_, address) = supervisor.address().await?;
    let gateway = SshGateway::new(&config.ssh, key_path);
    gateway.session(address, commands, tty).await
}

async fn run_halt(
    supervisor: &mut LiveSupervisor,
    config: &Config,
    work: &WorkDir,
    wait: Option<Duration>,
) -> Result<(), LinuxError> {
    let key_path = keys::ensure_private_key(work)?;
    let gateway = SshGateway::new(&config.ssh, key_path);

    let spinner = ProgressBar::new_spinner();
    if wait.is_some() {
        spinner.set_message("Waiting for linux to shut down...");
        spinner.enable_steady_tick(Duration::from_millis(120));
    }
    let outcome = supervisor.halt(&gateway, wait).await;
    spinner.finish_and_clear();

    match outcome? {
        HaltOutcome::NotRunning => println!("Linux is not running"),
        HaltOutcome::Requested { pid } => println!("Halt requested (pid {pid})"),
        HaltOutcome::Halted { pid } => {
            println!("{} (pid {pid})", style("Linux has halted").green());
        }
        HaltOutcome::StillRunning { pid } => {
            println!(
                "{} (pid {pid}); use `linux kill` to force it",
                style("Linux is still running after halt").yellow()
            );
        }
    }
    Ok(())
}

fn print_guests() {
    let guests = ps::list_guests();
    if guests.is_empty() {
        println!("No linux guests running");
        return;
    }
    println!("{:<8} {:<32} WORKDIR", "PID", "HOSTNAME");
    for guest in guests {
        println!(
            "{:<8} {:<32} {}",
            guest.pid,
            guest.hostname.as_deref().unwrap_or("-"),
            guest.workdir.as_deref().unwrap_or("-"),
        );
    }
}
