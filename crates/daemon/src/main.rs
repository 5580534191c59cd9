//! USB2FA Agent
//!
//! Second-factor approval for newly attached USB devices.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use daemon::config::{default_config_path, CliOverrides, Config};
use daemon::control::{self, ControlCommand};
use daemon::devices::{load_file, usb::SYSFS_USB_DEVICES, LedgerKind, SysfsEnumerator};
use daemon::pidfile::{remove_pid_file, running_pid, write_pid_file};
use daemon::pushauth::client_from_config;
use daemon::{logging, Agent, ConfigSource, Orchestrator, SystemHost};

/// USB2FA - second-factor approval for newly attached USB devices.
#[derive(Parser, Debug)]
#[command(name = "usb2fa-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the agent.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the agent in the foreground
    Start(StartArgs),

    /// Trust exactly the devices attached right now
    Discover,

    /// Clear the rejected devices
    Reset,

    /// Ask the running agent to reload its configuration (SIGHUP)
    Reload,

    /// Ask the running agent to trust the attached devices (SIGUSR1)
    Rediscover,

    /// Ask the running agent to clear rejected devices (SIGUSR2)
    ResetRejected,

    /// List trusted devices
    Devices {
        /// List rejected devices instead
        #[arg(long)]
        rejected: bool,
    },
}

/// Options for `start`. File and level options override the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// Trust the attached devices before polling
    #[arg(short = 'D', long)]
    pub find: bool,

    /// Clear rejected devices before polling
    #[arg(short = 'R', long)]
    pub reset: bool,

    /// Paranoia level when an unknown device connects (1-3)
    #[arg(short = 'C', long = "conn", value_name = "LEVEL",
          value_parser = clap::value_parser!(u8).range(1..=3))]
    pub connect: Option<u8>,

    /// Paranoia level when a device is rejected (1-3)
    #[arg(short = 'P', long = "action", value_name = "LEVEL",
          value_parser = clap::value_parser!(u8).range(1..=3))]
    pub reject: Option<u8>,

    /// Trusted devices file
    #[arg(short = 'o', long = "file", value_name = "FILE")]
    pub devices_file: Option<PathBuf>,

    /// Backup of the trusted devices file
    #[arg(short = 'b', long = "backup", value_name = "FILE")]
    pub backup_file: Option<PathBuf>,

    /// Rejected devices file
    #[arg(short = 'r', long = "reject", value_name = "FILE")]
    pub rejected_file: Option<PathBuf>,

    /// Log file
    #[arg(short = 'l', long = "log", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// PID file
    #[arg(short = 'p', long = "pid", value_name = "FILE")]
    pub pid_file: Option<PathBuf>,

    /// Principal that receives the push
    #[arg(short = 'u', long = "user", value_name = "USER")]
    pub username: Option<String>,
}

impl From<&StartArgs> for CliOverrides {
    fn from(args: &StartArgs) -> Self {
        CliOverrides {
            paranoia_connect: args.connect,
            paranoia_reject: args.reject,
            devices_file: args.devices_file.clone(),
            backup_file: args.backup_file.clone(),
            rejected_file: args.rejected_file.clone(),
            log_file: args.log_file.clone(),
            pid_file: args.pid_file.clone(),
            username: args.username.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let (mut config, load_problems) = Config::load(&config_path);
    config.apply_env_overrides();

    let overrides = match &cli.command {
        Commands::Start(args) => CliOverrides::from(args),
        _ => CliOverrides::default(),
    };
    overrides.apply(&mut config);

    // Initialize tracing
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    let log_file = match &cli.command {
        Commands::Start(_) => config.daemon.log_file.clone(),
        _ => None,
    };
    let _guard = logging::init(&level, log_file.as_deref())?;

    for problem in &load_problems {
        tracing::warn!("{}", problem);
    }
    config.repair();

    match cli.command {
        Commands::Start(args) => {
            let source = ConfigSource {
                path: Some(config_path),
                overrides,
            };
            start(config, source, args.find, args.reset).await?;
        }
        Commands::Discover => {
            if !signal_running(&config, ControlCommand::Discover)? {
                let mut agent = offline_agent(config);
                let count = agent.force_discovery()?;
                println!("Trusted {} attached devices", count);
            }
        }
        Commands::Reset => {
            if !signal_running(&config, ControlCommand::ResetRejected)? {
                let mut agent = offline_agent(config);
                agent.reset_rejected()?;
                println!("Rejected devices cleared");
            }
        }
        Commands::Reload => require_running(&config, ControlCommand::Reload)?,
        Commands::Rediscover => require_running(&config, ControlCommand::Discover)?,
        Commands::ResetRejected => require_running(&config, ControlCommand::ResetRejected)?,
        Commands::Devices { rejected } => {
            let kind = if rejected {
                LedgerKind::Rejected
            } else {
                LedgerKind::Trusted
            };
            let paths = config.ledger_paths();
            let records = load_file(paths.path(kind));
            if records.is_empty() {
                println!("No {} devices", kind);
            }
            for record in records {
                println!("{}", record);
            }
        }
    }

    Ok(())
}

/// Runs the agent until SIGINT or SIGTERM.
async fn start(
    config: Config,
    source: ConfigSource,
    find: bool,
    reset: bool,
) -> anyhow::Result<()> {
    let enumerator = SysfsEnumerator::new();
    if !enumerator.is_available() {
        anyhow::bail!(
            "USB enumeration is not available on this host ({} not found)",
            SYSFS_USB_DEVICES
        );
    }

    let pid_file = config.daemon.pid_file.clone();
    if let Some(pid) = running_pid(&pid_file) {
        eprintln!("Error: Agent already running (PID: {})", pid);
        eprintln!();
        eprintln!("To reload its configuration, run:");
        eprintln!("  usb2fa-daemon reload");
        std::process::exit(1);
    }
    write_pid_file(&pid_file)?;

    let result = serve(config, source, enumerator, find, reset).await;

    if let Err(e) = remove_pid_file(&pid_file) {
        tracing::warn!("Failed to remove PID file {}: {}", pid_file.display(), e);
    }
    result
}

async fn serve(
    config: Config,
    source: ConfigSource,
    enumerator: SysfsEnumerator,
    find: bool,
    reset: bool,
) -> anyhow::Result<()> {
    tracing::info!("Starting USB2FA agent (PID {})", std::process::id());

    let authenticator = client_from_config(&config.push_auth);
    let host = SystemHost::new(config.actions.clone());
    let mut agent = Agent::new(config, source, enumerator, authenticator, host);

    if find {
        agent.force_discovery().context("Initial discovery failed")?;
    }
    if reset {
        agent.reset_rejected().context("Resetting rejected devices failed")?;
    }

    let mut orchestrator = Orchestrator::new(agent);
    let handle = orchestrator.control_handle();
    let token = orchestrator.shutdown_token();

    let signals = tokio::spawn(async move {
        if let Err(e) = control::forward_signals(handle, token.clone()).await {
            tracing::error!("Failed to install signal handlers: {}", e);
            token.cancel();
        }
    });

    orchestrator.run().await;
    let _ = signals.await;

    tracing::info!("USB2FA agent stopped");
    Ok(())
}

/// Builds an agent for one-shot ledger commands.
fn offline_agent(config: Config) -> Agent<SysfsEnumerator, Option<daemon::DuoClient>, SystemHost> {
    let host = SystemHost::new(config.actions.clone());
    Agent::new(
        config,
        ConfigSource::default(),
        SysfsEnumerator::new(),
        None,
        host,
    )
}

/// Signals the running agent, if there is one. Returns true if signalled.
fn signal_running(config: &Config, command: ControlCommand) -> anyhow::Result<bool> {
    match running_pid(&config.daemon.pid_file) {
        Some(pid) => {
            send_signal(pid, command)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn require_running(config: &Config, command: ControlCommand) -> anyhow::Result<()> {
    if !signal_running(config, command)? {
        anyhow::bail!(
            "No running agent found (PID file: {})",
            config.daemon.pid_file.display()
        );
    }
    Ok(())
}

fn send_signal(pid: u32, command: ControlCommand) -> anyhow::Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).with_context(|| format!("Invalid PID {}", pid))?;
    kill(Pid::from_raw(raw), command.signal())
        .with_context(|| format!("Failed to signal agent (PID {})", pid))?;

    println!("Sent {} ({}) to agent (PID {})", command.signal(), command, pid);
    Ok(())
}
