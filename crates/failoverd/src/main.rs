// # failoverd - DNS Failover Controller
//
// Thin operator front end. It reads configuration from the command line and
// environment, initialises logging, builds the controller and calls exactly
// one controller operation. Failover logic lives in failover-core.
//
// ## Configuration
//
// ### DNS Provider
// - `FAILOVER_PROVIDER_TYPE`: Provider type (cloudflare)
// - `FAILOVER_PROVIDER_API_TOKEN`: API token
// - `FAILOVER_PROVIDER_ZONE_ID`: Zone ID (optional, looked up from the base domain)
// - `FAILOVER_BASE_DOMAIN`: Zone apex that record names are qualified against
//
// ### State
// - `FAILOVER_STATE_PATH`: Path of the state document; the lock file and the
//   liveness marker sit next to it
//
// ### Setup defaults
// - `FAILOVER_INTERVAL_SECS`: Seconds between monitor ticks
// - `FAILOVER_FAILURE_THRESHOLD`: Unhealthy probes before failing over
// - `FAILOVER_RECOVERY_THRESHOLD`: Healthy probes before failing back
// - `FAILOVER_TTL`: TTL of created records
//
// ### Logging
// - `FAILOVER_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export FAILOVER_PROVIDER_API_TOKEN=your_token
// export FAILOVER_BASE_DOMAIN=example.com
// export FAILOVER_STATE_PATH=/var/lib/dns-failover/state.json
//
// failoverd setup --alias app --primary app-primary --primary-ip 192.0.2.10 \
//     --backup app-backup --backup-ip 192.0.2.20
// failoverd start
// ```

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use failover_core::{
    ControllerConfig, ErrorClass, FailoverController, ProviderConfig, ProviderRegistry,
    SetupRequest, Side, StatusReport,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Success
/// - 1: Configuration or other fatal error; retrying will not help
/// - 2: Runtime error that may succeed on retry (provider, lock, state)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailoverExitCode {
    Success = 0,
    Fatal = 1,
    Retryable = 2,
}

impl From<FailoverExitCode> for ExitCode {
    fn from(code: FailoverExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

impl FailoverExitCode {
    /// Exit code for an error returned by a command
    fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<failover_core::Error>().map(|e| e.class()) {
            Some(ErrorClass::Retryable) => FailoverExitCode::Retryable,
            Some(ErrorClass::Fatal) | None => FailoverExitCode::Fatal,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "failoverd", version, about = "Two-host DNS failover controller")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    #[arg(long, env = "FAILOVER_PROVIDER_TYPE", default_value = "cloudflare")]
    provider_type: String,

    #[arg(long, env = "FAILOVER_PROVIDER_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[arg(long, env = "FAILOVER_PROVIDER_ZONE_ID")]
    zone_id: Option<String>,

    #[arg(long, env = "FAILOVER_BASE_DOMAIN")]
    base_domain: String,

    #[arg(long, env = "FAILOVER_STATE_PATH")]
    state_path: Option<PathBuf>,

    #[arg(long = "default-interval", env = "FAILOVER_INTERVAL_SECS")]
    interval_secs: Option<u64>,

    #[arg(long = "default-failure-threshold", env = "FAILOVER_FAILURE_THRESHOLD")]
    failure_threshold: Option<u32>,

    #[arg(long = "default-recovery-threshold", env = "FAILOVER_RECOVERY_THRESHOLD")]
    recovery_threshold: Option<u32>,

    #[arg(long = "default-ttl", env = "FAILOVER_TTL")]
    ttl: Option<u32>,

    #[arg(long, env = "FAILOVER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the host records, the alias and the initial state
    Setup(SetupArgs),
    /// Run the monitor in the foreground until SIGINT or SIGTERM
    Start,
    /// Signal a running monitor and wait for it to exit
    Stop {
        /// Seconds to wait for the monitor to exit
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },
    /// Point the alias at a side (default: the inactive one)
    Switch {
        #[arg(long, value_enum)]
        to: Option<SideArg>,
    },
    /// Show state, probe both sides and read the live alias
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the managed records and the state
    Cleanup,
}

#[derive(Args, Debug)]
struct SetupArgs {
    /// Alias (CNAME) name
    #[arg(long)]
    alias: String,

    /// Primary host record name
    #[arg(long)]
    primary: String,

    #[arg(long)]
    primary_ip: IpAddr,

    /// Backup host record name
    #[arg(long)]
    backup: String,

    #[arg(long)]
    backup_ip: IpAddr,

    /// Seconds between monitor ticks
    #[arg(long)]
    interval: Option<u64>,

    #[arg(long)]
    failure_threshold: Option<u32>,

    #[arg(long)]
    recovery_threshold: Option<u32>,

    #[arg(long)]
    ttl: Option<u32>,
}

impl From<SetupArgs> for SetupRequest {
    fn from(args: SetupArgs) -> Self {
        SetupRequest {
            alias: args.alias,
            primary_record: args.primary,
            primary_ip: args.primary_ip,
            backup_record: args.backup,
            backup_ip: args.backup_ip,
            interval_secs: args.interval,
            failure_threshold: args.failure_threshold,
            recovery_threshold: args.recovery_threshold,
            ttl: args.ttl,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    Primary,
    Backup,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Primary => Side::Primary,
            SideArg::Backup => Side::Backup,
        }
    }
}

impl GlobalArgs {
    /// Build and validate the controller configuration
    fn controller_config(&self) -> Result<ControllerConfig> {
        let provider = match self.provider_type.as_str() {
            "cloudflare" => {
                let api_token = self.api_token.clone().unwrap_or_default();
                check_api_token(&api_token)?;
                ProviderConfig::Cloudflare {
                    api_token,
                    zone_id: self.zone_id.clone(),
                }
            }
            other => anyhow::bail!(
                "FAILOVER_PROVIDER_TYPE '{}' is not supported. \
                Supported providers: cloudflare",
                other
            ),
        };

        let mut config = ControllerConfig::new(provider, self.base_domain.trim());
        if let Some(path) = &self.state_path {
            config.state_path = path.clone();
        }
        if let Some(interval) = self.interval_secs {
            config.defaults.interval_secs = interval;
        }
        if let Some(threshold) = self.failure_threshold {
            config.defaults.failure_threshold = threshold;
        }
        if let Some(threshold) = self.recovery_threshold {
            config.defaults.recovery_threshold = threshold;
        }
        if let Some(ttl) = self.ttl {
            config.defaults.ttl = ttl;
        }

        config.validate()?;
        Ok(config)
    }

    fn log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "FAILOVER_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }
}

/// Reject missing and obviously placeholder tokens before any API call
fn check_api_token(token: &str) -> Result<()> {
    if token.is_empty() {
        anyhow::bail!(
            "FAILOVER_PROVIDER_API_TOKEN is required. \
            Set it via: export FAILOVER_PROVIDER_API_TOKEN=your_token"
        );
    }

    let token_lower = token.to_lowercase();
    if token_lower.contains("your_token") || token_lower.contains("replace_me") || token_lower == "token" {
        anyhow::bail!(
            "FAILOVER_PROVIDER_API_TOKEN appears to be a placeholder. \
            Use an actual API token from your DNS provider."
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.global.log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return FailoverExitCode::Fatal.into();
        }
    };

    let config = match cli.global.controller_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return FailoverExitCode::Fatal.into();
        }
    };

    // Logs go to stderr so `status --json` stays parseable
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return FailoverExitCode::Fatal.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return FailoverExitCode::Fatal.into();
        }
    };

    let result = rt.block_on(run(config, cli.command));

    match result {
        Ok(()) => FailoverExitCode::Success.into(),
        Err(e) => {
            error!("{:#}", e);
            FailoverExitCode::for_error(&e).into()
        }
    }
}

/// Build the controller and run one command
async fn run(config: ControllerConfig, command: Command) -> Result<()> {
    let registry = ProviderRegistry::new();

    #[cfg(feature = "cloudflare")]
    failover_provider_cloudflare::register(&registry);

    debug!(providers = ?registry.list_providers(), "Providers registered");

    let controller = FailoverController::from_config(config, &registry).await?;

    match command {
        Command::Setup(args) => {
            let document = controller.setup(args.into()).await?;
            println!(
                "Configured {} -> {} (primary {} / backup {})",
                document.config.alias,
                document.active_target(),
                document.config.primary_record,
                document.config.backup_record
            );
        }
        Command::Start => run_monitor(&controller).await?,
        Command::Stop { wait_secs } => stop_monitor(&controller, Duration::from_secs(wait_secs)).await?,
        Command::Switch { to } => {
            let report = controller.manual_switch(to.map(Side::from)).await?;
            println!(
                "Switched {} from {} to {} ({})",
                report.document.config.alias,
                report.from,
                report.to,
                report.document.active_target()
            );
        }
        Command::Status { json } => {
            let report = controller.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status(&report);
            }
        }
        Command::Cleanup => {
            controller.cleanup().await?;
            println!("Failover configuration removed");
        }
    }

    Ok(())
}

/// Run the monitor until a shutdown signal arrives or the loop exits
async fn run_monitor(controller: &FailoverController) -> Result<()> {
    let pid = controller.start_monitor().await?;
    info!(pid, "Monitor running; send SIGTERM or SIGINT to stop");

    tokio::select! {
        signal = wait_for_shutdown() => {
            info!("Received shutdown signal: {}", signal?);
            controller.stop_monitor().await?;
        }
        result = controller.wait_monitor() => {
            result?;
        }
    }

    info!("Monitor exited");
    Ok(())
}

/// Ask the monitor in another process to stop and wait for its marker to go
async fn stop_monitor(controller: &FailoverController, wait: Duration) -> Result<()> {
    let Some(pid) = controller.monitor_pid().await? else {
        println!("Monitor is not running");
        return Ok(());
    };

    send_terminate(pid)?;
    info!(pid, "Sent SIGTERM to monitor");

    let deadline = tokio::time::Instant::now() + wait;
    while controller.monitor_pid().await?.is_some() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("Monitor (pid {}) did not exit within {:?}", pid, wait);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    println!("Monitor (pid {}) stopped", pid);
    Ok(())
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<()> {
    let pid = libc::pid_t::try_from(pid)?;
    // SAFETY: kill() only sends a signal; no memory is shared with the callee
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // Exited between the liveness check and the signal
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err.into());
        }
        warn!(pid, "Monitor exited before it could be signalled");
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_terminate(pid: u32) -> Result<()> {
    anyhow::bail!("Stopping monitor pid {} from another process needs a unix platform", pid)
}

fn print_status(report: &StatusReport) {
    let doc = &report.document;
    let state = &doc.state;

    println!("Alias:          {}", doc.config.alias);
    println!("Active side:    {} ({})", state.active_side, doc.active_target());
    println!(
        "Primary:        {} [{}] {}",
        doc.config.primary_record, doc.config.primary_ip, report.primary_health
    );
    println!(
        "Backup:         {} [{}] {}",
        doc.config.backup_record, doc.config.backup_ip, report.backup_health
    );
    println!(
        "Counters:       failures {}/{}, recoveries {}/{}",
        state.consecutive_failures,
        doc.config.failure_threshold,
        state.consecutive_recoveries,
        doc.config.recovery_threshold
    );
    println!("Last switch:    {}", state.last_transition_timestamp.to_rfc3339());
    match &report.live_alias_target {
        Some(target) if report.is_drifted() => {
            println!("Live alias:     {} (DRIFT: state says {})", target, doc.active_target())
        }
        Some(target) => println!("Live alias:     {}", target),
        None => println!("Live alias:     unknown"),
    }
    match report.monitor_pid {
        Some(pid) => println!("Monitor:        running (pid {})", pid),
        None => println!("Monitor:        stopped"),
    }
}

/// Wait for SIGTERM or SIGINT and return the signal name
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["failoverd", "--base-domain", "example.com", "--api-token", "cf-test-0123456789"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn setup_arguments_become_a_request() {
        let cli = parse(&[
            "setup",
            "--alias",
            "app",
            "--primary",
            "app-primary",
            "--primary-ip",
            "192.0.2.10",
            "--backup",
            "app-backup",
            "--backup-ip",
            "192.0.2.20",
            "--failure-threshold",
            "5",
        ]);
        let Command::Setup(args) = cli.command else {
            panic!("expected setup");
        };
        let request = SetupRequest::from(args);
        assert_eq!(request.alias, "app");
        assert_eq!(request.backup_ip, "192.0.2.20".parse::<IpAddr>().unwrap());
        assert_eq!(request.failure_threshold, Some(5));
        assert_eq!(request.interval_secs, None);
    }

    #[test]
    fn switch_target_is_optional() {
        let cli = parse(&["switch"]);
        assert!(matches!(cli.command, Command::Switch { to: None }));

        let cli = parse(&["switch", "--to", "backup"]);
        let Command::Switch { to: Some(side) } = cli.command else {
            panic!("expected switch with target");
        };
        assert_eq!(Side::from(side), Side::Backup);
    }

    #[test]
    fn global_defaults_reach_the_config() {
        let cli = parse(&["--default-interval", "10", "--state-path", "/tmp/f/state.json", "start"]);
        let config = cli.global.controller_config().unwrap();
        assert_eq!(config.defaults.interval_secs, 10);
        assert_eq!(config.state_path, PathBuf::from("/tmp/f/state.json"));
        assert_eq!(config.provider.type_name(), "cloudflare");
    }

    #[test]
    fn placeholder_token_is_rejected() {
        assert!(check_api_token("").is_err());
        assert!(check_api_token("your_token").is_err());
        assert!(check_api_token("cf-real-looking-token-value").is_ok());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let cli = parse(&["--provider-type", "route53", "status"]);
        assert!(cli.global.controller_config().is_err());
    }

    #[test]
    fn exit_codes_follow_error_class() {
        let retryable = anyhow::Error::from(failover_core::Error::provider("cloudflare", "timeout"));
        assert_eq!(FailoverExitCode::for_error(&retryable), FailoverExitCode::Retryable);

        let fatal = anyhow::Error::from(failover_core::Error::ConfigMissing);
        assert_eq!(FailoverExitCode::for_error(&fatal), FailoverExitCode::Fatal);

        let other = anyhow::anyhow!("bad flag");
        assert_eq!(FailoverExitCode::for_error(&other), FailoverExitCode::Fatal);
    }
}
