//! CLI entry point for the lanwatch monitor.

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use lanwatch_core::{
    Job, JobId, MacAddr, NotificationId, NotificationSettings, RetentionPolicy, Schedule,
    DEFAULT_SCAN_BUDGET_SECS,
};
use lanwatch_store::{DeviceStore, NotificationQuery, SqliteStore};

use lanwatch_monitor::config::MonitorConfig;
use lanwatch_monitor::scanner::{ArpScanner, ArpScannerFactory};
use lanwatch_monitor::Monitor;

#[derive(Parser)]
#[command(name = "lanwatch-monitor")]
#[command(about = "Scheduled LAN device monitor")]
struct Cli {
    /// Config file prefix (default: lanwatch).
    #[arg(short, long, default_value = "lanwatch")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted with Ctrl-C.
    Daemon,
    /// Run one job now and print the run record.
    Run { job_id: JobId },
    /// Print scheduler status.
    Status,
    /// List all jobs.
    Jobs,
    /// Create a monitoring job.
    AddJob(AddJobArgs),
    /// Manage a job's whitelist.
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },
    /// List known devices of a job.
    Devices { job_id: JobId },
    /// List recent runs of a job.
    Runs {
        job_id: JobId,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// List notifications, newest first.
    Notifications {
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        job: Option<JobId>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Mark a notification as read.
    MarkRead { id: NotificationId },
    /// Delete a job and everything recorded under it.
    DeleteJob { job_id: JobId },
}

#[derive(Args)]
struct AddJobArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    interface: String,
    /// IPv4 CIDR, e.g. 192.168.1.0/24.
    #[arg(long)]
    subnet: String,
    /// manual, hourly, every_6h, every_12h, daily or weekly.
    #[arg(long, default_value = "manual")]
    schedule: Schedule,
    /// forever, immediate or days:N.
    #[arg(long, default_value = "forever")]
    retention: RetentionPolicy,
    /// Seconds the scanner is given per run.
    #[arg(long, default_value_t = DEFAULT_SCAN_BUDGET_SECS)]
    scan_budget: u64,
    /// Authorized MAC address; repeat for more.
    #[arg(long = "allow")]
    whitelist: Vec<MacAddr>,
    /// Turn off all notifications for this job.
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    no_notify_new: bool,
    #[arg(long)]
    no_notify_unauthorized: bool,
    #[arg(long)]
    no_notify_ip_change: bool,
}

#[derive(Subcommand)]
enum WhitelistAction {
    Add { job_id: JobId, mac: MacAddr },
    Remove { job_id: JobId, mac: MacAddr },
    List { job_id: JobId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = load_monitor_config(&cli.config)?;

    let store: Arc<dyn DeviceStore> = Arc::new(SqliteStore::connect(&config.sqlite()).await?);
    let scanners = Arc::new(ArpScannerFactory::new(
        &config.scanner_path,
        config.scan_grace(),
    ));
    let monitor = Monitor::new(store.clone(), scanners, &config);

    match cli.command {
        Command::Daemon => run_daemon(&monitor, &config).await?,
        Command::Run { job_id } => print_json(&monitor.run_job(job_id).await?)?,
        Command::Status => print_json(&monitor.scheduler_status().await?)?,
        Command::Jobs => print_json(&store.list_jobs().await?)?,
        Command::AddJob(args) => {
            let whitelist = args.whitelist.clone();
            let job = monitor.create_job(build_job(args)?, &whitelist).await?;
            print_json(&job)?;
        }
        Command::Whitelist { action } => match action {
            WhitelistAction::Add { job_id, mac } => {
                print_json(&store.add_whitelist(job_id, mac).await?)?
            }
            WhitelistAction::Remove { job_id, mac } => {
                print_json(&store.remove_whitelist(job_id, mac).await?)?
            }
            WhitelistAction::List { job_id } => print_json(&store.list_whitelist(job_id).await?)?,
        },
        Command::Devices { job_id } => print_json(&store.list_known_devices(job_id).await?)?,
        Command::Runs { job_id, limit } => print_json(&store.list_runs(job_id, limit).await?)?,
        Command::Notifications { unread, job, limit } => {
            let query = NotificationQuery {
                job_id: job,
                unread_only: unread,
                limit: Some(limit),
            };
            print_json(&store.list_notifications(&query).await?)?;
        }
        Command::MarkRead { id } => print_json(&store.mark_notification_read(id).await?)?,
        Command::DeleteJob { job_id } => print_json(&monitor.delete_job(job_id).await?)?,
    }

    Ok(())
}

async fn run_daemon(monitor: &Monitor, config: &MonitorConfig) -> anyhow::Result<()> {
    let scanner = ArpScanner::new(&config.scanner_path, config.scan_grace());
    match scanner.verify_installation().await {
        Ok(version) => tracing::info!(scanner_version = %version, "Scanner verified"),
        // Runs will fail individually until the scanner is installed.
        Err(e) => tracing::warn!(error = %e, "Scanner not available"),
    }

    monitor.start().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        let _ = shutdown_tx.send(true);
    });

    monitor.scheduler().run(shutdown_rx).await?;
    Ok(())
}

fn build_job(args: AddJobArgs) -> anyhow::Result<Job> {
    let notifications = NotificationSettings {
        enabled: !args.quiet,
        on_new: !args.no_notify_new,
        on_unauthorized: !args.no_notify_unauthorized,
        on_ip_change: !args.no_notify_ip_change,
    };
    Ok(Job::new(&args.name, &args.interface, &args.subnet)?
        .with_schedule(args.schedule)
        .with_retention(args.retention)
        .with_scan_budget(args.scan_budget)
        .with_notifications(notifications))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_monitor_config(file_prefix: &str) -> anyhow::Result<MonitorConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("LANWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<MonitorConfig>("monitor") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(MonitorConfig::default()),
        Err(e) => Err(e.into()),
    }
}
