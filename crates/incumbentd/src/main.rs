//! incumbentd — the Incumbent daemon.
//!
//! # Usage
//!
//! ```text
//! incumbentd run --store redis://redis:6379 --lease-name controller-lock --workers 2
//! incumbentd holder --store redis://redis:6379 --lease-name controller-lock
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use incumbent_state::LeaseStore;
use incumbentd::config::{self, FileConfig, LeaseOverrides, RunOverrides, parse_duration_arg};

#[derive(Parser)]
#[command(name = "incumbentd", about = "Incumbent daemon — leader-elected workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Contend for the lease and run workers while leading.
    Run(RunArgs),
    /// Print the current lease record as JSON.
    Holder(LeaseArgs),
}

#[derive(Args)]
struct LeaseArgs {
    /// Path to an incumbent.toml config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Lease scope (namespace).
    #[arg(long)]
    scope: Option<String>,

    /// Lease name.
    #[arg(long)]
    lease_name: Option<String>,

    /// Lease store: memory, redb:<path>, or redis://host:port.
    #[arg(long)]
    store: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    lease: LeaseArgs,

    /// Candidate identity [default: $POD_NAME, $HOSTNAME, incumbent-<pid>].
    #[arg(long)]
    identity: Option<String>,

    /// How long a lease stays valid after renewal [default: 15s].
    #[arg(long, value_parser = parse_duration_arg)]
    lease_duration: Option<Duration>,

    /// How long a leader may fail to renew before stepping down [default: 10s].
    #[arg(long, value_parser = parse_duration_arg)]
    renew_deadline: Option<Duration>,

    /// Interval between acquire or renew attempts [default: 2s].
    #[arg(long, value_parser = parse_duration_arg)]
    retry_period: Option<Duration>,

    /// Upper bound on releasing the lease and stopping workers at shutdown [default: 5s].
    #[arg(long, value_parser = parse_duration_arg)]
    worker_grace: Option<Duration>,

    /// Address for the /live endpoint [default: 0.0.0.0:8080].
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Number of heartbeat workers [default: 1].
    #[arg(long)]
    workers: Option<usize>,

    /// Heartbeat interval [default: 5s].
    #[arg(long, value_parser = parse_duration_arg)]
    worker_interval: Option<Duration>,

    /// Return to standby after a demotion instead of stopping the loop.
    #[arg(long)]
    rejoin_after_demotion: bool,

    /// Leave the lease to expire at shutdown instead of releasing it.
    #[arg(long)]
    no_release_on_cancel: bool,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

impl From<LeaseArgs> for LeaseOverrides {
    fn from(args: LeaseArgs) -> Self {
        LeaseOverrides {
            scope: args.scope,
            lease_name: args.lease_name,
            store: args.store,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let file = FileConfig::load(args.lease.config.as_deref())?;
            let overrides = RunOverrides {
                identity: args.identity,
                lease_duration: args.lease_duration,
                renew_deadline: args.renew_deadline,
                retry_period: args.retry_period,
                worker_grace: args.worker_grace,
                listen: args.listen,
                workers: args.workers,
                worker_interval: args.worker_interval,
                rejoin_after_demotion: args.rejoin_after_demotion,
                no_release_on_cancel: args.no_release_on_cancel,
                log_json: args.log_json,
                lease: args.lease.into(),
            };
            let config = config::resolve(&overrides, &file, |var| std::env::var(var).ok())?;
            init_tracing(config.log_json)?;
            incumbentd::daemon::run(config).await
        }
        Command::Holder(args) => {
            init_tracing(false)?;
            let file = FileConfig::load(args.config.as_deref())?;
            let (key, store) = config::resolve_lease(&args.into(), &file)?;
            let store = store.open()?;

            match store.read(&key).await? {
                Some(lease) => println!("{}", serde_json::to_string_pretty(&lease)?),
                None => info!(lease = %key, "no lease recorded"),
            }
            Ok(())
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,incumbentd=debug,incumbent=debug"))?;

    // stdout is reserved for `holder` output.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
