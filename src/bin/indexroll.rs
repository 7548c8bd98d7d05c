use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::sync::watch;

use indexroll::policy::EXAMPLE_POLICY;
use indexroll::store::{HttpIndexStore, HttpStoreConfig, DEFAULT_POLICY_INDEX};
use indexroll::{Error, Scheduler, SchedulerConfig, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "indexroll")]
#[command(about = "Roll indices behind write and search aliases")]
struct Cli {
    /// Store connection URL; credentials may be given as user:pass@host
    #[arg(long, default_value = "http://localhost:9200")]
    url: String,

    /// PEM file with extra trusted CA certificates
    #[arg(long)]
    pem: Option<PathBuf>,

    /// Run as a daemon instead of rolling every policy once
    #[arg(long)]
    daemon: bool,

    /// Index holding the policy documents
    #[arg(long, default_value = DEFAULT_POLICY_INDEX)]
    policy_index: String,

    /// Seconds between size checks (daemon mode)
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    size_check_secs: u64,

    /// Seconds between policy reloads (daemon mode)
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    reload_secs: u64,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: u64,

    /// Print an example policy document and exit
    #[arg(long)]
    example_policy: bool,
}

fn print_guidance(policy_index: &str) {
    println!("You can create one with:");
    println!("curl -XPUT localhost:9200/{policy_index}/_doc/snowball -H 'Content-Type: application/json' -d '{EXAMPLE_POLICY}'");
}

async fn wait_for_signal(tx: watch::Sender<bool>) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                error!("Cannot listen for SIGTERM: {}", err);
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    info!("Termination signal received");
    let _ = tx.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.example_policy {
        println!("{EXAMPLE_POLICY}");
        return Ok(());
    }

    let store_config = HttpStoreConfig {
        url: cli.url.clone(),
        pem_file: cli.pem.clone(),
        policy_index: cli.policy_index.clone(),
        timeout: Duration::from_secs(cli.timeout_secs),
    };
    let store = HttpIndexStore::new(store_config).context("Failed to configure index store")?;
    let config = SchedulerConfig {
        size_check_interval: Duration::from_secs(cli.size_check_secs),
        reload_interval: Duration::from_secs(cli.reload_secs),
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(Arc::new(store), SystemClock, config);

    if !cli.daemon {
        return match scheduler.run_once().await {
            Ok(stats) => {
                if stats.has_errors() {
                    error!("Errors: {:?}", stats.errors);
                }
                Ok(())
            }
            Err(err) => {
                println!("Configuration for indexroll invalid or not found: {err}");
                print_guidance(&cli.policy_index);
                std::process::exit(1);
            }
        };
    }

    if let Err(err) = scheduler.reload().await {
        println!("Configuration for indexroll invalid or not found, waiting till one exists: {err}");
        if matches!(err, Error::NoPolicies) {
            print_guidance(&cli.policy_index);
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_signal(shutdown_tx));
    scheduler.serve(shutdown_rx).await?;
    info!("indexroll stopped");
    Ok(())
}
