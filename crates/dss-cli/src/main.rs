mod cli;
mod client;
mod server;

use anyhow::Context;
use clap::Parser;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dss_rs::Coordinator;

use crate::cli::{Cli, Command, ManagerArgs};
use crate::client::{run_disk, run_user, warn_port_range};
use crate::server::run_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Manager(args) => run_manager(args).await,
        Command::User(args) => run_user(args).await,
        Command::Disk(args) => run_disk(args).await,
    }
}

async fn run_manager(args: ManagerArgs) -> anyhow::Result<()> {
    warn_port_range(args.port, "manager");
    let bind = args.bind_addr();
    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;

    let cfg = args.coordinator_config();
    info!(
        seed = ?cfg.seed,
        allow_unregistered = cfg.allow_unregistered,
        max_disks = cfg.max_disks,
        max_arrays = cfg.max_arrays,
        "coordinator starting"
    );
    let coordinator = Coordinator::new(&cfg);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(run_server(socket, coordinator, shutdown_rx));

    #[cfg(unix)]
    {
        let sigterm_fut = sigterm();
        tokio::pin!(sigterm_fut);

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown: ctrl-c");
            },
            _ = &mut sigterm_fut => {
                info!("shutdown: SIGTERM");
            },
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("shutdown: ctrl-c");
    }

    let _ = shutdown_tx.send(true);
    let stats = server.await?;

    info!(
        "exit: served={}, rejected={}, malformed={}, dropped={}, recv_errors={}, send_errors={}",
        stats.requests.served,
        stats.requests.rejected,
        stats.requests.malformed,
        stats.requests.dropped,
        stats.recv_errors,
        stats.send_errors
    );

    Ok(())
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut s) => {
            s.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}
