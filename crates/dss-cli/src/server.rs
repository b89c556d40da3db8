use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{error, info, warn};

use dss_rs::{Coordinator, CoordinatorStats};

/// Large enough for any request record; longer datagrams are truncated by the kernel.
const RECV_BUF_LEN: usize = 8 * 1024;

#[derive(Copy, Clone, Debug, Default)]
pub struct ServerStats {
    pub requests: CoordinatorStats,
    pub recv_errors: u64,
    pub send_errors: u64,
}

/// `run_server` answers datagrams on `socket` one at a time until `shutdown` flips to true.
pub async fn run_server(
    socket: UdpSocket,
    mut coordinator: Coordinator,
    mut shutdown: watch::Receiver<bool>,
) -> ServerStats {
    let mut stats = ServerStats::default();
    let mut buf = vec![0u8; RECV_BUF_LEN];

    if let Ok(addr) = socket.local_addr() {
        info!(%addr, "coordinator listening");
    }

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, source)) => {
                    let Some(reply) = coordinator.handle_datagram(&buf[..len], source) else {
                        continue;
                    };
                    if let Err(e) = socket.send_to(&reply, source).await {
                        stats.send_errors += 1;
                        warn!(%source, error = %e, "reply not sent");
                    }
                }
                Err(e) => {
                    stats.recv_errors += 1;
                    error!(error = %e, "recv failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("server: shutdown");
                    break;
                }
            },
        }
    }

    stats.requests = coordinator.stats();
    stats
}
