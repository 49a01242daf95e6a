// Saratoga Linux daemon: beacons, request/metadata/data/status handling.

mod beacon;
mod config;
mod receiver;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sara_core::{PeerTable, SaratogaCore, TransferTable};
use socket2::{Domain, Protocol, Socket, Type};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("sara-linux {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load();
    info!(port = cfg.port, group = %cfg.multicast_v4, "starting");

    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, cfg.port))
        .with_context(|| format!("bind UDP port {}", cfg.port))?;
    std_sock
        .join_multicast_v4(&cfg.multicast_v4, &Ipv4Addr::UNSPECIFIED)
        .with_context(|| format!("join multicast group {}", cfg.multicast_v4))?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    // v6 is optional: hosts without IPv6 still run on the v4 group.
    let std_sock_v6 = match bind_v6(cfg.port, &cfg.multicast_v6) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(group = %cfg.multicast_v6, error = %e, "IPv6 multicast unavailable");
            None
        }
    };

    let core = Arc::new(SaratogaCore::new(
        Arc::new(PeerTable::new()),
        Arc::new(TransferTable::new()),
    ));
    let cancel = CancellationToken::new();
    let schedule = beacon::BeaconSchedule {
        flags: cfg.beacon_flags.clone(),
        destination: cfg.multicast_v4.to_string(),
        port: cfg.port,
        count: cfg.beacon_count,
        interval: Duration::from_secs(cfg.beacon_interval_secs),
        period: Duration::from_secs(cfg.beacon_period_secs),
        working_dir: cfg.working_dir.clone(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let socket = Arc::new(tokio::net::UdpSocket::from_std(std_sock)?);
        let recv_task = tokio::spawn(receiver::recv_loop(socket, Arc::clone(&core), cancel.clone()));
        let recv_v6_task = match std_sock_v6 {
            Some(s) => {
                let socket = Arc::new(tokio::net::UdpSocket::from_std(s)?);
                Some(tokio::spawn(receiver::recv_loop(socket, Arc::clone(&core), cancel.clone())))
            }
            None => None,
        };
        let beacon_task = tokio::spawn(beacon::beacon_loop(schedule, cancel.clone()));

        shutdown_signal().await?;
        info!(peers = core.peers().len(), transfers = core.transfers().len(), "shutting down");
        cancel.cancel();
        let _ = beacon_task.await;
        if let Some(task) = recv_v6_task {
            if let Ok(Err(e)) = task.await {
                error!(error = %e, "IPv6 receive loop failed");
            }
        }
        match recv_task.await {
            Ok(Err(e)) => error!(error = %e, "receive loop failed"),
            Err(e) => error!(error = %e, "receive task panicked"),
            Ok(Ok(())) => {}
        }
        Ok::<(), anyhow::Error>(())
    })?;
    Ok(())
}

/// Socket on [::]:port, IPv6 only so it can share the port with the v4 socket.
fn bind_v6(port: u16, group: &Ipv6Addr) -> std::io::Result<std::net::UdpSocket> {
    let sock = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_only_v6(true)?;
    sock.set_reuse_address(true)?;
    sock.bind(&SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)).into())?;
    sock.join_multicast_v6(group, 0)?;
    sock.set_multicast_hops_v6(1)?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
