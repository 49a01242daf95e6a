//! Beacon sending: one-shot bursts and the periodic advertisement loop.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use sara_core::{Beacon, Error, StatvfsFreeSpace};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a beacon burst ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    /// Destination unparsable or the beacon failed to encode.
    BadPacket,
    /// Socket setup or transmission failed.
    CantSend,
    Cancelled,
}

/// Send `count` copies (at least one) of `beacon` to `destination:port`,
/// `interval` apart. The endpoint id is assigned here from the socket's
/// local address and this process id. The outcome arrives on the returned
/// channel; dropping the receiver does not stop the burst, cancelling does.
pub fn send(
    beacon: Beacon,
    destination: &str,
    port: u16,
    count: u32,
    interval: Duration,
    cancel: CancellationToken,
) -> oneshot::Receiver<SendOutcome> {
    let (tx, rx) = oneshot::channel();
    let destination = destination.to_string();
    tokio::spawn(async move {
        let outcome = burst(beacon, &destination, port, count.max(1), interval, &cancel).await;
        let _ = tx.send(outcome);
    });
    rx
}

async fn burst(
    beacon: Beacon,
    destination: &str,
    port: u16,
    count: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> SendOutcome {
    match transmit(beacon, destination, port, count, interval, cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(destination, port, error = %e, "beacon burst failed");
            outcome_of(&e)
        }
    }
}

fn outcome_of(err: &Error) -> SendOutcome {
    match err {
        Error::TransportFailure(_) | Error::Io(_) => SendOutcome::CantSend,
        _ => SendOutcome::BadPacket,
    }
}

async fn transmit(
    beacon: Beacon,
    destination: &str,
    port: u16,
    count: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> sara_core::Result<SendOutcome> {
    let ip: IpAddr = destination
        .parse()
        .map_err(|_| Error::BadAddress(destination.to_string()))?;
    let dest = SocketAddr::new(ip, port);
    let transport = |e: std::io::Error| Error::TransportFailure(format!("{dest}: {e}"));
    let socket = connect(dest).await.map_err(transport)?;
    let local = socket.local_addr().map_err(transport)?.ip();
    let beacon = beacon.with_eid(format!("{}-{}", local, std::process::id()));
    let frame = beacon.encode()?;

    for i in 0..count {
        socket.send(&frame).await.map_err(transport)?;
        debug!(%dest, copy = i + 1, count, beacon = %beacon.short_print(), "beacon sent");
        if i + 1 < count {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return Ok(SendOutcome::Cancelled),
            }
        }
    }
    Ok(SendOutcome::Success)
}

async fn connect(dest: SocketAddr) -> std::io::Result<UdpSocket> {
    let bind: SocketAddr = match dest {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind).await?;
    if let IpAddr::V4(v4) = dest.ip() {
        if v4.is_multicast() {
            socket.set_multicast_ttl_v4(1)?;
        }
    }
    socket.connect(dest).await?;
    Ok(socket)
}

/// Settings for the periodic advertisement.
#[derive(Debug, Clone)]
pub struct BeaconSchedule {
    pub flags: String,
    pub destination: String,
    pub port: u16,
    pub count: u32,
    pub interval: Duration,
    pub period: Duration,
    pub working_dir: Option<PathBuf>,
}

/// Build a fresh beacon (free space changes) and send a burst every
/// `period` until `cancel` fires.
pub async fn beacon_loop(schedule: BeaconSchedule, cancel: CancellationToken) {
    loop {
        match Beacon::new(&schedule.flags, &StatvfsFreeSpace, schedule.working_dir.as_deref()) {
            Ok(beacon) => {
                let rx = send(
                    beacon,
                    &schedule.destination,
                    schedule.port,
                    schedule.count,
                    schedule.interval,
                    cancel.child_token(),
                );
                match rx.await {
                    Ok(SendOutcome::Success) => {}
                    Ok(SendOutcome::Cancelled) => break,
                    Ok(outcome) => warn!(?outcome, "beacon burst failed"),
                    Err(_) => warn!("beacon task ended without an outcome"),
                }
            }
            Err(e) => warn!(flags = %schedule.flags, error = %e, "cannot build beacon"),
        }
        tokio::select! {
            _ = tokio::time::sleep(schedule.period) => {}
            _ = cancel.cancelled() => break,
        }
    }
    info!("beacon loop stopped");
}
