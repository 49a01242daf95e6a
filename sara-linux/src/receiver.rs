//! UDP receive loop: one task per datagram, replies sent on the same socket.

use std::net::SocketAddr;
use std::sync::Arc;

use sara_core::protocol::MAX_DATAGRAM;
use sara_core::{OutboundAction, SaratogaCore};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub async fn recv_loop(
    socket: Arc<UdpSocket>,
    core: Arc<SaratogaCore>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = tokio::select! {
            r = socket.recv_from(&mut buf) => r?,
            _ = cancel.cancelled() => return Ok(()),
        };
        let datagram = buf[..n].to_vec();
        let socket = Arc::clone(&socket);
        let core = Arc::clone(&core);
        tokio::spawn(async move { handle(&socket, &core, from, &datagram).await });
    }
}

async fn handle(socket: &UdpSocket, core: &SaratogaCore, from: SocketAddr, datagram: &[u8]) {
    let actions = match core.on_datagram(from, datagram) {
        Ok(actions) => actions,
        Err(e) => {
            debug!(peer = %from, len = datagram.len(), error = %e, "dropped datagram");
            return;
        }
    };
    for action in actions {
        match action {
            OutboundAction::Send { to, frame } => {
                if let Err(e) = socket.send_to(&frame, to).await {
                    warn!(peer = %to, error = %e, "reply send failed");
                }
            }
            OutboundAction::TransferComplete {
                peer,
                session,
                data,
                verified,
            } => {
                info!(%peer, session, bytes = data.len(), ?verified, "received transfer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sara_core::dirent::{DirEnt, Property};
    use sara_core::{
        Data, Descriptor, FrameType, Header, MetaData, PeerTable, Request, Status, Timestamp,
        TimestampKind, TransferTable,
    };
    use std::time::Duration;

    fn metadata(session: u32, size: u64) -> Vec<u8> {
        let header = Header::parse_options(FrameType::MetaData, "descriptor=d32").unwrap();
        let t = Timestamp::new(TimestampKind::Epoch2000_32, 1_000_000_000, 0).unwrap();
        let entry = DirEnt::new(Property::File, Descriptor::D32, size, t, t, "x").unwrap();
        MetaData::from_header(header, session, None, entry).unwrap().encode().unwrap()
    }

    #[tokio::test]
    async fn data_with_reqstatus_gets_status() {
        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = server.local_addr().unwrap();
        let transfers = Arc::new(TransferTable::new());
        let core = Arc::new(SaratogaCore::new(Arc::new(PeerTable::new()), Arc::clone(&transfers)));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv_loop(server, core, cancel.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let request = Request::new("descriptor=d32,reqtype=put", 5, "x", None).unwrap();
        client.send_to(&request.encode().unwrap(), server_addr).await.unwrap();
        // Give the per-datagram tasks a chance to run in order.
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.send_to(&metadata(5, 8), server_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let data = Data::new("descriptor=d32,reqstatus=yes", 5, 0, b"half".to_vec(), None).unwrap();
        client.send_to(&data.encode().unwrap(), server_addr).await.unwrap();

        let mut buf = [0u8; 512];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let status = Status::decode(&buf[..n]).unwrap();
        assert_eq!(status.session(), 5);
        assert_eq!(status.progress(), 4);
        assert_eq!(status.holes().len(), 1);
        assert_eq!(transfers.len(), 1);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn garbage_is_dropped() {
        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = server.local_addr().unwrap();
        let core = Arc::new(SaratogaCore::new(Arc::new(PeerTable::new()), Arc::new(TransferTable::new())));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv_loop(server, Arc::clone(&core), cancel.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&[0xff, 0, 1], server_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(core.peers().is_empty());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
