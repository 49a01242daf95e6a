//! Host-driven API: the host hands every datagram to SaratogaCore and sends
//! back whatever actions it returns. No sockets live here.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::flags::FrameType;
use crate::frame::{read_u32, Frame, Status, HEADER_LEN};
use crate::peer::{PeerTable, Upsert};
use crate::transfer::TransferTable;

/// Something the host must do after a datagram was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    /// Send an encoded frame.
    Send { to: SocketAddr, frame: Vec<u8> },
    /// All bytes of a transfer arrived; the transfer has left the table.
    /// `verified` is `None` when no checksum was advertised.
    TransferComplete {
        peer: SocketAddr,
        session: u32,
        data: Vec<u8>,
        verified: Option<bool>,
    },
}

/// Dispatcher shared by all receive workers.
pub struct SaratogaCore {
    peers: Arc<PeerTable>,
    transfers: Arc<TransferTable>,
}

impl SaratogaCore {
    pub fn new(peers: Arc<PeerTable>, transfers: Arc<TransferTable>) -> Self {
        Self { peers, transfers }
    }

    pub fn peers(&self) -> &Arc<PeerTable> {
        &self.peers
    }

    pub fn transfers(&self) -> &Arc<TransferTable> {
        &self.transfers
    }

    /// Decode one datagram from `from` and apply it.
    ///
    /// Failures on a Request, Metadata or Data frame whose session could be
    /// read are answered with an error Status and reported as `Ok`. Other
    /// failures are returned to the host. A beacon with an unreadable
    /// free-space width still registers the peer before the error is returned.
    pub fn on_datagram(&self, from: SocketAddr, bytes: &[u8]) -> Result<Vec<OutboundAction>> {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(Error::UnsupportedFreespaceWidth { code, partial }) => {
                if let Some(beacon) = &partial {
                    self.peers.upsert(&from.ip().to_string(), beacon);
                }
                return Err(Error::UnsupportedFreespaceWidth { code, partial });
            }
            Err(e) => return self.reject(from, answerable_session(bytes), e),
        };
        debug!(peer = %from, frame = %frame.short_print(), "received");
        let session = frame.session();
        let frame_type = frame.frame_type();
        match self.dispatch(from, frame) {
            Ok(actions) => Ok(actions),
            Err(e) if frame_type == FrameType::Status => Err(e),
            Err(e) => self.reject(from, session, e),
        }
    }

    fn dispatch(&self, from: SocketAddr, frame: Frame) -> Result<Vec<OutboundAction>> {
        let peer = from.to_string();
        match frame {
            Frame::Beacon(beacon) => {
                if self.peers.upsert(&from.ip().to_string(), &beacon) == Upsert::Created {
                    info!(peer = %from.ip(), eid = beacon.eid(), "new peer");
                }
                Ok(Vec::new())
            }
            Frame::Request(request) => {
                self.transfers.add(&peer, request.session(), &request)?;
                Ok(Vec::new())
            }
            Frame::MetaData(metadata) => {
                self.transfers.apply_metadata(&peer, metadata.session(), &metadata)?;
                Ok(Vec::new())
            }
            Frame::Data(data) => {
                let session = data.session();
                let mut actions = Vec::new();
                if let Some(status) = self.transfers.apply_data(&peer, session, &data)? {
                    actions.push(OutboundAction::Send {
                        to: from,
                        frame: status.encode()?,
                    });
                }
                if let Some(done) = self.complete(from, &peer, session)? {
                    actions.push(done);
                }
                Ok(actions)
            }
            Frame::Status(status) => {
                self.transfers.apply_status(&peer, status.session(), &status)?;
                if status.is_error() {
                    warn!(peer = %from, session = status.session(), errcode = status.errcode(), "peer reported error");
                }
                Ok(Vec::new())
            }
        }
    }

    /// Remove a finished transfer and hand its bytes over. Only the worker
    /// that wins the removal reports completion.
    fn complete(&self, from: SocketAddr, peer: &str, session: u32) -> Result<Option<OutboundAction>> {
        let finished = self
            .transfers
            .get(peer, session)
            .is_some_and(|t| t.lock().is_complete());
        if !finished {
            return Ok(None);
        }
        let Some(transfer) = self.transfers.remove(peer, session) else {
            return Ok(None);
        };
        let mut transfer = transfer.lock();
        let verified = transfer.verify_checksum()?;
        if verified == Some(false) {
            warn!(peer, session, "checksum mismatch on completed transfer");
        }
        let Some(data) = transfer.take_buffer() else {
            return Ok(None);
        };
        info!(peer, session, bytes = data.len(), "transfer complete");
        Ok(Some(OutboundAction::TransferComplete {
            peer: from,
            session,
            data,
            verified,
        }))
    }

    fn reject(&self, from: SocketAddr, session: Option<u32>, err: Error) -> Result<Vec<OutboundAction>> {
        let Some(session) = session else {
            return Err(err);
        };
        warn!(peer = %from, session, error = %err, "rejected frame");
        let status = Status::new(&format!("errcode={}", err.errcode()), session, 0, 0, Vec::new(), None)?;
        Ok(vec![OutboundAction::Send {
            to: from,
            frame: status.encode()?,
        }])
    }
}

/// Frame type from the raw header, without validating the rest.
fn frame_type_of(bytes: &[u8]) -> Option<FrameType> {
    (bytes.len() >= HEADER_LEN)
        .then(|| FrameType::of_raw(read_u32(bytes, 0)))
        .flatten()
}

/// Session of a Request, Metadata or Data datagram, if it is long enough to
/// carry one. Status and Beacon failures are never answered.
fn answerable_session(bytes: &[u8]) -> Option<u32> {
    match frame_type_of(bytes)? {
        FrameType::Request | FrameType::MetaData | FrameType::Data if bytes.len() >= HEADER_LEN + 4 => {
            Some(read_u32(bytes, HEADER_LEN))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirent::{DirEnt, Property};
    use crate::flags::{Descriptor, Header};
    use crate::frame::{Beacon, Data, MetaData, Request};
    use crate::freespace::FixedFreeSpace;
    use crate::timestamp::{Timestamp, TimestampKind};

    fn core() -> SaratogaCore {
        SaratogaCore::new(Arc::new(PeerTable::new()), Arc::new(TransferTable::new()))
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn metadata(session: u32, size: u64) -> Vec<u8> {
        let header = Header::parse_options(FrameType::MetaData, "descriptor=d32").unwrap();
        let t = Timestamp::new(TimestampKind::Epoch2000_32, 1_000_000_000, 0).unwrap();
        let entry = DirEnt::new(Property::File, Descriptor::D32, size, t, t, "blob").unwrap();
        MetaData::from_header(header, session, None, entry).unwrap().encode().unwrap()
    }

    fn request(session: u32) -> Vec<u8> {
        Request::new("descriptor=d32,reqtype=put", session, "blob", None)
            .unwrap()
            .encode()
            .unwrap()
    }

    fn data(session: u32, offset: u64, payload: &[u8], options: &str) -> Vec<u8> {
        Data::new(options, session, offset, payload.to_vec(), None)
            .unwrap()
            .encode()
            .unwrap()
    }

    fn sent_status(action: &OutboundAction) -> Status {
        match action {
            OutboundAction::Send { frame, .. } => Status::decode(frame).unwrap(),
            other => panic!("expected Send, got {other:?}"),
        }
    }

    #[test]
    fn beacon_registers_peer_by_ip() {
        let core = core();
        let wire = Beacon::new("freespace=yes", &FixedFreeSpace(500), Some(std::path::Path::new("/")))
            .unwrap()
            .with_eid("198.51.100.1-10")
            .encode()
            .unwrap();
        assert!(core.on_datagram(addr("198.51.100.1:40000"), &wire).unwrap().is_empty());
        assert!(core.on_datagram(addr("198.51.100.1:40001"), &wire).unwrap().is_empty());
        assert_eq!(core.peers().len(), 1);
        assert_eq!(core.peers().get("198.51.100.1").unwrap().freespace, 500);
    }

    #[test]
    fn partial_beacon_still_registers() {
        let core = core();
        let raw = Header::new(FrameType::Beacon).set("freespace", "yes").unwrap().raw() | (3 << 12);
        let mut wire = raw.to_be_bytes().to_vec();
        wire.extend_from_slice(b"host-9");
        let err = core.on_datagram(addr("198.51.100.2:7542"), &wire).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFreespaceWidth { code: 3, .. }));
        assert_eq!(core.peers().get("198.51.100.2").unwrap().eid, "host-9");
    }

    #[test]
    fn full_receive_flow() {
        let core = core();
        let from = addr("192.0.2.1:5000");
        assert!(core.on_datagram(from, &request(42)).unwrap().is_empty());
        assert!(core.on_datagram(from, &metadata(42, 6)).unwrap().is_empty());

        let actions = core.on_datagram(from, &data(42, 0, b"abc", "descriptor=d32,reqstatus=yes")).unwrap();
        assert_eq!(actions.len(), 1);
        let status = sent_status(&actions[0]);
        assert_eq!(status.progress(), 3);
        assert_eq!(status.holes(), &[crate::holes::Interval { start: 3, end: 6 }]);

        let actions = core.on_datagram(from, &data(42, 3, b"def", "descriptor=d32,eod=yes")).unwrap();
        assert_eq!(actions.len(), 2);
        assert!(sent_status(&actions[0]).holes().is_empty());
        match &actions[1] {
            OutboundAction::TransferComplete { session, data, verified, .. } => {
                assert_eq!(*session, 42);
                assert_eq!(data, b"abcdef");
                assert_eq!(*verified, None);
            }
            other => panic!("expected TransferComplete, got {other:?}"),
        }
        assert!(core.transfers().is_empty());
    }

    #[test]
    fn duplicate_request_answered_with_unknownid() {
        let core = core();
        let from = addr("192.0.2.1:5000");
        core.on_datagram(from, &request(1)).unwrap();
        let actions = core.on_datagram(from, &request(1)).unwrap();
        let status = sent_status(&actions[0]);
        assert_eq!(status.session(), 1);
        assert_eq!(status.errcode(), "unknownid");
        assert_eq!(core.transfers().len(), 1);
    }

    #[test]
    fn data_outside_size_answered_with_badoffset() {
        let core = core();
        let from = addr("192.0.2.1:5000");
        core.on_datagram(from, &request(2)).unwrap();
        core.on_datagram(from, &metadata(2, 4)).unwrap();
        let actions = core.on_datagram(from, &data(2, 3, b"xy", "descriptor=d32")).unwrap();
        assert_eq!(sent_status(&actions[0]).errcode(), "badoffset");
    }

    #[test]
    fn data_before_metadata_is_kept() {
        let core = core();
        let from = addr("192.0.2.1:5000");
        core.on_datagram(from, &request(1)).unwrap();
        assert!(core.on_datagram(from, &data(1, 0, b"abc", "descriptor=d32")).unwrap().is_empty());
        core.on_datagram(from, &metadata(1, 6)).unwrap();
        let actions = core.on_datagram(from, &data(1, 3, b"def", "descriptor=d32")).unwrap();
        match actions.as_slice() {
            [OutboundAction::TransferComplete { data, .. }] => assert_eq!(data, b"abcdef"),
            other => panic!("expected TransferComplete, got {other:?}"),
        }
    }

    #[test]
    fn metadata_smaller_than_early_data_answered_with_badoffset() {
        let core = core();
        let from = addr("192.0.2.1:5000");
        core.on_datagram(from, &request(1)).unwrap();
        core.on_datagram(from, &data(1, 0, &[7; 8], "descriptor=d32")).unwrap();
        let actions = core.on_datagram(from, &metadata(1, 6)).unwrap();
        assert_eq!(sent_status(&actions[0]).errcode(), "badoffset");
        assert_eq!(core.transfers().len(), 1);
    }

    #[test]
    fn data_end_past_u64_answered() {
        let core = core();
        let from = addr("192.0.2.1:5000");
        let req = Request::new("descriptor=d64,reqtype=put", 3, "blob", None).unwrap();
        core.on_datagram(from, &req.encode().unwrap()).unwrap();
        let mut wire = data(3, 0, b"xyzw", "descriptor=d64");
        wire[8..16].copy_from_slice(&(u64::MAX - 1).to_be_bytes());
        let actions = core.on_datagram(from, &wire).unwrap();
        let status = sent_status(&actions[0]);
        assert_eq!(status.session(), 3);
        assert_eq!(status.errcode(), "filetoobig");
    }

    #[test]
    fn truncated_request_answered_with_badpacket() {
        let core = core();
        let mut wire = request(7);
        wire.pop();
        let actions = core.on_datagram(addr("192.0.2.1:5000"), &wire).unwrap();
        let status = sent_status(&actions[0]);
        assert_eq!(status.session(), 7);
        assert_eq!(status.errcode(), "badpacket");
    }

    #[test]
    fn unanswerable_errors_returned() {
        let core = core();
        let from = addr("192.0.2.1:5000");
        assert!(matches!(core.on_datagram(from, &[0x20, 0]), Err(Error::FrameTooShort { .. })));
        let status = Status::new("descriptor=d32", 3, 0, 0, Vec::new(), None).unwrap();
        assert!(matches!(
            core.on_datagram(from, &status.encode().unwrap()),
            Err(Error::UnknownTransfer { session: 3, .. })
        ));
    }

    #[test]
    fn transfers_keyed_by_source_port() {
        let core = core();
        core.on_datagram(addr("192.0.2.1:5000"), &request(1)).unwrap();
        core.on_datagram(addr("192.0.2.1:5001"), &request(1)).unwrap();
        assert_eq!(core.transfers().len(), 2);
    }
}
