//! Transfer registry: one entry per (peer address, session).
//!
//! A transfer is created from a Request, gains its size and checksum from
//! Metadata, and is advanced by Data (receiving side) or Status (sending
//! side). Each transfer has its own lock, so metadata and data for the same
//! transfer are applied one at a time while different transfers proceed in
//! parallel. The table lock only covers scans and appends.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::checksum;
use crate::dirent::DirEnt;
use crate::error::{Error, Result};
use crate::flags::{ChecksumType, Descriptor, TransferKind};
use crate::frame::{Data, MetaData, Request, Status};
use crate::holes::{HoleTracker, Interval};
use crate::timestamp::Timestamp;

/// Largest object held in memory for a single transfer.
pub const MAX_BUFFER_BYTES: u64 = 1 << 30;

#[derive(Debug)]
pub struct Transfer {
    peer: String,
    session: u32,
    kind: TransferKind,
    directory: bool,
    reqtype: &'static str,
    filename: String,
    descriptor: Descriptor,
    checksum_type: ChecksumType,
    checksum: Option<Vec<u8>>,
    dirent: Option<DirEnt>,
    buffer: Option<Vec<u8>>,
    /// Payloads that arrived before Metadata, copied in once it does.
    early: Vec<(u64, Vec<u8>)>,
    early_bytes: u64,
    data_frames: u64,
    progress: u64,
    in_response_to: u64,
    last_timestamp: Option<Timestamp>,
    fills: HoleTracker,
    peer_progress: u64,
    peer_holes: Vec<Interval>,
    peer_errcode: &'static str,
}

impl Transfer {
    /// Fresh transfer in its pre-metadata state.
    pub fn new(peer: &str, session: u32, request: &Request) -> Self {
        let kind = if request.is_stream() {
            TransferKind::Stream
        } else if request.is_directory() {
            TransferKind::Directory
        } else {
            TransferKind::File
        };
        Self {
            peer: peer.to_string(),
            session,
            kind,
            directory: request.is_directory(),
            reqtype: request.reqtype(),
            filename: request.filename().to_string(),
            descriptor: request.descriptor(),
            checksum_type: ChecksumType::None,
            checksum: None,
            dirent: None,
            buffer: None,
            early: Vec::new(),
            early_bytes: 0,
            data_frames: 0,
            progress: 0,
            in_response_to: 0,
            last_timestamp: None,
            fills: HoleTracker::new(),
            peer_progress: 0,
            peer_holes: Vec::new(),
            peer_errcode: "success",
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    pub fn reqtype(&self) -> &'static str {
        self.reqtype
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn has_metadata(&self) -> bool {
        self.dirent.is_some()
    }

    pub fn dirent(&self) -> Option<&DirEnt> {
        self.dirent.as_ref()
    }

    pub fn checksum(&self) -> Option<&[u8]> {
        self.checksum.as_deref()
    }

    /// Declared size, once metadata has arrived.
    pub fn size(&self) -> Option<u64> {
        self.dirent.as_ref().map(DirEnt::size)
    }

    pub fn data_frames(&self) -> u64 {
        self.data_frames
    }

    pub fn progress(&self) -> u64 {
        self.progress
    }

    pub fn in_response_to(&self) -> u64 {
        self.in_response_to
    }

    pub fn fills(&self) -> &[Interval] {
        self.fills.fills()
    }

    /// What the remote side last reported through Status.
    pub fn peer_progress(&self) -> u64 {
        self.peer_progress
    }

    pub fn peer_holes(&self) -> &[Interval] {
        &self.peer_holes
    }

    pub fn peer_errcode(&self) -> &'static str {
        self.peer_errcode
    }

    /// Accept the object description. The buffer is allocated once; a
    /// second Metadata declaring another size is refused, as is a size that
    /// does not cover data already received.
    pub fn apply_metadata(&mut self, metadata: &MetaData) -> Result<()> {
        let declared = metadata.size();
        if let Some(buffer) = &self.buffer {
            if buffer.len() as u64 != declared {
                return Err(Error::SizeMismatch {
                    allocated: buffer.len() as u64,
                    declared,
                });
            }
        } else {
            if declared > MAX_BUFFER_BYTES {
                return Err(Error::UnsupportedSize(declared as u128));
            }
            if let Some(last) = self.fills.fills().last() {
                if last.end > declared {
                    return Err(Error::BadOffset {
                        offset: last.start,
                        len: last.len(),
                        size: declared,
                    });
                }
            }
            let len = usize::try_from(declared).map_err(|_| Error::UnsupportedSize(declared as u128))?;
            let mut buffer = vec![0; len];
            for (offset, payload) in self.early.drain(..) {
                let start = offset as usize;
                buffer[start..start + payload.len()].copy_from_slice(&payload);
            }
            self.early_bytes = 0;
            self.buffer = Some(buffer);
        }
        self.kind = metadata.transfer();
        self.descriptor = metadata.descriptor();
        self.checksum_type = metadata.checksum_type();
        self.checksum = metadata.checksum().map(<[u8]>::to_vec);
        self.dirent = Some(metadata.dirent().clone());
        debug!(peer = %self.peer, session = self.session, size = declared, "metadata applied");
        Ok(())
    }

    /// Record a Data frame. Returns true if it covered any new byte.
    /// Before Metadata the payload is held until the buffer exists.
    pub fn apply_data(&mut self, data: &Data) -> Result<bool> {
        self.data_frames += 1;
        self.in_response_to = data.offset();
        self.last_timestamp = data.timestamp();
        let Some(range) = data.range() else {
            return Ok(false);
        };
        if let Some(size) = self.size() {
            if range.end > size {
                return Err(Error::BadOffset {
                    offset: range.start,
                    len: range.len(),
                    size,
                });
            }
        }
        match self.buffer.as_mut() {
            Some(buffer) => {
                buffer[range.start as usize..range.end as usize].copy_from_slice(data.payload());
            }
            None => {
                let held = self.early_bytes + range.len();
                if range.end > MAX_BUFFER_BYTES || held > MAX_BUFFER_BYTES {
                    return Err(Error::UnsupportedSize(range.end.max(held) as u128));
                }
                self.early.push((range.start, data.payload().to_vec()));
                self.early_bytes = held;
            }
        }
        let fresh = self.fills.add(range.start, range.end);
        self.progress = self.fills.contiguous_from_zero();
        Ok(fresh)
    }

    /// Record the remote side's view of a transfer we are sending.
    pub fn apply_status(&mut self, status: &Status) {
        self.peer_progress = status.progress();
        self.peer_holes = status.holes().to_vec();
        self.peer_errcode = status.errcode();
    }

    /// Outstanding ranges. Before metadata the trailing region is unknown
    /// and not reported.
    pub fn holes(&self) -> Vec<Interval> {
        match self.size() {
            Some(size) => self.fills.holes_within(size),
            None => self.fills.holes(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.size().is_some_and(|size| self.fills.is_complete(size))
    }

    /// Status this side sends about the transfer. A timestamp on the last
    /// Data frame is echoed back.
    pub fn status_frame(&self) -> Result<Status> {
        let options = format!(
            "descriptor={},metadatarecvd={},allholes=complete,reqholes=requested",
            self.descriptor.token(),
            if self.has_metadata() { "yes" } else { "no" },
        );
        Status::new(
            &options,
            self.session,
            self.progress,
            self.in_response_to,
            self.holes(),
            self.last_timestamp,
        )
    }

    /// Check the buffered bytes against the advertised checksum. `None`
    /// when there is nothing to check against yet.
    pub fn verify_checksum(&self) -> Result<Option<bool>> {
        match (&self.buffer, &self.checksum) {
            (Some(buffer), Some(expected)) if self.checksum_type != ChecksumType::None => {
                checksum::verify(self.checksum_type, buffer.as_slice(), expected).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Hand the received bytes to the host, leaving the transfer without a buffer.
    pub fn take_buffer(&mut self) -> Option<Vec<u8>> {
        self.buffer.take()
    }
}

struct Entry {
    peer: String,
    session: u32,
    transfer: Arc<Mutex<Transfer>>,
}

#[derive(Default)]
pub struct TransferTable {
    transfers: Mutex<Vec<Entry>>,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer for a new Request. An existing (peer, session)
    /// pair is never overwritten.
    pub fn add(&self, peer: &str, session: u32, request: &Request) -> Result<Arc<Mutex<Transfer>>> {
        let transfer = Arc::new(Mutex::new(Transfer::new(peer, session, request)));
        let mut transfers = self.transfers.lock();
        if transfers.iter().any(|e| e.peer == peer && e.session == session) {
            return Err(Error::DuplicateTransfer {
                peer: peer.to_string(),
                session,
            });
        }
        transfers.push(Entry {
            peer: peer.to_string(),
            session,
            transfer: Arc::clone(&transfer),
        });
        info!(peer, session, file = request.filename(), reqtype = request.reqtype(), "transfer added");
        Ok(transfer)
    }

    pub fn get(&self, peer: &str, session: u32) -> Option<Arc<Mutex<Transfer>>> {
        self.transfers
            .lock()
            .iter()
            .find(|e| e.peer == peer && e.session == session)
            .map(|e| Arc::clone(&e.transfer))
    }

    pub fn remove(&self, peer: &str, session: u32) -> Option<Arc<Mutex<Transfer>>> {
        let mut transfers = self.transfers.lock();
        let pos = transfers.iter().position(|e| e.peer == peer && e.session == session)?;
        Some(transfers.swap_remove(pos).transfer)
    }

    pub fn len(&self) -> usize {
        self.transfers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.lock().is_empty()
    }

    pub fn apply_metadata(&self, peer: &str, session: u32, metadata: &MetaData) -> Result<()> {
        self.lookup(peer, session)?.lock().apply_metadata(metadata)
    }

    /// Apply a Data frame; when the sender asked for status or signalled
    /// end of data, the reply is built under the same lock.
    pub fn apply_data(&self, peer: &str, session: u32, data: &Data) -> Result<Option<Status>> {
        let transfer = self.lookup(peer, session)?;
        let mut transfer = transfer.lock();
        transfer.apply_data(data)?;
        if transfer.is_complete() {
            debug!(peer, session, frames = transfer.data_frames(), "transfer complete");
        }
        if data.wants_status() || data.is_eod() {
            return transfer.status_frame().map(Some);
        }
        Ok(None)
    }

    pub fn apply_status(&self, peer: &str, session: u32, status: &Status) -> Result<()> {
        self.lookup(peer, session)?.lock().apply_status(status);
        Ok(())
    }

    fn lookup(&self, peer: &str, session: u32) -> Result<Arc<Mutex<Transfer>>> {
        self.get(peer, session).ok_or_else(|| Error::UnknownTransfer {
            peer: peer.to_string(),
            session,
        })
    }
}
