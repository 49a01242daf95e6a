//! Saratoga wire core: header flags, frame codecs, hole tracking and the
//! peer/transfer registries.
//! Host-driven: no I/O of its own; the host passes datagrams and sends actions.

pub mod checksum;
pub mod core;
pub mod dirent;
pub mod error;
pub mod flags;
pub mod frame;
pub mod freespace;
pub mod holes;
pub mod peer;
pub mod protocol;
pub mod timestamp;
pub mod transfer;

pub use crate::core::{OutboundAction, SaratogaCore};
pub use error::{Error, FlagError, Result};
pub use flags::{ChecksumType, Descriptor, FrameType, Header, TransferKind};
pub use frame::{Beacon, Data, Frame, MetaData, Request, Status};
pub use freespace::{FixedFreeSpace, FreeSpace, StatvfsFreeSpace};
pub use holes::{HoleTracker, Interval};
pub use peer::{Peer, PeerTable, Upsert};
pub use protocol::{MULTICAST_V4, MULTICAST_V6, PORT, PROTOCOL_VERSION};
pub use timestamp::{Timestamp, TimestampKind};
pub use transfer::{Transfer, TransferTable};
