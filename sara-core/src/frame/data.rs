//! Data: one slice of the object's bytes.
//!
//! ```text
//! header(4) | session(4) | timestamp(16, iff reqtstamp=yes) | offset(w) | payload
//! ```

use std::fmt;

use super::{expect_type, get_descriptor, need, put_descriptor, read_header, read_u32, HEADER_LEN};
use crate::error::{Error, FlagError, Result};
use crate::flags::{Descriptor, FrameType, Header};
use crate::holes::Interval;
use crate::timestamp::{Timestamp, TIMESTAMP_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    header: Header,
    session: u32,
    timestamp: Option<Timestamp>,
    offset: u64,
    payload: Vec<u8>,
}

impl Data {
    /// `reqtstamp` follows the presence of `timestamp`, whatever the options say.
    pub fn new(
        options: &str,
        session: u32,
        offset: u64,
        payload: Vec<u8>,
        timestamp: Option<Timestamp>,
    ) -> Result<Self> {
        let header = Header::parse_options(FrameType::Data, options)?;
        let header = header.set("reqtstamp", if timestamp.is_some() { "yes" } else { "no" })?;
        Self::from_header(header, session, offset, payload, timestamp)
    }

    pub fn from_header(
        header: Header,
        session: u32,
        offset: u64,
        payload: Vec<u8>,
        timestamp: Option<Timestamp>,
    ) -> Result<Self> {
        expect_type(header, FrameType::Data)?;
        let descriptor = header.descriptor()?;
        let end = offset as u128 + payload.len() as u128;
        if !descriptor.fits(offset as u128) || end > u64::MAX as u128 {
            return Err(Error::DescriptorOverflow {
                descriptor: descriptor.token(),
                value: end,
            });
        }
        if header.is("reqtstamp", "yes") != timestamp.is_some() {
            return Err(FlagError::NotApplicable {
                frame: FrameType::Data.name(),
                field: "reqtstamp".to_string(),
            }
            .into());
        }
        Ok(Self {
            header,
            session,
            timestamp,
            offset,
            payload,
        })
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn descriptor(&self) -> Descriptor {
        self.header.descriptor().unwrap_or(Descriptor::D16)
    }

    /// Byte range this frame covers; `None` for an empty payload.
    pub fn range(&self) -> Option<Interval> {
        let end = self.offset.checked_add(self.payload.len() as u64)?;
        Interval::new(self.offset, end)
    }

    /// Sender asks for a Status in reply.
    pub fn wants_status(&self) -> bool {
        self.header.is("reqstatus", "yes")
    }

    /// Last frame of the transfer.
    pub fn is_eod(&self) -> bool {
        self.header.is("eod", "yes")
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + 4 + TIMESTAMP_LEN + 16 + self.payload.len());
        out.extend_from_slice(&self.header.raw().to_be_bytes());
        out.extend_from_slice(&self.session.to_be_bytes());
        if let Some(ts) = &self.timestamp {
            out.extend_from_slice(&ts.encode());
        }
        put_descriptor(&mut out, self.header.descriptor()?, self.offset)?;
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let kind = FrameType::Data.name();
        let header = read_header(bytes, FrameType::Data, &[])?;
        let descriptor = header.descriptor()?;
        let stamped = header.is("reqtstamp", "yes");
        let mut pos = HEADER_LEN + 4;
        let min = pos + descriptor.width() + if stamped { TIMESTAMP_LEN } else { 0 };
        need(bytes, min, kind)?;
        let session = read_u32(bytes, HEADER_LEN);
        let timestamp = if stamped {
            let ts = Timestamp::decode(&bytes[pos..])?;
            pos += TIMESTAMP_LEN;
            Some(ts)
        } else {
            None
        };
        let offset = get_descriptor(&bytes[pos..], descriptor)?;
        pos += descriptor.width();
        Self::from_header(header, session, offset, bytes[pos..].to_vec(), timestamp)
    }

    pub fn short_print(&self) -> String {
        let mut line = format!(
            "DATA session={} offset={} len={}",
            self.session,
            self.offset,
            self.payload.len()
        );
        if self.wants_status() {
            line.push_str(" reqstatus");
        }
        if self.is_eod() {
            line.push_str(" eod");
        }
        line
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Data")?;
        writeln!(f, "  flags: {}", self.header.render())?;
        writeln!(f, "  session: {}", self.session)?;
        if let Some(ts) = &self.timestamp {
            writeln!(f, "  timestamp: {ts}")?;
        }
        writeln!(f, "  offset: {}", self.offset)?;
        write!(f, "  payload: {} bytes", self.payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::TimestampKind;

    #[test]
    fn layout_without_timestamp() {
        let d = Data::new("descriptor=d32,transfer=file,reqstatus=yes", 11, 0x0102, b"abc".to_vec(), None).unwrap();
        let wire = d.encode().unwrap();
        assert_eq!(wire.len(), 4 + 4 + 4 + 3);
        assert_eq!(&wire[4..8], &11u32.to_be_bytes());
        assert_eq!(&wire[8..12], &[0, 0, 1, 2]);
        assert_eq!(&wire[12..], b"abc");
        let back = Data::decode(&wire).unwrap();
        assert!(back.wants_status());
        assert!(!back.is_eod());
        assert_eq!(back, d);
    }

    #[test]
    fn timestamp_precedes_offset() {
        let ts = Timestamp::new(TimestampKind::Posix64_32, 1_700_000_000, 250).unwrap();
        let d = Data::new("descriptor=d16,eod=yes", 2, 9, vec![7; 5], Some(ts)).unwrap();
        assert!(d.header().is("reqtstamp", "yes"));
        let wire = d.encode().unwrap();
        assert_eq!(wire.len(), 8 + 16 + 2 + 5);
        assert_eq!(&wire[8..24], &ts.encode());
        assert_eq!(&wire[24..26], &[0, 9]);
        let back = Data::decode(&wire).unwrap();
        assert_eq!(back.timestamp(), Some(ts));
        assert!(back.is_eod());
        assert_eq!(back.range(), Interval::new(9, 14));
    }

    #[test]
    fn reqtstamp_follows_timestamp() {
        let d = Data::new("reqtstamp=yes", 1, 0, vec![1], None).unwrap();
        assert!(d.header().is("reqtstamp", "no"));
        assert_eq!(Data::decode(&d.encode().unwrap()).unwrap().timestamp(), None);
    }

    #[test]
    fn offset_must_fit_descriptor() {
        assert!(matches!(
            Data::new("descriptor=d16", 1, 70_000, vec![1], None),
            Err(Error::DescriptorOverflow { .. })
        ));
        assert!(Data::new("descriptor=d128", 1, u64::MAX - 1, vec![1], None).is_ok());
    }

    #[test]
    fn decode_rejects_end_past_u64() {
        let mut wire = Data::new("descriptor=d64", 3, 0, b"xyzw".to_vec(), None).unwrap().encode().unwrap();
        wire[8..16].copy_from_slice(&(u64::MAX - 1).to_be_bytes());
        assert!(matches!(
            Data::decode(&wire),
            Err(Error::DescriptorOverflow { descriptor: "d64", .. })
        ));

        wire[8..16].copy_from_slice(&(u64::MAX - 4).to_be_bytes());
        let last = Data::decode(&wire).unwrap();
        assert_eq!(last.range(), Interval::new(u64::MAX - 4, u64::MAX));
    }

    #[test]
    fn truncated() {
        let ts = Timestamp::new(TimestampKind::Posix32, 5, 0).unwrap();
        let wire = Data::new("descriptor=d64", 1, 0, Vec::new(), Some(ts)).unwrap().encode().unwrap();
        assert_eq!(wire.len(), 32);
        assert!(Data::decode(&wire).is_ok());
        assert!(matches!(
            Data::decode(&wire[..31]),
            Err(Error::FrameTooShort { need: 32, .. })
        ));
    }

    #[test]
    fn status_field_rejected() {
        assert!(matches!(
            Data::new("allholes=complete", 1, 0, Vec::new(), None),
            Err(Error::InvalidFlag(FlagError::UnknownField { .. }))
        ));
    }
}
