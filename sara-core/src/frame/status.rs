//! Status: receiver progress report and hole list.
//!
//! ```text
//! header(4) | session(4) | timestamp(16, iff reqtstamp=yes)
//!   | progress(w) | inresponseto(w) | (hole start(w), hole end(w))*
//! ```

use std::fmt;

use super::{expect_type, get_descriptor, need, put_descriptor, read_header, read_u32, HEADER_LEN};
use crate::error::{Error, FlagError, Result};
use crate::flags::{Descriptor, FrameType, Header};
use crate::holes::Interval;
use crate::timestamp::{Timestamp, TIMESTAMP_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    header: Header,
    session: u32,
    timestamp: Option<Timestamp>,
    progress: u64,
    in_response_to: u64,
    holes: Vec<Interval>,
}

impl Status {
    /// `progress` is the offset up to which everything has arrived;
    /// `in_response_to` echoes the offset of the Data frame that asked.
    pub fn new(
        options: &str,
        session: u32,
        progress: u64,
        in_response_to: u64,
        holes: Vec<Interval>,
        timestamp: Option<Timestamp>,
    ) -> Result<Self> {
        let header = Header::parse_options(FrameType::Status, options)?;
        let header = header.set("reqtstamp", if timestamp.is_some() { "yes" } else { "no" })?;
        Self::from_header(header, session, progress, in_response_to, holes, timestamp)
    }

    pub fn from_header(
        header: Header,
        session: u32,
        progress: u64,
        in_response_to: u64,
        holes: Vec<Interval>,
        timestamp: Option<Timestamp>,
    ) -> Result<Self> {
        expect_type(header, FrameType::Status)?;
        if header.is("reqtstamp", "yes") != timestamp.is_some() {
            return Err(FlagError::NotApplicable {
                frame: FrameType::Status.name(),
                field: "reqtstamp".to_string(),
            }
            .into());
        }
        if let Some(h) = holes.iter().find(|h| h.end <= h.start) {
            return Err(Error::InvalidHole {
                start: h.start,
                end: h.end,
            });
        }
        let descriptor = header.descriptor()?;
        let widest = holes
            .iter()
            .map(|h| h.end)
            .chain([progress, in_response_to])
            .max()
            .unwrap_or(0);
        if !descriptor.fits(widest as u128) {
            return Err(Error::DescriptorOverflow {
                descriptor: descriptor.token(),
                value: widest as u128,
            });
        }
        Ok(Self {
            header,
            session,
            timestamp,
            progress,
            in_response_to,
            holes,
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

    pub fn progress(&self) -> u64 {
        self.progress
    }

    pub fn in_response_to(&self) -> u64 {
        self.in_response_to
    }

    pub fn holes(&self) -> &[Interval] {
        &self.holes
    }

    pub fn descriptor(&self) -> Descriptor {
        self.header.descriptor().unwrap_or(Descriptor::D16)
    }

    /// The `errcode` token; `success` for a plain progress report.
    pub fn errcode(&self) -> &'static str {
        self.header.get("errcode").unwrap_or("unspecified")
    }

    pub fn is_error(&self) -> bool {
        !self.header.is("errcode", "success")
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let descriptor = self.header.descriptor()?;
        let w = descriptor.width();
        let mut out = Vec::with_capacity(HEADER_LEN + 4 + TIMESTAMP_LEN + w * (2 + 2 * self.holes.len()));
        out.extend_from_slice(&self.header.raw().to_be_bytes());
        out.extend_from_slice(&self.session.to_be_bytes());
        if let Some(ts) = &self.timestamp {
            out.extend_from_slice(&ts.encode());
        }
        put_descriptor(&mut out, descriptor, self.progress)?;
        put_descriptor(&mut out, descriptor, self.in_response_to)?;
        for hole in &self.holes {
            put_descriptor(&mut out, descriptor, hole.start)?;
            put_descriptor(&mut out, descriptor, hole.end)?;
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let kind = FrameType::Status.name();
        let header = read_header(bytes, FrameType::Status, &[])?;
        let descriptor = header.descriptor()?;
        let w = descriptor.width();
        let stamped = header.is("reqtstamp", "yes");
        let mut pos = HEADER_LEN + 4;
        need(bytes, pos + 2 * w + if stamped { TIMESTAMP_LEN } else { 0 }, kind)?;
        let session = read_u32(bytes, HEADER_LEN);
        let timestamp = if stamped {
            let ts = Timestamp::decode(&bytes[pos..])?;
            pos += TIMESTAMP_LEN;
            Some(ts)
        } else {
            None
        };
        let progress = get_descriptor(&bytes[pos..], descriptor)?;
        let in_response_to = get_descriptor(&bytes[pos + w..], descriptor)?;
        pos += 2 * w;

        let tail = &bytes[pos..];
        if tail.len() % (2 * w) != 0 {
            return Err(Error::FrameTooShort {
                kind,
                need: bytes.len() + 2 * w - tail.len() % (2 * w),
                got: bytes.len(),
            });
        }
        let mut holes = Vec::with_capacity(tail.len() / (2 * w));
        for pair in tail.chunks_exact(2 * w) {
            let start = get_descriptor(pair, descriptor)?;
            let end = get_descriptor(&pair[w..], descriptor)?;
            holes.push(Interval { start, end });
        }
        Self::from_header(header, session, progress, in_response_to, holes, timestamp)
    }

    pub fn short_print(&self) -> String {
        format!(
            "STATUS session={} {} progress={} inresponseto={} holes={}",
            self.session,
            self.errcode(),
            self.progress,
            self.in_response_to,
            self.holes.len()
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status")?;
        writeln!(f, "  flags: {}", self.header.render())?;
        writeln!(f, "  session: {}", self.session)?;
        if let Some(ts) = &self.timestamp {
            writeln!(f, "  timestamp: {ts}")?;
        }
        writeln!(f, "  progress: {}", self.progress)?;
        write!(f, "  inresponseto: {}", self.in_response_to)?;
        for hole in &self.holes {
            write!(f, "\n  hole: {hole}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::TimestampKind;

    fn iv(start: u64, end: u64) -> Interval {
        Interval { start, end }
    }

    #[test]
    fn holes_are_descriptor_pairs() {
        let s = Status::new(
            "descriptor=d16,allholes=complete,metadatarecvd=yes",
            4,
            10,
            30,
            vec![iv(10, 20), iv(25, 30)],
            None,
        )
        .unwrap();
        let wire = s.encode().unwrap();
        assert_eq!(wire.len(), 8 + 2 + 2 + 4 * 2);
        assert_eq!(&wire[8..12], &[0, 10, 0, 30]);
        assert_eq!(&wire[12..16], &[0, 10, 0, 20]);
        let back = Status::decode(&wire).unwrap();
        assert_eq!(back.holes(), &[iv(10, 20), iv(25, 30)]);
        assert!(!back.is_error());
        assert_eq!(back, s);
    }

    #[test]
    fn errcode_roundtrip() {
        let s = Status::new("errcode=badoffset", 8, 0, 0, Vec::new(), None).unwrap();
        let back = Status::decode(&s.encode().unwrap()).unwrap();
        assert_eq!(back.errcode(), "badoffset");
        assert!(back.is_error());
    }

    #[test]
    fn timestamped() {
        let ts = Timestamp::new(TimestampKind::Epoch2000_32, 1_000_000_000, 0).unwrap();
        let s = Status::new("descriptor=d32", 1, 5, 5, vec![iv(5, 9)], Some(ts)).unwrap();
        let wire = s.encode().unwrap();
        assert_eq!(wire.len(), 8 + 16 + 4 * 4);
        assert_eq!(Status::decode(&wire).unwrap(), s);
    }

    #[test]
    fn incomplete_hole_pair() {
        let s = Status::new("descriptor=d32", 1, 0, 0, vec![iv(1, 2)], None).unwrap();
        let wire = s.encode().unwrap();
        assert!(matches!(
            Status::decode(&wire[..wire.len() - 2]),
            Err(Error::FrameTooShort { .. })
        ));
        assert!(matches!(
            Status::decode(&wire[..10]),
            Err(Error::FrameTooShort { need: 16, .. })
        ));
    }

    #[test]
    fn empty_hole_rejected() {
        assert!(matches!(
            Status::new("descriptor=d32", 1, 0, 0, vec![iv(8, 8)], None),
            Err(Error::InvalidHole { start: 8, end: 8 })
        ));

        let mut wire = Status::new("descriptor=d16", 1, 0, 0, vec![iv(5, 9)], None)
            .unwrap()
            .encode()
            .unwrap();
        wire[14..16].copy_from_slice(&3u16.to_be_bytes());
        assert!(matches!(
            Status::decode(&wire),
            Err(Error::InvalidHole { start: 5, end: 3 })
        ));
    }

    #[test]
    fn values_must_fit_descriptor() {
        assert!(matches!(
            Status::new("descriptor=d16", 1, 0, 0, vec![iv(0, 70_000)], None),
            Err(Error::DescriptorOverflow { .. })
        ));
    }

    #[test]
    fn data_field_rejected() {
        assert!(matches!(
            Status::new("eod=yes", 1, 0, 0, Vec::new(), None),
            Err(Error::InvalidFlag(FlagError::UnknownField { .. }))
        ));
    }
}
