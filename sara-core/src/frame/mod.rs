//! Frame codecs. Every frame starts with a 4-byte big-endian [`Header`].
//!
//! `Frame` is the tagged variant a receive loop works with; each kind also
//! has its own type with construction, encode, decode and rendering.

mod beacon;
mod data;
mod metadata;
mod request;
mod status;

use std::fmt;

pub use beacon::Beacon;
pub use data::Data;
pub use metadata::MetaData;
pub use request::Request;
pub use status::Status;

use crate::error::{Error, FlagError, Result};
use crate::flags::{Descriptor, FrameType, Header};

/// Size of the packed header.
pub const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Beacon(Beacon),
    Request(Request),
    MetaData(MetaData),
    Data(Data),
    Status(Status),
}

impl Frame {
    /// Decode any frame, choosing the codec from the header's frame type.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        need(bytes, HEADER_LEN, "frame")?;
        let raw = read_u32(bytes, 0);
        let frame_type = FrameType::of_raw(raw).ok_or(Error::UnknownFrameType((raw >> 24) & 0x1f))?;
        Ok(match frame_type {
            FrameType::Beacon => Frame::Beacon(Beacon::decode(bytes)?),
            FrameType::Request => Frame::Request(Request::decode(bytes)?),
            FrameType::MetaData => Frame::MetaData(MetaData::decode(bytes)?),
            FrameType::Data => Frame::Data(Data::decode(bytes)?),
            FrameType::Status => Frame::Status(Status::decode(bytes)?),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Frame::Beacon(f) => f.encode(),
            Frame::Request(f) => f.encode(),
            Frame::MetaData(f) => f.encode(),
            Frame::Data(f) => f.encode(),
            Frame::Status(f) => f.encode(),
        }
    }

    pub fn header(&self) -> Header {
        match self {
            Frame::Beacon(f) => f.header(),
            Frame::Request(f) => f.header(),
            Frame::MetaData(f) => f.header(),
            Frame::Data(f) => f.header(),
            Frame::Status(f) => f.header(),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.header().frame_type()
    }

    /// Session id, for every kind except Beacon.
    pub fn session(&self) -> Option<u32> {
        match self {
            Frame::Beacon(_) => None,
            Frame::Request(f) => Some(f.session()),
            Frame::MetaData(f) => Some(f.session()),
            Frame::Data(f) => Some(f.session()),
            Frame::Status(f) => Some(f.session()),
        }
    }

    /// One-line rendering for logs.
    pub fn short_print(&self) -> String {
        match self {
            Frame::Beacon(f) => f.short_print(),
            Frame::Request(f) => f.short_print(),
            Frame::MetaData(f) => f.short_print(),
            Frame::Data(f) => f.short_print(),
            Frame::Status(f) => f.short_print(),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Beacon(x) => fmt::Display::fmt(x, f),
            Frame::Request(x) => fmt::Display::fmt(x, f),
            Frame::MetaData(x) => fmt::Display::fmt(x, f),
            Frame::Data(x) => fmt::Display::fmt(x, f),
            Frame::Status(x) => fmt::Display::fmt(x, f),
        }
    }
}

impl From<Beacon> for Frame {
    fn from(f: Beacon) -> Self {
        Frame::Beacon(f)
    }
}

impl From<Request> for Frame {
    fn from(f: Request) -> Self {
        Frame::Request(f)
    }
}

impl From<MetaData> for Frame {
    fn from(f: MetaData) -> Self {
        Frame::MetaData(f)
    }
}

impl From<Data> for Frame {
    fn from(f: Data) -> Self {
        Frame::Data(f)
    }
}

impl From<Status> for Frame {
    fn from(f: Status) -> Self {
        Frame::Status(f)
    }
}

/// Fail with `FrameTooShort` unless `buf` has at least `n` bytes.
pub(crate) fn need(buf: &[u8], n: usize, kind: &'static str) -> Result<()> {
    if buf.len() < n {
        return Err(Error::FrameTooShort {
            kind,
            need: n,
            got: buf.len(),
        });
    }
    Ok(())
}

/// Text carried on the wire. Invalid UTF-8 is refused, never rewritten.
pub(crate) fn text(bytes: &[u8], kind: &'static str, field: &'static str) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| Error::InvalidText { kind, field })
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Read the header at the front of `bytes` and check it is a `frame_type` header.
pub(crate) fn read_header(bytes: &[u8], frame_type: FrameType, lenient: &[&str]) -> Result<Header> {
    need(bytes, HEADER_LEN, frame_type.name())?;
    let header = Header::from_raw(read_u32(bytes, 0), lenient)?;
    if header.frame_type() != frame_type {
        return Err(FlagError::IllegalValue {
            frame: frame_type.name(),
            field: "frametype".to_string(),
            value: header.frame_type().name().to_string(),
        }
        .into());
    }
    Ok(header)
}

/// Check a caller-supplied header belongs to `frame_type`.
pub(crate) fn expect_type(header: Header, frame_type: FrameType) -> Result<()> {
    if header.frame_type() != frame_type {
        return Err(FlagError::NotApplicable {
            frame: frame_type.name(),
            field: format!("frametype={}", header.frame_type().name()),
        }
        .into());
    }
    Ok(())
}

/// Append `value` as a big-endian integer of the descriptor's width.
pub(crate) fn put_descriptor(out: &mut Vec<u8>, d: Descriptor, value: u64) -> Result<()> {
    if !d.fits(value as u128) {
        return Err(Error::DescriptorOverflow {
            descriptor: d.token(),
            value: value as u128,
        });
    }
    match d {
        Descriptor::D16 => out.extend_from_slice(&(value as u16).to_be_bytes()),
        Descriptor::D32 => out.extend_from_slice(&(value as u32).to_be_bytes()),
        Descriptor::D64 => out.extend_from_slice(&value.to_be_bytes()),
        Descriptor::D128 => out.extend_from_slice(&(value as u128).to_be_bytes()),
    }
    Ok(())
}

/// Read a descriptor-width integer from the front of `buf`.
pub(crate) fn get_descriptor(buf: &[u8], d: Descriptor) -> Result<u64> {
    need(buf, d.width(), "descriptor")?;
    let mut wide = [0u8; 16];
    wide[16 - d.width()..].copy_from_slice(&buf[..d.width()]);
    let value = u128::from_be_bytes(wide);
    u64::try_from(value).map_err(|_| Error::DescriptorOverflow {
        descriptor: d.token(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_widths() {
        for (d, w) in [
            (Descriptor::D16, 2),
            (Descriptor::D32, 4),
            (Descriptor::D64, 8),
            (Descriptor::D128, 16),
        ] {
            let mut out = Vec::new();
            put_descriptor(&mut out, d, 0x1234).unwrap();
            assert_eq!(out.len(), w);
            assert_eq!(&out[w - 2..], &[0x12, 0x34]);
            assert_eq!(get_descriptor(&out, d).unwrap(), 0x1234);
        }
    }

    #[test]
    fn descriptor_overflow() {
        let mut out = Vec::new();
        assert!(matches!(
            put_descriptor(&mut out, Descriptor::D16, 65_536),
            Err(Error::DescriptorOverflow { .. })
        ));
        let mut wide = vec![0u8; 16];
        wide[0] = 1;
        assert!(matches!(
            get_descriptor(&wide, Descriptor::D128),
            Err(Error::DescriptorOverflow { .. })
        ));
        assert!(matches!(
            get_descriptor(&[0u8; 3], Descriptor::D32),
            Err(Error::FrameTooShort { .. })
        ));
    }

    #[test]
    fn decode_dispatches_on_frame_type() {
        let req = Request::new("descriptor=d32,reqtype=get", 7, "f", None).unwrap();
        let wire = req.encode().unwrap();
        match Frame::decode(&wire).unwrap() {
            Frame::Request(r) => assert_eq!(r, req),
            other => panic!("expected request, got {other:?}"),
        }
        let frame = Frame::from(req);
        assert_eq!(frame.session(), Some(7));
        assert_eq!(frame.frame_type(), FrameType::Request);
        assert_eq!(frame.encode().unwrap(), wire);
    }

    #[test]
    fn decode_unknown_frame_type() {
        let raw: u32 = (1 << 29) | (9 << 24);
        assert!(matches!(
            Frame::decode(&raw.to_be_bytes()),
            Err(Error::UnknownFrameType(9))
        ));
        assert!(matches!(
            Frame::decode(&[0x20, 0]),
            Err(Error::FrameTooShort { .. })
        ));
    }

    #[test]
    fn codec_rejects_other_frame_type() {
        let req = Request::new("", 1, "f", None).unwrap().encode().unwrap();
        assert!(matches!(Status::decode(&req), Err(Error::InvalidFlag(_))));
    }
}
