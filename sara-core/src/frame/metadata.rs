//! Metadata: describes the object being transferred.
//!
//! ```text
//! header(4) | session(4) | checksum(4 * csumlen) | directory entry (rest)
//! ```

use std::fmt;
use std::fs::File;
use std::path::Path;

use super::{expect_type, need, read_header, read_u32, HEADER_LEN};
use crate::checksum;
use crate::dirent::DirEnt;
use crate::error::{Error, FlagError, Result};
use crate::flags::{ChecksumType, Descriptor, FrameType, Header, TransferKind};

const MIN_LEN: usize = HEADER_LEN + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaData {
    header: Header,
    session: u32,
    checksum: Option<Vec<u8>>,
    dirent: DirEnt,
}

impl MetaData {
    /// Build metadata for the object at `path`.
    ///
    /// Bundle transfers and checksums on streams are rejected before the
    /// filesystem is touched. The directory entry must match the requested
    /// transfer kind; the checksum, if any, is computed over the file.
    pub fn new(options: &str, session: u32, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let header = Header::parse_options(FrameType::MetaData, options)?;
        let transfer = transfer_kind(header)?;
        let csumtype = checksum_type(header)?;
        if transfer == TransferKind::Bundle {
            return Err(Error::UnsupportedTransfer("bundle"));
        }
        if transfer == TransferKind::Stream && csumtype != ChecksumType::None {
            return Err(Error::ChecksumOnStream);
        }

        let descriptor = header.descriptor()?;
        let (dirent, _size) = DirEnt::build(transfer, descriptor, path)?;

        let checksum = match csumtype {
            ChecksumType::None => None,
            ct => Some(checksum::hash(ct, File::open(path)?)?),
        };
        Self::from_header(header, session, checksum, dirent)
    }

    /// Assemble from parts; the checksum length must match the header, and
    /// the header's `csumlen` must match its `csumtype`.
    pub fn from_header(header: Header, session: u32, checksum: Option<Vec<u8>>, dirent: DirEnt) -> Result<Self> {
        expect_type(header, FrameType::MetaData)?;
        let expected = checksum_len(header)?;
        let digest = checksum_type(header)?.expected_len();
        if expected != digest {
            return Err(Error::ChecksumLengthMismatch {
                expected: digest,
                got: expected,
            });
        }
        let got = checksum.as_ref().map_or(0, Vec::len);
        if got != expected {
            return Err(Error::ChecksumLengthMismatch { expected, got });
        }
        if transfer_kind(header)? == TransferKind::Stream && checksum.is_some() {
            return Err(Error::ChecksumOnStream);
        }
        Ok(Self {
            header,
            session,
            checksum: checksum.filter(|c| !c.is_empty()),
            dirent,
        })
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn checksum(&self) -> Option<&[u8]> {
        self.checksum.as_deref()
    }

    pub fn checksum_type(&self) -> ChecksumType {
        checksum_type(self.header).unwrap_or(ChecksumType::None)
    }

    pub fn transfer(&self) -> TransferKind {
        transfer_kind(self.header).unwrap_or(TransferKind::File)
    }

    pub fn descriptor(&self) -> Descriptor {
        self.header.descriptor().unwrap_or(Descriptor::D16)
    }

    pub fn dirent(&self) -> &DirEnt {
        &self.dirent
    }

    /// Declared transfer size in bytes.
    pub fn size(&self) -> u64 {
        self.dirent.size()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let entry = self.dirent.serialize()?;
        let sum: &[u8] = self.checksum.as_deref().unwrap_or(&[]);
        let expected = checksum_len(self.header)?;
        if sum.len() != expected {
            return Err(Error::ChecksumLengthMismatch {
                expected,
                got: sum.len(),
            });
        }
        let mut out = Vec::with_capacity(MIN_LEN + sum.len() + entry.len());
        out.extend_from_slice(&self.header.raw().to_be_bytes());
        out.extend_from_slice(&self.session.to_be_bytes());
        out.extend_from_slice(sum);
        out.extend_from_slice(&entry);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        need(bytes, MIN_LEN, FrameType::MetaData.name())?;
        let header = read_header(bytes, FrameType::MetaData, &[])?;
        let session = read_u32(bytes, HEADER_LEN);
        let n = header.numeric("csumlen")? as usize * 4;
        need(bytes, MIN_LEN + n, FrameType::MetaData.name())?;
        let checksum = (n > 0).then(|| bytes[MIN_LEN..MIN_LEN + n].to_vec());
        let dirent = DirEnt::deserialize(&bytes[MIN_LEN + n..])?;
        Self::from_header(header, session, checksum, dirent)
    }

    pub fn short_print(&self) -> String {
        format!(
            "METADATA session={} {} {} size={}",
            self.session,
            self.transfer().token(),
            self.dirent.name(),
            self.dirent.size()
        )
    }
}

impl fmt::Display for MetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Metadata")?;
        writeln!(f, "  flags: {}", self.header.render())?;
        writeln!(f, "  session: {}", self.session)?;
        match &self.checksum {
            Some(c) => {
                let hex: String = c.iter().map(|b| format!("{b:02x}")).collect();
                writeln!(f, "  checksum: {} {}", self.checksum_type().token(), hex)?;
            }
            None => writeln!(f, "  checksum: none")?,
        }
        write!(f, "  dirent: {}", self.dirent)
    }
}

fn transfer_kind(header: Header) -> Result<TransferKind> {
    let token = header.get("transfer")?;
    TransferKind::from_token(token).ok_or_else(|| illegal("transfer", token))
}

fn checksum_type(header: Header) -> Result<ChecksumType> {
    let token = header.get("csumtype")?;
    ChecksumType::from_token(token).ok_or_else(|| illegal("csumtype", token))
}

fn checksum_len(header: Header) -> Result<usize> {
    Ok(header.numeric("csumlen")? as usize * 4)
}

fn illegal(field: &str, value: &str) -> Error {
    FlagError::IllegalValue {
        frame: FrameType::MetaData.name(),
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}
