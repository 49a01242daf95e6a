//! Directory entries carried in Metadata frames.
//!
//! Wire layout:
//! ```text
//! flags(2) | size(descriptor width) | mtime(4) | ctime(4) | name | 0x00
//! ```
//! `flags` bit 15 is always set (start of entry); bits 13-14 hold the
//! property, bits 10-11 the descriptor. Times are seconds since 2000-01-01.

use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::error::{Error, FlagError, Result};
use crate::flags::{Descriptor, TransferKind};
use crate::frame::{get_descriptor, need, put_descriptor, text};
use crate::timestamp::{Timestamp, TimestampKind};

const SOD: u16 = 1 << 15;
const PROPERTY_SHIFT: u16 = 13;
const DESCRIPTOR_SHIFT: u16 = 10;

/// What kind of filesystem object the entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    File,
    Directory,
    /// Named pipe or other non-regular file.
    SpecialFile,
    SpecialDirectory,
}

impl Property {
    fn code(self) -> u16 {
        match self {
            Property::File => 0,
            Property::Directory => 1,
            Property::SpecialFile => 2,
            Property::SpecialDirectory => 3,
        }
    }

    fn from_code(code: u16) -> Self {
        match code & 0b11 {
            0 => Property::File,
            1 => Property::Directory,
            2 => Property::SpecialFile,
            _ => Property::SpecialDirectory,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Property::File => "file",
            Property::Directory => "directory",
            Property::SpecialFile => "specialfile",
            Property::SpecialDirectory => "specialdirectory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEnt {
    property: Property,
    descriptor: Descriptor,
    size: u64,
    mtime: Timestamp,
    ctime: Timestamp,
    name: String,
}

impl DirEnt {
    /// Entry from known parts. `mtime`/`ctime` are converted to the 2000 epoch.
    pub fn new(
        property: Property,
        descriptor: Descriptor,
        size: u64,
        mtime: Timestamp,
        ctime: Timestamp,
        name: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        if name.contains('\0') {
            return Err(FlagError::Malformed(format!("NUL in name {name:?}")).into());
        }
        if !descriptor.fits(size as u128) {
            return Err(Error::DescriptorOverflow {
                descriptor: descriptor.token(),
                value: size as u128,
            });
        }
        Ok(Self {
            property,
            descriptor,
            size,
            mtime: to_epoch2000(mtime),
            ctime: to_epoch2000(ctime),
            name,
        })
    }

    /// Describe the object at `path`, checking it matches `transfer`.
    /// Returns the entry and the byte count that will be transferred.
    pub fn build(transfer: TransferKind, descriptor: Descriptor, path: &Path) -> Result<(Self, u64)> {
        if transfer == TransferKind::Bundle {
            return Err(Error::UnsupportedTransfer("bundle"));
        }
        let meta = std::fs::metadata(path)?;
        let ft = meta.file_type();
        let mismatch = |expected| Error::TransferTypeMismatch {
            path: path.display().to_string(),
            expected,
        };
        let (property, size) = match transfer {
            TransferKind::File if ft.is_file() => (Property::File, meta.len()),
            TransferKind::File => return Err(mismatch("regular file")),
            TransferKind::Directory if ft.is_dir() => (Property::Directory, 0),
            TransferKind::Directory => return Err(mismatch("directory")),
            TransferKind::Stream if is_fifo(&ft) => (Property::SpecialFile, 0),
            TransferKind::Stream => return Err(mismatch("named pipe")),
            TransferKind::Bundle => return Err(Error::UnsupportedTransfer("bundle")),
        };
        let mtime = meta.modified().unwrap_or(UNIX_EPOCH);
        let ctime = meta.created().unwrap_or(mtime);
        let entry = Self::new(
            property,
            descriptor,
            size,
            Timestamp::from_system_time(TimestampKind::Epoch2000_32, mtime),
            Timestamp::from_system_time(TimestampKind::Epoch2000_32, ctime),
            path.to_string_lossy(),
        )?;
        Ok((entry, size))
    }

    pub fn property(&self) -> Property {
        self.property
    }

    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime(&self) -> Timestamp {
        self.mtime
    }

    pub fn ctime(&self) -> Timestamp {
        self.ctime
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(2 + self.descriptor.width() + 8 + self.name.len() + 1);
        let flags = SOD
            | (self.property.code() << PROPERTY_SHIFT)
            | (descriptor_code(self.descriptor) << DESCRIPTOR_SHIFT);
        out.extend_from_slice(&flags.to_be_bytes());
        put_descriptor(&mut out, self.descriptor, self.size)?;
        out.extend_from_slice(&epoch2000_secs(&self.mtime).to_be_bytes());
        out.extend_from_slice(&epoch2000_secs(&self.ctime).to_be_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        Ok(out)
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        need(buf, 2, "dirent")?;
        let flags = u16::from_be_bytes([buf[0], buf[1]]);
        if flags & SOD == 0 {
            return Err(FlagError::IllegalValue {
                frame: "dirent",
                field: "sod".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        let property = Property::from_code(flags >> PROPERTY_SHIFT);
        let descriptor = descriptor_from_code(flags >> DESCRIPTOR_SHIFT);
        let w = descriptor.width();
        need(buf, 2 + w + 8 + 1, "dirent")?;
        let size = get_descriptor(&buf[2..], descriptor)?;
        let mut pos = 2 + w;
        let mtime = epoch2000_at(&buf[pos..pos + 4]);
        pos += 4;
        let ctime = epoch2000_at(&buf[pos..pos + 4]);
        pos += 4;
        let rest = &buf[pos..];
        let nul = rest.iter().position(|&b| b == 0).ok_or(Error::FrameTooShort {
            kind: "dirent",
            need: buf.len() + 1,
            got: buf.len(),
        })?;
        let name = text(&rest[..nul], "dirent", "name")?;
        Self::new(property, descriptor, size, mtime, ctime, name)
    }
}

impl fmt::Display for DirEnt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} size={} ({}) mtime={} ctime={}",
            self.property.name(),
            self.name,
            self.size,
            self.descriptor.token(),
            self.mtime,
            self.ctime
        )
    }
}

fn descriptor_code(d: Descriptor) -> u16 {
    match d {
        Descriptor::D16 => 0,
        Descriptor::D32 => 1,
        Descriptor::D64 => 2,
        Descriptor::D128 => 3,
    }
}

fn descriptor_from_code(code: u16) -> Descriptor {
    match code & 0b11 {
        0 => Descriptor::D16,
        1 => Descriptor::D32,
        2 => Descriptor::D64,
        _ => Descriptor::D128,
    }
}

fn to_epoch2000(ts: Timestamp) -> Timestamp {
    let secs = std::time::Duration::from_secs(ts.secs());
    Timestamp::from_system_time(TimestampKind::Epoch2000_32, UNIX_EPOCH + secs)
}

fn epoch2000_secs(ts: &Timestamp) -> u32 {
    let wire = ts.encode();
    u32::from_be_bytes([wire[0], wire[1], wire[2], wire[3]])
}

fn epoch2000_at(buf: &[u8]) -> Timestamp {
    let mut wire = [0u8; 16];
    wire[0..4].copy_from_slice(&buf[0..4]);
    wire[15] = 4;
    // Every u32 is a valid epoch2000_32 value.
    Timestamp::decode(&wire).unwrap_or_else(|_| Timestamp::from_system_time(TimestampKind::Epoch2000_32, UNIX_EPOCH))
}

#[cfg(unix)]
fn is_fifo(ft: &std::fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    ft.is_fifo()
}

#[cfg(not(unix))]
fn is_fifo(_ft: &std::fs::FileType) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ts(secs: u64) -> Timestamp {
        Timestamp::new(TimestampKind::Posix64, secs, 0).unwrap()
    }

    #[test]
    fn serialize_layout() {
        let d = DirEnt::new(Property::File, Descriptor::D32, 300, ts(946_684_801), ts(946_684_802), "a.txt").unwrap();
        let wire = d.serialize().unwrap();
        assert_eq!(u16::from_be_bytes([wire[0], wire[1]]), 0x8000 | (1 << 10));
        assert_eq!(&wire[2..6], &300u32.to_be_bytes());
        assert_eq!(&wire[6..10], &1u32.to_be_bytes());
        assert_eq!(&wire[10..14], &2u32.to_be_bytes());
        assert_eq!(&wire[14..19], b"a.txt");
        assert_eq!(wire[19], 0);
        assert_eq!(wire.len(), 20);
        assert_eq!(DirEnt::deserialize(&wire).unwrap(), d);
    }

    #[test]
    fn new_rejects_overflow_and_nul() {
        assert!(matches!(
            DirEnt::new(Property::File, Descriptor::D16, 70_000, ts(0), ts(0), "x"),
            Err(Error::DescriptorOverflow { .. })
        ));
        assert!(DirEnt::new(Property::File, Descriptor::D16, 1, ts(0), ts(0), "a\0b").is_err());
    }

    #[test]
    fn deserialize_rejects_truncated_and_missing_sod() {
        let d = DirEnt::new(Property::Directory, Descriptor::D64, 0, ts(0), ts(0), "dir").unwrap();
        let wire = d.serialize().unwrap();
        assert!(matches!(
            DirEnt::deserialize(&wire[..wire.len() - 1]),
            Err(Error::FrameTooShort { .. })
        ));
        assert!(matches!(
            DirEnt::deserialize(&wire[..5]),
            Err(Error::FrameTooShort { .. })
        ));
        let mut bad = wire.clone();
        bad[0] &= 0x7f;
        assert!(matches!(DirEnt::deserialize(&bad), Err(Error::InvalidFlag(_))));
    }

    #[test]
    fn build_regular_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[1u8; 1234]).unwrap();
        let (d, size) = DirEnt::build(TransferKind::File, Descriptor::D32, f.path()).unwrap();
        assert_eq!(size, 1234);
        assert_eq!(d.size(), 1234);
        assert_eq!(d.property(), Property::File);
        assert_eq!(d.mtime().kind(), TimestampKind::Epoch2000_32);
    }

    #[test]
    fn build_checks_kind() {
        let f = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            DirEnt::build(TransferKind::Directory, Descriptor::D32, f.path()),
            Err(Error::TransferTypeMismatch { expected: "directory", .. })
        ));
        assert!(matches!(
            DirEnt::build(TransferKind::Stream, Descriptor::D32, f.path()),
            Err(Error::TransferTypeMismatch { expected: "named pipe", .. })
        ));
        assert!(matches!(
            DirEnt::build(TransferKind::Bundle, Descriptor::D32, f.path()),
            Err(Error::UnsupportedTransfer("bundle"))
        ));
        let dir = tempfile::tempdir().unwrap();
        let (d, size) = DirEnt::build(TransferKind::Directory, Descriptor::D16, dir.path()).unwrap();
        assert_eq!(size, 0);
        assert_eq!(d.property(), Property::Directory);
    }

    #[test]
    fn build_size_must_fit_descriptor() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0u8; 70_000]).unwrap();
        assert!(matches!(
            DirEnt::build(TransferKind::File, Descriptor::D16, f.path()),
            Err(Error::DescriptorOverflow { .. })
        ));
    }

    #[test]
    fn build_missing_path_is_io_error() {
        assert!(matches!(
            DirEnt::build(TransferKind::File, Descriptor::D32, Path::new("/nonexistent/x")),
            Err(Error::Io(_))
        ));
    }
}
