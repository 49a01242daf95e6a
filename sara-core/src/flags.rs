//! Flag registry: the named bit-fields packed into every frame's 32-bit header.
//!
//! Offsets count from the most significant bit. Each frame type has a fixed
//! table of fields; every field has a fixed table of tokens. `version` and
//! `frametype` are written by [`Header::new`] and can never be set through
//! [`Header::set`] or an options string.

use crate::error::FlagError;

/// Current protocol version code (token `v1`).
pub const VERSION_1: u32 = 1;

/// Frame kinds, identified by the `frametype` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Beacon,
    Request,
    MetaData,
    Data,
    Status,
}

impl FrameType {
    pub fn code(self) -> u32 {
        match self {
            FrameType::Beacon => 0,
            FrameType::Request => 1,
            FrameType::MetaData => 2,
            FrameType::Data => 3,
            FrameType::Status => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(FrameType::Beacon),
            1 => Some(FrameType::Request),
            2 => Some(FrameType::MetaData),
            3 => Some(FrameType::Data),
            4 => Some(FrameType::Status),
            _ => None,
        }
    }

    /// Frame type encoded in a raw header value, without validating anything else.
    pub fn of_raw(bits: u32) -> Option<Self> {
        Self::from_code((bits >> 24) & 0x1f)
    }

    /// Token used for this frame type in the `frametype` field.
    pub fn name(self) -> &'static str {
        match self {
            FrameType::Beacon => "beacon",
            FrameType::Request => "request",
            FrameType::MetaData => "metadata",
            FrameType::Data => "data",
            FrameType::Status => "status",
        }
    }

    fn fields(self) -> &'static [Field] {
        match self {
            FrameType::Beacon => BEACON_FIELDS,
            FrameType::Request => REQUEST_FIELDS,
            FrameType::MetaData => METADATA_FIELDS,
            FrameType::Data => DATA_FIELDS,
            FrameType::Status => STATUS_FIELDS,
        }
    }

    fn field(self, name: &str) -> Option<&'static Field> {
        COMMON_FIELDS
            .iter()
            .chain(self.fields().iter())
            .find(|f| f.name == name)
    }
}

/// One named bit-field.
#[derive(Debug)]
struct Field {
    name: &'static str,
    offset: u32,
    width: u32,
    values: &'static [(&'static str, u32)],
    /// False for fields only ever written by the codec itself.
    settable: bool,
    /// Field written with the same token whenever this one is set.
    derived: Option<&'static str>,
}

impl Field {
    const fn new(name: &'static str, offset: u32, width: u32, values: &'static [(&'static str, u32)]) -> Self {
        Self {
            name,
            offset,
            width,
            values,
            settable: true,
            derived: None,
        }
    }

    fn shift(&self) -> u32 {
        32 - self.offset - self.width
    }

    fn mask(&self) -> u32 {
        ((1u32 << self.width) - 1) << self.shift()
    }

    fn code_of(&self, token: &str) -> Option<u32> {
        self.values.iter().find(|(t, _)| *t == token).map(|(_, c)| *c)
    }

    fn token_of(&self, code: u32) -> Option<&'static str> {
        self.values.iter().find(|(_, c)| *c == code).map(|(t, _)| *t)
    }
}

const NO_YES: &[(&str, u32)] = &[("no", 0), ("yes", 1)];
const DESCRIPTORS: &[(&str, u32)] = &[("d16", 0), ("d32", 1), ("d64", 2), ("d128", 3)];
const WILLING: &[(&str, u32)] = &[("off", 0), ("on", 1), ("capable", 2)];
const TRANSFERS: &[(&str, u32)] = &[("file", 0), ("directory", 1), ("bundle", 2), ("stream", 3)];
const CSUM_TYPES: &[(&str, u32)] = &[("none", 0), ("crc32", 1), ("md5", 2), ("sha1", 3), ("sha256", 4)];
/// Checksum length in 32-bit words, keyed by checksum type token.
const CSUM_LENS: &[(&str, u32)] = &[("none", 0), ("crc32", 1), ("md5", 4), ("sha1", 5), ("sha256", 8)];

const COMMON_FIELDS: &[Field] = &[
    Field {
        settable: false,
        ..Field::new("version", 0, 3, &[("v1", VERSION_1)])
    },
    Field {
        settable: false,
        ..Field::new(
            "frametype",
            3,
            5,
            &[("beacon", 0), ("request", 1), ("metadata", 2), ("data", 3), ("status", 4)],
        )
    },
];

const BEACON_FIELDS: &[Field] = &[
    Field::new("descriptor", 8, 2, DESCRIPTORS),
    Field::new("stream", 11, 1, NO_YES),
    Field::new("txwilling", 12, 2, WILLING),
    Field::new("rxwilling", 14, 2, WILLING),
    Field::new("udplite", 16, 1, NO_YES),
    Field::new("freespace", 17, 1, NO_YES),
    Field::new("freespaced", 18, 2, &[("d16", 0), ("d32", 1), ("d64", 2)]),
];

const REQUEST_FIELDS: &[Field] = &[
    Field::new("descriptor", 8, 2, DESCRIPTORS),
    Field::new("stream", 11, 1, NO_YES),
    Field::new("fileordir", 12, 1, &[("file", 0), ("directory", 1)]),
    Field::new("udplite", 16, 1, NO_YES),
    Field::new(
        "reqtype",
        24,
        8,
        &[
            ("noaction", 0),
            ("get", 1),
            ("put", 2),
            ("getdelete", 3),
            ("delete", 4),
            ("getdir", 5),
        ],
    ),
];

const METADATA_FIELDS: &[Field] = &[
    Field::new("descriptor", 8, 2, DESCRIPTORS),
    Field::new("transfer", 10, 2, TRANSFERS),
    Field::new("progress", 12, 1, &[("inprogress", 0), ("terminated", 1)]),
    Field::new("udptype", 13, 1, &[("udponly", 0), ("udplite", 1)]),
    Field::new("reliability", 14, 2, &[("reliable", 0), ("semireliable", 1), ("unreliable", 2)]),
    Field {
        settable: false,
        ..Field::new("csumlen", 24, 4, CSUM_LENS)
    },
    Field {
        derived: Some("csumlen"),
        ..Field::new("csumtype", 28, 4, CSUM_TYPES)
    },
];

const DATA_FIELDS: &[Field] = &[
    Field::new("descriptor", 8, 2, DESCRIPTORS),
    Field::new("transfer", 10, 2, TRANSFERS),
    Field::new("reqtstamp", 12, 1, NO_YES),
    Field::new("reqstatus", 15, 1, NO_YES),
    Field::new("eod", 16, 1, NO_YES),
];

const STATUS_FIELDS: &[Field] = &[
    Field::new("descriptor", 8, 2, DESCRIPTORS),
    Field::new("reqtstamp", 12, 1, NO_YES),
    Field::new("metadatarecvd", 13, 1, NO_YES),
    Field::new("allholes", 14, 1, &[("incomplete", 0), ("complete", 1)]),
    Field::new("reqholes", 15, 1, &[("requested", 0), ("voluntarily", 1)]),
    Field::new(
        "errcode",
        24,
        8,
        &[
            ("success", 0),
            ("unspecified", 1),
            ("cantsend", 2),
            ("cantreceive", 3),
            ("filenotfound", 4),
            ("accessdenied", 5),
            ("unknownid", 6),
            ("didnotdelete", 7),
            ("filetoobig", 8),
            ("badoffset", 9),
            ("badpacket", 10),
            ("badflags", 11),
            ("internalerror", 12),
            ("metadatamissing", 13),
        ],
    ),
];

/// Packed 32-bit frame header. Always carries `version` and `frametype`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    bits: u32,
    frame_type: FrameType,
}

impl Header {
    /// Fresh header for `frame_type`: version v1, frametype set, everything else zero.
    pub fn new(frame_type: FrameType) -> Self {
        let bits = (VERSION_1 << COMMON_FIELDS[0].shift())
            | (frame_type.code() << COMMON_FIELDS[1].shift());
        Self { bits, frame_type }
    }

    /// Reconstruct a header from its wire value.
    ///
    /// Checks the version, the frame type, every field code except those in
    /// `lenient`, and that no bit outside the frame's fields is set.
    pub fn from_raw(bits: u32, lenient: &[&str]) -> Result<Self, FlagError> {
        let version = &COMMON_FIELDS[0];
        let vcode = (bits & version.mask()) >> version.shift();
        if vcode != VERSION_1 {
            return Err(FlagError::IllegalValue {
                frame: "header",
                field: version.name.to_string(),
                value: vcode.to_string(),
            });
        }
        let ft = &COMMON_FIELDS[1];
        let tcode = (bits & ft.mask()) >> ft.shift();
        let frame_type = FrameType::from_code(tcode).ok_or_else(|| FlagError::IllegalValue {
            frame: "header",
            field: ft.name.to_string(),
            value: tcode.to_string(),
        })?;
        let header = Self { bits, frame_type };

        let mut covered = version.mask() | ft.mask();
        for field in frame_type.fields() {
            covered |= field.mask();
            if lenient.contains(&field.name) {
                continue;
            }
            header.get(field.name)?;
        }
        if bits & !covered != 0 {
            return Err(FlagError::NotApplicable {
                frame: frame_type.name(),
                field: format!("reserved bits {:#010x}", bits & !covered),
            });
        }
        Ok(header)
    }

    /// Wire value.
    pub fn raw(self) -> u32 {
        self.bits
    }

    pub fn frame_type(self) -> FrameType {
        self.frame_type
    }

    fn field(self, name: &str) -> Result<&'static Field, FlagError> {
        self.frame_type
            .field(name)
            .ok_or_else(|| FlagError::UnknownField {
                frame: self.frame_type.name(),
                field: name.to_string(),
            })
    }

    fn put(self, field: &Field, code: u32) -> Self {
        Self {
            bits: (self.bits & !field.mask()) | ((code << field.shift()) & field.mask()),
            frame_type: self.frame_type,
        }
    }

    /// Set `name` to `token`. Fails for fields not in this frame type's table,
    /// tokens not in the field's table, and fields only the codec may write.
    pub fn set(self, name: &str, token: &str) -> Result<Self, FlagError> {
        let field = self.field(name)?;
        if !field.settable {
            return Err(FlagError::NotApplicable {
                frame: self.frame_type.name(),
                field: name.to_string(),
            });
        }
        let code = field.code_of(token).ok_or_else(|| FlagError::IllegalValue {
            frame: self.frame_type.name(),
            field: name.to_string(),
            value: token.to_string(),
        })?;
        let mut header = self.put(field, code);
        if let Some(derived) = field.derived {
            let dfield = self.field(derived)?;
            let dcode = dfield.code_of(token).ok_or_else(|| FlagError::IllegalValue {
                frame: self.frame_type.name(),
                field: derived.to_string(),
                value: token.to_string(),
            })?;
            header = header.put(dfield, dcode);
        }
        Ok(header)
    }

    /// Zero a field (its first table entry in every table defined here).
    pub(crate) fn clear(self, name: &str) -> Result<Self, FlagError> {
        let field = self.field(name)?;
        Ok(self.put(field, 0))
    }

    /// Token currently stored in `name`.
    pub fn get(self, name: &str) -> Result<&'static str, FlagError> {
        let field = self.field(name)?;
        let code = (self.bits & field.mask()) >> field.shift();
        field.token_of(code).ok_or_else(|| FlagError::IllegalValue {
            frame: self.frame_type.name(),
            field: name.to_string(),
            value: code.to_string(),
        })
    }

    /// Raw integer code stored in `name`, whether or not it maps to a token.
    pub fn numeric(self, name: &str) -> Result<u32, FlagError> {
        let field = self.field(name)?;
        Ok((self.bits & field.mask()) >> field.shift())
    }

    /// True if `name` exists for this frame type and currently holds `token`.
    pub fn is(self, name: &str, token: &str) -> bool {
        self.get(name).map(|t| t == token).unwrap_or(false)
    }

    pub fn descriptor(self) -> Result<Descriptor, FlagError> {
        let token = self.get("descriptor")?;
        Descriptor::from_token(token).ok_or_else(|| FlagError::IllegalValue {
            frame: self.frame_type.name(),
            field: "descriptor".to_string(),
            value: token.to_string(),
        })
    }

    /// Build a header from an options string, e.g. `"descriptor=d32,stream=no,"`.
    pub fn parse_options(frame_type: FrameType, options: &str) -> Result<Self, FlagError> {
        let mut header = Self::new(frame_type);
        for pair in options_iter(options) {
            let (name, token) = pair?;
            header = header.set(name, token)?;
        }
        Ok(header)
    }

    /// `field=token` pairs for every field of this frame type, in table order.
    pub fn render(self) -> String {
        COMMON_FIELDS
            .iter()
            .chain(self.frame_type.fields().iter())
            .map(|f| {
                let token = self
                    .get(f.name)
                    .map(str::to_string)
                    .unwrap_or_else(|_| format!("?{}", self.numeric(f.name).unwrap_or(0)));
                format!("{}={}", f.name, token)
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Header({:#010x} {})", self.bits, self.render())
    }
}

/// Split an options string into `(field, token)` pairs. Empty segments,
/// including trailing commas, are skipped; whitespace around names and
/// tokens is trimmed.
pub fn options_iter(options: &str) -> impl Iterator<Item = Result<(&str, &str), FlagError>> {
    options
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((name, token)) if !name.trim().is_empty() => Ok((name.trim(), token.trim())),
            _ => Err(FlagError::Malformed(segment.to_string())),
        })
}

/// Width used for sizes and offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Descriptor {
    D16,
    D32,
    D64,
    D128,
}

impl Descriptor {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "d16" => Some(Descriptor::D16),
            "d32" => Some(Descriptor::D32),
            "d64" => Some(Descriptor::D64),
            "d128" => Some(Descriptor::D128),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Descriptor::D16 => "d16",
            Descriptor::D32 => "d32",
            Descriptor::D64 => "d64",
            Descriptor::D128 => "d128",
        }
    }

    /// Bytes on the wire.
    pub fn width(self) -> usize {
        match self {
            Descriptor::D16 => 2,
            Descriptor::D32 => 4,
            Descriptor::D64 => 8,
            Descriptor::D128 => 16,
        }
    }

    pub fn fits(self, value: u128) -> bool {
        match self {
            Descriptor::D16 => value <= u16::MAX as u128,
            Descriptor::D32 => value <= u32::MAX as u128,
            Descriptor::D64 => value <= u64::MAX as u128,
            Descriptor::D128 => true,
        }
    }
}

/// Value of the Metadata/Data `transfer` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    File,
    Directory,
    Bundle,
    Stream,
}

impl TransferKind {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "file" => Some(TransferKind::File),
            "directory" => Some(TransferKind::Directory),
            "bundle" => Some(TransferKind::Bundle),
            "stream" => Some(TransferKind::Stream),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            TransferKind::File => "file",
            TransferKind::Directory => "directory",
            TransferKind::Bundle => "bundle",
            TransferKind::Stream => "stream",
        }
    }
}

/// Value of the Metadata `csumtype` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumType {
    None,
    Crc32,
    Md5,
    Sha1,
    Sha256,
}

impl ChecksumType {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "none" => Some(ChecksumType::None),
            "crc32" => Some(ChecksumType::Crc32),
            "md5" => Some(ChecksumType::Md5),
            "sha1" => Some(ChecksumType::Sha1),
            "sha256" => Some(ChecksumType::Sha256),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            ChecksumType::None => "none",
            ChecksumType::Crc32 => "crc32",
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha256 => "sha256",
        }
    }

    /// Digest length in bytes, as declared by the `csumlen` table.
    pub fn expected_len(self) -> usize {
        METADATA_FIELDS
            .iter()
            .find(|f| f.name == "csumlen")
            .and_then(|f| f.code_of(self.token()))
            .map(|words| words as usize * 4)
            .unwrap_or(0)
    }
}
