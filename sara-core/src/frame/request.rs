//! Request: ask a peer to get, put, list or delete a file.
//!
//! ```text
//! header(4) | session(4) | filename | 0x00 | auth (rest, optional)
//! ```

use std::fmt;

use super::{expect_type, need, read_header, read_u32, text, HEADER_LEN};
use crate::error::{Error, FlagError, Result};
use crate::flags::{Descriptor, FrameType, Header};

/// Header, session and the filename terminator.
const MIN_LEN: usize = HEADER_LEN + 4 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    header: Header,
    session: u32,
    filename: String,
    auth: Option<Vec<u8>>,
}

impl Request {
    /// Build from options such as `"descriptor=d32,fileordir=file,reqtype=put,stream=no"`.
    /// An empty auth blob is the same as none.
    pub fn new(options: &str, session: u32, filename: &str, auth: Option<Vec<u8>>) -> Result<Self> {
        let header = Header::parse_options(FrameType::Request, options)?;
        Self::from_header(header, session, filename, auth)
    }

    pub fn from_header(header: Header, session: u32, filename: &str, auth: Option<Vec<u8>>) -> Result<Self> {
        expect_type(header, FrameType::Request)?;
        if filename.contains('\0') {
            return Err(FlagError::Malformed(format!("NUL in filename {filename:?}")).into());
        }
        Ok(Self {
            header,
            session,
            filename: filename.to_string(),
            auth: auth.filter(|a| !a.is_empty()),
        })
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn auth(&self) -> Option<&[u8]> {
        self.auth.as_deref()
    }

    /// `get`, `put`, `getdelete`, `delete`, `getdir` or `noaction`.
    pub fn reqtype(&self) -> &'static str {
        self.header.get("reqtype").unwrap_or("noaction")
    }

    pub fn descriptor(&self) -> Descriptor {
        self.header.descriptor().unwrap_or(Descriptor::D16)
    }

    /// True if the request names a directory rather than a file.
    pub fn is_directory(&self) -> bool {
        self.header.is("fileordir", "directory")
    }

    pub fn is_stream(&self) -> bool {
        self.header.is("stream", "yes")
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let auth_len = self.auth.as_ref().map_or(0, Vec::len);
        let mut out = Vec::with_capacity(MIN_LEN + self.filename.len() + auth_len);
        out.extend_from_slice(&self.header.raw().to_be_bytes());
        out.extend_from_slice(&self.session.to_be_bytes());
        out.extend_from_slice(self.filename.as_bytes());
        out.push(0);
        if let Some(auth) = &self.auth {
            out.extend_from_slice(auth);
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        need(bytes, MIN_LEN, FrameType::Request.name())?;
        let header = read_header(bytes, FrameType::Request, &[])?;
        let session = read_u32(bytes, HEADER_LEN);
        let rest = &bytes[HEADER_LEN + 4..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::FrameTooShort {
                kind: FrameType::Request.name(),
                need: bytes.len() + 1,
                got: bytes.len(),
            })?;
        let filename = text(&rest[..nul], FrameType::Request.name(), "filename")?;
        let auth = &rest[nul + 1..];
        Ok(Self {
            header,
            session,
            filename,
            auth: (!auth.is_empty()).then(|| auth.to_vec()),
        })
    }

    pub fn short_print(&self) -> String {
        format!(
            "REQUEST {} session={} {}",
            self.reqtype(),
            self.session,
            self.filename
        )
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Request")?;
        writeln!(f, "  flags: {}", self.header.render())?;
        writeln!(f, "  session: {}", self.session)?;
        writeln!(f, "  filename: {}", self.filename)?;
        match &self.auth {
            Some(a) => write!(f, "  auth: {} bytes", a.len()),
            None => write!(f, "  auth: none"),
        }
    }
}
