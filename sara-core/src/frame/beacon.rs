//! Beacon: presence and free-space advertisement.
//!
//! ```text
//! header(4) | freespace(0/2/4/8, iff freespace=yes) | endpoint id (rest)
//! ```

use std::fmt;
use std::path::Path;

use tracing::warn;

use super::{expect_type, get_descriptor, put_descriptor, read_header, text, HEADER_LEN};
use crate::error::{Error, FlagError, Result};
use crate::flags::{options_iter, Descriptor, FrameType, Header};
use crate::freespace::FreeSpace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    header: Header,
    freespace: Option<u64>,
    eid: String,
}

impl Beacon {
    /// Build a beacon from `field=value` options.
    ///
    /// With `freespace=yes` the free space of `workdir` (the current
    /// directory if `None`) is queried and the smallest width that holds it
    /// is selected. Failing to resolve the current directory is an error;
    /// failing to query free space only turns the advertisement off.
    pub fn new(options: &str, space: &dyn FreeSpace, workdir: Option<&Path>) -> Result<Self> {
        let mut header = Header::new(FrameType::Beacon);
        for pair in options_iter(options) {
            let (name, token) = pair?;
            if name == "freespaced" && !header.is("freespace", "yes") {
                return Err(FlagError::NotApplicable {
                    frame: FrameType::Beacon.name(),
                    field: name.to_string(),
                }
                .into());
            }
            header = header.set(name, token)?;
        }

        let mut freespace = None;
        if header.is("freespace", "yes") {
            let dir = match workdir {
                Some(d) => d.to_path_buf(),
                None => std::env::current_dir()?,
            };
            match space.kilobytes_available(&dir) {
                Ok(kb) => {
                    let kb = u64::try_from(kb).map_err(|_| Error::UnsupportedSize(kb))?;
                    header = header.set("freespaced", freespace_width(kb).token())?;
                    freespace = Some(kb);
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "free space query failed, not advertising");
                    header = header.set("freespace", "no")?.clear("freespaced")?;
                }
            }
        }
        Ok(Self {
            header,
            freespace,
            eid: String::new(),
        })
    }

    /// Build from an already-packed header and a known free-space value.
    pub fn from_header(header: Header, freespace: Option<u64>) -> Result<Self> {
        expect_type(header, FrameType::Beacon)?;
        match (header.is("freespace", "yes"), freespace) {
            (true, Some(kb)) => {
                let width = freespace_descriptor(header)?;
                if !width.fits(kb as u128) {
                    return Err(Error::DescriptorOverflow {
                        descriptor: width.token(),
                        value: kb as u128,
                    });
                }
            }
            (false, None) => {}
            _ => {
                return Err(FlagError::NotApplicable {
                    frame: FrameType::Beacon.name(),
                    field: "freespace".to_string(),
                }
                .into())
            }
        }
        Ok(Self {
            header,
            freespace,
            eid: String::new(),
        })
    }

    /// Copy with the endpoint id assigned; done once per send.
    pub fn with_eid(mut self, eid: impl Into<String>) -> Self {
        self.eid = eid.into();
        self
    }

    pub fn header(&self) -> Header {
        self.header
    }

    /// Advertised free space in kilobytes.
    pub fn freespace(&self) -> Option<u64> {
        self.freespace
    }

    pub fn eid(&self) -> &str {
        &self.eid
    }

    /// Largest descriptor the sender handles.
    pub fn descriptor(&self) -> Descriptor {
        self.header.descriptor().unwrap_or(Descriptor::D16)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + 8 + self.eid.len());
        out.extend_from_slice(&self.header.raw().to_be_bytes());
        if self.header.is("freespace", "yes") {
            let kb = self.freespace.ok_or_else(|| FlagError::NotApplicable {
                frame: FrameType::Beacon.name(),
                field: "freespace".to_string(),
            })?;
            put_descriptor(&mut out, freespace_descriptor(self.header)?, kb)?;
        }
        out.extend_from_slice(self.eid.as_bytes());
        Ok(out)
    }

    /// Decode a beacon datagram.
    ///
    /// An unrecognized free-space width still yields the endpoint id: the
    /// error carries a partial beacon whose `freespace` is `None` and whose
    /// eid is everything after the header.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = read_header(bytes, FrameType::Beacon, &["freespaced"])?;
        let mut pos = HEADER_LEN;
        let mut freespace = None;
        if header.is("freespace", "yes") {
            match freespace_descriptor(header) {
                Ok(width) => {
                    freespace = Some(get_descriptor(&bytes[pos..], width)?);
                    pos += width.width();
                }
                Err(_) => {
                    let partial = text(&bytes[pos..], FrameType::Beacon.name(), "eid")
                        .ok()
                        .map(|eid| {
                            Box::new(Self {
                                header,
                                freespace: None,
                                eid,
                            })
                        });
                    return Err(Error::UnsupportedFreespaceWidth {
                        code: header.numeric("freespaced")?,
                        partial,
                    });
                }
            }
        }
        Ok(Self {
            header,
            freespace,
            eid: text(&bytes[pos..], FrameType::Beacon.name(), "eid")?,
        })
    }

    pub fn short_print(&self) -> String {
        match self.freespace {
            Some(kb) => format!("BEACON {} free={}KB", self.eid, kb),
            None => format!("BEACON {}", self.eid),
        }
    }
}

impl fmt::Display for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Beacon")?;
        writeln!(f, "  flags: {}", self.header.render())?;
        match self.freespace {
            Some(kb) => writeln!(f, "  freespace: {kb} KB")?,
            None => writeln!(f, "  freespace: not advertised")?,
        }
        write!(f, "  eid: {}", self.eid)
    }
}

/// Smallest free-space width holding `kb`. d128 is not a legal width.
fn freespace_width(kb: u64) -> Descriptor {
    if kb <= u16::MAX as u64 {
        Descriptor::D16
    } else if kb <= u32::MAX as u64 {
        Descriptor::D32
    } else {
        Descriptor::D64
    }
}

fn freespace_descriptor(header: Header) -> Result<Descriptor> {
    let code = header.numeric("freespaced")?;
    header
        .get("freespaced")
        .ok()
        .and_then(Descriptor::from_token)
        .ok_or(Error::UnsupportedFreespaceWidth {
            code,
            partial: None,
        })
}
