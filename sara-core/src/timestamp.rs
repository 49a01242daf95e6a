//! Timestamps: five fixed representations, all carried in a 16-byte wire form.
//!
//! The value is written big-endian from byte 0; byte 15 holds the kind code.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Size of an encoded timestamp.
pub const TIMESTAMP_LEN: usize = 16;

/// Seconds between the POSIX epoch and 2000-01-01T00:00:00Z.
const EPOCH_2000: u64 = 946_684_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampKind {
    Posix32,
    Posix64,
    Posix32_32,
    Posix64_32,
    Epoch2000_32,
}

impl TimestampKind {
    fn code(self) -> u8 {
        match self {
            TimestampKind::Posix32 => 0,
            TimestampKind::Posix64 => 1,
            TimestampKind::Posix32_32 => 2,
            TimestampKind::Posix64_32 => 3,
            TimestampKind::Epoch2000_32 => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TimestampKind::Posix32),
            1 => Some(TimestampKind::Posix64),
            2 => Some(TimestampKind::Posix32_32),
            3 => Some(TimestampKind::Posix64_32),
            4 => Some(TimestampKind::Epoch2000_32),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TimestampKind::Posix32 => "posix32",
            TimestampKind::Posix64 => "posix64",
            TimestampKind::Posix32_32 => "posix32_32",
            TimestampKind::Posix64_32 => "posix64_32",
            TimestampKind::Epoch2000_32 => "epoch2000_32",
        }
    }

    fn has_micros(self) -> bool {
        matches!(self, TimestampKind::Posix32_32 | TimestampKind::Posix64_32)
    }
}

/// A point in time in one of the wire representations.
///
/// `secs` is always POSIX seconds; `Epoch2000_32` converts on the wire.
/// `micros` is zero for kinds without a sub-second part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    kind: TimestampKind,
    secs: u64,
    micros: u32,
}

impl Timestamp {
    pub fn new(kind: TimestampKind, secs: u64, micros: u32) -> Result<Self> {
        if micros >= 1_000_000 {
            return Err(Error::BadTimestamp(format!("{micros} microseconds")));
        }
        let fits = match kind {
            TimestampKind::Posix32 | TimestampKind::Posix32_32 => secs <= u32::MAX as u64,
            TimestampKind::Posix64 | TimestampKind::Posix64_32 => true,
            TimestampKind::Epoch2000_32 => {
                secs >= EPOCH_2000 && secs - EPOCH_2000 <= u32::MAX as u64
            }
        };
        if !fits {
            return Err(Error::BadTimestamp(format!(
                "{secs} seconds does not fit {}",
                kind.name()
            )));
        }
        let micros = if kind.has_micros() { micros } else { 0 };
        Ok(Self { kind, secs, micros })
    }

    /// Current wall-clock time.
    pub fn now(kind: TimestampKind) -> Self {
        Self::from_system_time(kind, SystemTime::now())
    }

    /// Convert a system time, clamping it into the range `kind` can carry.
    /// Times before 1970 read as the epoch.
    pub fn from_system_time(kind: TimestampKind, time: SystemTime) -> Self {
        let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let micros = if kind.has_micros() {
            since.subsec_micros()
        } else {
            0
        };
        let secs = match kind {
            TimestampKind::Posix32 | TimestampKind::Posix32_32 => since.as_secs().min(u32::MAX as u64),
            TimestampKind::Epoch2000_32 => since
                .as_secs()
                .clamp(EPOCH_2000, EPOCH_2000 + u32::MAX as u64),
            _ => since.as_secs(),
        };
        Self { kind, secs, micros }
    }

    pub fn kind(&self) -> TimestampKind {
        self.kind
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    pub fn micros(&self) -> u32 {
        self.micros
    }

    pub fn encode(&self) -> [u8; TIMESTAMP_LEN] {
        let mut out = [0u8; TIMESTAMP_LEN];
        match self.kind {
            TimestampKind::Posix32 => {
                out[0..4].copy_from_slice(&(self.secs as u32).to_be_bytes());
            }
            TimestampKind::Posix64 => {
                out[0..8].copy_from_slice(&self.secs.to_be_bytes());
            }
            TimestampKind::Posix32_32 => {
                out[0..4].copy_from_slice(&(self.secs as u32).to_be_bytes());
                out[4..8].copy_from_slice(&self.micros.to_be_bytes());
            }
            TimestampKind::Posix64_32 => {
                out[0..8].copy_from_slice(&self.secs.to_be_bytes());
                out[8..12].copy_from_slice(&self.micros.to_be_bytes());
            }
            TimestampKind::Epoch2000_32 => {
                out[0..4].copy_from_slice(&((self.secs - EPOCH_2000) as u32).to_be_bytes());
            }
        }
        out[TIMESTAMP_LEN - 1] = self.kind.code();
        out
    }

    /// Decode the first 16 bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < TIMESTAMP_LEN {
            return Err(Error::FrameTooShort {
                kind: "timestamp",
                need: TIMESTAMP_LEN,
                got: buf.len(),
            });
        }
        let code = buf[TIMESTAMP_LEN - 1];
        let kind = TimestampKind::from_code(code)
            .ok_or_else(|| Error::BadTimestamp(format!("unknown kind code {code}")))?;
        let u32_at = |i: usize| u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let u64_at = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[i..i + 8]);
            u64::from_be_bytes(b)
        };
        let (secs, micros) = match kind {
            TimestampKind::Posix32 => (u32_at(0) as u64, 0),
            TimestampKind::Posix64 => (u64_at(0), 0),
            TimestampKind::Posix32_32 => (u32_at(0) as u64, u32_at(4)),
            TimestampKind::Posix64_32 => (u64_at(0), u32_at(8)),
            TimestampKind::Epoch2000_32 => (u32_at(0) as u64 + EPOCH_2000, 0),
        };
        Self::new(kind, secs, micros)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = i64::try_from(self.secs).unwrap_or(i64::MAX);
        match chrono::DateTime::from_timestamp(secs, self.micros * 1000) {
            Some(dt) => write!(
                f,
                "{} ({})",
                dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                self.kind.name()
            ),
            None => write!(f, "{}s ({})", self.secs, self.kind.name()),
        }
    }
}
