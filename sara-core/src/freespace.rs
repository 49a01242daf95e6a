//! Free-space query for beacon advertisements.

use std::io;
use std::path::Path;

/// Source of "kilobytes available" for a directory.
pub trait FreeSpace: Send + Sync {
    fn kilobytes_available(&self, path: &Path) -> io::Result<u128>;
}

/// Queries the filesystem holding `path` with `statvfs(3)`; counts blocks
/// available to unprivileged users.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsFreeSpace;

#[cfg(unix)]
impl FreeSpace for StatvfsFreeSpace {
    fn kilobytes_available(&self, path: &Path) -> io::Result<u128> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(st.f_bavail as u128 * st.f_frsize as u128 / 1024)
    }
}

#[cfg(not(unix))]
impl FreeSpace for StatvfsFreeSpace {
    fn kilobytes_available(&self, _path: &Path) -> io::Result<u128> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "free space query not available on this platform",
        ))
    }
}

/// Reports a fixed amount regardless of path.
#[derive(Debug, Clone, Copy)]
pub struct FixedFreeSpace(pub u128);

impl FreeSpace for FixedFreeSpace {
    fn kilobytes_available(&self, _path: &Path) -> io::Result<u128> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn statvfs_reports_for_tmp() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StatvfsFreeSpace.kilobytes_available(dir.path()).is_ok());
    }

    #[test]
    fn statvfs_missing_path_fails() {
        assert!(StatvfsFreeSpace
            .kilobytes_available(Path::new("/nonexistent/saratoga/dir"))
            .is_err());
    }
}
