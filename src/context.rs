//! Retrieval of per-application context tokens.
//!
//! A trusted component deposits one file per application under
//! [`CONTEXT_DIR`], named `snap.<app>`. [`lookup`] reads that file with a
//! single bounded read into a fixed-size, NUL-terminated buffer. Failing to
//! open or read the file is an expected outcome and is reported as a
//! [`LookupError`]; an oversized path or a failed allocation terminates the
//! process instead.

use std::ffi::{CStr, OsStr};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zeroize::Zeroizing;

pub const CONTEXT_DIR: &str = "/var/lib/snapd/context";

pub const CONTEXT_FILE_PREFIX: &str = "snap.";

/// 31 bytes of secret material, base64-encoded to 44 characters, plus NUL.
pub const TOKEN_CAPACITY: usize = 45;

pub const TOKEN_MAX_LEN: usize = TOKEN_CAPACITY - 1;

// Terminating NUL included.
pub const PATH_MAX: usize = libc::PATH_MAX as usize;

/// The token is never decoded. It ends at the first NUL byte, so the bytes
/// exposed here are exactly what a C consumer of the environment would see.
pub struct ContextToken {
    path: PathBuf,
    buf: Zeroizing<Vec<u8>>,
    len: usize,
}

impl ContextToken {
    fn from_buffer(path: PathBuf, buf: Zeroizing<Vec<u8>>) -> Self {
        debug_assert_eq!(buf.len(), TOKEN_CAPACITY);
        debug_assert_eq!(buf[TOKEN_MAX_LEN], 0);
        let len = buf.iter().position(|b| *b == 0).unwrap_or(TOKEN_MAX_LEN);
        Self { path, buf, len }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_c_str(&self) -> &CStr {
        // The last byte of the buffer is never written, so a NUL always exists.
        CStr::from_bytes_until_nul(&self.buf).unwrap_or_default()
    }

    pub fn as_os_str(&self) -> &OsStr {
        OsStr::from_bytes(self.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for ContextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextToken(<{} bytes redacted>)", self.len)
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("cannot open context file {}, SNAP_CONTEXT will not be set: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read context file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LookupError {
    pub fn path(&self) -> &Path {
        match self {
            LookupError::Open { path, .. } | LookupError::Read { path, .. } => path,
        }
    }

    pub fn io_error(&self) -> &io::Error {
        match self {
            LookupError::Open { source, .. } | LookupError::Read { source, .. } => source,
        }
    }

    pub fn raw_os_error(&self) -> Option<i32> {
        self.io_error().raw_os_error()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::Open { .. })
            && self.io_error().kind() == io::ErrorKind::NotFound
    }

    /// True when the final path component was a symlink and `O_NOFOLLOW`
    /// refused it.
    pub fn is_symlink(&self) -> bool {
        matches!(self, LookupError::Open { .. }) && self.raw_os_error() == Some(libc::ELOOP)
    }
}

#[derive(Debug, Error)]
#[error("context path for application of {app_len} bytes is too long ({len} bytes, limit {max})")]
pub struct PathTooLong {
    pub app_len: usize,
    pub len: usize,
    pub max: usize,
}

/// Builds `<dir>/snap.<app_id>`, rejecting anything that would not fit in a
/// `PATH_MAX` buffer together with its terminating NUL.
pub fn context_path(dir: &Path, app_id: &str) -> Result<PathBuf, PathTooLong> {
    let dir = dir.as_os_str().as_bytes();
    let mut raw = Vec::with_capacity(dir.len() + 1 + CONTEXT_FILE_PREFIX.len() + app_id.len());
    raw.extend_from_slice(dir);
    raw.push(b'/');
    raw.extend_from_slice(CONTEXT_FILE_PREFIX.as_bytes());
    raw.extend_from_slice(app_id.as_bytes());
    if raw.len() >= PATH_MAX {
        return Err(PathTooLong {
            app_len: app_id.len(),
            len: raw.len(),
            max: PATH_MAX - 1,
        });
    }
    Ok(PathBuf::from(OsStr::from_bytes(&raw)))
}

pub fn lookup(app_id: &str) -> Result<ContextToken, LookupError> {
    lookup_in(Path::new(CONTEXT_DIR), app_id)
}

/// A short or empty file yields a correspondingly short token; a file longer
/// than [`TOKEN_MAX_LEN`] is truncated. The descriptor is closed before this
/// returns on every path.
pub fn lookup_in(dir: &Path, app_id: &str) -> Result<ContextToken, LookupError> {
    let path = match context_path(dir, app_id) {
        Ok(path) => path,
        Err(err) => die(format_args!("{err}")),
    };

    let mut file = match open_nofollow(&path) {
        Ok(file) => file,
        Err(source) => return Err(LookupError::Open { path, source }),
    };

    let mut buf = alloc_token_buffer();
    // One read only; a short read is accepted as the whole token.
    if let Err(source) = file.read(&mut buf[..TOKEN_MAX_LEN]) {
        return Err(LookupError::Read { path, source });
    }
    Ok(ContextToken::from_buffer(path, buf))
}

fn open_nofollow(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
        .open(path)
}

fn alloc_token_buffer() -> Zeroizing<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();
    if buf.try_reserve_exact(TOKEN_CAPACITY).is_err() {
        die(format_args!("failed to allocate memory for snap context"));
    }
    buf.resize(TOKEN_CAPACITY, 0);
    Zeroizing::new(buf)
}

fn die(message: fmt::Arguments<'_>) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}
