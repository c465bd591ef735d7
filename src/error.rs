use std::path::PathBuf;

use crate::hash::ObjectId;

/// error taxonomy for the content engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("pack format error: {0}")]
    PackFormat(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("not empty: {0}")]
    NotEmpty(PathBuf),

    #[error("not a directory: {0}")]
    NotDir(PathBuf),

    #[error("is a directory: {0}")]
    IsDir(PathBuf),

    #[error("name too long: {0}")]
    NameTooLong(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ref name: {0}")]
    InvalidRef(String),

    #[error("corrupt object {0}")]
    CorruptObject(ObjectId),

    #[error("path-map journal corrupt: {0}")]
    JournalCorrupt(String),

    #[error("operation not permitted: {0}")]
    PermissionDenied(String),

    #[error("cross-device link: {0}")]
    CrossDevice(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// attaches a path to a bare [`std::io::Error`]
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}

impl Error {
    /// maps every variant onto the errno the `unionfs::Filesystem` boundary returns
    pub fn to_errno(&self) -> nix::errno::Errno {
        use nix::errno::Errno;
        match self {
            Error::NotFound(_) => Errno::ENOENT,
            Error::Unauthorized(_) => Errno::EACCES,
            Error::Transport(_) => Errno::EIO,
            Error::PackFormat(_) => Errno::EIO,
            Error::Conflict(_) => Errno::EPERM,
            Error::Exists(_) => Errno::EEXIST,
            Error::NotEmpty(_) => Errno::ENOTEMPTY,
            Error::NotDir(_) => Errno::ENOTDIR,
            Error::IsDir(_) => Errno::EISDIR,
            Error::NameTooLong(_) => Errno::ENAMETOOLONG,
            Error::Io { source, .. } => Errno::from_raw(source.raw_os_error().unwrap_or(libc_eio())),
            Error::InvalidRef(_) => Errno::EINVAL,
            Error::CorruptObject(_) => Errno::EIO,
            Error::JournalCorrupt(_) => Errno::EIO,
            Error::PermissionDenied(_) => Errno::EPERM,
            Error::CrossDevice(_) => Errno::EXDEV,
        }
    }
}

fn libc_eio() -> i32 {
    nix::errno::Errno::EIO as i32
}
