use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not enough disk space available to complete this operation")]
    DiskSpace,

    #[error("path '{path}' resolves outside of the server root")]
    PathEscape { path: PathBuf },

    #[error("path '{0}' is excluded by an ignore rule")]
    Ignored(PathBuf),

    #[error("path not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid ignore pattern: {0}")]
    Pattern(#[from] ignore::Error),

    #[error("failed to read '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn is_disk_space(&self) -> bool {
        matches!(self, Self::DiskSpace)
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn read_error(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Error {
    let path = path.into();
    move |source| {
        if source.kind() == io::ErrorKind::NotFound {
            Error::NotFound(path)
        } else {
            Error::Read { path, source }
        }
    }
}

pub(crate) fn write_error(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Error {
    let path = path.into();
    move |source| Error::Write { path, source }
}
