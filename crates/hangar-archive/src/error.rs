use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown archive format")]
    UnknownFormat,

    #[error("not enough disk space available to complete this operation")]
    DiskSpace,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("archive is corrupted: {0}")]
    Corrupted(#[from] zip::result::ZipError),

    #[error("{archive}: {source}")]
    Entry {
        archive: String,
        source:  Box<Error>,
    },

    #[error("failed to walk archive source: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Filesystem(hangar_fs::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn is_disk_space(&self) -> bool {
        match self {
            Self::DiskSpace => true,
            Self::Entry { source, .. } => source.is_disk_space(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Entry { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    pub fn is_unknown_format(&self) -> bool { matches!(self, Self::UnknownFormat) }

    /// True when a destination resolved outside the filesystem root.
    pub fn is_path_escape(&self) -> bool {
        match self {
            Self::Filesystem(hangar_fs::Error::PathEscape { .. }) => true,
            Self::Entry { source, .. } => source.is_path_escape(),
            _ => false,
        }
    }

    /// Annotate with the archive the failure came from, when there is one.
    pub(crate) fn within(self, archive: Option<&str>) -> Self {
        match archive {
            Some(name) => Self::Entry {
                archive: name.to_owned(),
                source:  Box::new(self),
            },
            None => self,
        }
    }
}

impl From<hangar_fs::Error> for Error {
    fn from(e: hangar_fs::Error) -> Self {
        match e {
            hangar_fs::Error::DiskSpace => Self::DiskSpace,
            other => Self::Filesystem(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
