use std::io::{self, Read};

/// Single-stream compression codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Xz,
    Zstd,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Gzip => ".gz",
            Self::Xz => ".xz",
            Self::Zstd => ".zst",
        }
    }

    pub(crate) fn from_magic(header: &[u8]) -> Option<Self> {
        match header {
            [0x1F, 0x8B, ..] => Some(Self::Gzip),
            [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, ..] => Some(Self::Xz),
            [0x28, 0xB5, 0x2F, 0xFD, ..] => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Wrap `reader` in a decoder for this codec.
    pub fn decoder<'a, R: Read + 'a>(self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        match self {
            Self::Gzip => Ok(Box::new(flate2::read::MultiGzDecoder::new(reader))),
            #[cfg(feature = "xz")]
            Self::Xz => Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(reader))),
            #[cfg(not(feature = "xz"))]
            Self::Xz => Err(unsupported(self)),
            #[cfg(feature = "zstd")]
            Self::Zstd => Ok(Box::new(zstd::stream::read::Decoder::new(reader)?)),
            #[cfg(not(feature = "zstd"))]
            Self::Zstd => Err(unsupported(self)),
        }
    }
}

#[cfg(any(not(feature = "xz"), not(feature = "zstd")))]
fn unsupported(codec: Compression) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{codec:?} support is not compiled in"),
    )
}

/// Container holding many named entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Container {
    /// Indexed container read through its central directory.
    Zip,
    Tar(Option<Compression>),
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => ".zip",
            Self::Tar(None) => ".tar",
            Self::Tar(Some(Compression::Gzip)) => ".tar.gz",
            Self::Tar(Some(Compression::Xz)) => ".tar.xz",
            Self::Tar(Some(Compression::Zstd)) => ".tar.zst",
        }
    }
}

/// What a byte stream turned out to be.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Unrecognized,
    MultiEntry(Container),
    SingleStream(Compression),
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Unrecognized => "",
            Self::MultiEntry(container) => container.extension(),
            Self::SingleStream(codec) => codec.extension(),
        }
    }

    pub fn is_recognized(self) -> bool { self != Self::Unrecognized }

    /// Best guess from a file name alone.
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let tar = |codec| Self::MultiEntry(Container::Tar(codec));

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            tar(Some(Compression::Gzip))
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            tar(Some(Compression::Xz))
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            tar(Some(Compression::Zstd))
        } else if name.ends_with(".tar") {
            tar(None)
        } else if name.ends_with(".zip") {
            Self::MultiEntry(Container::Zip)
        } else if name.ends_with(".gz") {
            Self::SingleStream(Compression::Gzip)
        } else if name.ends_with(".xz") {
            Self::SingleStream(Compression::Xz)
        } else if name.ends_with(".zst") {
            Self::SingleStream(Compression::Zstd)
        } else {
            Self::Unrecognized
        }
    }
}
