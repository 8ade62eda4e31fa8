use std::io::{self, Cursor, Read, Seek};

use crate::format::{Compression, Container, Format};

/// Bytes read from the front of a stream for detection.
pub const DEFAULT_WINDOW: usize = 8 * 1024;

const TAR_BLOCK: usize = 512;
const CKSUM_FIELD: std::ops::Range<usize> = 148..156;

/// A non-seekable stream after detection, with the sniffed bytes put back in
/// front of the remaining input.
pub struct Sniffed<R> {
    pub format: Format,
    pub reader: io::Chain<Cursor<Vec<u8>>, R>,
}

/// Detect the format of a seekable source and rewind it to the start.
pub fn identify_seekable<R: Read + Seek>(name: &str, reader: &mut R, window: usize) -> io::Result<Format> {
    reader.rewind()?;
    let header = read_window(reader, window)?;
    reader.rewind()?;
    Ok(detect(&header, name))
}

/// Detect the format of a one-shot stream without losing any of its bytes.
pub fn identify_stream<R: Read>(name: &str, mut reader: R, window: usize) -> io::Result<Sniffed<R>> {
    let header = read_window(&mut reader, window)?;
    let format = detect(&header, name);
    Ok(Sniffed {
        format,
        reader: Cursor::new(header).chain(reader),
    })
}

/// Classify from leading bytes, falling back to the name when the content
/// says nothing.
pub fn detect(header: &[u8], name: &str) -> Format {
    match header {
        [0x50, 0x4B, 0x03, 0x04, ..] | [0x50, 0x4B, 0x05, 0x06, ..] => {
            Format::MultiEntry(Container::Zip)
        }
        _ => {
            if let Some(codec) = Compression::from_magic(header) {
                classify_compressed(codec, header, name)
            } else if is_tar_header(header) {
                Format::MultiEntry(Container::Tar(None))
            } else {
                Format::from_name(name)
            }
        }
    }
}

fn classify_compressed(codec: Compression, header: &[u8], name: &str) -> Format {
    let tar = Format::MultiEntry(Container::Tar(Some(codec)));
    match peek_decoded(codec, header) {
        Peek::Decoded(bytes) if is_tar_header(&bytes) => tar,
        Peek::Decoded(_) => Format::SingleStream(codec),
        Peek::Inconclusive => match Format::from_name(name) {
            Format::MultiEntry(Container::Tar(_)) => tar,
            _ => Format::SingleStream(codec),
        },
    }
}

enum Peek {
    /// Either a full tar block or the entire payload.
    Decoded(Vec<u8>),
    Inconclusive,
}

fn peek_decoded(codec: Compression, header: &[u8]) -> Peek {
    let Ok(decoder) = codec.decoder(header) else {
        return Peek::Inconclusive;
    };
    let mut decoded = Vec::with_capacity(TAR_BLOCK);
    match decoder.take(TAR_BLOCK as u64).read_to_end(&mut decoded) {
        Ok(_) => Peek::Decoded(decoded),
        Err(_) => Peek::Inconclusive,
    }
}

/// A tar header is recognised by its checksum, so pre-POSIX archives without
/// the `ustar` magic are accepted too.
fn is_tar_header(block: &[u8]) -> bool {
    let Some(block) = block.get(..TAR_BLOCK) else {
        return false;
    };
    let header = tar::Header::from_byte_slice(block);
    if header.path_bytes().is_empty() {
        return false;
    }
    match header.cksum() {
        Ok(recorded) => recorded == header_checksum(block),
        Err(_) => false,
    }
}

/// Unsigned byte sum with the checksum field itself counted as spaces.
fn header_checksum(block: &[u8]) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, b)| if CKSUM_FIELD.contains(&i) { u32::from(b' ') } else { u32::from(*b) })
        .sum()
}

fn read_window<R: Read>(reader: &mut R, window: usize) -> io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(window);
    Read::take(reader, window as u64).read_to_end(&mut header)?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tar_bytes() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "hello.txt", &b"hello"[..]).unwrap();
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn detect_zip_header() {
        let header = [0x50, 0x4B, 0x03, 0x04, 0x14, 0x00, 0x00, 0x00];
        assert_eq!(detect(&header, "upload"), Format::MultiEntry(Container::Zip));
    }

    #[test]
    fn detect_empty_zip_header() {
        let header = [0x50, 0x4B, 0x05, 0x06, 0x00, 0x00];
        assert_eq!(detect(&header, "upload"), Format::MultiEntry(Container::Zip));
    }

    #[test]
    fn detect_plain_tar() {
        assert_eq!(detect(&tar_bytes(), "upload"), Format::MultiEntry(Container::Tar(None)));
    }

    #[test]
    fn detect_pre_posix_tar() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_old();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "hello.txt", &b"hello"[..]).unwrap();
        let data = builder.into_inner().unwrap();

        assert_ne!(&data[257..262], b"ustar");
        assert_eq!(detect(&data, "upload"), Format::MultiEntry(Container::Tar(None)));
        assert_eq!(
            detect(&gzip(&data), "backup.tar.gz"),
            Format::MultiEntry(Container::Tar(Some(Compression::Gzip)))
        );
    }

    #[test]
    fn corrupted_checksum_is_not_tar() {
        let mut data = tar_bytes();
        data[0] ^= 0x01;
        assert_eq!(detect(&data, "upload"), Format::Unrecognized);
    }

    #[test]
    fn zero_block_is_not_tar() {
        assert_eq!(detect(&[0u8; 1024], "upload"), Format::Unrecognized);
    }

    #[test]
    fn detect_tar_gz_from_content() {
        let data = gzip(&tar_bytes());
        assert_eq!(
            detect(&data, "misleading.gz"),
            Format::MultiEntry(Container::Tar(Some(Compression::Gzip)))
        );
    }

    #[test]
    fn detect_single_gzip_from_content() {
        let data = gzip(b"[12:00:00] [Server thread/INFO]: Done");
        assert_eq!(
            detect(&data, "archive.tar.gz"),
            Format::SingleStream(Compression::Gzip)
        );
    }

    #[test]
    fn content_wins_over_name() {
        assert_eq!(detect(&tar_bytes(), "photo.zip"), Format::MultiEntry(Container::Tar(None)));
    }

    #[test]
    fn undecodable_payload_falls_back_to_name() {
        // Valid gzip member header followed by a reserved deflate block type.
        let mut data = vec![0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF];
        data.extend_from_slice(&[0xFF; 16]);

        assert_eq!(
            detect(&data, "world.tgz"),
            Format::MultiEntry(Container::Tar(Some(Compression::Gzip)))
        );
        assert_eq!(detect(&data, "world.bin"), Format::SingleStream(Compression::Gzip));
    }

    #[test]
    fn name_only_match() {
        assert_eq!(detect(b"", "backup.tar.xz"), Format::MultiEntry(Container::Tar(Some(Compression::Xz))));
    }

    #[test]
    fn unknown_content_and_name() {
        assert_eq!(detect(b"motd=A Minecraft Server", "server.properties"), Format::Unrecognized);
    }

    #[test]
    fn short_tar_like_header_is_not_tar() {
        let data = [0u8; 256];
        assert_eq!(detect(&data, "upload"), Format::Unrecognized);
    }

    #[test]
    fn seekable_source_is_rewound() {
        let data = tar_bytes();
        let mut cursor = Cursor::new(data.clone());
        cursor.set_position(100);

        let format = identify_seekable("upload", &mut cursor, DEFAULT_WINDOW).unwrap();
        assert_eq!(format, Format::MultiEntry(Container::Tar(None)));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn stream_bytes_are_not_lost() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let sniffed = identify_stream("blob.bin", &data[..], 4096).unwrap();
        assert_eq!(sniffed.format, Format::Unrecognized);

        let mut replayed = Vec::new();
        let mut reader = sniffed.reader;
        reader.read_to_end(&mut replayed).unwrap();
        assert_eq!(replayed, data);
    }

    #[test]
    fn stream_shorter_than_window() {
        let data = gzip(b"short");
        let sniffed = identify_stream("note.txt.gz", &data[..], DEFAULT_WINDOW).unwrap();
        assert_eq!(sniffed.format, Format::SingleStream(Compression::Gzip));

        let mut replayed = Vec::new();
        let mut reader = sniffed.reader;
        reader.read_to_end(&mut replayed).unwrap();
        assert_eq!(replayed, data);
    }
}
