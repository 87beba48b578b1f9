use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Compression {
    None,
    Gzip,
    Zstd,
}

pub(crate) fn detect_compression(bytes: &[u8]) -> Compression {
    if bytes.starts_with(&GZIP_MAGIC) {
        Compression::Gzip
    } else if bytes.starts_with(&ZSTD_MAGIC) {
        Compression::Zstd
    } else {
        Compression::None
    }
}

pub(crate) fn read_tar_file<P: AsRef<Path>>(
    archive_path: P,
) -> io::Result<Archive<BufReader<File>>> {
    let file = File::open(archive_path)?;
    Ok(Archive::new(BufReader::new(file)))
}

/// Open an in-memory layer blob, decompressing gzip or zstd when detected.
pub(crate) fn read_layer_bytes(bytes: &[u8]) -> io::Result<Archive<Box<dyn Read + '_>>> {
    let reader: Box<dyn Read + '_> = match detect_compression(bytes) {
        Compression::None => Box::new(Cursor::new(bytes)),
        Compression::Gzip => Box::new(GzDecoder::new(bytes)),
        Compression::Zstd => Box::new(zstd::Decoder::new(bytes)?),
    };
    Ok(Archive::new(reader))
}
