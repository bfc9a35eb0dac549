//
// Copyright (c) 2025 Nathan Fiedler
//

//! Compression of the serialized block map and its placement, either at the
//! end of the input file or in a separate destination.
//!
//! An appended artifact is laid out as
//!
//! ```text
//! [original bytes][compressed block map][u32 big-endian length of the block map]
//! ```
//!
//! so a reader that knows the artifact size can locate the block map from the
//! last four bytes alone, see [`read_embedded`].

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::Compression;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use tracing::debug;

use crate::digest::{DigestWriter, FileDigest};
use crate::error::{Error, Result};
use crate::manifest::BlockMap;

/// Size of the length trailer of an appended block map.
pub const TRAILER_LEN: u64 = 4;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

///
/// Compressor applied to the serialized block map.
///
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub enum CompressionFormat {
    /// gzip member with a default header.
    #[default]
    Gzip,
    /// Raw deflate stream, without zlib framing.
    Deflate,
}

impl FromStr for CompressionFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("gzip") {
            Ok(CompressionFormat::Gzip)
        } else if value.eq_ignore_ascii_case("deflate") {
            Ok(CompressionFormat::Deflate)
        } else {
            Err(Error::UnknownCompression(value.to_owned()))
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionFormat::Gzip => f.write_str("gzip"),
            CompressionFormat::Deflate => f.write_str("deflate"),
        }
    }
}

///
/// Where a separately packaged block map is written.
///
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Target {
    Path(PathBuf),
    Stdout,
}

///
/// Packaging strategy for the block map.
///
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub enum Destination {
    /// Append to the input file, followed by the length trailer.
    #[default]
    Append,
    /// Write to an independent target, leaving the input file alone.
    Separate(Target),
}

fn compress_into<W: Write>(data: &[u8], format: CompressionFormat, writer: W) -> io::Result<W> {
    match format {
        CompressionFormat::Gzip => {
            let mut encoder = GzEncoder::new(writer, Compression::best());
            encoder.write_all(data)?;
            encoder.finish()
        }
        CompressionFormat::Deflate => {
            let mut encoder = DeflateEncoder::new(writer, Compression::best());
            encoder.write_all(data)?;
            encoder.finish()
        }
    }
}

///
/// Compress `data` at maximum effort.
///
pub fn compress(data: &[u8], format: CompressionFormat) -> Result<Vec<u8>> {
    Ok(compress_into(data, format, Vec::new())?)
}

///
/// Decompress a block map produced by [`compress`], detecting gzip by its
/// magic bytes and treating anything else as raw deflate.
///
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    let result = if data.starts_with(&GZIP_MAGIC) {
        GzDecoder::new(data).read_to_end(&mut decoded)
    } else {
        DeflateDecoder::new(data).read_to_end(&mut decoded)
    };
    result.map_err(|err| Error::Malformed(format!("cannot decompress block map: {err}")))?;
    Ok(decoded)
}

///
/// Compress the serialized block map and place it according to
/// `destination`.
///
/// In append mode every byte added to `input` is also folded into
/// `file_digest`, and the compressed length is returned. In separate mode
/// the digest is not touched and `None` is returned.
///
pub fn package(
    serialized: &[u8],
    format: CompressionFormat,
    input: &Path,
    destination: &Destination,
    file_digest: &mut FileDigest,
) -> Result<Option<u64>> {
    match destination {
        Destination::Append => append(serialized, format, input, file_digest).map(Some),
        Destination::Separate(target) => {
            write_separate(serialized, format, target)?;
            Ok(None)
        }
    }
}

fn append(
    serialized: &[u8],
    format: CompressionFormat,
    path: &Path,
    file_digest: &mut FileDigest,
) -> Result<u64> {
    let archive = compress(serialized, format)?;
    let archive_size = u32::try_from(archive.len()).map_err(|_| {
        Error::Malformed(format!(
            "compressed block map of {} bytes does not fit the trailer",
            archive.len()
        ))
    })?;
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(Error::io("open", path))?;
    let mut writer = DigestWriter::new(file, file_digest);
    writer
        .write_all(&archive)
        .map_err(Error::io("append to", path))?;
    writer
        .write_all(&archive_size.to_be_bytes())
        .map_err(Error::io("append to", path))?;
    writer.flush().map_err(Error::io("append to", path))?;
    writer.into_inner().sync_all().map_err(Error::io("sync", path))?;
    debug!(%format, compressed = archive_size, path = %path.display(), "appended block map");
    Ok(u64::from(archive_size))
}

fn write_separate(serialized: &[u8], format: CompressionFormat, target: &Target) -> Result<()> {
    match target {
        Target::Stdout => {
            let stdout = Path::new("<stdout>");
            let mut lock = compress_into(serialized, format, io::stdout().lock())
                .map_err(Error::io("write", stdout))?;
            lock.flush().map_err(Error::io("write", stdout))?;
        }
        Target::Path(path) => {
            let file = File::create(path).map_err(Error::io("create", path))?;
            let file =
                compress_into(serialized, format, file).map_err(Error::io("write", path))?;
            file.sync_all().map_err(Error::io("sync", path))?;
        }
    }
    debug!(%format, ?target, "wrote block map");
    Ok(())
}

///
/// Compressed block map found at the end of an appended artifact.
///
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Embedded {
    /// Length of the original content preceding the block map.
    pub data_size: u64,
    /// The block map, still compressed.
    pub compressed: Vec<u8>,
}

///
/// Locate and read the compressed block map at the end of `reader`.
///
pub fn read_embedded<R: Read + Seek>(reader: &mut R) -> Result<Embedded> {
    let total = reader.seek(SeekFrom::End(0))?;
    if total < TRAILER_LEN {
        return Err(Error::Malformed(format!(
            "{total} bytes is too short for a block map trailer"
        )));
    }
    reader.seek(SeekFrom::Start(total - TRAILER_LEN))?;
    let mut trailer = [0_u8; TRAILER_LEN as usize];
    reader.read_exact(&mut trailer)?;
    let length = u64::from(u32::from_be_bytes(trailer));
    if length + TRAILER_LEN > total {
        return Err(Error::Malformed(format!(
            "trailer claims {length} bytes but only {} precede it",
            total - TRAILER_LEN
        )));
    }
    let data_size = total - TRAILER_LEN - length;
    reader.seek(SeekFrom::Start(data_size))?;
    let mut compressed = vec![0_u8; length as usize];
    reader.read_exact(&mut compressed)?;
    Ok(Embedded {
        data_size,
        compressed,
    })
}

///
/// Read, decompress, and parse the block map appended to the file at `path`.
///
pub fn read_appended(path: &Path) -> Result<(u64, BlockMap)> {
    let mut file = File::open(path).map_err(Error::io("open", path))?;
    let embedded = read_embedded(&mut file).map_err(|err| err.with_path("read", path))?;
    let block_map = BlockMap::from_slice(&decompress(&embedded.compressed)?)?;
    Ok((embedded.data_size, block_map))
}
