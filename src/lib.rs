//
// Copyright (c) 2025 Nathan Fiedler
//

//! This crate produces block maps for installer artifacts so that update
//! clients can download only the parts of a new release that changed since
//! the version they already have.
//!
//! A block map lists the content defined chunks of a file, each identified by
//! a short digest and its length. Because chunk boundaries are chosen by a
//! rolling hash over the file contents rather than at fixed offsets, an edit
//! in one part of a file changes only the chunks around it. A client that
//! computes the block map of its local copy can compare it with the block map
//! of the new release and fetch the differing byte ranges alone.
//!
//! ## Examples
//!
//! Append a gzip compressed block map to an artifact, the usual way of
//! publishing a release:
//!
//! ```no_run
//! use std::path::Path;
//! use blockmap::{build_block_map, ChunkerConfiguration, CompressionFormat, Destination};
//! let info = build_block_map(
//!     Path::new("dist/app-1.2.0.zip"),
//!     ChunkerConfiguration::default(),
//!     CompressionFormat::Gzip,
//!     &Destination::Append,
//! ).unwrap();
//! println!("{}", serde_json::to_string(&info).unwrap());
//! ```
//!
//! The resulting file ends with the compressed block map followed by its
//! length as a four byte big-endian integer, which is how
//! [`package::read_appended`] locates it again.
//!
//! ## Chunking
//!
//! The [`rabin`] module holds the chunkers themselves. They can be used on
//! their own, for instance to re-chunk a local file before comparing it with
//! a downloaded block map:
//!
//! ```no_run
//! use std::fs;
//! use blockmap::rabin::{Chunker, ChunkerConfiguration};
//! let contents = fs::read("app-1.1.0.zip").unwrap();
//! let chunker = Chunker::new(&contents, ChunkerConfiguration::default()).unwrap();
//! for entry in chunker {
//!     println!("offset={} size={}", entry.offset, entry.length);
//! }
//! ```
//!
//! The chunker configuration is part of the block map contract. Block maps
//! made with different configurations will not share chunks.

use std::fs::File;
use std::path::Path;

use tracing::debug;

pub mod digest;
pub mod error;
pub mod info;
pub mod manifest;
pub mod package;
pub mod rabin;

pub use crate::error::{Error, Result};
pub use crate::info::InputFileInfo;
pub use crate::manifest::{BlockMap, BlockMapFile};
pub use crate::package::{CompressionFormat, Destination, Target};
pub use crate::rabin::ChunkerConfiguration;

use crate::digest::{FileDigest, digest_chunks};
use crate::package::TRAILER_LEN;
use crate::rabin::StreamChunker;

///
/// Chunk and digest the file at `input`, then package its block map as
/// directed by `destination`.
///
/// The input is read once, front to back, with memory bounded by the
/// configured maximum chunk size. Nothing is written if chunking fails. In
/// append mode the returned size and digest describe the file as extended
/// with the block map; otherwise they describe the untouched input.
///
pub fn build_block_map(
    input: &Path,
    config: ChunkerConfiguration,
    format: CompressionFormat,
    destination: &Destination,
) -> Result<InputFileInfo> {
    config.validate()?;
    let mut file_digest = FileDigest::new();
    let (original_size, chunks) = {
        let file = File::open(input).map_err(Error::io("open", input))?;
        let original_size = file.metadata().map_err(Error::io("stat", input))?.len();
        let chunker = StreamChunker::new(file, config)?;
        let chunks =
            digest_chunks(chunker, &mut file_digest).map_err(|err| err.with_path("read", input))?;
        (original_size, chunks)
    };
    if chunks.total() != original_size {
        return Err(Error::SizeMismatch {
            expected: original_size,
            actual: chunks.total(),
        });
    }
    debug!(
        path = %input.display(),
        size = original_size,
        chunks = chunks.len(),
        "chunked input"
    );

    let serialized = manifest::assemble(chunks).to_vec()?;
    let block_map_size =
        package::package(&serialized, format, input, destination, &mut file_digest)?;
    let size = match block_map_size {
        Some(archived) => original_size + archived + TRAILER_LEN,
        None => original_size,
    };
    debug_assert_eq!(size, file_digest.len());
    Ok(InputFileInfo {
        size,
        sha512: file_digest.finalize(),
        block_map_size,
    })
}
