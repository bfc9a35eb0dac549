//
// Copyright (c) 2025 Nathan Fiedler
//

//! Chunk and whole-file digests, computed together in a single pass.
//!
//! Every chunk is hashed twice: once into a short [`ChunkDigest`] that is
//! reset after each chunk and identifies the chunk in the block map, and once
//! into the long-lived [`FileDigest`] that covers the entire artifact. The
//! file digest is an ordinary value passed along to the packager, which keeps
//! feeding it whatever bytes it appends to the file.

use std::io::{self, Write};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use blake2::Blake2b;
use blake2::digest::consts::U18;
use sha2::{Digest, Sha512};
use tracing::debug;

use crate::error::Result;
use crate::rabin::ChunkData;

/// BLAKE2b with a 144-bit output.
type Blake2b144 = Blake2b<U18>;

///
/// Short, non-cryptographic-strength identity of one chunk.
///
/// Only used to tell whether a chunk changed between two versions of a
/// file, so 18 bytes are plenty.
///
#[derive(Clone, Default)]
pub struct ChunkDigest {
    hasher: Blake2b144,
}

impl ChunkDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
    }

    /// Returns the base64 digest of everything written since the last call
    /// and starts over.
    pub fn finalize_reset(&mut self) -> String {
        STANDARD.encode(self.hasher.finalize_reset())
    }

    /// Convenience for hashing a single chunk.
    pub fn of(data: &[u8]) -> String {
        let mut digest = Self::new();
        digest.update(data);
        digest.finalize_reset()
    }
}

///
/// SHA-512 accumulator covering the whole artifact.
///
#[derive(Clone, Default)]
pub struct FileDigest {
    hasher: Sha512,
    length: u64,
}

impl FileDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
        self.length += data.len() as u64;
    }

    /// Number of bytes folded in so far.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Consumes the accumulator and returns the base64 encoded digest.
    pub fn finalize(self) -> String {
        STANDARD.encode(self.hasher.finalize())
    }
}

impl Write for FileDigest {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

///
/// Pass-through writer that folds every byte accepted by the inner writer
/// into a [`FileDigest`].
///
pub struct DigestWriter<'a, W: Write> {
    writer: W,
    digest: &'a mut FileDigest,
}

impl<'a, W: Write> DigestWriter<'a, W> {
    pub fn new(writer: W, digest: &'a mut FileDigest) -> Self {
        Self { writer, digest }
    }

    /// Returns the inner writer, releasing the digest.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Write for DigestWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

///
/// Ordered chunk digests and sizes, in file order.
///
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ChunkList {
    pub checksums: Vec<String>,
    pub sizes: Vec<usize>,
}

impl ChunkList {
    pub fn push(&mut self, checksum: String, size: usize) {
        self.checksums.push(checksum);
        self.sizes.push(size);
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Sum of all chunk sizes.
    pub fn total(&self) -> u64 {
        self.sizes.iter().map(|size| *size as u64).sum()
    }
}

///
/// Digest every chunk produced by `chunks`, folding the same bytes into
/// `file_digest`.
///
/// Chunks are consumed one at a time and dropped once hashed, so memory use
/// is bounded by the chunker's buffer. The first error ends the pass.
///
pub fn digest_chunks<I>(chunks: I, file_digest: &mut FileDigest) -> Result<ChunkList>
where
    I: IntoIterator<Item = Result<ChunkData>>,
{
    let mut chunk_digest = ChunkDigest::new();
    let mut list = ChunkList::default();
    for chunk in chunks {
        let chunk = chunk?;
        chunk_digest.update(&chunk.data);
        file_digest.update(&chunk.data);
        list.push(chunk_digest.finalize_reset(), chunk.length);
    }
    debug!(chunks = list.len(), bytes = list.total(), "digested chunks");
    Ok(list)
}
