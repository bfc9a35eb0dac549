//
// Copyright (c) 2025 Nathan Fiedler
//

//! This module implements content defined chunking driven by a Rabin
//! fingerprint computed over a sliding window of bytes.
//!
//! The fingerprint of a window is the polynomial formed by its bits, reduced
//! modulo an irreducible polynomial over GF(2). Two tables are precomputed
//! for a given polynomial and window size: one reduces the byte shifted out
//! of the top of the fingerprint, the other removes the byte leaving the
//! window. Together they make each step of the [`RollingHash`] constant time.
//!
//! A chunk boundary is declared at the first position past the minimum chunk
//! size at which the low bits of the fingerprint are all zero, the number of
//! bits being determined by the average chunk size. If no such position
//! exists before the maximum chunk size, the chunk is cut at the maximum.
//! Since the decision depends only on the bytes in the window, an insertion
//! or deletion in one region of a file leaves the boundaries elsewhere
//! untouched, which is what makes the resulting block map useful for
//! differential updates.
//!
//! There are two ways to use the chunker. [`Chunker`] is an [`Iterator`] over
//! an in-memory slice that yields [`Chunk`] values describing the offset and
//! length of each chunk. [`StreamChunker`] reads from a [`Read`] into an
//! internal buffer of `max` bytes and yields [`ChunkData`] values carrying
//! the bytes of each chunk, so that files of any size can be processed
//! without loading them into memory.
//!
//! Both produce identical results for the same input and configuration.
use std::io::Read;

use tracing::trace;

use crate::error::{Error, Result};

#[cfg(any(feature = "tokio", feature = "futures"))]
mod async_stream;
#[cfg(any(feature = "tokio", feature = "futures"))]
pub use async_stream::*;

/// Irreducible polynomial of degree 63 used for the fingerprint.
///
/// Changing this value changes every chunk boundary, so block maps produced
/// with different polynomials cannot be compared with one another.
pub const POLY64: u64 = 0xbfe6b8a5bf378d83;

/// Default size of the rolling hash window in bytes.
pub const DEFAULT_WINDOW: usize = 64;
/// Default target for the average chunk size in bytes.
pub const DEFAULT_AVG: usize = 16 * 1024;
/// Default minimum chunk size in bytes.
pub const DEFAULT_MIN: usize = 8 * 1024;
/// Default maximum chunk size in bytes.
pub const DEFAULT_MAX: usize = 32 * 1024;

///
/// Parameters of the chunk boundary function.
///
/// These values are part of the block map contract: anyone re-chunking a
/// file to compare against a block map must use the same configuration.
///
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ChunkerConfiguration {
    /// Number of bytes covered by the rolling hash.
    pub window: usize,
    /// Desired average chunk size, must be a power of two.
    pub avg: usize,
    /// Smallest chunk size, except for the final chunk.
    pub min: usize,
    /// Largest chunk size.
    pub max: usize,
}

impl Default for ChunkerConfiguration {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            avg: DEFAULT_AVG,
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
        }
    }
}

impl ChunkerConfiguration {
    ///
    /// Check that the parameters describe a usable boundary function.
    ///
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(Error::InvalidConfiguration(
                "window must be greater than zero".into(),
            ));
        }
        if self.window > self.min {
            return Err(Error::InvalidConfiguration(format!(
                "window {} is larger than the minimum chunk size {}",
                self.window, self.min
            )));
        }
        if self.min > self.avg || self.avg > self.max {
            return Err(Error::InvalidConfiguration(format!(
                "expected min <= avg <= max, got {} / {} / {}",
                self.min, self.avg, self.max
            )));
        }
        if !self.avg.is_power_of_two() {
            return Err(Error::InvalidConfiguration(format!(
                "average chunk size {} is not a power of two",
                self.avg
            )));
        }
        Ok(())
    }

    // Fingerprint bits that must be zero at a boundary.
    fn mask(&self) -> u64 {
        (self.avg - 1) as u64
    }
}

// Multiply the polynomial by x, reducing modulo the given polynomial.
fn times_x(value: u64, polynomial: u64, degree: u32) -> u64 {
    let shifted = value << 1;
    if (shifted >> degree) & 1 == 1 {
        shifted ^ polynomial
    } else {
        shifted
    }
}

// Carry-less multiplication of two residues, modulo the given polynomial.
fn mul_mod(mut a: u64, mut b: u64, polynomial: u64, degree: u32) -> u64 {
    let mut product = 0;
    while b != 0 {
        if b & 1 == 1 {
            product ^= a;
        }
        b >>= 1;
        a = times_x(a, polynomial, degree);
    }
    product
}

///
/// Precomputed tables for fingerprinting with a given polynomial and window
/// size.
///
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Table {
    push: Box<[u64; 256]>,
    pop: Box<[u64; 256]>,
    degree: u32,
    shift: u32,
    window: usize,
}

impl Table {
    ///
    /// Build the tables for `polynomial`, which must be irreducible and of
    /// degree 8 or more, and a window of `window` bytes.
    ///
    pub fn new(polynomial: u64, window: usize) -> Self {
        assert!(window > 0);
        assert!(polynomial >= 1 << 8);
        let degree = 63 - polynomial.leading_zeros();
        // x^degree is congruent to the polynomial without its leading term
        let x_degree = polynomial ^ (1 << degree);
        let mut push = Box::new([0_u64; 256]);
        for (top, entry) in push.iter_mut().enumerate() {
            let top = top as u64;
            // the second term clears whatever part of the shifted-out byte
            // survived the shift within 64 bits
            *entry = mul_mod(top, x_degree, polynomial, degree) ^ (top << degree);
        }
        let mut x_window = 1;
        for _ in 0..8 * (window - 1) {
            x_window = times_x(x_window, polynomial, degree);
        }
        let mut pop = Box::new([0_u64; 256]);
        for (byte, entry) in pop.iter_mut().enumerate() {
            *entry = mul_mod(byte as u64, x_window, polynomial, degree);
        }
        Self {
            push,
            pop,
            degree,
            shift: degree - 8,
            window,
        }
    }

    /// Degree of the polynomial these tables were built for.
    pub fn degree(&self) -> u32 {
        self.degree
    }

    /// Size of the window in bytes.
    pub fn window(&self) -> usize {
        self.window
    }
}

///
/// Rabin fingerprint of the most recent `window` bytes written to it.
///
#[derive(Debug, Clone)]
pub struct RollingHash<'t> {
    table: &'t Table,
    window: Vec<u8>,
    position: usize,
    value: u64,
}

impl<'t> RollingHash<'t> {
    pub fn new(table: &'t Table) -> Self {
        Self {
            table,
            window: vec![0_u8; table.window],
            position: 0,
            value: 0,
        }
    }

    /// Slide the window forward by one byte.
    #[inline]
    pub fn roll(&mut self, byte: u8) {
        let outgoing = self.window[self.position];
        self.window[self.position] = byte;
        self.position += 1;
        if self.position == self.window.len() {
            self.position = 0;
        }
        self.value ^= self.table.pop[outgoing as usize];
        let top = (self.value >> self.table.shift) as usize;
        self.value = ((self.value << 8) | u64::from(byte)) ^ self.table.push[top];
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.roll(*byte);
        }
    }

    /// The current fingerprint.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Forget all bytes written so far.
    pub fn reset(&mut self) {
        self.window.fill(0);
        self.position = 0;
        self.value = 0;
    }
}

///
/// Find the length of the chunk at the start of `source`.
///
/// The returned 2-tuple consists of the fingerprint at the cut point and the
/// length of the chunk. When `source` is no longer than the minimum chunk
/// size the entire source is returned as the chunk along with a fingerprint
/// of zero, since no hashing takes place in that case.
///
pub fn cut(source: &[u8], table: &Table, config: &ChunkerConfiguration) -> (u64, usize) {
    debug_assert_eq!(table.window, config.window);
    let remaining = source.len();
    if remaining <= config.min {
        return (0, remaining);
    }
    let limit = remaining.min(config.max);
    let mask = config.mask();
    let mut hash = RollingHash::new(table);
    // positions before the minimum are never boundaries, only the bytes
    // that fill the window ahead of it need to be hashed
    hash.update(&source[config.min - table.window..config.min]);
    let mut index = config.min;
    while index < limit {
        if hash.value() & mask == 0 {
            return (hash.value(), index);
        }
        hash.roll(source[index]);
        index += 1;
    }
    (hash.value(), limit)
}

///
/// Represents a chunk returned from the [`Chunker`] iterator.
///
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Chunk {
    /// The fingerprint as of the end of the chunk.
    pub hash: u64,
    /// Starting byte position within the source.
    pub offset: usize,
    /// Length of the chunk in bytes.
    pub length: usize,
}

///
/// Content defined chunker over an in-memory slice.
///
/// ```
/// use blockmap::rabin::{Chunker, ChunkerConfiguration};
/// let contents = b"hello world. ".repeat(1024);
/// let chunker = Chunker::new(&contents, ChunkerConfiguration::default()).unwrap();
/// for entry in chunker {
///     println!("offset={} size={}", entry.offset, entry.length);
/// }
/// ```
///
#[derive(Debug, Clone)]
pub struct Chunker<'a> {
    source: &'a [u8],
    processed: usize,
    table: Table,
    config: ChunkerConfiguration,
}

impl<'a> Chunker<'a> {
    ///
    /// Construct a [`Chunker`] over the given bytes, using [`POLY64`].
    ///
    pub fn new(source: &'a [u8], config: ChunkerConfiguration) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            processed: 0,
            table: Table::new(POLY64, config.window),
            config,
        })
    }
}

impl Iterator for Chunker<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.processed == self.source.len() {
            return None;
        }
        let (hash, length) = cut(&self.source[self.processed..], &self.table, &self.config);
        let offset = self.processed;
        self.processed += length;
        Some(Chunk {
            hash,
            offset,
            length,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.source.len() - self.processed;
        let upper_bound = remaining.div_ceil(self.config.min);
        (remaining.div_ceil(self.config.max), Some(upper_bound))
    }
}

///
/// Represents a chunk returned from the [`StreamChunker`] iterator.
///
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ChunkData {
    /// The fingerprint as of the end of the chunk.
    pub hash: u64,
    /// Starting byte position within the source.
    pub offset: u64,
    /// Length of the chunk in bytes.
    pub length: usize,
    /// Source bytes contained in this chunk.
    pub data: Vec<u8>,
}

///
/// Content defined chunker reading from a [`Read`].
///
/// Note that this struct allocates a [`Vec<u8>`] of `max` bytes to act as a
/// buffer when reading from the source and finding chunk boundaries; no more
/// than one chunk of data is held at any time.
///
/// ```no_run
/// # use std::fs::File;
/// # use blockmap::rabin::{ChunkerConfiguration, StreamChunker};
/// let source = File::open("app-1.0.0.dmg").unwrap();
/// let chunker = StreamChunker::new(source, ChunkerConfiguration::default()).unwrap();
/// for result in chunker {
///     let chunk = result.unwrap();
///     println!("offset={} length={}", chunk.offset, chunk.length);
/// }
/// ```
///
pub struct StreamChunker<R: Read> {
    /// Buffer of data from source for finding cut points.
    buffer: Vec<u8>,
    /// Maximum capacity of the buffer (always `max`).
    capacity: usize,
    /// Number of relevant bytes in the `buffer`.
    length: usize,
    /// Source from which data is read into `buffer`.
    source: R,
    /// Number of bytes read from the source so far.
    processed: u64,
    /// True when the source produces no more data.
    eof: bool,
    /// True once a read has failed; no further chunks are produced.
    failed: bool,
    table: Table,
    config: ChunkerConfiguration,
}

impl<R: Read> StreamChunker<R> {
    ///
    /// Construct a [`StreamChunker`] that will process bytes from the given
    /// source.
    ///
    pub fn new(source: R, config: ChunkerConfiguration) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buffer: vec![0_u8; config.max],
            capacity: config.max,
            length: 0,
            source,
            processed: 0,
            eof: false,
            failed: false,
            table: Table::new(POLY64, config.window),
            config,
        })
    }

    /// Number of bytes handed out in chunks so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Fill the buffer with data from the source, returning the number of bytes
    /// read (zero if end of source has been reached).
    fn fill_buffer(&mut self) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let mut all_bytes_read = 0;
        while !self.eof && self.length < self.capacity {
            let bytes_read = match self.source.read(&mut self.buffer[self.length..]) {
                Ok(count) => count,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::Read(err)),
            };
            if bytes_read == 0 {
                self.eof = true;
            } else {
                self.length += bytes_read;
                all_bytes_read += bytes_read;
            }
        }
        Ok(all_bytes_read)
    }

    /// Drains a specified number of bytes from the buffer, then resizes the
    /// buffer back to `capacity` size in preparation for further reads.
    fn drain_bytes(&mut self, count: usize) -> Vec<u8> {
        let data = self.buffer.drain(..count).collect::<Vec<u8>>();
        self.length -= count;
        self.buffer.resize(self.capacity, 0_u8);
        data
    }

    /// Find the next chunk in the source, or `None` at the end of the source.
    fn read_chunk(&mut self) -> Result<Option<ChunkData>> {
        self.fill_buffer()?;
        if self.length == 0 {
            return Ok(None);
        }
        let (hash, count) = cut(&self.buffer[..self.length], &self.table, &self.config);
        let offset = self.processed;
        self.processed += count as u64;
        trace!(offset, length = count, "chunk boundary");
        let data = self.drain_bytes(count);
        Ok(Some(ChunkData {
            hash,
            offset,
            length: count,
            data,
        }))
    }
}

impl<R: Read> Iterator for StreamChunker<R> {
    type Item = Result<ChunkData>;

    fn next(&mut self) -> Option<Result<ChunkData>> {
        if self.failed {
            return None;
        }
        let result = self.read_chunk().transpose();
        if let Some(Err(_)) = result {
            self.failed = true;
        }
        result
    }
}
