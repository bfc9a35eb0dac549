//
// Copyright (c) 2025 Nathan Fiedler
//

//! The block map document and its JSON encoding.

use serde::{Deserialize, Serialize};

use crate::digest::ChunkList;
use crate::error::{Error, Result};

/// Version written to, and required of, every block map.
pub const BLOCK_MAP_VERSION: &str = "2";

/// Logical name of the single entry describing the input file.
pub const FILE_ENTRY_NAME: &str = "file";

///
/// Chunk layout of one file within the packaged artifact.
///
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockMapFile {
    pub name: String,
    /// Byte offset of this entry's data within the artifact.
    pub offset: u64,
    /// Base64 chunk digests, in file order.
    pub checksums: Vec<String>,
    /// Chunk lengths, in file order.
    pub sizes: Vec<usize>,
}

///
/// The block map of a single artifact.
///
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockMap {
    pub version: String,
    pub files: Vec<BlockMapFile>,
}

///
/// Wrap the chunk list into a block map with a single entry at offset zero.
///
pub fn assemble(chunks: ChunkList) -> BlockMap {
    BlockMap {
        version: BLOCK_MAP_VERSION.to_owned(),
        files: vec![BlockMapFile {
            name: FILE_ENTRY_NAME.to_owned(),
            offset: 0,
            checksums: chunks.checksums,
            sizes: chunks.sizes,
        }],
    }
}

impl BlockMap {
    /// Compact JSON encoding, fields in declaration order.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a block map, rejecting versions other than
    /// [`BLOCK_MAP_VERSION`] and entries whose lists disagree in length.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let block_map: BlockMap = serde_json::from_slice(data)?;
        if block_map.version != BLOCK_MAP_VERSION {
            return Err(Error::Malformed(format!(
                "unsupported version {:?}",
                block_map.version
            )));
        }
        if let Some(file) = block_map
            .files
            .iter()
            .find(|file| file.checksums.len() != file.sizes.len())
        {
            return Err(Error::Malformed(format!(
                "entry {} has {} checksums for {} sizes",
                file.name,
                file.checksums.len(),
                file.sizes.len()
            )));
        }
        Ok(block_map)
    }

    /// Total number of bytes described by all entries.
    pub fn total_size(&self) -> u64 {
        self.files
            .iter()
            .flat_map(|file| file.sizes.iter())
            .map(|size| *size as u64)
            .sum()
    }
}
