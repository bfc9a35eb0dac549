//
// Copyright (c) 2025 Nathan Fiedler
//

use serde::{Deserialize, Serialize};

///
/// Summary of the processed artifact, as consumed by update clients.
///
/// `size` and `sha512` always describe the file as it exists after
/// packaging, so in append mode they include the block map and its trailer.
///
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFileInfo {
    /// Artifact size in bytes.
    pub size: u64,
    /// Base64 SHA-512 of the artifact.
    pub sha512: String,
    /// Compressed block map size, present only when it was appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_map_size: Option<u64>,
}
