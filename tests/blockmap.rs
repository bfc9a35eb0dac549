//
// Copyright (c) 2025 Nathan Fiedler
//
use std::fs;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use blockmap::digest::ChunkDigest;
use blockmap::package::{decompress, read_appended};
use blockmap::rabin::Chunker;
use blockmap::{
    BlockMap, ChunkerConfiguration, CompressionFormat, Destination, Error, Target,
    build_block_map,
};
use sha2::{Digest, Sha512};

const HELLO_BLOCK_MAP: &str = r#"{"version":"2","files":[{"name":"file","offset":0,"checksums":["gk9YMffcIDK/zN5PKnsMVapv"],"sizes":[13312]}]}"#;
const HELLO_SHA512: &str =
    "sxzkSHe86sbp9mgJVoklRspnOI5em4GlV0/aNmG4GEd6uf55qdP5WZB8ltFc8nEXUw2gfiwAxgoXJtMcaWDSnA==";
// hello world with a deflate block map appended, as produced by flate2 at best compression
const HELLO_DEFLATE_SHA512: &str =
    "GjN56t+EGFuQdq0lYnwZDElUVP18mfP8AR3+NZjgGFrU2cnNzyuNcNw1rW8Fo+stBL8BDwuqvH5qTSGGWLwyGw==";

fn hello() -> Vec<u8> {
    b"hello world. ".repeat(1024)
}

/// Deterministic pseudo-random bytes (xorshift64).
fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

fn sha512_of(path: &Path) -> String {
    STANDARD.encode(Sha512::digest(fs::read(path).unwrap()))
}

#[test]
fn test_append_deflate() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.zip");
    fs::write(&input, hello()).unwrap();

    let info = build_block_map(
        &input,
        ChunkerConfiguration::default(),
        CompressionFormat::Deflate,
        &Destination::Append,
    )
    .unwrap();

    assert_eq!(info.size, 13421);
    assert_eq!(info.block_map_size, Some(105));
    assert_eq!(info.sha512, HELLO_DEFLATE_SHA512);
    let block_map_size: u64 = 105;
    assert_eq!(info.size, 13312 + block_map_size + 4);
    assert_eq!(fs::metadata(&input).unwrap().len(), info.size);
    assert_eq!(info.sha512, sha512_of(&input));

    let artifact = fs::read(&input).unwrap();
    assert_eq!(&artifact[..13312], hello().as_slice());
    let trailer: [u8; 4] = artifact[artifact.len() - 4..].try_into().unwrap();
    assert_eq!(u64::from(u32::from_be_bytes(trailer)), block_map_size);

    let (data_size, block_map) = read_appended(&input).unwrap();
    assert_eq!(data_size, 13312);
    assert_eq!(block_map.to_vec().unwrap(), HELLO_BLOCK_MAP.as_bytes());

    assert_eq!(
        serde_json::to_string(&info).unwrap(),
        format!(r#"{{"size":13421,"sha512":"{HELLO_DEFLATE_SHA512}","blockMapSize":105}}"#)
    );
}

#[test]
fn test_append_gzip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.zip");
    fs::write(&input, hello()).unwrap();

    let info = build_block_map(
        &input,
        ChunkerConfiguration::default(),
        CompressionFormat::Gzip,
        &Destination::Append,
    )
    .unwrap();

    let artifact = fs::read(&input).unwrap();
    assert_eq!(&artifact[13312..13314], &[0x1f_u8, 0x8b]);
    assert_eq!(artifact.len() as u64, info.size);
    let (_, block_map) = read_appended(&input).unwrap();
    assert_eq!(block_map.files[0].sizes, vec![13312]);
}

#[test]
fn test_separate_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.zip");
    let output = dir.path().join("app.zip.blockmap");
    fs::write(&input, hello()).unwrap();

    let info = build_block_map(
        &input,
        ChunkerConfiguration::default(),
        CompressionFormat::Deflate,
        &Destination::Separate(Target::Path(output.clone())),
    )
    .unwrap();

    assert_eq!(info.size, 13312);
    assert_eq!(info.sha512, HELLO_SHA512);
    assert_eq!(info.block_map_size, None);
    assert_eq!(fs::read(&input).unwrap(), hello());
    assert_eq!(
        serde_json::to_string(&info).unwrap(),
        format!(r#"{{"size":13312,"sha512":"{HELLO_SHA512}"}}"#)
    );

    let decoded = decompress(&fs::read(&output).unwrap()).unwrap();
    assert_eq!(decoded, HELLO_BLOCK_MAP.as_bytes());
}

#[test]
fn test_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty.bin");
    fs::write(&input, b"").unwrap();

    let info = build_block_map(
        &input,
        ChunkerConfiguration::default(),
        CompressionFormat::Gzip,
        &Destination::Append,
    )
    .unwrap();

    assert_eq!(info.size, info.block_map_size.unwrap() + 4);
    assert_eq!(info.sha512, sha512_of(&input));
    let (data_size, block_map) = read_appended(&input).unwrap();
    assert_eq!(data_size, 0);
    assert_eq!(
        block_map.to_vec().unwrap(),
        br#"{"version":"2","files":[{"name":"file","offset":0,"checksums":[],"sizes":[]}]}"#
    );
}

#[test]
fn test_round_trip_against_independent_chunking() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("installer.exe");
    let contents = noise(200_000, 0x9E3779B97F4A7C15);
    fs::write(&input, &contents).unwrap();

    let config = ChunkerConfiguration::default();
    build_block_map(&input, config, CompressionFormat::Gzip, &Destination::Append).unwrap();

    let (data_size, block_map) = read_appended(&input).unwrap();
    assert_eq!(data_size, contents.len() as u64);
    let artifact = fs::read(&input).unwrap();
    let prefix = &artifact[..data_size as usize];
    assert_eq!(prefix, contents.as_slice());

    let entry = &block_map.files[0];
    assert_eq!(
        entry.sizes,
        vec![11814, 17153, 11057, 30036, 32768, 11739, 32768, 23134, 29531]
    );
    let chunks: Vec<_> = Chunker::new(prefix, config).unwrap().collect();
    assert_eq!(chunks.len(), entry.sizes.len());
    for (chunk, (checksum, size)) in chunks
        .iter()
        .zip(entry.checksums.iter().zip(entry.sizes.iter()))
    {
        assert_eq!(chunk.length, *size);
        let data = &prefix[chunk.offset..chunk.offset + chunk.length];
        assert_eq!(&ChunkDigest::of(data), checksum);
    }
    assert_eq!(block_map.total_size(), data_size);
}

#[test]
fn test_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let contents = noise(100_000, 42);
    let mut artifacts = Vec::new();
    for name in ["first.bin", "second.bin"] {
        let input = dir.path().join(name);
        fs::write(&input, &contents).unwrap();
        let info = build_block_map(
            &input,
            ChunkerConfiguration::default(),
            CompressionFormat::Deflate,
            &Destination::Append,
        )
        .unwrap();
        artifacts.push((info, fs::read(&input).unwrap()));
    }
    assert_eq!(artifacts[0], artifacts[1]);
}

#[test]
fn test_edit_keeps_leading_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let original = noise(200_000, 0x9E3779B97F4A7C15);
    let mut edited = original[..100_000].to_vec();
    edited.extend_from_slice(b"0123456789");
    edited.extend_from_slice(&original[100_000..]);

    let mut block_maps: Vec<BlockMap> = Vec::new();
    for (name, contents) in [("v1.bin", &original), ("v2.bin", &edited)] {
        let input = dir.path().join(name);
        let output = dir.path().join(format!("{name}.blockmap"));
        fs::write(&input, contents).unwrap();
        build_block_map(
            &input,
            ChunkerConfiguration::default(),
            CompressionFormat::Gzip,
            &Destination::Separate(Target::Path(output.clone())),
        )
        .unwrap();
        let decoded = decompress(&fs::read(&output).unwrap()).unwrap();
        block_maps.push(BlockMap::from_slice(&decoded).unwrap());
    }

    // boundaries ending before the edit cannot move
    let before = &block_maps[0].files[0];
    let after = &block_maps[1].files[0];
    assert_eq!(before.checksums[..4], after.checksums[..4]);
    assert_eq!(before.sizes[..4], after.sizes[..4]);
    assert_eq!(block_maps[1].total_size(), 200_010);
}

#[test]
fn test_invalid_configuration_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.zip");
    fs::write(&input, hello()).unwrap();
    let config = ChunkerConfiguration {
        avg: 10_000,
        ..ChunkerConfiguration::default()
    };
    let result = build_block_map(
        &input,
        config,
        CompressionFormat::Gzip,
        &Destination::Append,
    );
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    assert_eq!(fs::read(&input).unwrap(), hello());
}

#[test]
fn test_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("missing.zip");
    let result = build_block_map(
        &input,
        ChunkerConfiguration::default(),
        CompressionFormat::Gzip,
        &Destination::Append,
    );
    match result {
        Err(Error::Io { op, path, .. }) => {
            assert_eq!(op, "open");
            assert_eq!(path, input);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_unknown_compression_name() {
    let result = "zstd".parse::<CompressionFormat>();
    assert_eq!(
        result.unwrap_err().to_string(),
        "unknown compression format zstd"
    );
}

#[cfg(target_os = "linux")]
#[test]
fn test_size_mismatch_aborts() {
    // procfs files report a length of zero but have content
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("status.blockmap");
    let input = Path::new("/proc/self/status");
    assert_eq!(fs::metadata(input).unwrap().len(), 0);

    let result = build_block_map(
        input,
        ChunkerConfiguration::default(),
        CompressionFormat::Gzip,
        &Destination::Separate(Target::Path(output.clone())),
    );
    match result {
        Err(Error::SizeMismatch { expected, actual }) => {
            assert_eq!(expected, 0);
            assert!(actual > 0);
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(!output.exists());
}
