//! Content Diffing Engine
//!
//! Block-matching signature/delta/patch in the rsync mould:
//!
//! 1. The receiver computes a [`Signature`] of the content it already has.
//! 2. The sender computes a [`Delta`] of its content against that signature:
//!    copies of receiver blocks it can reuse, literal bytes for the rest.
//! 3. The receiver patches, verifying the result against the checksum the
//!    sender embedded in the delta.
//!
//! A delta is always correct for the sender's content even when the signature
//! is stale; a stale *basis* on the receiving side is caught by the checksum
//! check and reported as a patch failure, leaving the target untouched.

pub mod file;
mod rolling;

pub use file::{delta_file, patch_file, signature_file};
pub use rolling::RollingChecksum;

use crate::types::{Checksum, Millis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use thiserror::Error;

/// Default block size for signatures.
pub const DEFAULT_BLOCK_SIZE: usize = 2048;
/// Largest block size a peer may ask a patch to buffer.
pub const MAX_BLOCK_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    pub weak: u32,
    pub strong: Checksum,
}

/// Fingerprint of a basis file, block by block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub block_size: u32,
    pub basis_len: u64,
    pub blocks: Vec<BlockSignature>,
}

impl Signature {
    /// Signature of an absent or empty basis: every delta against it is literal.
    pub fn empty(block_size: usize) -> Self {
        Self {
            block_size: block_size as u32,
            basis_len: 0,
            blocks: Vec::new(),
        }
    }

    /// Length of block `index`; the final block may be short.
    pub fn block_len(&self, index: usize) -> usize {
        block_len(self.block_size, self.basis_len, index)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

fn block_len(block_size: u32, basis_len: u64, index: usize) -> usize {
    let offset = index as u64 * block_size as u64;
    basis_len.saturating_sub(offset).min(block_size as u64) as usize
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOp {
    /// Reuse basis block `index`.
    Copy { index: u32 },
    Literal(Vec<u8>),
}

/// Transform from the signature's basis to the sender's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub block_size: u32,
    pub ops: Vec<DeltaOp>,
    /// Checksum and size of the content the patch must produce.
    pub checksum: Checksum,
    pub size: u64,
    pub executable: bool,
    /// Sender's mtime for the content, when it came from a file.
    pub modified_at: Option<Millis>,
}

impl Delta {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Bytes shipped verbatim rather than copied from the basis.
    pub fn literal_len(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                DeltaOp::Literal(bytes) => bytes.len(),
                DeltaOp::Copy { .. } => 0,
            })
            .sum()
    }

    pub fn copied_blocks(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, DeltaOp::Copy { .. }))
            .count()
    }
}

/// Why a delta could not be applied to a basis.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchMismatch {
    #[error("copy of block {index} is outside a {basis_len}-byte basis")]
    CopyOutOfRange { index: u32, basis_len: u64 },
    #[error("produced {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("checksum mismatch: expected {expected}, produced {actual}")]
    ChecksumMismatch { expected: Checksum, actual: Checksum },
}

/// Signature and delta computation with a fixed block size.
#[derive(Debug, Clone, Copy)]
pub struct DeltaEngine {
    block_size: usize,
}

impl Default for DeltaEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl DeltaEngine {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn signature(&self, data: &[u8]) -> Signature {
        let blocks = data
            .chunks(self.block_size)
            .map(|chunk| BlockSignature {
                weak: RollingChecksum::new(chunk).value(),
                strong: Checksum::from_bytes(chunk),
            })
            .collect();
        Signature {
            block_size: self.block_size as u32,
            basis_len: data.len() as u64,
            blocks,
        }
    }

    /// Signature of a stream, holding one block in memory at a time.
    pub fn signature_from_reader<R: Read>(&self, mut reader: R) -> std::io::Result<Signature> {
        let mut signature = Signature::empty(self.block_size);
        let mut buffer = vec![0u8; self.block_size];
        loop {
            let filled = read_block(&mut reader, &mut buffer)?;
            if filled == 0 {
                break;
            }
            let chunk = &buffer[..filled];
            signature.blocks.push(BlockSignature {
                weak: RollingChecksum::new(chunk).value(),
                strong: Checksum::from_bytes(chunk),
            });
            signature.basis_len += filled as u64;
            if filled < self.block_size {
                break;
            }
        }
        Ok(signature)
    }

    /// Encode `data` against `basis`. The basis signature defines the block size.
    pub fn delta(&self, data: &[u8], basis: &Signature) -> Delta {
        let bs = basis.block_size as usize;
        let mut ops = Vec::new();
        let mut literal_start = 0;

        if bs > 0 && !basis.blocks.is_empty() {
            let mut lookup: HashMap<u32, Vec<(u32, &Checksum)>> = HashMap::new();
            for (index, block) in basis.blocks.iter().enumerate() {
                if basis.block_len(index) == bs {
                    lookup
                        .entry(block.weak)
                        .or_default()
                        .push((index as u32, &block.strong));
                }
            }

            let mut pos = 0;
            if data.len() >= bs && !lookup.is_empty() {
                let mut rolling = RollingChecksum::new(&data[..bs]);
                while pos + bs <= data.len() {
                    if let Some(index) = find_block(&lookup, rolling.value(), &data[pos..pos + bs]) {
                        push_literal(&mut ops, &data[literal_start..pos]);
                        ops.push(DeltaOp::Copy { index });
                        pos += bs;
                        literal_start = pos;
                        if pos + bs <= data.len() {
                            rolling = RollingChecksum::new(&data[pos..pos + bs]);
                        }
                        continue;
                    }
                    if pos + bs < data.len() {
                        rolling.roll(data[pos], data[pos + bs]);
                    }
                    pos += 1;
                }
            }

            // The basis' short trailing block can only match the tail of `data`.
            let last = basis.blocks.len() - 1;
            let short = basis.block_len(last);
            if short > 0 && short < bs && data.len() - literal_start >= short {
                let tail_start = data.len() - short;
                if Checksum::from_bytes(&data[tail_start..]) == basis.blocks[last].strong {
                    push_literal(&mut ops, &data[literal_start..tail_start]);
                    ops.push(DeltaOp::Copy { index: last as u32 });
                    literal_start = data.len();
                }
            }
        }

        push_literal(&mut ops, &data[literal_start..]);

        Delta {
            block_size: basis.block_size,
            ops,
            checksum: Checksum::from_bytes(data),
            size: data.len() as u64,
            executable: false,
            modified_at: None,
        }
    }

    /// Apply `delta` to an in-memory basis.
    pub fn apply(basis: &[u8], delta: &Delta) -> Result<Vec<u8>, PatchMismatch> {
        let mut out = Vec::with_capacity(delta.size as usize);
        for op in &delta.ops {
            match op {
                DeltaOp::Literal(bytes) => out.extend_from_slice(bytes),
                DeltaOp::Copy { index } => {
                    let len = block_len(delta.block_size, basis.len() as u64, *index as usize);
                    if len == 0 {
                        return Err(PatchMismatch::CopyOutOfRange {
                            index: *index,
                            basis_len: basis.len() as u64,
                        });
                    }
                    let offset = *index as usize * delta.block_size as usize;
                    out.extend_from_slice(&basis[offset..offset + len]);
                }
            }
        }
        verify(delta, out.len() as u64, Checksum::from_bytes(&out))?;
        Ok(out)
    }
}

pub(crate) fn verify(delta: &Delta, size: u64, checksum: Checksum) -> Result<(), PatchMismatch> {
    if size != delta.size {
        return Err(PatchMismatch::SizeMismatch {
            expected: delta.size,
            actual: size,
        });
    }
    if checksum != delta.checksum {
        return Err(PatchMismatch::ChecksumMismatch {
            expected: delta.checksum,
            actual: checksum,
        });
    }
    Ok(())
}

fn find_block(lookup: &HashMap<u32, Vec<(u32, &Checksum)>>, weak: u32, window: &[u8]) -> Option<u32> {
    let candidates = lookup.get(&weak)?;
    let strong = Checksum::from_bytes(window);
    candidates
        .iter()
        .find(|(_, candidate)| **candidate == strong)
        .map(|(index, _)| *index)
}

fn push_literal(ops: &mut Vec<DeltaOp>, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    if let Some(DeltaOp::Literal(previous)) = ops.last_mut() {
        previous.extend_from_slice(bytes);
    } else {
        ops.push(DeltaOp::Literal(bytes.to_vec()));
    }
}

/// Fill `buffer` as far as the reader allows; returns the number of bytes read.
fn read_block<R: Read>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect()
    }

    #[test]
    fn test_identical_content_is_all_copies() {
        let engine = DeltaEngine::new(64);
        let data = pseudo_random(64 * 10, 1);
        let delta = engine.delta(&data, &engine.signature(&data));
        assert_eq!(delta.copied_blocks(), 10);
        assert_eq!(delta.literal_len(), 0);
        assert_eq!(DeltaEngine::apply(&data, &delta).unwrap(), data);
    }

    #[test]
    fn test_insertion_reuses_shifted_blocks() {
        let engine = DeltaEngine::new(64);
        let basis = pseudo_random(64 * 8 + 17, 2);
        let mut target = basis.clone();
        target.splice(100..100, b"inserted bytes".iter().copied());

        let delta = engine.delta(&target, &engine.signature(&basis));
        assert!(delta.copied_blocks() >= 6, "copied {}", delta.copied_blocks());
        assert!(delta.literal_len() < 64 * 3);
        assert_eq!(DeltaEngine::apply(&basis, &delta).unwrap(), target);
    }

    #[test]
    fn test_short_trailing_block_is_reused() {
        let engine = DeltaEngine::new(64);
        let basis = pseudo_random(64 * 2 + 10, 3);
        let delta = engine.delta(&basis, &engine.signature(&basis));
        assert_eq!(delta.literal_len(), 0);
        assert_eq!(delta.copied_blocks(), 3);
    }

    #[test]
    fn test_empty_signature_yields_literal_delta() {
        let engine = DeltaEngine::new(64);
        let data = b"fresh file".to_vec();
        let delta = engine.delta(&data, &Signature::empty(64));
        assert_eq!(delta.ops, vec![DeltaOp::Literal(data.clone())]);
        assert_eq!(DeltaEngine::apply(&[], &delta).unwrap(), data);
    }

    #[test]
    fn test_delta_to_empty_content() {
        let engine = DeltaEngine::new(64);
        let basis = pseudo_random(300, 4);
        let delta = engine.delta(&[], &engine.signature(&basis));
        assert!(delta.ops.is_empty());
        assert_eq!(DeltaEngine::apply(&basis, &delta).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_stale_basis_is_detected() {
        let engine = DeltaEngine::new(64);
        let basis = pseudo_random(640, 5);
        let target = pseudo_random(640, 5)[..600].to_vec();
        let delta = engine.delta(&target, &engine.signature(&basis));

        let mut changed_basis = basis.clone();
        changed_basis[10] ^= 0xff;
        assert!(matches!(
            DeltaEngine::apply(&changed_basis, &delta),
            Err(PatchMismatch::ChecksumMismatch { .. })
        ));
        assert!(matches!(
            DeltaEngine::apply(&basis[..64], &delta),
            Err(PatchMismatch::CopyOutOfRange { .. })
        ));
    }

    #[test]
    fn test_streaming_signature_matches_in_memory() {
        let engine = DeltaEngine::new(100);
        let data = pseudo_random(1234, 6);
        let streamed = engine.signature_from_reader(std::io::Cursor::new(&data)).unwrap();
        assert_eq!(streamed, engine.signature(&data));
    }

    #[test]
    fn test_wire_encoding() {
        let engine = DeltaEngine::new(16);
        let sig = engine.signature(b"some basis content here");
        assert_eq!(Signature::from_bytes(&sig.to_bytes().unwrap()).unwrap(), sig);
        assert!(Delta::from_bytes(b"\x01garbage").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_patch_reproduces_target(
            basis in proptest::collection::vec(any::<u8>(), 0..2048),
            target in proptest::collection::vec(any::<u8>(), 0..2048),
            block_size in 1usize..128,
        ) {
            let engine = DeltaEngine::new(block_size);
            let delta = engine.delta(&target, &engine.signature(&basis));
            prop_assert_eq!(DeltaEngine::apply(&basis, &delta).unwrap(), target);
        }

        #[test]
        fn prop_edited_basis_still_reconstructs(
            basis in proptest::collection::vec(any::<u8>(), 256..2048),
            at in 0usize..256,
            insert in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let engine = DeltaEngine::new(32);
            let mut target = basis.clone();
            target.splice(at..at, insert.iter().copied());
            let delta = engine.delta(&target, &engine.signature(&basis));
            prop_assert_eq!(DeltaEngine::apply(&basis, &delta).unwrap(), target);
        }
    }
}
