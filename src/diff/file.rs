//! File-level signature, delta and patch.
//!
//! `patch_file` writes into a temporary sibling and renames it over the target
//! only after the produced content verifies; on any failure the temporary file
//! is removed and the target keeps its previous content.

use super::{verify, Delta, DeltaEngine, DeltaOp, Signature, MAX_BLOCK_SIZE};
use crate::error::SyncError;
use crate::paths::temp_sibling;
use crate::table::is_executable;
use crate::types::{from_millis, to_millis, Checksum, Millis};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::warn;

/// Signature of the file at `path`; the empty signature if it does not exist.
pub fn signature_file(path: &Path, block_size: usize) -> Result<Signature, SyncError> {
    match File::open(path) {
        Ok(file) => Ok(DeltaEngine::new(block_size).signature_from_reader(BufReader::new(file))?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Signature::empty(block_size)),
        Err(e) => Err(e.into()),
    }
}

/// Delta of the file at `path` against `basis`, stamped with the file's mtime
/// and executable bit.
pub fn delta_file(path: &Path, basis: &Signature) -> Result<Delta, SyncError> {
    let data = fs::read(path)?;
    let metadata = fs::metadata(path)?;
    let mut delta = DeltaEngine::new(basis.block_size.max(1) as usize).delta(&data, basis);
    delta.executable = is_executable(&metadata);
    delta.modified_at = Some(to_millis(metadata.modified()?));
    Ok(delta)
}

/// Apply `delta` to the file at `target` atomically.
///
/// A missing target is patched against an empty basis. `modified_at`, when
/// given, becomes the new file's mtime.
pub fn patch_file(target: &Path, delta: &Delta, modified_at: Option<Millis>) -> Result<(), SyncError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = temp_sibling(target);

    let result = write_patched(target, &temp, delta, modified_at)
        .and_then(|()| fs::rename(&temp, target).map_err(SyncError::from));

    if result.is_err() {
        if let Err(e) = fs::remove_file(&temp) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %temp.display(), error = %e, "Could not remove temp file after failed patch");
            }
        }
    }
    result
}

fn write_patched(target: &Path, temp: &Path, delta: &Delta, modified_at: Option<Millis>) -> Result<(), SyncError> {
    if delta.block_size > MAX_BLOCK_SIZE {
        return Err(SyncError::patch(
            target.display(),
            format!("block size {} exceeds {}", delta.block_size, MAX_BLOCK_SIZE),
        ));
    }
    let mut basis = match File::open(target) {
        Ok(file) => Some(file),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    let basis_len = match &basis {
        Some(file) => file.metadata()?.len(),
        None => 0,
    };

    let mut out = BufWriter::new(File::create(temp)?);
    let mut hasher = blake3::Hasher::new();
    let mut written: u64 = 0;
    let mut block = vec![0u8; delta.block_size as usize];

    for op in &delta.ops {
        match op {
            DeltaOp::Literal(bytes) => {
                out.write_all(bytes)?;
                hasher.update(bytes);
                written += bytes.len() as u64;
            }
            DeltaOp::Copy { index } => {
                let offset = *index as u64 * delta.block_size as u64;
                let len = basis_len.saturating_sub(offset).min(delta.block_size as u64) as usize;
                let file = match basis.as_mut() {
                    Some(file) if len > 0 => file,
                    _ => {
                        return Err(SyncError::patch(
                            target.display(),
                            format!("copy of block {index} is outside a {basis_len}-byte basis"),
                        ))
                    }
                };
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut block[..len]).map_err(|e| {
                    SyncError::patch(target.display(), format!("basis changed while patching: {e}"))
                })?;
                out.write_all(&block[..len])?;
                hasher.update(&block[..len]);
                written += len as u64;
            }
        }
    }

    verify(delta, written, Checksum::from(hasher.finalize()))
        .map_err(|mismatch| SyncError::patch(target.display(), mismatch.to_string()))?;

    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    if let Some(millis) = modified_at.or(delta.modified_at) {
        file.set_modified(from_millis(millis))?;
    }
    drop(file);
    apply_executable(temp, target, delta.executable)?;
    Ok(())
}

#[cfg(unix)]
fn apply_executable(temp: &Path, target: &Path, executable: bool) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    let mut mode = match fs::metadata(target) {
        Ok(meta) => meta.permissions().mode() & 0o777,
        Err(_) => fs::metadata(temp)?.permissions().mode() & 0o777,
    };
    if executable {
        mode |= (mode & 0o444) >> 2 | 0o100;
    } else {
        mode &= !0o111;
    }
    fs::set_permissions(temp, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_executable(_temp: &Path, _target: &Path, _executable: bool) -> Result<(), SyncError> {
    Ok(())
}
