//! Optional `MDATA` revision wrapper.
//!
//! ```text
//! "MDATA" u32 revision_count
//! revision_count × { u32 revision_id, u32 payload_size, [u8; 12] reserved }   20 bytes each
//! payloads, concatenated in record order
//! ```
//!
//! An image that does not start with `MDATA` is a bare payload. Everything
//! wrong at this level is a [`ContainerError`], which the loader retries.

use alloc::vec::Vec;

use crate::blob::cursor::ByteCursor;
use crate::error::ContainerError;

/// Wrapper tag.
pub const MDATA_TAG: &[u8; 5] = b"MDATA";

/// Tag plus revision count.
const PREAMBLE_LEN: usize = 9;

/// Size of one revision record.
pub const REVISION_RECORD_LEN: usize = 20;

/// One revision record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionRecord {
    /// Device revision the payload targets.
    pub revision_id: u32,
    /// Payload length.
    pub payload_size: u32,
}

/// `true` if `image` carries the revision wrapper.
#[must_use]
pub fn is_container(image: &[u8]) -> bool {
    image.starts_with(MDATA_TAG)
}

/// Revision records of a wrapped image.
pub fn revisions(image: &[u8]) -> Result<Vec<RevisionRecord>, ContainerError> {
    let mut c = ByteCursor::new(image);
    c.skip(MDATA_TAG.len()).map_err(|_| ContainerError::Truncated)?;
    let count = c.u32_le().map_err(|_| ContainerError::Truncated)?;
    if count == 0 {
        return Err(ContainerError::NoRevisions);
    }
    let count = usize::try_from(count).map_err(|_| ContainerError::Truncated)?;
    let table_len = count
        .checked_mul(REVISION_RECORD_LEN)
        .ok_or(ContainerError::Truncated)?;
    if table_len > c.remaining() {
        return Err(ContainerError::Truncated);
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let revision_id = c.u32_le().map_err(|_| ContainerError::Truncated)?;
        let payload_size = c.u32_le().map_err(|_| ContainerError::Truncated)?;
        c.skip(12).map_err(|_| ContainerError::Truncated)?;
        out.push(RevisionRecord {
            revision_id,
            payload_size,
        });
    }
    Ok(out)
}

/// Copy out the payload for `revision_id`.
///
/// A bare payload is returned whole regardless of `revision_id`.
pub fn select_revision(image: &[u8], revision_id: u32) -> Result<Vec<u8>, ContainerError> {
    if image.is_empty() {
        return Err(ContainerError::Empty);
    }
    if !is_container(image) {
        return Ok(image.to_vec());
    }
    let records = revisions(image)?;
    // Payloads start after the preamble and record table.
    let mut offset = REVISION_RECORD_LEN
        .checked_mul(records.len())
        .and_then(|t| t.checked_add(PREAMBLE_LEN))
        .ok_or(ContainerError::Truncated)?;
    for record in &records {
        let size = usize::try_from(record.payload_size).map_err(|_| ContainerError::Truncated)?;
        let end = offset.checked_add(size).ok_or(ContainerError::Truncated)?;
        if record.revision_id == revision_id {
            let payload = image.get(offset..end).ok_or(ContainerError::Truncated)?;
            tracing::debug!(revision_id, size, "selected blob revision");
            return Ok(payload.to_vec());
        }
        offset = end;
    }
    Err(ContainerError::RevisionNotFound(revision_id))
}

/// Wrap `(revision_id, payload)` pairs into an `MDATA` image.
#[must_use]
pub fn wrap_revisions(revisions: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MDATA_TAG);
    out.extend_from_slice(&u32::try_from(revisions.len()).unwrap_or(u32::MAX).to_le_bytes());
    for (id, payload) in revisions {
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&u32::try_from(payload.len()).unwrap_or(u32::MAX).to_le_bytes());
        out.extend_from_slice(&[0u8; 12]);
    }
    for (_, payload) in revisions {
        out.extend_from_slice(payload);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn bare_payload_passes_through() {
        assert_eq!(select_revision(b"HEADR...", 7).unwrap(), b"HEADR...");
    }

    #[test]
    fn selects_matching_revision() {
        let image = wrap_revisions(&[(1, b"one".to_vec()), (2, b"second".to_vec()), (3, b"3".to_vec())]);
        assert_eq!(select_revision(&image, 2).unwrap(), b"second");
        assert_eq!(select_revision(&image, 3).unwrap(), b"3");
        assert_eq!(revisions(&image).unwrap().len(), 3);
    }

    #[test]
    fn missing_revision_is_container_error() {
        let image = wrap_revisions(&[(1, b"one".to_vec())]);
        assert_eq!(select_revision(&image, 9), Err(ContainerError::RevisionNotFound(9)));
    }

    #[test]
    fn zero_revisions_and_empty_image() {
        assert_eq!(select_revision(&wrap_revisions(&[]), 0), Err(ContainerError::NoRevisions));
        assert_eq!(select_revision(&[], 0), Err(ContainerError::Empty));
    }

    #[test]
    fn oversized_payload_is_truncation() {
        let mut image = wrap_revisions(&[(1, b"one".to_vec())]);
        image.truncate(image.len() - 1);
        assert_eq!(select_revision(&image, 1), Err(ContainerError::Truncated));
    }
}
