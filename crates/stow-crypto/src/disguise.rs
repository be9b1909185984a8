//! Filler-prefix packing
//!
//! A disguised blob is `filler-image-bytes ++ encrypted-chunk-bytes`. The
//! recorded head size lets a downloader skip the filler without parsing it;
//! unpacking is a pure byte-slice operation.

use stow_core::{StowError, StowResult};

/// Prepend the filler to the ciphertext. Returns the blob and the head size
/// to record in the chunk location.
pub fn pack(filler: &[u8], ciphertext: &[u8]) -> (Vec<u8>, u32) {
    let mut blob = Vec::with_capacity(filler.len() + ciphertext.len());
    blob.extend_from_slice(filler);
    blob.extend_from_slice(ciphertext);
    (blob, filler.len() as u32)
}

/// Slice the ciphertext back out of a disguised blob.
///
/// Fails with [`StowError::CorruptBlob`] if the head size exceeds the blob
/// length (a truncated or mangled download).
pub fn unpack(blob: &[u8], head_size: u32) -> StowResult<&[u8]> {
    let head = head_size as usize;
    if head > blob.len() {
        return Err(StowError::CorruptBlob {
            head,
            len: blob.len(),
        });
    }
    Ok(&blob[head..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let filler = b"GIF89a-pretend-filler";
        let ciphertext = b"ciphertext bytes";

        let (blob, head) = pack(filler, ciphertext);
        assert_eq!(head as usize, filler.len());
        assert_eq!(blob.len(), filler.len() + ciphertext.len());

        let recovered = unpack(&blob, head).unwrap();
        assert_eq!(recovered, ciphertext);
    }

    #[test]
    fn empty_ciphertext() {
        let (blob, head) = pack(b"filler", b"");
        assert_eq!(unpack(&blob, head).unwrap(), b"");
    }

    #[test]
    fn oversized_head_is_corrupt() {
        let (blob, _) = pack(b"filler", b"data");
        let result = unpack(&blob, blob.len() as u32 + 1);
        assert!(matches!(result, Err(StowError::CorruptBlob { .. })));
    }

    #[test]
    fn head_equal_to_len_yields_empty() {
        let blob = b"just-a-filler";
        assert_eq!(unpack(blob, blob.len() as u32).unwrap(), b"");
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary(
            filler in proptest::collection::vec(any::<u8>(), 0..=512),
            ciphertext in proptest::collection::vec(any::<u8>(), 0..=512),
        ) {
            let (blob, head) = pack(&filler, &ciphertext);
            let recovered = unpack(&blob, head).unwrap();
            prop_assert_eq!(recovered, ciphertext.as_slice());
        }
    }
}
