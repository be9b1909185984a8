//! Descriptor ↔ opaque string codec
//!
//! Wire form: `stow://` + URL-safe base64 of zstd-compressed JSON. The JSON
//! body carries its own version field, so the layout can evolve without
//! breaking descriptors already pasted into chats. Decoding strips all
//! whitespace first — paste targets wrap long codes.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use stow_core::{StowError, StowResult};

use crate::descriptor::ShareDescriptor;
use crate::stego;

const PREFIX: &str = "stow://";

/// zstd level for descriptor payloads. Descriptors are small and encoded
/// once, so the slowest level is the right trade.
const ZSTD_LEVEL: i32 = 19;

/// Serialize a descriptor to its opaque share-code string.
pub fn encode(descriptor: &ShareDescriptor) -> String {
    let json = serde_json::to_vec(descriptor).expect("descriptor serializes");
    let compressed = zstd::encode_all(json.as_slice(), ZSTD_LEVEL).expect("zstd in-memory encode");
    format!("{PREFIX}{}", URL_SAFE_NO_PAD.encode(compressed))
}

/// Parse a share-code string back into a descriptor.
pub fn decode(code: &str) -> StowResult<ShareDescriptor> {
    let cleaned: String = code.chars().filter(|c| !c.is_whitespace()).collect();

    let payload = cleaned
        .strip_prefix(PREFIX)
        .ok_or_else(|| StowError::MalformedDescriptor("missing stow:// prefix".into()))?;

    let compressed = URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .map_err(|e| StowError::MalformedDescriptor(format!("base64: {e}")))?;

    let json = zstd::decode_all(compressed.as_slice())
        .map_err(|e| StowError::MalformedDescriptor(format!("decompress: {e}")))?;

    let descriptor: ShareDescriptor = serde_json::from_slice(&json)
        .map_err(|e| StowError::MalformedDescriptor(format!("parse: {e}")))?;

    if descriptor.version != ShareDescriptor::VERSION {
        return Err(StowError::MalformedDescriptor(format!(
            "unsupported descriptor version {}",
            descriptor.version
        )));
    }

    Ok(descriptor)
}

/// Accept a share code in either text form: the raw opaque string, or that
/// string hidden inside cover text as invisible code points.
pub fn resolve(text: &str) -> StowResult<ShareDescriptor> {
    if let Some((_, payload)) = stego::reveal(text) {
        return decode(&payload);
    }
    decode(text)
}
