//! Invisible-character steganography ("short codes")
//!
//! Payload bytes are spread over the sixteen Unicode variation selectors
//! U+FE00..U+FE0F, one nibble per code point. Renderers draw nothing for a
//! variation selector that follows an ordinary character, so the embedded
//! run is invisible, survives copy/paste through chat clients, and never
//! collides with whitespace a paste target might insert.

/// First code point of the invisible alphabet.
const ALPHABET_BASE: u32 = 0xFE00;
const ALPHABET_LEN: u32 = 16;

fn nibble_to_char(nibble: u8) -> char {
    char::from_u32(ALPHABET_BASE + nibble as u32).expect("variation selector")
}

fn char_to_nibble(c: char) -> Option<u8> {
    let cp = c as u32;
    if (ALPHABET_BASE..ALPHABET_BASE + ALPHABET_LEN).contains(&cp) {
        Some((cp - ALPHABET_BASE) as u8)
    } else {
        None
    }
}

/// Embed arbitrary payload bytes invisibly inside `cover`.
///
/// The invisible run sits after the first visible character so it renders as
/// part of ordinary text; with an empty cover the output is the bare
/// (invisible) run.
pub fn hide_bytes(payload: &[u8], cover: &str) -> String {
    let mut invisible = String::with_capacity(payload.len() * 2 * 3);
    for byte in payload {
        invisible.push(nibble_to_char(byte >> 4));
        invisible.push(nibble_to_char(byte & 0x0F));
    }

    let mut chars = cover.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(cover.len() + invisible.len());
            out.push(first);
            out.push_str(&invisible);
            out.extend(chars);
            out
        }
        None => invisible,
    }
}

/// Extract an embedded payload, returning the visible cover text unchanged
/// alongside the payload bytes. `None` when the text carries no (or a
/// truncated) embedded run.
pub fn reveal_bytes(text: &str) -> Option<(String, Vec<u8>)> {
    let mut visible = String::with_capacity(text.len());
    let mut nibbles: Vec<u8> = Vec::new();

    for c in text.chars() {
        match char_to_nibble(c) {
            Some(n) => nibbles.push(n),
            None => visible.push(c),
        }
    }

    if nibbles.is_empty() || nibbles.len() % 2 != 0 {
        return None;
    }

    let payload = nibbles
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect();
    Some((visible, payload))
}

/// [`hide_bytes`] for string payloads (the usual case: an encoded share code).
pub fn hide(payload: &str, cover: &str) -> String {
    hide_bytes(payload.as_bytes(), cover)
}

/// [`reveal_bytes`] returning the payload as a string; `None` when no valid
/// UTF-8 payload is embedded.
pub fn reveal(text: &str) -> Option<(String, String)> {
    let (visible, payload) = reveal_bytes(text)?;
    let payload = String::from_utf8(payload).ok()?;
    Some((visible, payload))
}
