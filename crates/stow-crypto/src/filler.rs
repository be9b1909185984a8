//! Default filler generation: minimal valid GIF89a images
//!
//! Hosts that validate image uploads still accept the payload when the blob
//! starts with a well-formed GIF. The filler is a single-frame solid-colour
//! image with randomised dimensions and colour, so repeated uploads don't
//! all share an identical prefix. Nothing ever decodes the filler — the
//! scheme only needs the backend to return the blob byte-for-byte.

use rand::Rng;

const GIF_TRAILER: u8 = 0x3B;
const MIN_CODE_SIZE: u8 = 2;
const CLEAR_CODE: u16 = 4;
const END_CODE: u16 = 5;
const CODE_WIDTH: u32 = 3;

/// A syntactically valid single-frame GIF89a filled with one colour.
pub fn solid_gif(width: u16, height: u16, rgb: [u8; 3]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + (width as usize * height as usize) * 3 / 4);

    // Header + logical screen descriptor (global colour table, 2 entries)
    out.extend_from_slice(b"GIF89a");
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.push(0x80);
    out.push(0x00);
    out.push(0x00);

    // Global colour table: the fill colour and black
    out.extend_from_slice(&rgb);
    out.extend_from_slice(&[0, 0, 0]);

    // Graphic control extension (single frame, no delay)
    out.extend_from_slice(&[0x21, 0xF9, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]);

    // Image descriptor at (0, 0), no local colour table
    out.push(0x2C);
    out.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.push(0x00);

    // LZW image data. A clear code before every pixel keeps the decoder's
    // code width fixed at 3 bits, so no dictionary bookkeeping is needed.
    out.push(MIN_CODE_SIZE);
    let mut bits = BitWriter::default();
    let pixels = width as u32 * height as u32;
    for _ in 0..pixels {
        bits.push(CLEAR_CODE, CODE_WIDTH);
        bits.push(0, CODE_WIDTH);
    }
    bits.push(END_CODE, CODE_WIDTH);
    for block in bits.finish().chunks(255) {
        out.push(block.len() as u8);
        out.extend_from_slice(block);
    }
    out.push(0x00);

    out.push(GIF_TRAILER);
    out
}

/// A random small filler, matching the size range of a thumbnail image.
pub fn random_filler() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let width = rng.gen_range(50..100);
    let height = rng.gen_range(50..100);
    let rgb = [rng.gen(), rng.gen(), rng.gen()];
    solid_gif(width, height, rgb)
}

/// LSB-first bit packer for GIF LZW code streams.
#[derive(Default)]
struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    nbits: u32,
}

impl BitWriter {
    fn push(&mut self, code: u16, width: u32) {
        self.acc |= (code as u32) << self.nbits;
        self.nbits += width;
        while self.nbits >= 8 {
            self.out.push((self.acc & 0xFF) as u8);
            self.acc >>= 8;
            self.nbits -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.out.push((self.acc & 0xFF) as u8);
        }
        self.out
    }
}
