//! stow-share: the durable, shareable unit
//!
//! A [`ShareDescriptor`] carries everything needed to locate, authenticate,
//! and decrypt a stored file: chunk locations, the per-file key, the file
//! name/size, and the chunk layout. It serializes to a single opaque string
//! (`codec`), optionally hidden inside arbitrary cover text as invisible
//! code points (`stego`).

pub mod codec;
pub mod descriptor;
pub mod stego;

pub use codec::{decode, encode, resolve};
pub use descriptor::{ChunkLocation, ShareDescriptor};
pub use stego::{hide, reveal};
