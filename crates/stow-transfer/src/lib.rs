//! stow-transfer: the chunked encrypted transfer engine
//!
//! # Overview
//! - `plan`: fixed-size chunk layout derived from file size + configured size
//! - `limit`: resizable weighted semaphores bounding in-flight chunk bytes
//! - `task`: per-transfer state machine, byte counters, cancellation
//! - `engine`: upload (encrypt → pack → retry loop) and download
//!   (fetch → unpack → decrypt → reorder) workers

pub mod engine;
pub mod limit;
pub mod plan;
pub mod task;

pub use engine::TransferEngine;
pub use limit::{LimitPermit, TransferLimit};
pub use plan::{ChunkPlan, ChunkRange};
pub use task::{TaskHandle, TaskState, TransferStats};
