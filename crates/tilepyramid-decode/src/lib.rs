//! Decode imagery and elevation payloads of tile pyramid tiles.
//!
//! This crate provides pure synchronous decoding functions for the raw bytes
//! a tile pyramid reads from its disk cache or retrieves from a tile server.
//! All functions can be called from any threading context; the engine decides
//! where decoding runs.
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no threading primitives
//! - **Caller-controlled parallelism**: Decoding runs on whichever worker
//!   thread the fetch pipeline picks
//! - **Specialty first**: Block-compressed and raw elevation formats have
//!   dedicated decoders; everything else goes through the `image` crate

mod elevation;
mod error;
pub mod texture;

pub use elevation::{ElevationEncoding, ElevationGrid, decode_elevation};
pub use error::{DecodeError, DecodeResult};
pub use texture::{DecodedImage, ImageFormat, decode_image, detect_format};
