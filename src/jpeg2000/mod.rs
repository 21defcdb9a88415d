//! JPEG 2000 Part 1 engine (ISO/IEC 15444-1) with the JP2/JPX containers.
//!
//! - `parser` / `writer`: codestream syntax (markers and headers).
//! - `jp2`: box containers around the codestream.
//! - `image`: tile, resolution, band, precinct and code-block geometry.
//! - `packet` / `tag_tree`: tier-2 packet headers and bodies.
//! - `mq_coder` / `bit_plane_coder`: tier-1 EBCOT coding.
//! - `dwt`, `mct`, `quantization`: sample transforms.
//! - `rate_control`: truncation-point selection for byte budgets and layers.
//! - `encoder` / `decoder`: the full pipelines.

pub mod bit_io;
pub mod bit_plane_coder;
pub mod decoder;
pub mod dwt;
pub mod encoder;
pub mod image;
pub mod jp2;
pub mod markers;
pub mod mct;
pub mod mq_coder;
pub mod packet;
pub mod parser;
pub mod quantization;
pub mod rate_control;
pub mod tag_tree;
pub mod writer;

pub use decoder::{ComponentPlane, J2kDecoder};
pub use encoder::J2kEncoder;
