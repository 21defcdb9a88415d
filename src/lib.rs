//! # j2k-codec
//!
//! A JPEG 2000 codec abstraction: file metadata ([`codec::FileInfo`]), borrowed
//! pixel buffers ([`codec::Buffer`]), cooperative progress and cancellation
//! ([`codec::Progress`]), a process-wide [`codec::registry`], and a native
//! J2C/JP2/JPX engine in [`jpeg2000`].
//!
//! ```no_run
//! use std::fs::File;
//! use j2k_codec::codec::{self, Buffer, SampleType};
//!
//! codec::registry::register_builtin_codecs();
//! let codec = codec::registry::default_codec().expect("a writer is registered");
//! let mut file = File::open("image.jp2")?;
//! let info = codec.file_info(&mut file)?;
//! let mut pixels = vec![0u8; (info.width * info.height * info.channels as u32) as usize];
//! let mut buffer = Buffer::interleaved(
//!     &mut pixels[..],
//!     info.width,
//!     info.height,
//!     info.channels,
//!     SampleType::UChar,
//! )?;
//! let _ = codec.read_file(&mut file, &mut buffer, 1, None)?;
//! # Ok::<(), j2k_codec::J2kError>(())
//! ```

pub mod codec;
pub mod error;
pub mod icc;
pub mod jpeg2000;

pub use error::{J2kError, Result};
