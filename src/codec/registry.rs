//! Process-wide list of available codecs.
//!
//! The list is installed once, before any lookup, and never changes afterwards:
//!
//! ```no_run
//! use j2k_codec::codec::registry;
//!
//! registry::register_builtin_codecs();
//! let codec = registry::default_codec().expect("a codec that can write");
//! println!("{}", codec.name());
//! ```

use std::sync::{Arc, OnceLock};

use log::{debug, warn};

use super::{Codec, InputFile, NativeCodec, ReadFlags, WriteFlags};
use crate::error::{J2kError, Result};

/// An ordered, immutable set of codecs.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn Codec>>,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.codecs.iter().map(|c| c.four_char_code()))
            .finish()
    }
}

#[derive(Default)]
pub struct CodecRegistryBuilder {
    codecs: Vec<Arc<dyn Codec>>,
}

impl CodecRegistryBuilder {
    pub fn register(mut self, codec: impl Codec + 'static) -> Self {
        self.codecs.push(Arc::new(codec));
        self
    }

    pub fn register_arc(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codecs.push(codec);
        self
    }

    pub fn build(self) -> CodecRegistry {
        CodecRegistry {
            codecs: self.codecs,
        }
    }
}

impl CodecRegistry {
    pub fn builder() -> CodecRegistryBuilder {
        CodecRegistryBuilder::default()
    }

    /// Codecs in registration order.
    pub fn codecs(&self) -> &[Arc<dyn Codec>] {
        &self.codecs
    }

    /// The first registered codec that can write, if any.
    pub fn default_codec(&self) -> Option<Arc<dyn Codec>> {
        self.codecs
            .iter()
            .find(|c| c.write_flags().contains(WriteFlags::CAN_WRITE))
            .cloned()
    }

    pub fn find(&self, four_char_code: &str) -> Option<Arc<dyn Codec>> {
        self.codecs
            .iter()
            .find(|c| c.four_char_code() == four_char_code)
            .cloned()
    }

    /// The first codec that can read and recognises `file`.
    pub fn codec_for(&self, file: &mut dyn InputFile) -> Option<Arc<dyn Codec>> {
        self.codecs
            .iter()
            .find(|c| c.read_flags().contains(ReadFlags::CAN_READ) && c.verify(file))
            .cloned()
    }
}

static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();

/// Installs `registry` as the process-wide list.
pub fn install(registry: CodecRegistry) -> Result<()> {
    debug!("installing codec registry {registry:?}");
    REGISTRY
        .set(registry)
        .map_err(|_| J2kError::RegistryInitialized)
}

/// Installs the codecs shipped with this crate unless a list is already installed.
pub fn register_builtin_codecs() -> &'static CodecRegistry {
    REGISTRY.get_or_init(|| {
        debug!("registering built-in codecs");
        CodecRegistry::builder()
            .register(NativeCodec::default())
            .build()
    })
}

/// The installed codecs; empty if nothing was installed yet.
pub fn codec_list() -> &'static [Arc<dyn Codec>] {
    match REGISTRY.get() {
        Some(registry) => registry.codecs(),
        None => {
            warn!("codec list requested before any codec was registered");
            &[]
        }
    }
}

/// The first installed codec with write capability.
pub fn default_codec() -> Option<Arc<dyn Codec>> {
    REGISTRY.get().and_then(CodecRegistry::default_codec)
}
