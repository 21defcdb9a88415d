//! The process-wide registry is set once per test binary, so everything that
//! touches it lives in one test.

use std::sync::Arc;

use j2k_codec::J2kError;
use j2k_codec::codec::registry::{self, CodecRegistry};
use j2k_codec::codec::{Codec, NativeCodec, NativeOptions};

#[test]
fn test_install_and_lookup() {
    assert!(registry::codec_list().is_empty());
    assert!(registry::default_codec().is_none());

    let native: Arc<dyn Codec> = Arc::new(NativeCodec::new(NativeOptions {
        threads: 1,
        ..NativeOptions::default()
    }));
    registry::install(CodecRegistry::builder().register_arc(native.clone()).build()).unwrap();

    let list = registry::codec_list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].four_char_code(), "NJ2K");

    let default = registry::default_codec().unwrap();
    assert!(Arc::ptr_eq(&default, &native));
    assert!(Arc::ptr_eq(&registry::default_codec().unwrap(), &default));

    // The list never changes once installed.
    assert!(matches!(
        registry::install(CodecRegistry::builder().build()),
        Err(J2kError::RegistryInitialized)
    ));
    assert_eq!(registry::register_builtin_codecs().codecs().len(), 1);
    assert!(Arc::ptr_eq(&registry::codec_list()[0], &native));
}
