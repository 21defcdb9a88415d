use j2k_codec::J2kError;
use j2k_codec::codec::{
    Buffer, Channel, ColorSpace, SampleType, copy_buffer, create_profile, is_srgb_profile,
    number_of_cpus, subsampled_size,
};

#[test]
fn test_subsampled_size() {
    assert_eq!(subsampled_size(1920, 2), 960);
    assert_eq!(subsampled_size(1921, 2), 961);
    assert_eq!(subsampled_size(5, 8), 1);
    assert_eq!(subsampled_size(100, 1), 100);
}

#[test]
fn test_copy_interleaved_to_planar() {
    let src: Vec<u8> = (0..24).collect();
    let source = Buffer::interleaved(&src[..], 4, 2, 3, SampleType::UChar).unwrap();
    let mut planes = vec![vec![0u8; 8]; 3];
    {
        let mut dest = Buffer::planar(
            planes.iter_mut().map(|p| &mut p[..]).collect(),
            4,
            2,
            SampleType::UChar,
        )
        .unwrap();
        copy_buffer(&mut dest, &source).unwrap();
    }
    assert_eq!(planes[0], vec![0, 3, 6, 9, 12, 15, 18, 21]);
    assert_eq!(planes[2], vec![2, 5, 8, 11, 14, 17, 20, 23]);
}

#[test]
fn test_copy_converts_depth() {
    let src: Vec<u8> = vec![0, 128, 255, 1];
    let source = Buffer::planar(vec![&src[..]], 2, 2, SampleType::UChar).unwrap();
    let mut out = vec![0u8; 8];
    {
        let mut dest = Buffer::planar(vec![&mut out[..]], 2, 2, SampleType::UShort).unwrap();
        copy_buffer(&mut dest, &source).unwrap();
    }
    let words: Vec<u16> = out.chunks_exact(2).map(|c| u16::from_ne_bytes([c[0], c[1]])).collect();
    assert_eq!(words, vec![0, 128 << 8, 255 << 8, 1 << 8]);
}

#[test]
fn test_copy_rejects_mismatch() {
    let src = vec![9u8; 16];
    let source = Buffer::interleaved(&src[..], 4, 4, 1, SampleType::UChar).unwrap();
    let mut small = vec![0u8; 9];
    let mut dest = Buffer::interleaved(&mut small[..], 3, 3, 1, SampleType::UChar).unwrap();
    assert!(matches!(copy_buffer(&mut dest, &source), Err(J2kError::BufferMismatch(_))));
    drop(dest);
    assert!(small.iter().all(|&b| b == 0));

    let mut two = vec![0u8; 32];
    let mut dest = Buffer::interleaved(&mut two[..], 4, 4, 2, SampleType::UChar).unwrap();
    assert!(copy_buffer(&mut dest, &source).is_err());

    let mut wide = vec![0u8; 16];
    let mut dest: Buffer<&mut [u8]> = Buffer::new();
    let plane = dest.add_plane(&mut wide[..]);
    dest.push_channel(Channel::new(4, 4, SampleType::UChar).at(plane, 0).with_strides(1, 8))
        .unwrap();
    assert!(copy_buffer(&mut dest, &source).is_err());
}

#[test]
fn test_srgb_profile_detection() {
    let srgb = create_profile(ColorSpace::Srgb).unwrap();
    assert!(is_srgb_profile(&srgb));
    let cmyk = create_profile(ColorSpace::Cmyk).unwrap();
    assert!(!is_srgb_profile(&cmyk));
    let romm = create_profile(ColorSpace::Romm).unwrap();
    assert!(!is_srgb_profile(&romm));
    assert!(!is_srgb_profile(&[]));
    assert!(!is_srgb_profile(b"not a profile"));
    assert!(create_profile(ColorSpace::IccAny).is_none());
}

#[test]
fn test_number_of_cpus() {
    assert!(number_of_cpus() >= 1);
}
