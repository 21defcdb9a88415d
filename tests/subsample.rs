//! Reduced-resolution reads.

mod common;

use std::io::Cursor;

use common::{Plane, decode, decode_with, encode, error_stats, gradient, info_for};
use j2k_codec::J2kError;
use j2k_codec::codec::{Buffer, Codec, NativeCodec, SampleType, Subsampling, subsampled_size};

#[test]
fn test_reduced_reads_round_up() {
    let (w, h) = (75, 41);
    let planes = vec![Plane::new(w, h, 8, gradient(w, h, 8, 0))];
    let bytes = encode(&info_for(w, h, 1, 8), &planes);
    let codec = NativeCodec::default();

    for subsample in [1, 2, 4, 8] {
        let (done, values) = decode_with(&codec, &bytes, &planes, subsample, None);
        assert!(done.is_complete());
        let expected = (subsampled_size(w, subsample) * subsampled_size(h, subsample)) as usize;
        assert_eq!(values[0].len(), expected, "subsample {subsample}");
    }

    let (_, half) = decode_with(&codec, &bytes, &planes, 2, None);
    let (hw, hh) = (subsampled_size(w, 2), subsampled_size(h, 2));
    let nearest: Vec<i32> = (0..hh)
        .flat_map(|y| (0..hw).map(move |x| (x * 2, y * 2)))
        .map(|(x, y)| planes[0].values[(y * w + x) as usize])
        .collect();
    // The low-pass image tracks a smooth source closely.
    let (max, _) = error_stats(&nearest, &half[0]);
    assert!(max <= 16, "max error {max}");
}

#[test]
fn test_reduction_beyond_levels() {
    // A 16-pixel tile gets 4 levels; 64 still yields a 1/64 image from the LL band.
    let (w, h) = (70, 70);
    let planes = vec![Plane::new(w, h, 8, gradient(w, h, 8, 0))];
    let mut info = info_for(w, h, 1, 8);
    info.settings.tile_size = 16;
    let bytes = encode(&info, &planes);
    let (done, values) = decode_with(&NativeCodec::default(), &bytes, &planes, 64, None);
    assert!(done.is_complete());
    assert_eq!(values[0].len(), 4);
}

#[test]
fn test_subsampled_channels_at_reduced_size() {
    let (w, h) = (40, 30);
    let planes = vec![
        Plane::subsampled(w, h, Subsampling::NONE, 8, 1),
        Plane::subsampled(w, h, Subsampling::new(2, 2), 8, 2),
    ];
    let mut info = info_for(w, h, 2, 8);
    info.subsampling[1] = Subsampling::new(2, 2);
    let bytes = encode(&info, &planes);
    assert_eq!(decode(&bytes, &planes)[1], planes[1].values);

    let (done, values) = decode_with(&NativeCodec::default(), &bytes, &planes, 2, None);
    assert!(done.is_complete());
    assert_eq!(values[0].len(), (20 * 15) as usize);
    assert_eq!(values[1].len(), (subsampled_size(20, 2) * subsampled_size(15, 2)) as usize);
}

#[test]
fn test_wrong_reduced_geometry() {
    let (w, h) = (16, 16);
    let planes = vec![Plane::new(w, h, 8, gradient(w, h, 8, 0))];
    let bytes = encode(&info_for(w, h, 1, 8), &planes);
    let mut pixels = vec![0u8; 16 * 16];
    let mut buffer = Buffer::interleaved(&mut pixels[..], 16, 16, 1, SampleType::UChar).unwrap();
    assert!(matches!(
        NativeCodec::default().read_file(&mut Cursor::new(&bytes), &mut buffer, 4, None),
        Err(J2kError::BufferMismatch(_))
    ));
}
