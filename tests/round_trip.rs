//! Lossless encode/decode through the native codec.

mod common;

use common::{Plane, decode, encode, gradient, info_for, noise};
use j2k_codec::codec::{Alpha, Format, Order, Subsampling};

fn assert_exact(planes: &[Plane], decoded: &[Vec<i32>]) {
    for (c, (p, got)) in planes.iter().zip(decoded).enumerate() {
        assert_eq!(&p.values, got, "channel {c} differs");
    }
}

#[test]
fn test_gray_8bit() {
    let (w, h) = (67, 45);
    let planes = vec![Plane::new(w, h, 8, gradient(w, h, 8, 0))];
    let bytes = encode(&info_for(w, h, 1, 8), &planes);
    assert_exact(&planes, &decode(&bytes, &planes));
}

#[test]
fn test_gray_noise_j2c() {
    let (w, h) = (40, 29);
    let planes = vec![Plane::new(w, h, 8, noise((w * h) as usize, 1, 0, 255))];
    let mut info = info_for(w, h, 1, 8);
    info.format = Format::J2c;
    let bytes = encode(&info, &planes);
    assert_eq!(&bytes[..4], &[0xFF, 0x4F, 0xFF, 0x51]);
    assert_exact(&planes, &decode(&bytes, &planes));
}

#[test]
fn test_rgb_12bit_every_order_with_rct() {
    let (w, h) = (46, 35);
    let planes: Vec<Plane> = (0..3)
        .map(|c| Plane::new(w, h, 12, gradient(w, h, 12, c * 17)))
        .collect();
    for order in [Order::Lrcp, Order::Rlcp, Order::Rpcl, Order::Pcrl, Order::Cprl] {
        let mut info = info_for(w, h, 3, 12);
        info.settings.order = order;
        info.settings.ycc = true;
        info.settings.tile_size = 32;
        info.settings.layers = 3;
        let bytes = encode(&info, &planes);
        assert_exact(&planes, &decode(&bytes, &planes));
    }
}

#[test]
fn test_rgba_16bit_noise() {
    let (w, h) = (30, 22);
    let planes: Vec<Plane> = (0..4)
        .map(|c| Plane::new(w, h, 16, noise((w * h) as usize, 10 + c, 0, 65535)))
        .collect();
    let mut info = info_for(w, h, 4, 16);
    info.alpha = Alpha::Straight;
    let bytes = encode(&info, &planes);
    assert_exact(&planes, &decode(&bytes, &planes));
}

#[test]
fn test_signed_samples() {
    let (w, h) = (33, 33);
    let planes = vec![
        Plane::new(w, h, 12, noise((w * h) as usize, 3, -2048, 2047)).signed(),
        Plane::new(w, h, 8, noise((w * h) as usize, 4, -128, 127)).signed(),
    ];
    // Channel 1 is coded at 12 bits like channel 0 and widened back.
    let mut info = info_for(w, h, 2, 12);
    info.format = Format::J2c;
    let bytes = encode(&info, &planes);
    assert_exact(&planes, &decode(&bytes, &planes));
}

#[test]
fn test_subsampled_chroma() {
    let (w, h) = (31, 17);
    let planes = vec![
        Plane::subsampled(w, h, Subsampling::NONE, 8, 0),
        Plane::subsampled(w, h, Subsampling::new(2, 2), 8, 5),
        Plane::subsampled(w, h, Subsampling::new(2, 1), 8, 9),
    ];
    let mut info = info_for(w, h, 3, 8);
    info.subsampling[1] = Subsampling::new(2, 2);
    info.subsampling[2] = Subsampling::new(2, 1);
    // Channels of different geometry skip the colour transform.
    info.settings.ycc = true;
    let bytes = encode(&info, &planes);
    assert_exact(&planes, &decode(&bytes, &planes));
}

#[test]
fn test_many_tiles_and_layers() {
    let (w, h) = (50, 41);
    let planes = vec![Plane::new(w, h, 8, noise((w * h) as usize, 7, 0, 255))];
    for (tile, layers) in [(16, 1), (16, 7), (7, 2)] {
        let mut info = info_for(w, h, 1, 8);
        info.settings.tile_size = tile;
        info.settings.layers = layers;
        let bytes = encode(&info, &planes);
        assert_exact(&planes, &decode(&bytes, &planes));
    }
}

#[test]
fn test_one_bit_and_tiny_images() {
    let planes = vec![Plane::new(9, 5, 1, noise(45, 8, 0, 1))];
    let bytes = encode(&info_for(9, 5, 1, 1), &planes);
    assert_exact(&planes, &decode(&bytes, &planes));

    let planes = vec![Plane::new(1, 1, 8, vec![200])];
    let bytes = encode(&info_for(1, 1, 1, 8), &planes);
    assert_exact(&planes, &decode(&bytes, &planes));
}

#[test]
fn test_through_files_on_disk() {
    use j2k_codec::codec::{Buffer, Codec, NativeCodec, SampleType};
    use std::io::{Seek, SeekFrom};

    let (w, h) = (19, 23);
    let pixels: Vec<u8> = noise((w * h * 3) as usize, 77, 0, 255)
        .into_iter()
        .map(|v| v as u8)
        .collect();
    let source = Buffer::interleaved(&pixels[..], w, h, 3, SampleType::UChar).unwrap();
    let codec = NativeCodec::default();

    let mut file = tempfile::tempfile().unwrap();
    let done = codec.write_file(&mut file, &info_for(w, h, 3, 8), &source, None).unwrap();
    assert!(done.is_complete());
    file.seek(SeekFrom::Start(0)).unwrap();

    assert!(codec.verify(&mut file));
    let info = codec.file_info(&mut file).unwrap();
    assert_eq!((info.width, info.height, info.channels), (w, h, 3));
    let mut decoded = vec![0u8; pixels.len()];
    let mut target = Buffer::interleaved(&mut decoded[..], w, h, 3, SampleType::UChar).unwrap();
    assert!(codec.read_file(&mut file, &mut target, 1, None).unwrap().is_complete());
    drop(target);
    assert_eq!(decoded, pixels);
}
