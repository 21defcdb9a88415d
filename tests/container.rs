//! JP2/JPX metadata written by the encoder and reported back on read.

mod common;

use std::io::Cursor;

use common::{Plane, decode, decode_with, encode, gradient, info_for, noise};
use j2k_codec::codec::{
    Alpha, ChannelName, Codec, ColorSpace, FileInfo, Format, LutEntry, NativeCodec, NativeOptions,
    Rational, create_profile, get_file_format,
};

fn rgb(w: u32, h: u32) -> Vec<Plane> {
    (0..3)
        .map(|c| Plane::new(w, h, 8, gradient(w, h, 8, c * 5)))
        .collect()
}

fn read_info(bytes: &[u8]) -> FileInfo {
    NativeCodec::default().file_info(&mut Cursor::new(bytes)).unwrap()
}

#[test]
fn test_file_format_detection() {
    let planes = rgb(16, 16);
    let mut info = info_for(16, 16, 3, 8);

    info.format = Format::J2c;
    let j2c = encode(&info, &planes);
    assert_eq!(get_file_format(&mut Cursor::new(&j2c)), Format::J2c);

    info.format = Format::Jp2;
    let jp2 = encode(&info, &planes);
    assert_eq!(get_file_format(&mut Cursor::new(&jp2)), Format::Jp2);

    info.format = Format::Jpx;
    let jpx = encode(&info, &planes);
    assert_eq!(get_file_format(&mut Cursor::new(&jpx)), Format::Jpx);

    let mut garbage = Cursor::new(b"GIF89a and so on".to_vec());
    assert_eq!(get_file_format(&mut garbage), Format::Unknown);
    assert!(!NativeCodec::default().verify(&mut garbage));
    assert_eq!(get_file_format(&mut Cursor::new(Vec::new())), Format::Unknown);
}

#[test]
fn test_icc_profile_round_trip() {
    let romm = create_profile(ColorSpace::Romm).unwrap();
    let planes = rgb(20, 12);
    let mut info = info_for(20, 12, 3, 8);
    info.color_space = ColorSpace::IccRgb;
    info.icc_profile = Some(romm.clone());
    let bytes = encode(&info, &planes);

    let read = read_info(&bytes);
    assert_eq!(read.format, Format::Jp2);
    assert_eq!(read.color_space, ColorSpace::IccRgb);
    assert_eq!(read.icc_profile.as_deref(), Some(&romm[..]));
    assert_eq!(read.profile_len(), romm.len());
    assert_eq!(decode(&bytes, &planes)[1], planes[1].values);
}

#[test]
fn test_premultiplied_alpha() {
    let (w, h) = (18, 14);
    let mut planes = rgb(w, h);
    planes.push(Plane::new(w, h, 8, noise((w * h) as usize, 2, 0, 255)));
    let mut info = info_for(w, h, 4, 8);
    info.color_space = ColorSpace::Srgb;
    info.alpha = Alpha::Premultiplied;
    let bytes = encode(&info, &planes);

    let read = read_info(&bytes);
    assert_eq!(read.alpha, Alpha::Premultiplied);
    assert_eq!(read.color_space, ColorSpace::Srgb);
    assert_eq!(
        read.channel_map,
        [ChannelName::Red, ChannelName::Green, ChannelName::Blue, ChannelName::Alpha]
    );
    assert_eq!(decode(&bytes, &planes)[3], planes[3].values);
}

#[test]
fn test_palette_image() {
    let (w, h) = (21, 9);
    let indices = noise((w * h) as usize, 5, 0, 15);
    let index_plane = vec![Plane::new(w, h, 8, indices.clone())];
    let mut info = info_for(w, h, 1, 8);
    info.lut = (0..16u8)
        .map(|i| LutEntry([i * 16, 255 - i, i ^ 0x5A, 0]))
        .collect();
    info.lut_channels = 3;
    let bytes = encode(&info, &index_plane);

    let read = read_info(&bytes);
    assert_eq!(read.lut, info.lut);
    assert_eq!(read.lut_channels, 3);
    assert_eq!(read.output_channels(), 3);

    // Without LUT expansion the indices come back.
    assert_eq!(decode(&bytes, &index_plane)[0], indices);

    let expanding = NativeCodec::new(NativeOptions {
        apply_lut: true,
        ..NativeOptions::default()
    });
    let shapes: Vec<Plane> = (0..3).map(|_| Plane::new(w, h, 8, Vec::new())).collect();
    let (done, colours) = decode_with(&expanding, &bytes, &shapes, 1, None);
    assert!(done.is_complete());
    for (c, values) in colours.iter().enumerate() {
        let expected: Vec<i32> = indices
            .iter()
            .map(|&i| info.lut[i as usize].0[c] as i32)
            .collect();
        assert_eq!(values, &expected, "column {c}");
    }
}

#[test]
fn test_resolution() {
    let planes = vec![Plane::new(10, 10, 8, gradient(10, 10, 8, 0))];

    let mut info = info_for(10, 10, 1, 8);
    info.dpi = 300.0;
    info.pixel_aspect = Rational::new(4, 3);
    let read = read_info(&encode(&info, &planes));
    assert!((read.dpi - 300.0).abs() < 0.05, "dpi {}", read.dpi);
    assert_eq!(read.pixel_aspect, Rational::new(4, 3));

    let mut info = info_for(10, 10, 1, 8);
    info.pixel_aspect = Rational::new(2, 1);
    let read = read_info(&encode(&info, &planes));
    assert_eq!(read.dpi, 0.0);
    assert_eq!(read.pixel_aspect, Rational::new(2, 1));

    let read = read_info(&encode(&info_for(10, 10, 1, 8), &planes));
    assert_eq!(read.dpi, 0.0);
    assert!(read.pixel_aspect.is_unknown());
}

#[test]
fn test_extended_colour_space_upgrades_to_jpx() {
    let planes = rgb(12, 12);
    let mut info = info_for(12, 12, 3, 8);
    info.format = Format::Jp2;
    info.color_space = ColorSpace::EsRgb;
    let bytes = encode(&info, &planes);
    assert_eq!(get_file_format(&mut Cursor::new(&bytes)), Format::Jpx);
    let read = read_info(&bytes);
    assert_eq!(read.format, Format::Jpx);
    assert_eq!(read.color_space, ColorSpace::EsRgb);
}

#[test]
fn test_codestream_metadata_is_guessed() {
    let (w, h) = (8, 8);
    let mut planes = rgb(w, h);
    planes.push(Plane::new(w, h, 8, vec![255; 64]));
    let mut info = info_for(w, h, 4, 8);
    info.format = Format::J2c;
    let read = read_info(&encode(&info, &planes));
    assert_eq!(read.format, Format::J2c);
    assert_eq!(read.color_space, ColorSpace::Srgb);
    assert_eq!(read.alpha, Alpha::Unknown);
    assert_eq!(read.channel_map[3], ChannelName::Alpha);
    assert!(read.icc_profile.is_none());

    let gray = vec![Plane::new(w, h, 8, vec![3; 64])];
    let mut info = info_for(w, h, 1, 8);
    info.format = Format::J2c;
    assert_eq!(read_info(&encode(&info, &gray)).color_space, ColorSpace::SLum);
}
