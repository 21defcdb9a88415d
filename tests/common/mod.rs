//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::io::Cursor;

use j2k_codec::codec::{
    Buffer, Channel, Codec, Completion, FileInfo, NativeCodec, Progress, SampleType, Subsampling,
    subsampled_size,
};

/// Deterministic pseudo-random samples in `lo..=hi`.
pub fn noise(len: usize, seed: u64, lo: i32, hi: i32) -> Vec<i32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let span = (hi - lo + 1) as u64;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            lo + ((state >> 33) % span) as i32
        })
        .collect()
}

/// A smooth image with a little texture, `0..2^depth`.
pub fn gradient(width: u32, height: u32, depth: u8, phase: u32) -> Vec<i32> {
    let max = (1i64 << depth) - 1;
    let mut out = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let base = (x + phase) as i64 * max / (width as i64 + phase as i64) / 2
                + y as i64 * max / height as i64 / 2;
            let ripple = ((x * 7 + y * 13 + phase) % 5) as i64;
            out.push((base + ripple).clamp(0, max) as i32);
        }
    }
    out
}

pub fn sample_type(depth: u8) -> SampleType {
    if depth <= 8 {
        SampleType::UChar
    } else {
        SampleType::UShort
    }
}

/// Native-endian bytes of `values` for `sample_type`.
pub fn pack(values: &[i32], sample_type: SampleType) -> Vec<u8> {
    match sample_type {
        SampleType::UChar => values.iter().map(|&v| v as u8).collect(),
        SampleType::UShort => values.iter().flat_map(|&v| (v as u16).to_ne_bytes()).collect(),
        SampleType::UInt | SampleType::Int => {
            values.iter().flat_map(|&v| (v as u32).to_ne_bytes()).collect()
        }
    }
}

pub fn unpack(bytes: &[u8], sample_type: SampleType, signed: bool) -> Vec<i32> {
    match (sample_type, signed) {
        (SampleType::UChar, false) => bytes.iter().map(|&b| b as i32).collect(),
        (SampleType::UChar, true) => bytes.iter().map(|&b| b as i8 as i32).collect(),
        (SampleType::UShort, false) => bytes
            .chunks_exact(2)
            .map(|c| u16::from_ne_bytes([c[0], c[1]]) as i32)
            .collect(),
        (SampleType::UShort, true) => bytes
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]) as i32)
            .collect(),
        _ => bytes
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    }
}

/// One planar channel of a test image.
#[derive(Debug, Clone)]
pub struct Plane {
    pub width: u32,
    pub height: u32,
    pub subsampling: Subsampling,
    pub depth: u8,
    pub signed: bool,
    pub values: Vec<i32>,
}

impl Plane {
    pub fn new(width: u32, height: u32, depth: u8, values: Vec<i32>) -> Self {
        Self {
            width,
            height,
            subsampling: Subsampling::NONE,
            depth,
            signed: false,
            values,
        }
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// A channel of a `width x height` image reduced by `subsampling`.
    pub fn subsampled(width: u32, height: u32, subsampling: Subsampling, depth: u8, seed: u64) -> Self {
        let w = subsampled_size(width, subsampling.x);
        let h = subsampled_size(height, subsampling.y);
        Self {
            width: w,
            height: h,
            subsampling,
            depth,
            signed: false,
            values: gradient(w, h, depth, seed as u32),
        }
    }

    fn channel(&self, plane: usize) -> Channel {
        Channel::new(self.width, self.height, sample_type(self.depth))
            .with_depth(self.depth, self.signed)
            .with_subsampling(self.subsampling)
            .at(plane, 0)
    }
}

/// Encodes `planes` described by `info` with `codec`.
pub fn encode_with(codec: &NativeCodec, info: &FileInfo, planes: &[Plane]) -> Vec<u8> {
    let storage: Vec<Vec<u8>> = planes
        .iter()
        .map(|p| pack(&p.values, sample_type(p.depth)))
        .collect();
    let mut buffer: Buffer<&[u8]> = Buffer::new();
    for (p, bytes) in planes.iter().zip(&storage) {
        let index = buffer.add_plane(&bytes[..]);
        buffer.push_channel(p.channel(index)).unwrap();
    }
    let mut out = Vec::new();
    let done = codec.write_file(&mut out, info, &buffer, None).unwrap();
    assert_eq!(done, Completion::Complete);
    out
}

pub fn encode(info: &FileInfo, planes: &[Plane]) -> Vec<u8> {
    encode_with(&NativeCodec::default(), info, planes)
}

/// Decodes into buffers shaped like `shapes` (values are ignored) at `subsample`.
pub fn decode_with(
    codec: &NativeCodec,
    bytes: &[u8],
    shapes: &[Plane],
    subsample: u32,
    progress: Option<&Progress>,
) -> (Completion, Vec<Vec<i32>>) {
    let mut storage: Vec<Vec<u8>> = shapes
        .iter()
        .map(|p| {
            let w = subsampled_size(p.width, subsample);
            let h = subsampled_size(p.height, subsample);
            vec![0xA5; (w * h) as usize * j2k_codec::codec::size_of_sample(sample_type(p.depth))]
        })
        .collect();
    let completion = {
        let mut buffer: Buffer<&mut [u8]> = Buffer::new();
        for (p, store) in shapes.iter().zip(storage.iter_mut()) {
            let index = buffer.add_plane(&mut store[..]);
            let channel = Channel {
                width: subsampled_size(p.width, subsample),
                height: subsampled_size(p.height, subsample),
                ..p.channel(index)
            }
            .with_strides(
                j2k_codec::codec::size_of_sample(sample_type(p.depth)) as isize,
                (subsampled_size(p.width, subsample) as usize
                    * j2k_codec::codec::size_of_sample(sample_type(p.depth))) as isize,
            );
            buffer.push_channel(channel).unwrap();
        }
        let mut file = Cursor::new(bytes);
        codec.read_file(&mut file, &mut buffer, subsample, progress).unwrap()
    };
    let values = shapes
        .iter()
        .zip(&storage)
        .map(|(p, bytes)| unpack(bytes, sample_type(p.depth), p.signed))
        .collect();
    (completion, values)
}

pub fn decode(bytes: &[u8], shapes: &[Plane]) -> Vec<Vec<i32>> {
    let (completion, values) = decode_with(&NativeCodec::default(), bytes, shapes, 1, None);
    assert_eq!(completion, Completion::Complete);
    values
}

/// `FileInfo` for equally sized channels.
pub fn info_for(width: u32, height: u32, channels: u8, depth: u8) -> FileInfo {
    FileInfo::new(width, height, channels, depth)
}

/// Largest and mean absolute difference.
pub fn error_stats(a: &[i32], b: &[i32]) -> (i32, f64) {
    assert_eq!(a.len(), b.len());
    let diffs: Vec<i32> = a.iter().zip(b).map(|(x, y)| (x - y).abs()).collect();
    let max = diffs.iter().copied().max().unwrap_or(0);
    let mean = diffs.iter().map(|&d| d as f64).sum::<f64>() / diffs.len().max(1) as f64;
    (max, mean)
}
