//! JPEG 2000 decoder.
//!
//! Parses the codestream, reads the packets of every tile, runs tier-1 decoding
//! on the code-blocks in parallel, then dequantizes, applies the inverse DWT
//! and colour transform, and undoes the level shift.

use log::{debug, trace};
use rayon::prelude::*;

use super::bit_plane_coder::decode_code_block;
use super::dwt::{inverse_53, inverse_97};
use super::image::{J2kSiz, SCOD_EPH, SCOD_SOP, TileLayout};
use super::mct::{inverse_ict, inverse_rct};
use super::packet::{BlockSegments, PacketFraming, decode_tile_packets};
use super::parser::{J2kCodestream, J2kHeader, J2kParser, J2kTileParams};
use super::quantization::{decode_step, dequantize_scalar, magnitude_bits};
use crate::codec::{Progress, ProgressMeter};
use crate::error::{J2kError, Result};

/// One reconstructed component at the requested reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentPlane {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub signed: bool,
    /// Resolution levels actually dropped; below the request when the
    /// codestream has fewer decomposition levels.
    pub reduction: u32,
    /// Row-major samples in the component's own range.
    pub samples: Vec<i32>,
}

impl ComponentPlane {
    pub fn sample(&self, x: u32, y: u32) -> i32 {
        self.samples[y as usize * self.width as usize + x as usize]
    }
}

/// Samples of one tile-component, reduced and shifted.
struct TilePlane {
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
    samples: Vec<i32>,
}

/// Dequantized values of one tile-component.
enum Coefficients {
    Integer(Vec<i32>),
    Float(Vec<f32>),
}

impl Coefficients {
    /// Copies the top-left `w x h` window out of a `stride`-wide array.
    fn window(&self, stride: usize, w: usize, h: usize) -> Self {
        fn crop<T: Copy>(data: &[T], stride: usize, w: usize, h: usize) -> Vec<T> {
            let mut out = Vec::with_capacity(w * h);
            for y in 0..h {
                out.extend_from_slice(&data[y * stride..y * stride + w]);
            }
            out
        }
        match self {
            Self::Integer(d) => Self::Integer(crop(d, stride, w, h)),
            Self::Float(d) => Self::Float(crop(d, stride, w, h)),
        }
    }

    fn into_float(self) -> Vec<f32> {
        match self {
            Self::Integer(d) => d.into_iter().map(|v| v as f32).collect(),
            Self::Float(d) => d,
        }
    }
}

/// Decoder for one codestream.
pub struct J2kDecoder {
    stream: J2kCodestream,
}

impl J2kDecoder {
    /// Parses `codestream` (SOC through EOC).
    pub fn new(codestream: &[u8]) -> Result<Self> {
        let stream = J2kParser::new(codestream).parse_codestream()?;
        debug!(
            "codestream {}x{}, {} components, {} tiles",
            stream.header.siz.width(),
            stream.header.siz.height(),
            stream.header.siz.components.len(),
            stream.header.siz.tile_count()
        );
        Ok(Self { stream })
    }

    pub fn header(&self) -> &J2kHeader {
        &self.stream.header
    }

    pub fn siz(&self) -> &J2kSiz {
        &self.stream.header.siz
    }

    /// Decomposition levels available in every tile, per component.
    pub fn levels(&self) -> Vec<u8> {
        let siz = self.siz();
        let params: Vec<J2kTileParams> = (0..siz.tile_count()).map(|t| self.stream.tile_params(t)).collect();
        (0..siz.components.len())
            .map(|c| params.iter().map(|p| p.styles[c].levels).min().unwrap_or(0))
            .collect()
    }

    /// Reconstructs every component with `reduce` resolution levels dropped.
    /// Returns [`J2kError::Cancelled`] when `progress` asks to stop.
    pub fn decode(&self, reduce: u32, progress: Option<&Progress>) -> Result<Vec<ComponentPlane>> {
        let siz = self.siz();
        let tile_count = siz.tile_count();
        let params: Vec<J2kTileParams> = (0..tile_count).map(|t| self.stream.tile_params(t)).collect();
        let layouts = (0..tile_count)
            .map(|t| TileLayout::new(siz, t, &params[t].styles))
            .collect::<Result<Vec<_>>>()?;
        let reduction: Vec<u32> = self
            .levels()
            .iter()
            .map(|&l| reduce.min(l as u32))
            .collect();

        let segments: Vec<Vec<BlockSegments>> = layouts
            .par_iter()
            .zip(&params)
            .map(|(tile, p)| -> Result<Vec<BlockSegments>> {
                let data = self.stream.tiles.get(tile.index).map_or(&[][..], |t| &t.data[..]);
                let sequence = tile.packet_sequence(siz, p.cod.order, p.cod.layers);
                let cb_styles: Vec<u8> = p.styles.iter().map(|s| s.cb_style).collect();
                let framing = PacketFraming {
                    sop: p.cod.scod & SCOD_SOP != 0,
                    eph: p.cod.scod & SCOD_EPH != 0,
                };
                decode_tile_packets(data, tile, &sequence, &cb_styles, framing)
            })
            .collect::<Result<_>>()?;

        // Blocks above the target resolution are never decoded.
        let target = |t: usize, c: usize| layouts[t].components[c].levels as u32 - reduction[c];
        let jobs: Vec<(usize, usize)> = layouts
            .iter()
            .enumerate()
            .flat_map(|(t, tile)| {
                tile.codeblocks
                    .iter()
                    .enumerate()
                    .filter(move |(_, g)| g.resolution as u32 <= target(t, g.component))
                    .map(move |(i, _)| (t, i))
            })
            .collect();
        let meter = ProgressMeter::new(progress, jobs.len() + tile_count);

        let decoded: Vec<Vec<i32>> = jobs
            .par_iter()
            .map(|&(t, i)| -> Result<Vec<i32>> {
                meter.check()?;
                let out = self.decode_block(&layouts[t], &params[t], i, &segments[t][i])?;
                meter.tick()?;
                Ok(out)
            })
            .collect::<Result<_>>()?;
        drop(segments);

        let mut per_tile: Vec<Vec<(usize, Vec<i32>)>> = (0..tile_count).map(|_| Vec::new()).collect();
        for (&(t, i), block) in jobs.iter().zip(decoded) {
            per_tile[t].push((i, block));
        }

        let tiles: Vec<Vec<TilePlane>> = per_tile
            .into_par_iter()
            .enumerate()
            .map(|(t, blocks)| -> Result<Vec<TilePlane>> {
                meter.check()?;
                let planes = self.reconstruct_tile(&layouts[t], &params[t], blocks, &reduction)?;
                meter.tick()?;
                Ok(planes)
            })
            .collect::<Result<_>>()?;

        let mut planes: Vec<ComponentPlane> = siz
            .components
            .iter()
            .enumerate()
            .map(|(c, info)| {
                let (cx0, cy0, cx1, cy1) = siz.component_rect(c);
                let k = reduction[c];
                let width = ceil_div_pow2(cx1, k) - ceil_div_pow2(cx0, k);
                let height = ceil_div_pow2(cy1, k) - ceil_div_pow2(cy0, k);
                ComponentPlane {
                    width,
                    height,
                    depth: info.depth,
                    signed: info.signed,
                    reduction: k,
                    samples: vec![0; width as usize * height as usize],
                }
            })
            .collect();

        for tile_planes in tiles {
            for (c, tp) in tile_planes.into_iter().enumerate() {
                let (cx0, cy0, _, _) = siz.component_rect(c);
                let plane = &mut planes[c];
                let ox = (tp.x0 - ceil_div_pow2(cx0, plane.reduction)) as usize;
                let oy = (tp.y0 - ceil_div_pow2(cy0, plane.reduction)) as usize;
                let pw = plane.width as usize;
                for y in 0..tp.height as usize {
                    let src = &tp.samples[y * tp.width as usize..(y + 1) * tp.width as usize];
                    let at = (oy + y) * pw + ox;
                    plane.samples[at..at + src.len()].copy_from_slice(src);
                }
            }
        }
        Ok(planes)
    }

    /// Tier-1 decoding of code-block `index`; returns doubled magnitudes.
    fn decode_block(
        &self,
        tile: &TileLayout,
        params: &J2kTileParams,
        index: usize,
        segments: &BlockSegments,
    ) -> Result<Vec<i32>> {
        let g = &tile.codeblocks[index];
        let (w, h) = (g.width() as usize, g.height() as usize);
        if !segments.included || segments.passes == 0 {
            return Ok(vec![0; w * h]);
        }
        let band = &tile.components[g.component].resolutions[g.resolution].bands[g.band];
        let q = &params.quant[g.component];
        let (eps, _) = q.band_step(g.resolution, band.qcd_index())?;
        let mb = magnitude_bits(q.guard_bits, eps) as u32;
        let num_bps = mb
            .checked_sub(segments.zero_planes)
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| J2kError::invalid("code-block has more missing bit-planes than magnitude bits"))?;
        trace!(
            "tile {} block {index}: {} passes over {num_bps} planes",
            tile.index, segments.passes
        );
        decode_code_block(
            &segments.as_slices(),
            w,
            h,
            band.orientation,
            num_bps,
            params.styles[g.component].cb_style,
        )
    }

    /// Dequantization, inverse DWT, inverse colour transform and level shift
    /// of one tile.
    fn reconstruct_tile(
        &self,
        tile: &TileLayout,
        params: &J2kTileParams,
        blocks: Vec<(usize, Vec<i32>)>,
        reduction: &[u32],
    ) -> Result<Vec<TilePlane>> {
        let siz = self.siz();
        let mut coefficients: Vec<Coefficients> = tile
            .components
            .iter()
            .enumerate()
            .map(|(c, tc)| {
                let len = tc.width() as usize * tc.height() as usize;
                if params.styles[c].reversible {
                    Coefficients::Integer(vec![0; len])
                } else {
                    Coefficients::Float(vec![0.0; len])
                }
            })
            .collect();

        for (index, m2) in blocks {
            let g = &tile.codeblocks[index];
            let tc = &tile.components[g.component];
            let band = &tc.resolutions[g.resolution].bands[g.band];
            let stride = tc.width() as usize;
            let w = g.width() as usize;
            match &mut coefficients[g.component] {
                Coefficients::Integer(data) => {
                    for (y, row) in m2.chunks_exact(w).enumerate() {
                        let at = (g.array_y as usize + y) * stride + g.array_x as usize;
                        for (dst, &v) in data[at..at + w].iter_mut().zip(row) {
                            *dst = v.signum() * (v.abs() >> 1);
                        }
                    }
                }
                Coefficients::Float(data) => {
                    let q = &params.quant[g.component];
                    let (eps, mu) = q.band_step(g.resolution, band.qcd_index())?;
                    let range = siz.components[g.component].depth + band.orientation.gain_log2();
                    let step = decode_step(eps, mu, range) as f32;
                    for (y, row) in m2.chunks_exact(w).enumerate() {
                        let at = (g.array_y as usize + y) * stride + g.array_x as usize;
                        for (dst, &v) in data[at..at + w].iter_mut().zip(row) {
                            *dst = dequantize_scalar(v, step);
                        }
                    }
                }
            }
        }

        let mut windows: Vec<(u32, u32, u32, u32, Coefficients)> = Vec::with_capacity(coefficients.len());
        for (c, (mut data, tc)) in coefficients.into_iter().zip(&tile.components).enumerate() {
            let r = (tc.levels as u32 - reduction[c]) as usize;
            match &mut data {
                Coefficients::Integer(d) => inverse_53(d, tc, r),
                Coefficients::Float(d) => inverse_97(d, tc, r),
            }
            let res = &tc.resolutions[r];
            let window = data.window(tc.width() as usize, res.width() as usize, res.height() as usize);
            windows.push((res.x0, res.y0, res.width(), res.height(), window));
        }

        if params.cod.mct == 1 && windows.len() >= 3 {
            let shape = |i: usize| (windows[i].2, windows[i].3);
            if shape(1) != shape(0) || shape(2) != shape(0) {
                return Err(J2kError::unsupported("colour transform over components of different size"));
            }
            let mut parts = windows.iter_mut().take(3).map(|w| &mut w.4);
            if let (Some(a), Some(b), Some(c)) = (parts.next(), parts.next(), parts.next()) {
                match (a, b, c) {
                    (Coefficients::Integer(a), Coefficients::Integer(b), Coefficients::Integer(c)) => {
                        inverse_rct(a, b, c)
                    }
                    (a, b, c) => {
                        let mut fa = std::mem::replace(a, Coefficients::Float(Vec::new())).into_float();
                        let mut fb = std::mem::replace(b, Coefficients::Float(Vec::new())).into_float();
                        let mut fc = std::mem::replace(c, Coefficients::Float(Vec::new())).into_float();
                        inverse_ict(&mut fa, &mut fb, &mut fc);
                        *a = Coefficients::Float(fa);
                        *b = Coefficients::Float(fb);
                        *c = Coefficients::Float(fc);
                    }
                }
            }
        }

        Ok(windows
            .into_iter()
            .enumerate()
            .map(|(c, (x0, y0, width, height, data))| {
                let info = &siz.components[c];
                let (shift, lo, hi) = if info.signed {
                    let half = 1i64 << (info.depth - 1);
                    (0, -half, half - 1)
                } else {
                    (1i64 << (info.depth - 1), 0, (1i64 << info.depth) - 1)
                };
                let samples = match data {
                    Coefficients::Integer(d) => d
                        .into_iter()
                        .map(|v| (v as i64 + shift).clamp(lo, hi) as i32)
                        .collect(),
                    Coefficients::Float(d) => d
                        .into_iter()
                        .map(|v| (v.round() as i64 + shift).clamp(lo, hi) as i32)
                        .collect(),
                };
                TilePlane {
                    x0,
                    y0,
                    width,
                    height,
                    samples,
                }
            })
            .collect())
    }
}

fn ceil_div_pow2(v: u32, k: u32) -> u32 {
    ((v as u64 + (1u64 << k) - 1) >> k) as u32
}
