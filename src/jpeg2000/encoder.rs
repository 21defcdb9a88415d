//! JPEG 2000 encoder.
//!
//! Turns a [`Buffer`] into a J2C/JP2/JPX file: level shift, optional colour
//! transform, 5/3 or 9/7 DWT, quantization, EBCOT tier-1 on every code-block in
//! parallel, then rate allocation and packet assembly.

use log::{debug, trace, warn};
use rayon::prelude::*;

use super::bit_plane_coder::{CBLK_TERMALL, EncodedBlock, encode_code_block};
use super::dwt::{forward_53, forward_97, synthesis_norm};
use super::image::{
    J2kCod, J2kCodingStyle, J2kComponentInfo, J2kQuantization, J2kSiz, QUANT_EXPOUNDED, QUANT_NONE,
    SCOD_PRECINCTS, SubbandOrientation, TileLayout,
};
use super::jp2::{Jp2Header, write_container};
use super::mct::{forward_ict, forward_rct};
use super::packet::{BlockContribution, encode_tile_packets};
use super::quantization::{
    bit_length, decode_step, encode_step, guard_bits_for, magnitude_bits, max_index,
    quantize_scalar, reversible_exponent, step_from_quality,
};
use super::rate_control::{RdBlock, lambda_for_budget, layer_passes, passes_down_to_plane};
use super::writer::{J2kWriter, TILE_PART_OVERHEAD};
use crate::codec::{
    Buffer, CompressionMethod, DciProfile, FileInfo, MAX_CHANNELS, MAX_LAYERS, Order, Progress,
    ProgressMeter, subsampled_size,
};
use crate::error::{J2kError, Result};

/// Largest codestream of one DCI frame.
pub const CINEMA_FRAME_BYTES: usize = 1_302_083;
/// Largest tile-part (one colour component) of one DCI frame.
pub const CINEMA_COMPONENT_BYTES: usize = 1_041_666;

const MAX_DEPTH: u8 = 16;
const MAX_LEVELS: u32 = 5;
const REVERSIBLE_GUARD_BITS: u8 = 2;
/// Rebuilds tried while tightening a byte budget.
const MAX_FIT_ATTEMPTS: usize = 24;

/// Coding decisions for one image.
#[derive(Debug, Clone)]
pub struct EncodePlan {
    pub method: CompressionMethod,
    pub siz: J2kSiz,
    pub cod: J2kCod,
    pub cinema: Option<DciProfile>,
    /// Quantization step at unit band norm, in sample units.
    pub base_step: f64,
}

impl EncodePlan {
    fn reversible(&self) -> bool {
        self.cod.style.reversible
    }

    fn mct(&self) -> bool {
        self.cod.mct == 1
    }
}

/// Decomposition level a band of resolution `r` comes from.
fn band_level(levels: u8, r: usize) -> u8 {
    if r == 0 { levels } else { levels + 1 - r as u8 }
}

/// Position of a band in the QCD step list.
fn band_index(r: usize, band: usize) -> usize {
    if r == 0 { 0 } else { 1 + 3 * (r - 1) + band }
}

/// Nominal dynamic range `R_b` of a band.
fn range_bits(depth: u8, orientation: SubbandOrientation) -> u8 {
    depth + orientation.gain_log2()
}

fn orientation_of(index: usize) -> SubbandOrientation {
    match index {
        0 => SubbandOrientation::LL,
        i => match (i - 1) % 3 {
            0 => SubbandOrientation::HL,
            1 => SubbandOrientation::LH,
            _ => SubbandOrientation::HH,
        },
    }
}

fn level_of(levels: u8, index: usize) -> u8 {
    if index == 0 {
        levels
    } else {
        band_level(levels, (index - 1) / 3 + 1)
    }
}

/// Samples of one tile after colour and wavelet transforms, per component.
enum TileCoefficients {
    Integer(Vec<Vec<i32>>),
    Float(Vec<Vec<f32>>),
}

/// Tier-1 input of one code-block.
struct BlockJob {
    tile: usize,
    index: usize,
    coeffs: Vec<i32>,
}

/// A built stream and the length of each of its tile-parts.
struct Assembly {
    file: Vec<u8>,
    codestream_len: usize,
    part_lengths: Vec<usize>,
}

/// Per-block data shared by every allocation attempt.
struct CodedImage {
    tiles: Vec<TileLayout>,
    /// First global block index of each tile.
    offsets: Vec<usize>,
    blocks: Vec<EncodedBlock>,
    zero_planes: Vec<u32>,
    rd: Vec<RdBlock>,
    quant: Vec<J2kQuantization>,
}

impl CodedImage {
    fn all_passes(&self) -> Vec<usize> {
        self.blocks.iter().map(|b| b.passes.len()).collect()
    }

    fn bytes_at(&self, passes: &[usize]) -> usize {
        self.blocks
            .iter()
            .zip(passes)
            .map(|(b, &p)| if p == 0 { 0 } else { b.passes[p - 1].end })
            .sum()
    }

    fn component_of(&self, global: usize) -> usize {
        let t = self.offsets.partition_point(|&o| o <= global) - 1;
        self.tiles[t].codeblocks[global - self.offsets[t]].component
    }
}

/// JPEG 2000 encoder for one image described by a [`FileInfo`].
pub struct J2kEncoder<'a> {
    info: &'a FileInfo,
    comment: Option<&'a str>,
}

impl<'a> J2kEncoder<'a> {
    pub fn new(info: &'a FileInfo) -> Self {
        Self { info, comment: None }
    }

    /// Text for a COM marker in the main header.
    pub fn with_comment(mut self, comment: Option<&'a str>) -> Self {
        self.comment = comment;
        self
    }

    /// Checks `buffer` against the file description and the method's limits.
    pub fn validate(&self, buffer: &Buffer<&[u8]>) -> Result<()> {
        let info = self.info;
        let n = info.channels as usize;
        if !(1..=MAX_CHANNELS).contains(&n) {
            return Err(J2kError::argument(format!("{n} channels; 1 to {MAX_CHANNELS} can be written")));
        }
        if info.width == 0 || info.height == 0 {
            return Err(J2kError::argument("empty image"));
        }
        if !(1..=MAX_DEPTH).contains(&info.depth) {
            return Err(J2kError::argument(format!("depth {} outside 1..={MAX_DEPTH}", info.depth)));
        }
        if buffer.channel_count() != n {
            return Err(J2kError::BufferMismatch(format!(
                "file has {n} channels, buffer has {}",
                buffer.channel_count()
            )));
        }
        buffer.validate()?;
        for (c, ch) in buffer.channels().iter().enumerate() {
            let s = info.subsampling[c];
            if s.x > 255 || s.y > 255 {
                return Err(J2kError::argument(format!("channel {c}: subsampling above 255")));
            }
            let (w, h) = (subsampled_size(info.width, s.x), subsampled_size(info.height, s.y));
            if ch.width != w || ch.height != h {
                return Err(J2kError::BufferMismatch(format!(
                    "channel {c}: expected {w}x{h}, buffer has {}x{}",
                    ch.width, ch.height
                )));
            }
        }

        if info.settings.method == CompressionMethod::Cinema {
            let profile = info.settings.dci_profile;
            let (max_w, max_h) = profile.max_size();
            if n != 3 {
                return Err(J2kError::CinemaLimits(format!("{n} channels; DCI needs 3")));
            }
            if info.width > max_w || info.height > max_h {
                return Err(J2kError::CinemaLimits(format!(
                    "{}x{} exceeds {max_w}x{max_h} for {profile:?}",
                    info.width, info.height
                )));
            }
            if info.subsampling[..n].iter().any(|s| s.x != 1 || s.y != 1) {
                return Err(J2kError::CinemaLimits("subsampled channels".into()));
            }
        }
        Ok(())
    }

    /// Chooses every codestream parameter for `buffer`.
    pub fn plan(&self, buffer: &Buffer<&[u8]>) -> Result<EncodePlan> {
        self.validate(buffer)?;
        let info = self.info;
        let settings = &info.settings;
        let cinema = (settings.method == CompressionMethod::Cinema).then_some(settings.dci_profile);

        let depth = if cinema.is_some() { 12 } else { info.depth };
        let components: Vec<J2kComponentInfo> = buffer
            .channels()
            .iter()
            .enumerate()
            .map(|(c, ch)| J2kComponentInfo {
                depth,
                signed: cinema.is_none() && ch.signed,
                dx: info.subsampling[c].x as u8,
                dy: info.subsampling[c].y as u8,
            })
            .collect();

        let (tile_width, tile_height) = match (cinema, settings.tile_size) {
            (Some(_), _) | (None, 0) => (info.width, info.height),
            (None, t) => (t as u32, t as u32),
        };
        let siz = J2kSiz {
            rsiz: match cinema {
                Some(DciProfile::Dci2k) => 3,
                Some(DciProfile::Dci4k) => 4,
                None => 0,
            },
            x1: info.width,
            y1: info.height,
            tile_width,
            tile_height,
            components,
            ..J2kSiz::default()
        };
        siz.validate()?;

        let levels = match cinema {
            Some(DciProfile::Dci2k) => 5,
            Some(DciProfile::Dci4k) => 6,
            None => {
                let side = siz
                    .components
                    .iter()
                    .map(|c| {
                        let w = tile_width.min(info.width).div_ceil(c.dx as u32);
                        let h = tile_height.min(info.height).div_ceil(c.dy as u32);
                        w.min(h).max(1)
                    })
                    .min()
                    .unwrap_or(1);
                side.ilog2().min(MAX_LEVELS) as u8
            }
        };

        let reversible = match settings.method {
            CompressionMethod::Lossless => true,
            CompressionMethod::Cinema => false,
            CompressionMethod::Size | CompressionMethod::Quality => settings.reversible,
        };
        let first = &siz.components[0];
        let mct = cinema.is_none()
            && settings.ycc
            && siz.components.len() >= 3
            && siz.components[1..3]
                .iter()
                .all(|c| c.dx == first.dx && c.dy == first.dy && c.signed == first.signed);
        if settings.ycc && !mct && cinema.is_none() {
            debug!("colour transform skipped: the first three channels differ in geometry");
        }

        let style = J2kCodingStyle {
            levels,
            cb_width_exp: if cinema.is_some() { 5 } else { 6 },
            cb_height_exp: if cinema.is_some() { 5 } else { 6 },
            cb_style: CBLK_TERMALL,
            reversible,
            precincts: match cinema {
                Some(_) => (0..=levels).map(|r| if r == 0 { (7, 7) } else { (8, 8) }).collect(),
                None => Vec::new(),
            },
        };
        let cod = J2kCod {
            scod: if style.precincts.is_empty() { 0 } else { SCOD_PRECINCTS },
            order: if cinema.is_some() { Order::Cprl } else { settings.order },
            layers: if cinema.is_some() {
                1
            } else {
                settings.layers.clamp(1, MAX_LAYERS) as u16
            },
            mct: u8::from(mct),
            style,
        };

        let base_step = match settings.method {
            CompressionMethod::Quality => step_from_quality(depth, settings.quality),
            _ => step_from_quality(depth, 100),
        };
        let plan = EncodePlan {
            method: settings.method,
            siz,
            cod,
            cinema,
            base_step,
        };
        debug!(
            "encoding {}x{}x{} depth {depth}: {:?}, {} levels, {} layers, {:?}, reversible {reversible}, mct {mct}",
            info.width,
            info.height,
            info.channels,
            plan.method,
            levels,
            plan.cod.layers,
            plan.cod.order
        );
        Ok(plan)
    }

    /// Encodes `buffer` into a complete file. Returns [`J2kError::Cancelled`]
    /// when `progress` asks to stop.
    pub fn encode(&self, buffer: &Buffer<&[u8]>, progress: Option<&Progress>) -> Result<Vec<u8>> {
        let plan = self.plan(buffer)?;
        let styles = vec![plan.cod.style.clone(); plan.siz.components.len()];
        let tiles = (0..plan.siz.tile_count())
            .map(|t| TileLayout::new(&plan.siz, t, &styles))
            .collect::<Result<Vec<_>>>()?;
        let block_count: usize = tiles.iter().map(|t| t.codeblocks.len()).sum();
        let meter = ProgressMeter::new(progress, block_count + 1);

        let steps = self.band_steps(&plan);
        let mut jobs: Vec<BlockJob> = tiles
            .par_iter()
            .map(|tile| -> Result<Vec<BlockJob>> {
                meter.check()?;
                let coefficients = self.transform_tile(&plan, tile, buffer);
                Ok(extract_blocks(tile, &coefficients, &steps))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        let quant = self.quantization(&plan, &tiles, &mut jobs);

        let blocks: Vec<EncodedBlock> = jobs
            .par_iter()
            .map(|job| -> Result<EncodedBlock> {
                meter.check()?;
                let g = &tiles[job.tile].codeblocks[job.index];
                let band = &tiles[job.tile].components[g.component].resolutions[g.resolution].bands[g.band];
                let block = encode_code_block(
                    &job.coeffs,
                    g.width() as usize,
                    g.height() as usize,
                    band.orientation,
                    CBLK_TERMALL,
                );
                meter.tick()?;
                Ok(block)
            })
            .collect::<Result<Vec<_>>>()?;
        drop(jobs);

        meter.check()?;
        let image = self.rate_model(&plan, tiles, blocks, quant);
        let file = self.allocate(&plan, &image)?;
        meter.tick()?;
        Ok(file)
    }

    /// Lossy band steps `Δ_b` per component, as the decoder will reconstruct them.
    fn band_steps(&self, plan: &EncodePlan) -> Vec<Vec<f32>> {
        let levels = plan.cod.style.levels;
        let bands = 1 + 3 * levels as usize;
        plan.siz
            .components
            .iter()
            .map(|c| {
                (0..bands)
                    .map(|i| {
                        if plan.reversible() {
                            return 1.0;
                        }
                        let orientation = orientation_of(i);
                        let norm = synthesis_norm(false, level_of(levels, i), orientation);
                        let range = range_bits(c.depth, orientation);
                        let (eps, mu) = encode_step(plan.base_step / norm, range);
                        decode_step(eps, mu, range) as f32
                    })
                    .collect()
            })
            .collect()
    }

    /// Level shift, colour transform and DWT of one tile.
    fn transform_tile(&self, plan: &EncodePlan, tile: &TileLayout, buffer: &Buffer<&[u8]>) -> TileCoefficients {
        let mut samples: Vec<Vec<i32>> = tile
            .components
            .iter()
            .enumerate()
            .map(|(c, tc)| {
                let info = &plan.siz.components[c];
                let ch = &buffer.channels()[c];
                let shift = if info.signed { 0 } else { 1i64 << (info.depth - 1) };
                let mut out = Vec::with_capacity(tc.width() as usize * tc.height() as usize);
                for y in tc.y0..tc.y1 {
                    for x in tc.x0..tc.x1 {
                        let v = crate::codec::convert_sample(
                            buffer.sample(c, x, y),
                            ch.depth,
                            ch.signed,
                            info.depth,
                            info.signed,
                        );
                        out.push((v - shift) as i32);
                    }
                }
                out
            })
            .collect();
        trace!("tile {}: {} components sampled", tile.index, samples.len());

        if plan.reversible() {
            if plan.mct() {
                let (c0, rest) = samples.split_at_mut(1);
                let (c1, c2) = rest.split_at_mut(1);
                forward_rct(&mut c0[0], &mut c1[0], &mut c2[0]);
            }
            for (data, tc) in samples.iter_mut().zip(&tile.components) {
                forward_53(data, tc);
            }
            TileCoefficients::Integer(samples)
        } else {
            let mut floats: Vec<Vec<f32>> = samples
                .into_iter()
                .map(|s| s.into_iter().map(|v| v as f32).collect())
                .collect();
            if plan.mct() {
                let (c0, rest) = floats.split_at_mut(1);
                let (c1, c2) = rest.split_at_mut(1);
                forward_ict(&mut c0[0], &mut c1[0], &mut c2[0]);
            }
            for (data, tc) in floats.iter_mut().zip(&tile.components) {
                forward_97(data, tc);
            }
            TileCoefficients::Float(floats)
        }
    }

    /// Picks QCD/QCC parameters from the measured coefficient ranges and
    /// clamps lossy indices to what the chosen guard bits allow.
    fn quantization(&self, plan: &EncodePlan, tiles: &[TileLayout], jobs: &mut [BlockJob]) -> Vec<J2kQuantization> {
        let levels = plan.cod.style.levels;
        let bands = 1 + 3 * levels as usize;
        let components = plan.siz.components.len();
        let mut max_bits = vec![vec![0u8; bands]; components];
        for job in jobs.iter() {
            let g = &tiles[job.tile].codeblocks[job.index];
            let band = &tiles[job.tile].components[g.component].resolutions[g.resolution].bands[g.band];
            let i = band_index(g.resolution, band.qcd_index());
            let peak = job.coeffs.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
            let slot = &mut max_bits[g.component][i];
            *slot = (*slot).max(bit_length(peak));
        }

        let quant: Vec<J2kQuantization> = (0..components)
            .map(|c| {
                let info = &plan.siz.components[c];
                if plan.reversible() {
                    // RCT chroma needs one extra bit.
                    let extra = u8::from(plan.mct() && (c == 1 || c == 2));
                    J2kQuantization {
                        style: QUANT_NONE,
                        guard_bits: REVERSIBLE_GUARD_BITS,
                        steps: (0..bands)
                            .map(|i| {
                                let nominal = range_bits(info.depth, orientation_of(i)) + extra;
                                (reversible_exponent(nominal, max_bits[c][i]), 0)
                            })
                            .collect(),
                    }
                } else {
                    let steps: Vec<(u8, u16)> = (0..bands)
                        .map(|i| {
                            let orientation = orientation_of(i);
                            let norm = synthesis_norm(false, level_of(levels, i), orientation);
                            encode_step(plan.base_step / norm, range_bits(info.depth, orientation))
                        })
                        .collect();
                    let guard_bits = guard_bits_for(steps.iter().zip(&max_bits[c]).map(|(s, &b)| (s.0, b)));
                    J2kQuantization {
                        style: QUANT_EXPOUNDED,
                        guard_bits,
                        steps,
                    }
                }
            })
            .collect();

        if !plan.reversible() {
            jobs.par_iter_mut().for_each(|job| {
                let g = &tiles[job.tile].codeblocks[job.index];
                let band = &tiles[job.tile].components[g.component].resolutions[g.resolution].bands[g.band];
                let q = &quant[g.component];
                let limit = max_index(q.guard_bits, q.steps[band_index(g.resolution, band.qcd_index())].0);
                for v in &mut job.coeffs {
                    *v = (*v).clamp(-limit, limit);
                }
            });
        }
        for (c, q) in quant.iter().enumerate() {
            debug!("component {c}: quantization style {}, {} guard bits", q.style, q.guard_bits);
        }
        quant
    }

    /// Rate-distortion data of every block.
    fn rate_model(
        &self,
        plan: &EncodePlan,
        tiles: Vec<TileLayout>,
        blocks: Vec<EncodedBlock>,
        quant: Vec<J2kQuantization>,
    ) -> CodedImage {
        let levels = plan.cod.style.levels;
        let mut offsets = Vec::with_capacity(tiles.len());
        let mut total = 0;
        for tile in &tiles {
            offsets.push(total);
            total += tile.codeblocks.len();
        }

        let mut zero_planes = Vec::with_capacity(blocks.len());
        let mut rd = Vec::with_capacity(blocks.len());
        for (t, tile) in tiles.iter().enumerate() {
            for (i, g) in tile.codeblocks.iter().enumerate() {
                let block = &blocks[offsets[t] + i];
                let band = &tile.components[g.component].resolutions[g.resolution].bands[g.band];
                let q = &quant[g.component];
                let index = band_index(g.resolution, band.qcd_index());
                let eps = q.steps[index].0;
                let mb = magnitude_bits(q.guard_bits, eps) as u32;
                zero_planes.push(mb.saturating_sub(block.num_bps as u32));

                let norm = synthesis_norm(plan.reversible(), band_level(levels, g.resolution), band.orientation);
                let step = if plan.reversible() {
                    1.0
                } else {
                    let range = range_bits(plan.siz.components[g.component].depth, band.orientation);
                    decode_step(eps, q.steps[index].1, range)
                };
                rd.push(RdBlock::new(&block.passes, (step * norm).powi(2)));
            }
        }
        CodedImage {
            tiles,
            offsets,
            blocks,
            zero_planes,
            rd,
            quant,
        }
    }

    /// Chooses truncation points for the method and builds the file.
    fn allocate(&self, plan: &EncodePlan, image: &CodedImage) -> Result<Vec<u8>> {
        let all = image.all_passes();
        match plan.method {
            CompressionMethod::Lossless => Ok(self.assemble(plan, image, &all)?.file),
            CompressionMethod::Quality if !plan.reversible() => Ok(self.assemble(plan, image, &all)?.file),
            CompressionMethod::Quality => {
                let levels = plan.cod.style.levels;
                let mut passes = Vec::with_capacity(all.len());
                for tile in &image.tiles {
                    for g in &tile.codeblocks {
                        let band = &tile.components[g.component].resolutions[g.resolution].bands[g.band];
                        let norm = synthesis_norm(true, band_level(levels, g.resolution), band.orientation);
                        let plane = (plan.base_step / norm).log2().floor() as i32;
                        let block = &image.blocks[passes.len()];
                        passes.push(passes_down_to_plane(block.num_bps, plane).min(block.passes.len()));
                    }
                }
                Ok(self.assemble(plan, image, &passes)?.file)
            }
            CompressionMethod::Size => self.fit_file_size(plan, image),
            CompressionMethod::Cinema => self.fit_cinema(plan, image),
        }
    }

    fn fit_file_size(&self, plan: &EncodePlan, image: &CodedImage) -> Result<Vec<u8>> {
        let target = self.info.settings.file_size.saturating_mul(1024);
        let full = self.assemble(plan, image, &image.all_passes())?;
        if full.file.len() <= target {
            return Ok(full.file);
        }
        let floor = self.assemble(plan, image, &vec![0; image.blocks.len()])?;
        if floor.file.len() > target {
            warn!(
                "{target} byte budget is below the smallest stream ({} bytes); writing that",
                floor.file.len()
            );
            return Ok(floor.file);
        }

        let refs: Vec<&RdBlock> = image.rd.iter().collect();
        let mut budget = target - floor.file.len();
        for attempt in 0..MAX_FIT_ATTEMPTS {
            let lambda = lambda_for_budget(&refs, budget);
            let passes: Vec<usize> = refs.iter().map(|b| b.truncation(lambda)).collect();
            let built = self.assemble(plan, image, &passes)?;
            trace!("size fit {attempt}: budget {budget}, file {} bytes", built.file.len());
            if built.file.len() <= target {
                return Ok(built.file);
            }
            let over = built.file.len() - target;
            budget = budget.saturating_sub(over.max(budget / 64).max(1));
        }
        warn!("could not meet the {target} byte budget; writing the smallest stream");
        Ok(floor.file)
    }

    fn fit_cinema(&self, plan: &EncodePlan, image: &CodedImage) -> Result<Vec<u8>> {
        let components = plan.siz.components.len();
        let mut by_component: Vec<Vec<usize>> = vec![Vec::new(); components];
        for i in 0..image.blocks.len() {
            by_component[image.component_of(i)].push(i);
        }
        let fits = |a: &Assembly| {
            a.codestream_len <= CINEMA_FRAME_BYTES
                && a.part_lengths.iter().all(|&l| l <= CINEMA_COMPONENT_BYTES)
        };

        let full = self.assemble(plan, image, &image.all_passes())?;
        if fits(&full) {
            return Ok(full.file);
        }
        let floor = self.assemble(plan, image, &vec![0; image.blocks.len()])?;
        if !fits(&floor) {
            warn!("DCI byte limits cannot be met; writing the smallest stream");
            return Ok(floor.file);
        }

        let all: Vec<&RdBlock> = image.rd.iter().collect();
        let per_component: Vec<Vec<&RdBlock>> = by_component
            .iter()
            .map(|ids| ids.iter().map(|&i| &image.rd[i]).collect())
            .collect();
        let mut frame_budget = CINEMA_FRAME_BYTES - floor.codestream_len;
        let mut part_budgets: Vec<usize> = floor
            .part_lengths
            .iter()
            .map(|&l| CINEMA_COMPONENT_BYTES - l)
            .collect();

        for attempt in 0..MAX_FIT_ATTEMPTS {
            let frame_lambda = lambda_for_budget(&all, frame_budget);
            let mut passes = vec![0; image.blocks.len()];
            for (c, ids) in by_component.iter().enumerate() {
                let lambda = lambda_for_budget(&per_component[c], part_budgets[c]).max(frame_lambda);
                for &i in ids {
                    passes[i] = image.rd[i].truncation(lambda);
                }
            }
            let built = self.assemble(plan, image, &passes)?;
            trace!(
                "cinema fit {attempt}: frame {} bytes, parts {:?}",
                built.codestream_len,
                built.part_lengths
            );
            if fits(&built) {
                return Ok(built.file);
            }
            if built.codestream_len > CINEMA_FRAME_BYTES {
                let over = built.codestream_len - CINEMA_FRAME_BYTES;
                frame_budget = frame_budget.saturating_sub(over.max(frame_budget / 64).max(1));
            }
            for (budget, &len) in part_budgets.iter_mut().zip(&built.part_lengths) {
                if len > CINEMA_COMPONENT_BYTES {
                    let over = len - CINEMA_COMPONENT_BYTES;
                    *budget = budget.saturating_sub(over.max(*budget / 64).max(1));
                }
            }
        }
        warn!("DCI byte limits not met after {MAX_FIT_ATTEMPTS} attempts; writing the smallest stream");
        Ok(floor.file)
    }

    /// Builds the file with `final_passes` per block in the last layer.
    fn assemble(&self, plan: &EncodePlan, image: &CodedImage, final_passes: &[usize]) -> Result<Assembly> {
        let layers = plan.cod.layers;
        let refs: Vec<&RdBlock> = image.rd.iter().collect();
        let per_layer = layer_passes(&refs, final_passes, image.bytes_at(final_passes), layers);

        let mut writer = J2kWriter::new();
        writer.write_main_header(&plan.siz, &plan.cod, &image.quant, self.comment);

        // (tile, part, data)
        let mut parts: Vec<(u16, Vec<u8>)> = Vec::new();
        for (t, tile) in image.tiles.iter().enumerate() {
            let offset = image.offsets[t];
            let contributions: Vec<BlockContribution> = (0..tile.codeblocks.len())
                .map(|i| BlockContribution {
                    block: &image.blocks[offset + i],
                    zero_planes: image.zero_planes[offset + i],
                    layer_passes: per_layer[offset + i].clone(),
                })
                .collect();
            let sequence = tile.packet_sequence(&plan.siz, plan.cod.order, layers);
            let packets = encode_tile_packets(tile, &sequence, &contributions, layers, true)?;

            if plan.cinema.is_some() {
                let mut by_component = vec![Vec::new(); tile.components.len()];
                for (id, packet) in sequence.iter().zip(packets) {
                    by_component[id.component as usize].extend_from_slice(&packet);
                }
                parts.extend(by_component.into_iter().map(|data| (t as u16, data)));
            } else {
                parts.push((t as u16, packets.concat()));
            }
        }

        let part_lengths: Vec<usize> = parts.iter().map(|(_, d)| TILE_PART_OVERHEAD + d.len()).collect();
        if plan.cinema.is_some() {
            let tlm: Vec<(u8, u32)> = parts
                .iter()
                .zip(&part_lengths)
                .map(|((t, _), &len)| (*t as u8, len as u32))
                .collect();
            writer.write_tlm(&tlm);
            let count = parts.len() as u8;
            for (i, (t, data)) in parts.iter().enumerate() {
                writer.write_tile_part(*t, i as u8, count, data);
            }
        } else {
            for (t, data) in &parts {
                writer.write_tile_part(*t, 0, 1, data);
            }
        }
        let codestream = writer.finish();
        let header = Jp2Header::from_file_info(self.info, &plan.siz.components)?;
        let file = write_container(&header, &codestream);
        Ok(Assembly {
            codestream_len: codestream.len(),
            file,
            part_lengths,
        })
    }
}

/// Copies (and for 9/7, quantizes) the coefficients of every code-block of a tile.
fn extract_blocks(tile: &TileLayout, coefficients: &TileCoefficients, steps: &[Vec<f32>]) -> Vec<BlockJob> {
    tile.codeblocks
        .iter()
        .enumerate()
        .map(|(index, g)| {
            let tc = &tile.components[g.component];
            let stride = tc.width() as usize;
            let band = &tc.resolutions[g.resolution].bands[g.band];
            let (w, h) = (g.width() as usize, g.height() as usize);
            let mut coeffs = Vec::with_capacity(w * h);
            for y in 0..h {
                let start = (g.array_y as usize + y) * stride + g.array_x as usize;
                match coefficients {
                    TileCoefficients::Integer(data) => {
                        coeffs.extend_from_slice(&data[g.component][start..start + w]);
                    }
                    TileCoefficients::Float(data) => {
                        let step = steps[g.component][band_index(g.resolution, band.qcd_index())];
                        coeffs.extend(
                            data[g.component][start..start + w]
                                .iter()
                                .map(|&v| quantize_scalar(v, step)),
                        );
                    }
                }
            }
            BlockJob {
                tile: tile.index,
                index,
                coeffs,
            }
        })
        .collect()
}
