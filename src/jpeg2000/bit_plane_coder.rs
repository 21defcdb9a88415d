//! EBCOT tier-1: bit-plane coding of one code-block with the MQ coder
//! (ISO/IEC 15444-1 Annex D).

use super::image::SubbandOrientation;
use super::mq_coder::{MqContext, MqDecoder, MqEncoder};
use crate::error::{J2kError, Result};

// Code-block style flags (SPcod byte 8).
pub const CBLK_BYPASS: u8 = 0x01;
pub const CBLK_RESET: u8 = 0x02;
pub const CBLK_TERMALL: u8 = 0x04;
pub const CBLK_VCAUSAL: u8 = 0x08;
pub const CBLK_PTERM: u8 = 0x10;
pub const CBLK_SEGSYM: u8 = 0x20;

/// Largest number of magnitude bit-planes a code-block may carry.
pub const MAX_BITPLANES: u8 = 30;

const CTX_MR: usize = 14;
const CTX_RL: usize = 17;
const CTX_UNI: usize = 18;
const NUM_CONTEXTS: usize = 19;

// Per-coefficient state bits
const SIG: u8 = 1 << 0;
const VISIT: u8 = 1 << 1;
const REFINED: u8 = 1 << 2;
const NEG: u8 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    Significance,
    Refinement,
    Cleanup,
}

/// Bit-plane and kind of pass `k` of a block with `num_bps` magnitude planes.
fn pass_kind(k: usize, num_bps: u32) -> (u32, PassKind) {
    if k == 0 {
        return (num_bps - 1, PassKind::Cleanup);
    }
    let plane = num_bps - 1 - ((k - 1) / 3 + 1) as u32;
    let kind = match (k - 1) % 3 {
        0 => PassKind::Significance,
        1 => PassKind::Refinement,
        _ => PassKind::Cleanup,
    };
    (plane, kind)
}

/// Number of passes a block with `num_bps` planes produces when fully coded.
pub fn max_passes(num_bps: u8) -> usize {
    if num_bps == 0 { 0 } else { 3 * num_bps as usize - 2 }
}

fn initial_contexts() -> [MqContext; NUM_CONTEXTS] {
    let mut cx = [MqContext::default(); NUM_CONTEXTS];
    cx[0] = MqContext::with_state(4);
    cx[CTX_RL] = MqContext::with_state(3);
    cx[CTX_UNI] = MqContext::with_state(46);
    cx
}

/// Coding state shared by the encoder and decoder: the padded flag grid and contexts.
struct BlockState {
    width: usize,
    height: usize,
    stride: usize,
    flags: Vec<u8>,
    orientation: SubbandOrientation,
    vcausal: bool,
    contexts: [MqContext; NUM_CONTEXTS],
}

impl BlockState {
    fn new(width: usize, height: usize, orientation: SubbandOrientation, style: u8) -> Self {
        let stride = width + 2;
        Self {
            width,
            height,
            stride,
            flags: vec![0; stride * (height + 2)],
            orientation,
            vcausal: style & CBLK_VCAUSAL != 0,
            contexts: initial_contexts(),
        }
    }

    fn index(&self, x: usize, y: usize) -> usize {
        (y + 1) * self.stride + x + 1
    }

    /// In vertically causal mode the row below a stripe is out of reach.
    fn below_hidden(&self, y: usize) -> bool {
        self.vcausal && y % 4 == 3
    }

    fn is_sig(&self, i: usize) -> u32 {
        (self.flags[i] & SIG) as u32
    }

    /// Significant neighbours: (horizontal, vertical, diagonal).
    fn neighbourhood(&self, i: usize, y: usize) -> (u32, u32, u32) {
        let s = self.stride;
        let h = self.is_sig(i - 1) + self.is_sig(i + 1);
        let mut v = self.is_sig(i - s);
        let mut d = self.is_sig(i - s - 1) + self.is_sig(i - s + 1);
        if !self.below_hidden(y) {
            v += self.is_sig(i + s);
            d += self.is_sig(i + s - 1) + self.is_sig(i + s + 1);
        }
        (h, v, d)
    }

    fn zc_context(&self, i: usize, y: usize) -> usize {
        let (h, v, d) = self.neighbourhood(i, y);
        zero_coding_context(self.orientation, h, v, d)
    }

    fn mr_context(&self, i: usize, y: usize) -> usize {
        if self.flags[i] & REFINED != 0 {
            return CTX_MR + 2;
        }
        let (h, v, d) = self.neighbourhood(i, y);
        if h + v + d > 0 { CTX_MR + 1 } else { CTX_MR }
    }

    fn sign_contribution(&self, i: usize) -> i32 {
        match self.flags[i] & (SIG | NEG) {
            f if f & SIG == 0 => 0,
            f if f & NEG != 0 => -1,
            _ => 1,
        }
    }

    /// Sign-coding context and the bit that is XORed with the sign (Table D.3).
    fn sign_context(&self, i: usize, y: usize) -> (usize, u32) {
        let s = self.stride;
        let h = (self.sign_contribution(i - 1) + self.sign_contribution(i + 1)).clamp(-1, 1);
        let mut v = self.sign_contribution(i - s);
        if !self.below_hidden(y) {
            v += self.sign_contribution(i + s);
        }
        match (h, v.clamp(-1, 1)) {
            (1, 1) => (13, 0),
            (1, 0) => (12, 0),
            (1, -1) => (11, 0),
            (0, 1) => (10, 0),
            (0, 0) => (9, 0),
            (0, -1) => (10, 1),
            (-1, 1) => (11, 1),
            (-1, 0) => (12, 1),
            _ => (13, 1),
        }
    }

    /// Whether a whole stripe column qualifies for run-length coding.
    fn run_length_column(&self, x: usize, y0: usize) -> bool {
        if y0 + 4 > self.height {
            return false;
        }
        (y0..y0 + 4).all(|y| {
            let i = self.index(x, y);
            let (h, v, d) = self.neighbourhood(i, y);
            self.flags[i] & (SIG | VISIT) == 0 && h + v + d == 0
        })
    }

    fn clear_visited(&mut self) {
        for f in &mut self.flags {
            *f &= !VISIT;
        }
    }

    fn reset_contexts(&mut self) {
        self.contexts = initial_contexts();
    }
}

/// Zero-coding context from neighbour counts (Table D.1).
fn zero_coding_context(orientation: SubbandOrientation, h: u32, v: u32, d: u32) -> usize {
    let (h, v) = match orientation {
        SubbandOrientation::HL => (v, h),
        _ => (h, v),
    };
    if orientation == SubbandOrientation::HH {
        let hv = h + v;
        return match (d, hv) {
            (d, _) if d >= 3 => 8,
            (2, hv) if hv >= 1 => 7,
            (2, _) => 6,
            (1, hv) if hv >= 2 => 5,
            (1, 1) => 4,
            (1, _) => 3,
            (_, hv) if hv >= 2 => 2,
            (_, 1) => 1,
            _ => 0,
        };
    }
    match (h, v, d) {
        (2, _, _) => 8,
        (1, v, _) if v >= 1 => 7,
        (1, 0, d) if d >= 1 => 6,
        (1, _, _) => 5,
        (0, 2, _) => 4,
        (0, 1, _) => 3,
        (0, 0, d) if d >= 2 => 2,
        (0, 0, 1) => 1,
        _ => 0,
    }
}

/// One coding pass: cumulative byte length and cumulative squared-error
/// decrease (in quantization-index units) at its end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodingPass {
    pub end: usize,
    pub distortion: f64,
}

/// Result of coding one code-block.
#[derive(Debug, Clone, Default)]
pub struct EncodedBlock {
    pub data: Vec<u8>,
    pub passes: Vec<CodingPass>,
    /// Magnitude bit-planes actually coded.
    pub num_bps: u8,
}

fn reconstruction(m: u32, p: u32) -> f64 {
    if p == 0 {
        m as f64
    } else {
        (((m >> p) << p) + (1 << (p - 1))) as f64
    }
}

fn significance_gain(m: u32, p: u32) -> f64 {
    let mf = m as f64;
    let e = mf - reconstruction(m, p);
    mf * mf - e * e
}

fn refinement_gain(m: u32, p: u32) -> f64 {
    let mf = m as f64;
    let before = mf - reconstruction(m, p + 1);
    let after = mf - reconstruction(m, p);
    before * before - after * after
}

struct BlockEncoder<'a> {
    st: BlockState,
    mq: MqEncoder,
    mags: &'a [u32],
    distortion: f64,
}

impl BlockEncoder<'_> {
    fn magnitude(&self, x: usize, y: usize) -> u32 {
        self.mags[y * self.st.width + x]
    }

    fn encode_sign(&mut self, i: usize, y: usize) {
        let (cx, xor) = self.st.sign_context(i, y);
        let neg = u32::from(self.st.flags[i] & NEG != 0);
        self.mq.encode(&mut self.st.contexts[cx], neg ^ xor);
    }

    fn become_significant(&mut self, i: usize, y: usize, m: u32, p: u32) {
        self.encode_sign(i, y);
        self.st.flags[i] |= SIG;
        self.distortion += significance_gain(m, p);
    }

    fn significance_pass(&mut self, p: u32) {
        let (w, h) = (self.st.width, self.st.height);
        for y0 in (0..h).step_by(4) {
            for x in 0..w {
                for y in y0..(y0 + 4).min(h) {
                    let i = self.st.index(x, y);
                    if self.st.flags[i] & SIG != 0 {
                        continue;
                    }
                    let (hn, vn, dn) = self.st.neighbourhood(i, y);
                    if hn + vn + dn == 0 {
                        continue;
                    }
                    let m = self.magnitude(x, y);
                    let bit = (m >> p) & 1;
                    let cx = self.st.zc_context(i, y);
                    self.mq.encode(&mut self.st.contexts[cx], bit);
                    if bit == 1 {
                        self.become_significant(i, y, m, p);
                    }
                    self.st.flags[i] |= VISIT;
                }
            }
        }
    }

    fn refinement_pass(&mut self, p: u32) {
        let (w, h) = (self.st.width, self.st.height);
        for y0 in (0..h).step_by(4) {
            for x in 0..w {
                for y in y0..(y0 + 4).min(h) {
                    let i = self.st.index(x, y);
                    if self.st.flags[i] & (SIG | VISIT) != SIG {
                        continue;
                    }
                    let m = self.magnitude(x, y);
                    let cx = self.st.mr_context(i, y);
                    self.mq.encode(&mut self.st.contexts[cx], (m >> p) & 1);
                    self.st.flags[i] |= REFINED;
                    self.distortion += refinement_gain(m, p);
                }
            }
        }
    }

    fn cleanup_pass(&mut self, p: u32) {
        let (w, h) = (self.st.width, self.st.height);
        for y0 in (0..h).step_by(4) {
            for x in 0..w {
                let mut start = y0;
                if self.st.run_length_column(x, y0) {
                    let first = (0..4).find(|&r| (self.magnitude(x, y0 + r) >> p) & 1 == 1);
                    let Some(r) = first else {
                        self.mq.encode(&mut self.st.contexts[CTX_RL], 0);
                        continue;
                    };
                    self.mq.encode(&mut self.st.contexts[CTX_RL], 1);
                    self.mq.encode(&mut self.st.contexts[CTX_UNI], (r >> 1) as u32);
                    self.mq.encode(&mut self.st.contexts[CTX_UNI], (r & 1) as u32);
                    let y = y0 + r;
                    let i = self.st.index(x, y);
                    let m = self.magnitude(x, y);
                    self.become_significant(i, y, m, p);
                    start = y + 1;
                }
                for y in start..(y0 + 4).min(h) {
                    let i = self.st.index(x, y);
                    if self.st.flags[i] & (SIG | VISIT) != 0 {
                        continue;
                    }
                    let m = self.magnitude(x, y);
                    let bit = (m >> p) & 1;
                    let cx = self.st.zc_context(i, y);
                    self.mq.encode(&mut self.st.contexts[cx], bit);
                    if bit == 1 {
                        self.become_significant(i, y, m, p);
                    }
                }
            }
        }
        self.st.clear_visited();
    }
}

/// Codes a block of quantization indices (row-major, `width * height`).
///
/// With [`CBLK_TERMALL`] every pass ends its own MQ segment and `end` is exact
/// for every pass; otherwise only the last pass length is exact.
pub fn encode_code_block(
    coeffs: &[i32],
    width: usize,
    height: usize,
    orientation: SubbandOrientation,
    style: u8,
) -> EncodedBlock {
    let mags: Vec<u32> = coeffs.iter().map(|c| c.unsigned_abs()).collect();
    let max = mags.iter().copied().max().unwrap_or(0);
    let num_bps = (32 - max.leading_zeros()).min(MAX_BITPLANES as u32);
    let mut block = EncodedBlock {
        num_bps: num_bps as u8,
        ..EncodedBlock::default()
    };
    if num_bps == 0 {
        return block;
    }

    let mut enc = BlockEncoder {
        st: BlockState::new(width, height, orientation, style),
        mq: MqEncoder::new(),
        mags: &mags,
        distortion: 0.0,
    };
    for y in 0..height {
        for x in 0..width {
            if coeffs[y * width + x] < 0 {
                let i = enc.st.index(x, y);
                enc.st.flags[i] |= NEG;
            }
        }
    }

    let total = max_passes(num_bps as u8);
    let termall = style & CBLK_TERMALL != 0;
    for k in 0..total {
        let (p, kind) = pass_kind(k, num_bps);
        match kind {
            PassKind::Significance => enc.significance_pass(p),
            PassKind::Refinement => enc.refinement_pass(p),
            PassKind::Cleanup => {
                enc.cleanup_pass(p);
                if style & CBLK_SEGSYM != 0 {
                    for bit in [1, 0, 1, 0] {
                        enc.mq.encode(&mut enc.st.contexts[CTX_UNI], bit);
                    }
                }
            }
        }
        if style & CBLK_RESET != 0 {
            enc.st.reset_contexts();
        }
        let end = if termall || k + 1 == total {
            let segment = std::mem::take(&mut enc.mq).flush();
            block.data.extend_from_slice(&segment);
            block.data.len()
        } else {
            block.data.len() + enc.mq.bytes_written()
        };
        block.passes.push(CodingPass {
            end,
            distortion: enc.distortion,
        });
    }

    let len = block.data.len();
    let mut floor = 0;
    for pass in &mut block.passes {
        pass.end = pass.end.clamp(floor, len);
        floor = pass.end;
    }
    block
}

struct BlockDecoder {
    st: BlockState,
    /// Doubled magnitudes, so the midpoint of the last plane stays integral.
    values: Vec<i32>,
}

impl BlockDecoder {
    fn decode_sign(&mut self, mq: &mut MqDecoder, i: usize, y: usize) {
        let (cx, xor) = self.st.sign_context(i, y);
        if mq.decode(&mut self.st.contexts[cx]) ^ xor == 1 {
            self.st.flags[i] |= NEG;
        }
    }

    fn become_significant(&mut self, mq: &mut MqDecoder, x: usize, y: usize, p: u32) {
        let i = self.st.index(x, y);
        self.decode_sign(mq, i, y);
        self.st.flags[i] |= SIG;
        self.values[y * self.st.width + x] = 3 << p;
    }

    fn significance_pass(&mut self, mq: &mut MqDecoder, p: u32) {
        let (w, h) = (self.st.width, self.st.height);
        for y0 in (0..h).step_by(4) {
            for x in 0..w {
                for y in y0..(y0 + 4).min(h) {
                    let i = self.st.index(x, y);
                    if self.st.flags[i] & SIG != 0 {
                        continue;
                    }
                    let (hn, vn, dn) = self.st.neighbourhood(i, y);
                    if hn + vn + dn == 0 {
                        continue;
                    }
                    let cx = self.st.zc_context(i, y);
                    if mq.decode(&mut self.st.contexts[cx]) == 1 {
                        self.become_significant(mq, x, y, p);
                    }
                    self.st.flags[i] |= VISIT;
                }
            }
        }
    }

    fn refinement_pass(&mut self, mq: &mut MqDecoder, p: u32) {
        let (w, h) = (self.st.width, self.st.height);
        for y0 in (0..h).step_by(4) {
            for x in 0..w {
                for y in y0..(y0 + 4).min(h) {
                    let i = self.st.index(x, y);
                    if self.st.flags[i] & (SIG | VISIT) != SIG {
                        continue;
                    }
                    let cx = self.st.mr_context(i, y);
                    let v = &mut self.values[y * w + x];
                    if mq.decode(&mut self.st.contexts[cx]) == 1 {
                        *v += 1 << p;
                    } else {
                        *v -= 1 << p;
                    }
                    self.st.flags[i] |= REFINED;
                }
            }
        }
    }

    fn cleanup_pass(&mut self, mq: &mut MqDecoder, p: u32) {
        let (w, h) = (self.st.width, self.st.height);
        for y0 in (0..h).step_by(4) {
            for x in 0..w {
                let mut start = y0;
                if self.st.run_length_column(x, y0) {
                    if mq.decode(&mut self.st.contexts[CTX_RL]) == 0 {
                        continue;
                    }
                    let hi = mq.decode(&mut self.st.contexts[CTX_UNI]);
                    let lo = mq.decode(&mut self.st.contexts[CTX_UNI]);
                    let y = y0 + ((hi << 1) | lo) as usize;
                    self.become_significant(mq, x, y, p);
                    start = y + 1;
                }
                for y in start..(y0 + 4).min(h) {
                    let i = self.st.index(x, y);
                    if self.st.flags[i] & (SIG | VISIT) != 0 {
                        continue;
                    }
                    let cx = self.st.zc_context(i, y);
                    if mq.decode(&mut self.st.contexts[cx]) == 1 {
                        self.become_significant(mq, x, y, p);
                    }
                }
            }
        }
        self.st.clear_visited();
    }
}

/// Decodes a code-block from its codeword segments, each paired with the
/// number of passes it holds.
///
/// Returns signed doubled magnitudes: `v / 2` is the reconstructed index,
/// with undecoded planes filled at the interval midpoint.
pub fn decode_code_block(
    segments: &[(&[u8], usize)],
    width: usize,
    height: usize,
    orientation: SubbandOrientation,
    num_bps: u8,
    style: u8,
) -> Result<Vec<i32>> {
    if style & CBLK_BYPASS != 0 {
        return Err(J2kError::unsupported("arithmetic-coder bypass code-blocks"));
    }
    if num_bps > MAX_BITPLANES {
        return Err(J2kError::invalid(format!("{num_bps} bit-planes in a code-block")));
    }
    let total: usize = segments.iter().map(|s| s.1).sum();
    if total > max_passes(num_bps) {
        return Err(J2kError::invalid(format!(
            "{total} coding passes for {num_bps} bit-planes"
        )));
    }

    let mut dec = BlockDecoder {
        st: BlockState::new(width, height, orientation, style),
        values: vec![0; width * height],
    };
    let mut k = 0;
    for &(data, passes) in segments {
        let mut mq = MqDecoder::new(data);
        for _ in 0..passes {
            let (p, kind) = pass_kind(k, num_bps as u32);
            match kind {
                PassKind::Significance => dec.significance_pass(&mut mq, p),
                PassKind::Refinement => dec.refinement_pass(&mut mq, p),
                PassKind::Cleanup => {
                    dec.cleanup_pass(&mut mq, p);
                    if style & CBLK_SEGSYM != 0 {
                        for _ in 0..4 {
                            mq.decode(&mut dec.st.contexts[CTX_UNI]);
                        }
                    }
                }
            }
            if style & CBLK_RESET != 0 {
                dec.st.reset_contexts();
            }
            k += 1;
        }
    }

    for y in 0..height {
        for x in 0..width {
            if dec.st.flags[dec.st.index(x, y)] & NEG != 0 {
                dec.values[y * width + x] = -dec.values[y * width + x];
            }
        }
    }
    Ok(dec.values)
}
