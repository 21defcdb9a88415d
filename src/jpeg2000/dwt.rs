//! Discrete wavelet transform by lifting (ISO/IEC 15444-1 Annex F).
//!
//! Tile-components are transformed in place in a deinterleaved layout: after
//! each level the low-pass part sits in the top-left corner, HL to its right,
//! LH below and HH diagonally. Start parity follows the resolution's
//! coordinates on the reference grid, and signals are extended by whole-sample
//! symmetric reflection.

use std::sync::OnceLock;

use super::image::{SubbandOrientation, TileComponent};

const PAD_53: usize = 2;
const PAD_97: usize = 4;

const ALPHA: f64 = -1.586_134_342_059_924;
const BETA: f64 = -0.052_980_118_572_961;
const GAMMA: f64 = 0.882_911_075_530_934;
const DELTA: f64 = 0.443_506_852_043_971;
const K: f64 = 1.230_174_104_914_001;

/// Whether ext position `j` holds an odd (high-pass) sample.
fn is_high(j: usize, odd: bool) -> bool {
    (j + usize::from(odd)) % 2 == 1
}

fn low_count(n: usize, odd: bool) -> usize {
    if odd { n / 2 } else { n.div_ceil(2) }
}

/// Whole-sample symmetric index into a signal of length `n >= 2`.
fn reflect(k: isize, n: usize) -> usize {
    let period = 2 * (n as isize - 1);
    let k = k.rem_euclid(period);
    (if k >= n as isize { period - k } else { k }) as usize
}

/// Fills the `pad` samples on either side of `ext[pad..pad + n]`.
fn extend<T: Copy>(ext: &mut [T], pad: usize, n: usize) {
    for m in 1..=pad {
        ext[pad - m] = ext[pad + reflect(-(m as isize), n)];
        ext[pad + n - 1 + m] = ext[pad + reflect((n - 1 + m) as isize, n)];
    }
}

/// Applies one lifting step to every position of the given parity.
fn lift<T: Copy>(ext: &mut [T], high: bool, odd: bool, step: impl Fn(T, T, T) -> T) {
    let mut j = if is_high(1, odd) == high { 1 } else { 2 };
    while j + 1 < ext.len() {
        ext[j] = step(ext[j], ext[j - 1], ext[j + 1]);
        j += 2;
    }
}

/// Interleaved `ext` interior to `out`, low-pass samples first.
fn split<T: Copy, U>(ext: &[T], pad: usize, odd: bool, out: &mut [U], conv: impl Fn(T) -> U) {
    let n = out.len();
    let mut lo = 0;
    let mut hi = low_count(n, odd);
    for j in pad..pad + n {
        if is_high(j, odd) {
            out[hi] = conv(ext[j]);
            hi += 1;
        } else {
            out[lo] = conv(ext[j]);
            lo += 1;
        }
    }
}

/// Deinterleaved `line` into the interior of `ext`, then extended.
fn merge<T: Copy, U: Copy + Default>(
    line: &[T],
    pad: usize,
    odd: bool,
    ext: &mut Vec<U>,
    conv: impl Fn(T) -> U,
) {
    let n = line.len();
    ext.clear();
    ext.resize(n + 2 * pad, U::default());
    let mut lo = 0;
    let mut hi = low_count(n, odd);
    for j in pad..pad + n {
        if is_high(j, odd) {
            ext[j] = conv(line[hi]);
            hi += 1;
        } else {
            ext[j] = conv(line[lo]);
            lo += 1;
        }
    }
    extend(ext, pad, n);
}

fn forward_53_line(line: &mut [i32], odd: bool, ext: &mut Vec<i32>) {
    let n = line.len();
    if n == 1 {
        if odd {
            line[0] *= 2;
        }
        return;
    }
    ext.clear();
    ext.resize(n + 2 * PAD_53, 0);
    ext[PAD_53..PAD_53 + n].copy_from_slice(line);
    extend(ext, PAD_53, n);
    lift(ext, true, odd, |c, l, r| c - ((l + r) >> 1));
    lift(ext, false, odd, |c, l, r| c + ((l + r + 2) >> 2));
    split(ext, PAD_53, odd, line, |v| v);
}

fn inverse_53_line(line: &mut [i32], odd: bool, ext: &mut Vec<i32>) {
    let n = line.len();
    if n == 1 {
        if odd {
            line[0] >>= 1;
        }
        return;
    }
    merge(line, PAD_53, odd, ext, |v| v);
    lift(ext, false, odd, |c, l, r| c - ((l + r + 2) >> 2));
    lift(ext, true, odd, |c, l, r| c + ((l + r) >> 1));
    line.copy_from_slice(&ext[PAD_53..PAD_53 + n]);
}

fn forward_97_line(line: &mut [f32], odd: bool, ext: &mut Vec<f64>) {
    let n = line.len();
    if n == 1 {
        if odd {
            line[0] *= 2.0;
        }
        return;
    }
    ext.clear();
    ext.resize(n + 2 * PAD_97, 0.0);
    for (e, &v) in ext[PAD_97..].iter_mut().zip(line.iter()) {
        *e = v as f64;
    }
    extend(ext, PAD_97, n);
    lift(ext, true, odd, |c, l, r| c + ALPHA * (l + r));
    lift(ext, false, odd, |c, l, r| c + BETA * (l + r));
    lift(ext, true, odd, |c, l, r| c + GAMMA * (l + r));
    lift(ext, false, odd, |c, l, r| c + DELTA * (l + r));
    for (j, v) in ext.iter_mut().enumerate() {
        if is_high(j, odd) {
            *v *= K;
        } else {
            *v /= K;
        }
    }
    split(ext, PAD_97, odd, line, |v| v as f32);
}

fn inverse_97_ext(ext: &mut [f64], odd: bool) {
    for (j, v) in ext.iter_mut().enumerate() {
        if is_high(j, odd) {
            *v /= K;
        } else {
            *v *= K;
        }
    }
    lift(ext, false, odd, |c, l, r| c - DELTA * (l + r));
    lift(ext, true, odd, |c, l, r| c - GAMMA * (l + r));
    lift(ext, false, odd, |c, l, r| c - BETA * (l + r));
    lift(ext, true, odd, |c, l, r| c - ALPHA * (l + r));
}

fn inverse_97_line(line: &mut [f32], odd: bool, ext: &mut Vec<f64>) {
    let n = line.len();
    if n == 1 {
        if odd {
            line[0] /= 2.0;
        }
        return;
    }
    merge(line, PAD_97, odd, ext, |v| v as f64);
    inverse_97_ext(ext, odd);
    for (l, &e) in line.iter_mut().zip(&ext[PAD_97..PAD_97 + n]) {
        *l = e as f32;
    }
}

/// Runs `f` over every row of the `w x h` top-left region.
fn rows<T>(data: &mut [T], stride: usize, w: usize, h: usize, mut f: impl FnMut(&mut [T])) {
    for y in 0..h {
        f(&mut data[y * stride..y * stride + w]);
    }
}

/// Runs `f` over every column of the `w x h` top-left region.
fn columns<T: Copy + Default>(
    data: &mut [T],
    stride: usize,
    w: usize,
    h: usize,
    mut f: impl FnMut(&mut [T]),
) {
    let mut col = vec![T::default(); h];
    for x in 0..w {
        for (y, c) in col.iter_mut().enumerate() {
            *c = data[y * stride + x];
        }
        f(&mut col);
        for (y, &c) in col.iter().enumerate() {
            data[y * stride + x] = c;
        }
    }
}

/// `(width, height, x0 odd, y0 odd)` of resolution `r`.
fn resolution_shape(tc: &TileComponent, r: usize) -> (usize, usize, bool, bool) {
    let res = &tc.resolutions[r];
    (
        res.width() as usize,
        res.height() as usize,
        res.x0 % 2 == 1,
        res.y0 % 2 == 1,
    )
}

/// Reversible 5/3 analysis of a whole tile-component.
pub fn forward_53(data: &mut [i32], tc: &TileComponent) {
    let stride = tc.width() as usize;
    let mut ext = Vec::new();
    for r in (1..tc.resolutions.len()).rev() {
        let (w, h, odd_x, odd_y) = resolution_shape(tc, r);
        if w == 0 || h == 0 {
            continue;
        }
        columns(data, stride, w, h, |line| forward_53_line(line, odd_y, &mut ext));
        rows(data, stride, w, h, |line| forward_53_line(line, odd_x, &mut ext));
    }
}

/// Reversible 5/3 synthesis up to and including `resolution`.
pub fn inverse_53(data: &mut [i32], tc: &TileComponent, resolution: usize) {
    let stride = tc.width() as usize;
    let mut ext = Vec::new();
    for r in 1..=resolution.min(tc.resolutions.len() - 1) {
        let (w, h, odd_x, odd_y) = resolution_shape(tc, r);
        if w == 0 || h == 0 {
            continue;
        }
        rows(data, stride, w, h, |line| inverse_53_line(line, odd_x, &mut ext));
        columns(data, stride, w, h, |line| inverse_53_line(line, odd_y, &mut ext));
    }
}

/// Irreversible 9/7 analysis of a whole tile-component.
pub fn forward_97(data: &mut [f32], tc: &TileComponent) {
    let stride = tc.width() as usize;
    let mut ext = Vec::new();
    for r in (1..tc.resolutions.len()).rev() {
        let (w, h, odd_x, odd_y) = resolution_shape(tc, r);
        if w == 0 || h == 0 {
            continue;
        }
        columns(data, stride, w, h, |line| forward_97_line(line, odd_y, &mut ext));
        rows(data, stride, w, h, |line| forward_97_line(line, odd_x, &mut ext));
    }
}

/// Irreversible 9/7 synthesis up to and including `resolution`.
pub fn inverse_97(data: &mut [f32], tc: &TileComponent, resolution: usize) {
    let stride = tc.width() as usize;
    let mut ext = Vec::new();
    for r in 1..=resolution.min(tc.resolutions.len() - 1) {
        let (w, h, odd_x, odd_y) = resolution_shape(tc, r);
        if w == 0 || h == 0 {
            continue;
        }
        rows(data, stride, w, h, |line| inverse_97_line(line, odd_x, &mut ext));
        columns(data, stride, w, h, |line| inverse_97_line(line, odd_y, &mut ext));
    }
}

/// Deepest level whose basis norm is computed directly; deeper ones extrapolate.
const NORM_LEVELS: usize = 15;

/// 1-D synthesis norms indexed `[reversible][high][level]`.
type NormTable = [[[f64; NORM_LEVELS + 1]; 2]; 2];

fn synthesis_line(line: &mut [f64], reversible: bool, ext: &mut Vec<f64>) {
    let n = line.len();
    if n < 2 {
        return;
    }
    let pad = if reversible { PAD_53 } else { PAD_97 };
    merge(line, pad, false, ext, |v| v);
    if reversible {
        lift(ext, false, false, |c, l, r| c - (l + r) / 4.0);
        lift(ext, true, false, |c, l, r| c + (l + r) / 2.0);
    } else {
        inverse_97_ext(ext, false);
    }
    line.copy_from_slice(&ext[pad..pad + n]);
}

/// L2 norm of the synthesised impulse of a 1-D band at `level`.
fn impulse_norm(reversible: bool, high: bool, level: usize) -> f64 {
    if level == 0 {
        return 1.0;
    }
    let len = 16usize << level;
    let band = len >> level;
    let mut line = vec![0.0; len];
    line[if high { band + band / 2 } else { band / 2 }] = 1.0;
    let mut ext = Vec::new();
    for lev in (1..=level).rev() {
        synthesis_line(&mut line[..len >> (lev - 1)], reversible, &mut ext);
    }
    line.iter().map(|v| v * v).sum::<f64>().sqrt()
}

fn norm_table() -> &'static NormTable {
    static NORMS: OnceLock<NormTable> = OnceLock::new();
    NORMS.get_or_init(|| {
        let mut table = [[[1.0; NORM_LEVELS + 1]; 2]; 2];
        for (rev, per_kind) in table.iter_mut().enumerate() {
            for (high, per_level) in per_kind.iter_mut().enumerate() {
                for (level, v) in per_level.iter_mut().enumerate() {
                    *v = impulse_norm(rev == 1, high == 1, level);
                }
            }
        }
        table
    })
}

fn norm_1d(reversible: bool, high: bool, level: usize) -> f64 {
    let table = &norm_table()[usize::from(reversible)][usize::from(high)];
    if level <= NORM_LEVELS {
        table[level]
    } else {
        // Deep low-pass bases grow by sqrt(2) per level.
        table[NORM_LEVELS] * 2f64.sqrt().powi((level - NORM_LEVELS) as i32)
    }
}

/// L2 norm of the 2-D synthesis basis of a band produced at decomposition
/// level `level` (1 is the finest; the LL band uses the total level count).
pub fn synthesis_norm(reversible: bool, level: u8, orientation: SubbandOrientation) -> f64 {
    let (hx, hy) = orientation.high_pass();
    let level = level as usize;
    norm_1d(reversible, hx, level) * norm_1d(reversible, hy, level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::image::{J2kCodingStyle, J2kComponentInfo, J2kSiz, TileLayout};

    fn layout(x0: u32, y0: u32, w: u32, h: u32, levels: u8) -> TileComponent {
        let siz = J2kSiz {
            x0,
            y0,
            x1: x0 + w,
            y1: y0 + h,
            tile_width: x0 + w,
            tile_height: y0 + h,
            components: vec![J2kComponentInfo {
                depth: 8,
                signed: false,
                dx: 1,
                dy: 1,
            }],
            ..J2kSiz::default()
        };
        let style = J2kCodingStyle {
            levels,
            ..J2kCodingStyle::default()
        };
        TileLayout::new(&siz, 0, &[style]).unwrap().components.remove(0)
    }

    fn ramp(n: usize) -> Vec<i32> {
        (0..n).map(|i| ((i * 37 + i / 5 * 11) % 256) as i32 - 128).collect()
    }

    #[test]
    fn test_53_perfect_reconstruction_any_parity() {
        for (x0, y0, w, h) in [(0, 0, 17, 9), (3, 1, 16, 16), (1, 2, 1, 7), (5, 5, 2, 3)] {
            let tc = layout(x0, y0, w, h, 3);
            let original = ramp((w * h) as usize);
            let mut data = original.clone();
            forward_53(&mut data, &tc);
            assert_ne!(data, original);
            inverse_53(&mut data, &tc, 3);
            assert_eq!(data, original, "origin ({x0},{y0}) size {w}x{h}");
        }
    }

    #[test]
    fn test_53_constant_signal_has_no_detail() {
        let tc = layout(0, 0, 16, 16, 2);
        let mut data = vec![50; 256];
        forward_53(&mut data, &tc);
        // LL band is 4x4 at the top-left; every detail coefficient is zero.
        for y in 0..16 {
            for x in 0..16 {
                let v = data[y * 16 + x];
                if x < 4 && y < 4 {
                    assert_eq!(v, 50);
                } else {
                    assert_eq!(v, 0);
                }
            }
        }
    }

    #[test]
    fn test_97_reconstruction() {
        let tc = layout(1, 0, 23, 19, 4);
        let original: Vec<f32> = ramp(23 * 19).into_iter().map(|v| v as f32).collect();
        let mut data = original.clone();
        forward_97(&mut data, &tc);
        inverse_97(&mut data, &tc, 4);
        for (a, b) in data.iter().zip(&original) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_partial_synthesis_gives_low_resolution() {
        let tc = layout(0, 0, 32, 32, 2);
        let mut data = vec![80; 32 * 32];
        forward_53(&mut data, &tc);
        inverse_53(&mut data, &tc, 1);
        // Resolution 1 is 16x16 and carries the same DC value.
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(data[y * 32 + x], 80);
            }
        }
    }

    #[test]
    fn test_synthesis_norms() {
        // The 5/3 low-pass synthesis filter is (1/2, 1, 1/2).
        let low = synthesis_norm(true, 1, SubbandOrientation::LL);
        assert!((low.sqrt() - 1.5f64.sqrt()).abs() < 1e-9);
        let hh97 = synthesis_norm(false, 1, SubbandOrientation::HH);
        let ll97 = synthesis_norm(false, 5, SubbandOrientation::LL);
        assert!(hh97 > 0.0 && ll97 > hh97);
        assert!(synthesis_norm(false, 20, SubbandOrientation::LL).is_finite());
    }
}
