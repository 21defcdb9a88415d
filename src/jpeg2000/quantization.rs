//! Scalar dead-zone quantization and the (exponent, mantissa) step encoding
//! of QCD/QCC (ISO/IEC 15444-1 Annex E).

use super::bit_plane_coder::MAX_BITPLANES;

/// Largest guard-bit count that fits in Sqcd.
pub const MAX_GUARD_BITS: u8 = 7;

pub fn quantize_scalar(coeff: f32, step_size: f32) -> i32 {
    let q = (coeff.abs() / step_size).floor() as i32;
    if coeff < 0.0 { -q } else { q }
}

/// Reconstructs from a doubled tier-1 magnitude, so `m2 / 2` is the index with
/// the usual half-interval bias already applied.
pub fn dequantize_scalar(m2: i32, step_size: f32) -> f32 {
    m2 as f32 * 0.5 * step_size
}

/// Base step for a quality setting: 1/8 at 8 bits for quality 100, doubling
/// every 12.5 points below that.
pub fn step_from_quality(depth: u8, quality: u8) -> f64 {
    let quality = quality.min(100) as f64;
    2f64.powi(depth as i32 - 8) * 2f64.powf((100.0 - quality) / 12.5 - 3.0)
}

/// Expresses a band step relative to its dynamic range `range_bits` (R_b)
/// as `(ε, μ)` with `Δ = 2^(R_b - ε) (1 + μ / 2^11)`.
pub fn encode_step(delta: f64, range_bits: u8) -> (u8, u16) {
    let mut e = delta.log2().floor() as i32;
    let mut mu = ((delta / 2f64.powi(e) - 1.0) * 2048.0).round() as i32;
    if mu >= 2048 {
        mu = 0;
        e += 1;
    }
    let eps = (range_bits as i32 - e).clamp(0, 31);
    (eps as u8, mu.clamp(0, 2047) as u16)
}

pub fn decode_step(eps: u8, mu: u16, range_bits: u8) -> f64 {
    2f64.powi(range_bits as i32 - eps as i32) * (1.0 + mu as f64 / 2048.0)
}

/// Magnitude bit-planes `M_b = G + ε_b - 1`.
pub fn magnitude_bits(guard_bits: u8, eps: u8) -> u8 {
    (guard_bits + eps).saturating_sub(1)
}

/// Bits needed for a magnitude.
pub fn bit_length(magnitude: u32) -> u8 {
    (32 - magnitude.leading_zeros()) as u8
}

/// Exponent for a reversible band: the nominal range, widened when the
/// measured coefficients need more planes with two guard bits.
pub fn reversible_exponent(nominal_range: u8, measured_bits: u8) -> u8 {
    nominal_range.max(measured_bits.saturating_sub(1)).min(31)
}

/// Guard bits that let every band's indices fit in `M_b` planes.
/// `bands` holds `(ε_b, bits of the largest index)`.
pub fn guard_bits_for(bands: impl IntoIterator<Item = (u8, u8)>) -> u8 {
    bands
        .into_iter()
        .map(|(eps, bits)| bits as i32 - eps as i32 + 1)
        .fold(1, i32::max)
        .min(MAX_GUARD_BITS as i32) as u8
}

/// Largest index representable for a band.
pub fn max_index(guard_bits: u8, eps: u8) -> i32 {
    let mb = magnitude_bits(guard_bits, eps).min(MAX_BITPLANES);
    ((1u32 << mb) - 1) as i32
}
