//! Post-compression rate-distortion optimisation: convex hulls of each
//! code-block's truncation points and a slope threshold λ shared by all of them.

use super::bit_plane_coder::CodingPass;

/// One feasible truncation point on a block's convex hull.
#[derive(Debug, Clone, Copy)]
struct HullPoint {
    passes: usize,
    bytes: usize,
    distortion: f64,
    /// Distortion decrease per byte on the segment ending here.
    slope: f64,
}

/// Truncation points of one code-block that lie on its rate-distortion hull.
#[derive(Debug, Clone)]
pub struct RdBlock {
    hull: Vec<HullPoint>,
}

impl RdBlock {
    /// `weight` turns index-domain squared error into image-domain error.
    pub fn new(passes: &[CodingPass], weight: f64) -> Self {
        let mut hull = vec![HullPoint {
            passes: 0,
            bytes: 0,
            distortion: 0.0,
            slope: f64::INFINITY,
        }];
        for (n, pass) in passes.iter().enumerate() {
            let distortion = pass.distortion * weight;
            loop {
                let Some(last) = hull.last().copied() else {
                    break;
                };
                let dd = distortion - last.distortion;
                if dd <= 0.0 {
                    break;
                }
                let dr = pass.end.saturating_sub(last.bytes);
                let slope = if dr == 0 { f64::INFINITY } else { dd / dr as f64 };
                if hull.len() > 1 && slope >= last.slope {
                    hull.pop();
                    continue;
                }
                hull.push(HullPoint {
                    passes: n + 1,
                    bytes: pass.end,
                    distortion,
                    slope,
                });
                break;
            }
        }
        Self { hull }
    }

    fn point(&self, lambda: f64) -> &HullPoint {
        let i = self.hull.partition_point(|p| p.slope >= lambda);
        &self.hull[i.saturating_sub(1)]
    }

    /// Passes kept at threshold `lambda`.
    pub fn truncation(&self, lambda: f64) -> usize {
        self.point(lambda).passes
    }

    pub fn bytes(&self, lambda: f64) -> usize {
        self.point(lambda).bytes
    }

    /// Steepest and shallowest finite slopes.
    fn slope_range(&self) -> Option<(f64, f64)> {
        let finite = self.hull.iter().map(|p| p.slope).filter(|s| s.is_finite());
        finite.fold(None, |acc, s| match acc {
            None => Some((s, s)),
            Some((hi, lo)) => Some((hi.max(s), lo.min(s))),
        })
    }
}

pub fn total_bytes(blocks: &[&RdBlock], lambda: f64) -> usize {
    blocks.iter().map(|b| b.bytes(lambda)).sum()
}

/// Smallest λ whose truncations fit in `budget` body bytes.
pub fn lambda_for_budget(blocks: &[&RdBlock], budget: usize) -> f64 {
    let (mut hi, mut lo) = blocks
        .iter()
        .filter_map(|b| b.slope_range())
        .fold((f64::MIN_POSITIVE, f64::MAX), |(hi, lo), (h, l)| (hi.max(h), lo.min(l)));
    if lo > hi {
        return 0.0;
    }
    if total_bytes(blocks, 0.0) <= budget {
        return 0.0;
    }
    hi *= 2.0;
    lo /= 2.0;
    if total_bytes(blocks, hi) > budget {
        // Only zero-length or infinitely steep passes remain.
        return f64::INFINITY;
    }
    for _ in 0..64 {
        let mid = (hi * lo).sqrt();
        if total_bytes(blocks, mid) <= budget {
            hi = mid;
        } else {
            lo = mid;
        }
        if hi / lo < 1.0 + 1e-9 {
            break;
        }
    }
    hi
}

/// Cumulative passes per layer for each block. Layer `l` of `layers` targets
/// `2^(-(layers-1-l)/2)` of `final_bytes`; the last layer is `final_passes`.
pub fn layer_passes(
    blocks: &[&RdBlock],
    final_passes: &[usize],
    final_bytes: usize,
    layers: u16,
) -> Vec<Vec<usize>> {
    let layers = layers.max(1) as usize;
    let mut result: Vec<Vec<usize>> = final_passes.iter().map(|&p| vec![p; layers]).collect();
    for l in (0..layers - 1).rev() {
        let share = 2f64.powf(-((layers - 1 - l) as f64) / 2.0);
        let target = (final_bytes as f64 * share) as usize;
        let lambda = lambda_for_budget(blocks, target);
        for (per_block, block) in result.iter_mut().zip(blocks) {
            per_block[l] = block.truncation(lambda).min(per_block[l + 1]);
        }
    }
    result
}

/// Passes that cover bit-planes `plane` and above of a block with `num_bps` planes.
pub fn passes_down_to_plane(num_bps: u8, plane: i32) -> usize {
    let num_bps = num_bps as i32;
    if plane >= num_bps {
        0
    } else {
        (1 + 3 * (num_bps - 1 - plane.max(0))) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passes(points: &[(usize, f64)]) -> Vec<CodingPass> {
        points
            .iter()
            .map(|&(end, distortion)| CodingPass { end, distortion })
            .collect()
    }

    #[test]
    fn test_hull_drops_dominated_points() {
        // The second point is under the chord from the first to the third.
        let block = RdBlock::new(&passes(&[(10, 100.0), (20, 110.0), (30, 190.0), (40, 195.0)]), 1.0);
        let kept: Vec<usize> = block.hull.iter().map(|p| p.passes).collect();
        assert_eq!(kept, vec![0, 1, 3, 4]);
        assert!(block.hull.windows(2).all(|w| w[0].slope > w[1].slope));
        assert_eq!(block.truncation(f64::INFINITY), 0);
        assert_eq!(block.truncation(0.0), 4);
        // The chord to pass 3 has slope 4.5.
        assert_eq!(block.truncation(5.0), 1);
        assert_eq!(block.truncation(4.0), 3);
    }

    #[test]
    fn test_budget_is_respected() {
        let a = RdBlock::new(&passes(&[(50, 1000.0), (120, 1500.0), (300, 1600.0)]), 1.0);
        let b = RdBlock::new(&passes(&[(20, 900.0), (80, 1200.0), (200, 1300.0)]), 2.0);
        let blocks = [&a, &b];
        for budget in [0, 30, 70, 150, 250, 500, 1000] {
            let lambda = lambda_for_budget(&blocks, budget);
            assert!(total_bytes(&blocks, lambda) <= budget, "budget {budget}");
        }
        assert_eq!(lambda_for_budget(&blocks, 1000), 0.0);
    }

    #[test]
    fn test_layers_are_nested() {
        let a = RdBlock::new(&passes(&[(50, 1000.0), (120, 1500.0), (300, 1600.0)]), 1.0);
        let b = RdBlock::new(&passes(&[(20, 900.0), (80, 1200.0), (200, 1300.0)]), 1.0);
        let blocks = [&a, &b];
        let layers = layer_passes(&blocks, &[3, 2], 380, 4);
        for per_block in &layers {
            assert_eq!(per_block.len(), 4);
            assert!(per_block.windows(2).all(|w| w[0] <= w[1]));
        }
        assert_eq!(layers[0][3], 3);
        assert_eq!(layers[1][3], 2);
    }

    #[test]
    fn test_plane_cut() {
        assert_eq!(passes_down_to_plane(5, 4), 1);
        assert_eq!(passes_down_to_plane(5, 3), 4);
        assert_eq!(passes_down_to_plane(5, 0), 13);
        assert_eq!(passes_down_to_plane(5, -2), 13);
        assert_eq!(passes_down_to_plane(5, 7), 0);
    }
}
