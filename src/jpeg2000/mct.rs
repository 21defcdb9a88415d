//! Multi-component transforms on the first three components (Annex G):
//! the reversible RCT for 5/3 coding and the irreversible ICT for 9/7.

use rayon::prelude::*;

pub fn forward_rct(c0: &mut [i32], c1: &mut [i32], c2: &mut [i32]) {
    c0.par_iter_mut()
        .zip(c1.par_iter_mut())
        .zip(c2.par_iter_mut())
        .for_each(|((r, g), b)| {
            let (rv, gv, bv) = (*r, *g, *b);
            *r = (rv + 2 * gv + bv) >> 2;
            *g = bv - gv;
            *b = rv - gv;
        });
}

pub fn inverse_rct(c0: &mut [i32], c1: &mut [i32], c2: &mut [i32]) {
    c0.par_iter_mut()
        .zip(c1.par_iter_mut())
        .zip(c2.par_iter_mut())
        .for_each(|((y, u), v)| {
            let g = *y - ((*u + *v) >> 2);
            let r = *v + g;
            let b = *u + g;
            *y = r;
            *u = g;
            *v = b;
        });
}

pub fn forward_ict(c0: &mut [f32], c1: &mut [f32], c2: &mut [f32]) {
    c0.par_iter_mut()
        .zip(c1.par_iter_mut())
        .zip(c2.par_iter_mut())
        .for_each(|((r, g), b)| {
            let (rv, gv, bv) = (*r, *g, *b);
            *r = 0.299 * rv + 0.587 * gv + 0.114 * bv;
            *g = -0.168_736 * rv - 0.331_264 * gv + 0.5 * bv;
            *b = 0.5 * rv - 0.418_688 * gv - 0.081_312 * bv;
        });
}

pub fn inverse_ict(c0: &mut [f32], c1: &mut [f32], c2: &mut [f32]) {
    c0.par_iter_mut()
        .zip(c1.par_iter_mut())
        .zip(c2.par_iter_mut())
        .for_each(|((y, cb), cr)| {
            let (yv, cbv, crv) = (*y, *cb, *cr);
            *y = yv + 1.402 * crv;
            *cb = yv - 0.344_136 * cbv - 0.714_136 * crv;
            *cr = yv + 1.772 * cbv;
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rct_is_lossless() {
        let r: Vec<i32> = (0..300).map(|i| (i * 7 % 256) - 128).collect();
        let g: Vec<i32> = (0..300).map(|i| (i * 13 % 256) - 128).collect();
        let b: Vec<i32> = (0..300).map(|i| (i * 29 % 256) - 128).collect();
        let (mut c0, mut c1, mut c2) = (r.clone(), g.clone(), b.clone());
        forward_rct(&mut c0, &mut c1, &mut c2);
        inverse_rct(&mut c0, &mut c1, &mut c2);
        assert_eq!((c0, c1, c2), (r, g, b));
    }

    #[test]
    fn test_ict_round_trip_and_grey_axis() {
        let (mut c0, mut c1, mut c2) = (vec![10.0, 100.0], vec![10.0, -50.0], vec![10.0, 30.0]);
        forward_ict(&mut c0, &mut c1, &mut c2);
        // Grey has no chroma.
        assert!(c1[0].abs() < 1e-4 && c2[0].abs() < 1e-4);
        inverse_ict(&mut c0, &mut c1, &mut c2);
        assert!((c0[1] - 100.0).abs() < 1e-2);
        assert!((c1[1] + 50.0).abs() < 1e-2);
        assert!((c2[1] - 30.0).abs() < 1e-2);
    }
}
