//! HEALPix pixel centres.
//!
//! Only what the regridder needs: the latitude/longitude of every pixel in
//! ring or nested ordering. Nested indices are converted to ring indices and
//! share the ring formulae.

use std::f64::consts::{FRAC_PI_2, PI};

const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

pub fn npix(nside: usize) -> usize {
    12 * nside * nside
}

/// Centre of a ring-ordered pixel as `(lat, lon)` in degrees.
pub fn pix2ang_ring(nside: usize, pix: usize) -> (f64, f64) {
    let nside = nside as i64;
    let pix = pix as i64;
    let npix = 12 * nside * nside;
    let ncap = 2 * nside * (nside - 1);
    let fact2 = 4.0 / npix as f64;

    let (z, phi) = if pix < ncap {
        let iring = (1 + isqrt(1 + 2 * pix)) >> 1;
        let iphi = pix + 1 - 2 * iring * (iring - 1);
        (
            1.0 - (iring * iring) as f64 * fact2,
            (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64,
        )
    } else if pix < npix - ncap {
        let ip = pix - ncap;
        let tmp = ip / (4 * nside);
        let iring = tmp + nside;
        let iphi = ip - tmp * 4 * nside + 1;
        let fodd = if (iring + nside) & 1 == 1 { 1.0 } else { 0.5 };
        (
            (2 * nside - iring) as f64 * 2.0 / (3.0 * nside as f64),
            (iphi as f64 - fodd) * PI / (2.0 * nside as f64),
        )
    } else {
        let ip = npix - pix;
        let iring = (1 + isqrt(2 * ip - 1)) >> 1;
        let iphi = 4 * iring + 1 - (ip - 2 * iring * (iring - 1));
        (
            -1.0 + (iring * iring) as f64 * fact2,
            (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64,
        )
    };

    (z.clamp(-1.0, 1.0).asin().to_degrees(), phi.to_degrees())
}

/// Converts a nested index to the ring index of the same pixel.
pub fn nest2ring(nside: usize, pix: usize) -> usize {
    let nside_i = nside as i64;
    let npface = nside * nside;
    let face = pix / npface;
    let ipf = pix % npface;
    let ix = compress_bits(ipf) as i64;
    let iy = compress_bits(ipf >> 1) as i64;

    let nl4 = 4 * nside_i;
    let npix = 12 * nside_i * nside_i;
    let ncap = 2 * nside_i * (nside_i - 1);
    let jr = JRLL[face] * nside_i - ix - iy - 1;

    let (nr, n_before, kshift) = if jr < nside_i {
        (jr, 2 * jr * (jr - 1), 0)
    } else if jr > 3 * nside_i {
        let nr = nl4 - jr;
        (nr, npix - 2 * (nr + 1) * nr, 0)
    } else {
        (nside_i, ncap + (jr - nside_i) * nl4, (jr - nside_i) & 1)
    };

    let mut jp = (JPLL[face] * nr + ix - iy + 1 + kshift) / 2;
    if jp > nl4 {
        jp -= nl4;
    } else if jp < 1 {
        jp += nl4;
    }
    (n_before + jp - 1) as usize
}

/// Keeps the even bits of `v`, packed.
fn compress_bits(v: usize) -> usize {
    let mut out = 0;
    let mut bit = 0;
    let mut v = v;
    while v != 0 {
        out |= (v & 1) << bit;
        v >>= 2;
        bit += 1;
    }
    out
}

fn isqrt(v: i64) -> i64 {
    let mut r = (v as f64).sqrt() as i64;
    while r * r > v {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= v {
        r += 1;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn nside1_ring_centres() {
        // First ring of nside=1 sits at z = 2/3, longitudes 45, 135, ...
        let (lat, lon) = pix2ang_ring(1, 0);
        assert!((lat - (2.0f64 / 3.0).asin().to_degrees()).abs() < 1e-12);
        assert!((lon - 45.0).abs() < 1e-12);
        let (lat, _) = pix2ang_ring(1, 4);
        assert!(lat.abs() < 1e-12);
        let (lat, _) = pix2ang_ring(1, 11);
        assert!((lat + (2.0f64 / 3.0).asin().to_degrees()).abs() < 1e-12);
    }

    #[test]
    fn nest2ring_is_a_permutation() {
        for nside in [1, 2, 4, 8] {
            let ring: HashSet<usize> = (0..npix(nside)).map(|p| nest2ring(nside, p)).collect();
            assert_eq!(ring.len(), npix(nside));
            assert!(ring.iter().all(|&r| r < npix(nside)));
        }
    }

    #[test]
    fn equal_area_latitudes_are_symmetric() {
        let nside = 4;
        let total: f64 = (0..npix(nside)).map(|p| pix2ang_ring(nside, p).0).sum();
        assert!(total.abs() < 1e-9);
    }
}
