//! Sparse interpolation weights between two horizontal grids.
//!
//! Weights are stored row-compressed: target cell `t` is the weighted mean of
//! `columns[row_offsets[t]..row_offsets[t + 1]]` with the matching `weights`.
//! Application renormalizes over the source cells that are not NaN, so rows
//! never need to sum to exactly one and missing data never leaks into valid
//! targets.

use super::RegridMethod;
use crate::errors::{AquaError, AquaResult};
use crate::grid::{angular_distance, GridKind, HorizontalGrid};
use ndarray::{ArrayView1, ArrayViewMut1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegridWeights {
    pub source_grid: String,
    pub target_grid: String,
    pub method: RegridMethod,
    /// Fingerprint of the source validity mask, if one was applied.
    pub mask_digest: Option<u64>,
    pub n_source: usize,
    pub n_target: usize,
    pub row_offsets: Vec<usize>,
    pub columns: Vec<usize>,
    pub weights: Vec<f64>,
}

type Row = Vec<(usize, f64)>;

impl RegridWeights {
    /// Generates weights from `source` to `target`.
    ///
    /// `mask`, when given, flags valid source cells; invalid ones never
    /// contribute to any target.
    pub fn compute(
        source: &HorizontalGrid,
        target: &HorizontalGrid,
        method: RegridMethod,
        mask: Option<&[bool]>,
    ) -> AquaResult<Self> {
        if let Some(mask) = mask {
            if mask.len() != source.size() {
                return Err(AquaError::MalformedGrid {
                    grid: source.name.clone(),
                    reason: format!("mask has {} cells, grid has {}", mask.len(), source.size()),
                });
            }
        }
        let valid = |i: usize| mask.map_or(true, |m| m[i]);

        let rows: Vec<Row> = match method {
            RegridMethod::Nearest => nearest_rows(source, target, &valid),
            RegridMethod::Bilinear => bilinear_rows(source, target, &valid)?,
            RegridMethod::Conservative => match (source.kind, target.kind) {
                (GridKind::Regular { .. }, GridKind::Regular { .. }) => {
                    box_overlap_rows(source, target, &valid)
                }
                _ => membership_rows(source, target, &valid),
            },
        };

        let mut row_offsets = Vec::with_capacity(rows.len() + 1);
        let mut columns = Vec::new();
        let mut weights = Vec::new();
        row_offsets.push(0);
        for row in rows {
            let total: f64 = row.iter().map(|(_, w)| w).sum();
            for (column, weight) in row {
                if weight > 0.0 {
                    columns.push(column);
                    weights.push(weight / total);
                }
            }
            row_offsets.push(columns.len());
        }

        Ok(Self {
            source_grid: source.name.clone(),
            target_grid: target.name.clone(),
            method,
            mask_digest: mask.map(mask_digest),
            n_source: source.size(),
            n_target: target.size(),
            row_offsets,
            columns,
            weights,
        })
    }

    pub fn row(&self, target: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_offsets[target]..self.row_offsets[target + 1];
        self.columns[range.clone()]
            .iter()
            .copied()
            .zip(self.weights[range].iter().copied())
    }

    /// Number of target cells with at least one contributing source cell.
    pub fn covered(&self) -> usize {
        self.row_offsets.windows(2).filter(|w| w[1] > w[0]).count()
    }

    /// Remaps one field, writing into `out`.
    pub fn apply_into(&self, input: ArrayView1<f64>, mut out: ArrayViewMut1<f64>) {
        for (t, slot) in out.iter_mut().enumerate() {
            let mut sum = 0.0;
            let mut total = 0.0;
            for (s, w) in self.row(t) {
                let v = input[s];
                if !v.is_nan() {
                    sum += w * v;
                    total += w;
                }
            }
            *slot = if total > 0.0 { sum / total } else { f64::NAN };
        }
    }

    /// Checks these weights can remap a field of `ncell` source cells.
    pub fn check_source(&self, ncell: usize) -> AquaResult<()> {
        if ncell != self.n_source || self.row_offsets.len() != self.n_target + 1 {
            return Err(AquaError::WeightsMismatch {
                key: format!("{} -> {}", self.source_grid, self.target_grid),
                reason: format!(
                    "weights expect {} source cells, field has {}",
                    self.n_source, ncell
                ),
            });
        }
        Ok(())
    }
}

/// Stable FNV-1a fingerprint of a validity mask.
pub fn mask_digest(mask: &[bool]) -> u64 {
    mask.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, &valid| {
        (hash ^ u64::from(valid)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Latitude-band index over the cell centres of a grid.
struct CellIndex<'a> {
    grid: &'a HorizontalGrid,
    band_height: f64,
    bands: Vec<Vec<usize>>,
}

impl<'a> CellIndex<'a> {
    fn new(grid: &'a HorizontalGrid, valid: &dyn Fn(usize) -> bool) -> Self {
        let nbands = ((grid.size() as f64).sqrt() as usize).clamp(1, 2048);
        let band_height = 180.0 / nbands as f64;
        let mut index = Self {
            grid,
            band_height,
            bands: vec![Vec::new(); nbands],
        };
        for cell in (0..grid.size()).filter(|&c| valid(c)) {
            let band = index.band_of(grid.lat[cell]);
            index.bands[band].push(cell);
        }
        index
    }

    fn band_of(&self, lat: f64) -> usize {
        (((lat + 90.0) / self.band_height).floor().max(0.0) as usize).min(self.bands.len() - 1)
    }

    /// Closest indexed cell and its angular distance in degrees.
    fn nearest(&self, lat: f64, lon: f64) -> Option<(usize, f64)> {
        let nbands = self.bands.len() as isize;
        let home = self.band_of(lat) as isize;
        let mut best: Option<(usize, f64)> = None;

        for k in 0..nbands {
            let ring = if k == 0 { vec![home] } else { vec![home - k, home + k] };
            for band in ring {
                if band < 0 || band >= nbands {
                    continue;
                }
                for &cell in &self.bands[band as usize] {
                    let d = angular_distance(lat, lon, self.grid.lat[cell], self.grid.lon[cell]);
                    if best.is_none_or(|(_, b)| d < b) {
                        best = Some((cell, d));
                    }
                }
            }
            // Any cell in an unvisited band is at least this far in latitude.
            let south = if home - k > 0 {
                lat - (-90.0 + (home - k) as f64 * self.band_height)
            } else {
                f64::INFINITY
            };
            let north = if home + k + 1 < nbands {
                -90.0 + (home + k + 1) as f64 * self.band_height - lat
            } else {
                f64::INFINITY
            };
            let bound = south.min(north);
            if bound.is_infinite() || best.is_some_and(|(_, b)| b <= bound) {
                break;
            }
        }
        best
    }
}

fn nearest_rows(
    source: &HorizontalGrid,
    target: &HorizontalGrid,
    valid: &(dyn Fn(usize) -> bool + Sync),
) -> Vec<Row> {
    let index = CellIndex::new(source, valid);
    (0..target.size())
        .into_par_iter()
        .map(|t| {
            index
                .nearest(target.lat[t], target.lon[t])
                .map(|(s, _)| vec![(s, 1.0)])
                .unwrap_or_default()
        })
        .collect()
}

fn bilinear_rows(
    source: &HorizontalGrid,
    target: &HorizontalGrid,
    valid: &(dyn Fn(usize) -> bool + Sync),
) -> AquaResult<Vec<Row>> {
    let GridKind::Regular { nlon, nlat } = source.kind else {
        return Err(AquaError::UnsupportedRegrid {
            method: RegridMethod::Bilinear.to_string(),
            grid: source.name.clone(),
        });
    };
    let dlon = 360.0 / nlon as f64;
    let dlat = 180.0 / nlat as f64;

    Ok((0..target.size())
        .into_par_iter()
        .map(|t| {
            let (j0, j1, fy) = if nlat == 1 {
                (0, 0, 0.0)
            } else {
                let y = ((target.lat[t] + 90.0) / dlat - 0.5).clamp(0.0, (nlat - 1) as f64);
                let j0 = (y.floor() as usize).min(nlat - 2);
                (j0, j0 + 1, y - j0 as f64)
            };
            let x = target.lon[t].rem_euclid(360.0) / dlon;
            let i0 = (x.floor() as usize) % nlon;
            let i1 = (i0 + 1) % nlon;
            let fx = x - x.floor();

            [
                (j0 * nlon + i0, (1.0 - fx) * (1.0 - fy)),
                (j0 * nlon + i1, fx * (1.0 - fy)),
                (j1 * nlon + i0, (1.0 - fx) * fy),
                (j1 * nlon + i1, fx * fy),
            ]
            .into_iter()
            .filter(|&(s, w)| w > 0.0 && valid(s))
            .collect()
        })
        .collect())
}

/// Longitude overlap in degrees between `[t0, t1]` and the source columns
/// of width `width` centred on multiples of `width`.
fn column_overlaps(t0: f64, t1: f64, width: f64, ncol: usize) -> Vec<(usize, f64)> {
    let first = ((t0 + width / 2.0) / width).floor() as i64;
    let last = ((t1 + width / 2.0) / width).floor() as i64;
    (first..=last)
        .filter_map(|k| {
            let lo = k as f64 * width - width / 2.0;
            let overlap = t1.min(lo + width) - t0.max(lo);
            (overlap > 0.0).then(|| (k.rem_euclid(ncol as i64) as usize, overlap))
        })
        .collect()
}

/// Exact overlap areas between two regular lon-lat grids.
fn box_overlap_rows(
    source: &HorizontalGrid,
    target: &HorizontalGrid,
    valid: &(dyn Fn(usize) -> bool + Sync),
) -> Vec<Row> {
    let (GridKind::Regular { nlon: snlon, nlat: snlat }, GridKind::Regular { nlon, nlat }) =
        (source.kind, target.kind)
    else {
        return membership_rows(source, target, valid);
    };
    let (sdlon, sdlat) = (360.0 / snlon as f64, 180.0 / snlat as f64);
    let (dlon, dlat) = (360.0 / nlon as f64, 180.0 / nlat as f64);

    (0..target.size())
        .into_par_iter()
        .map(|t| {
            let (j, i) = (t / nlon, t % nlon);
            let south = -90.0 + j as f64 * dlat;
            let north = south + dlat;
            let west = i as f64 * dlon - dlon / 2.0;
            let columns = column_overlaps(west, west + dlon, sdlon, snlon);

            let first_row = ((south + 90.0) / sdlat).floor().max(0.0) as usize;
            let last_row = (((north + 90.0) / sdlat).ceil() as usize).min(snlat);
            let mut row = Vec::new();
            for sj in first_row..last_row {
                let s_south = -90.0 + sj as f64 * sdlat;
                let lo = south.max(s_south);
                let hi = north.min(s_south + sdlat);
                if hi <= lo {
                    continue;
                }
                let band = hi.to_radians().sin() - lo.to_radians().sin();
                for &(si, overlap) in &columns {
                    let s = sj * snlon + si;
                    if valid(s) {
                        row.push((s, band * overlap.to_radians()));
                    }
                }
            }
            row
        })
        .collect()
}

/// Area-weighted remap by assigning each source cell to the target cell
/// containing its centre. Targets that receive nothing take their nearest
/// valid source within one cell spacing.
fn membership_rows(
    source: &HorizontalGrid,
    target: &HorizontalGrid,
    valid: &(dyn Fn(usize) -> bool + Sync),
) -> Vec<Row> {
    let area = source.area_weights();
    let target_index = CellIndex::new(target, &|_| true);
    let owner: Vec<Option<usize>> = (0..source.size())
        .into_par_iter()
        .map(|s| {
            if !valid(s) {
                return None;
            }
            containing_regular_cell(target, source.lat[s], source.lon[s])
                .or_else(|| target_index.nearest(source.lat[s], source.lon[s]).map(|(t, _)| t))
        })
        .collect();

    let mut rows: Vec<Row> = vec![Vec::new(); target.size()];
    for (s, t) in owner.into_iter().enumerate() {
        if let Some(t) = t {
            rows[t].push((s, area[s]));
        }
    }

    let spacing = |n: usize| (4.0 * std::f64::consts::PI / n.max(1) as f64).sqrt().to_degrees();
    let radius = 1.5 * spacing(source.size()).max(spacing(target.size()));
    let source_index = CellIndex::new(source, valid);
    rows.par_iter_mut().enumerate().for_each(|(t, row)| {
        if row.is_empty() {
            if let Some((s, d)) = source_index.nearest(target.lat[t], target.lon[t]) {
                if d <= radius {
                    row.push((s, 1.0));
                }
            }
        }
    });
    rows
}

fn containing_regular_cell(grid: &HorizontalGrid, lat: f64, lon: f64) -> Option<usize> {
    let GridKind::Regular { nlon, nlat } = grid.kind else {
        return None;
    };
    let dlon = 360.0 / nlon as f64;
    let j = (((lat + 90.0) / (180.0 / nlat as f64)).floor().max(0.0) as usize).min(nlat - 1);
    let i = (((lon + dlon / 2.0).rem_euclid(360.0) / dlon).floor() as usize) % nlon;
    Some(j * nlon + i)
}
